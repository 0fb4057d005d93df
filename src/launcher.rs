//! Launcher / Orchestrator (§2 item 7, §4.6, §6): enumerates classes,
//! applies the include/exclude/support-library filter, drives the
//! optimizer to a fixed point per method, and hands the accumulated edits
//! to the `DexBuilder` collaborator.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::classmanager::{ClassManager, DexBuilder, MethodEdit};
use crate::config::Config;
use crate::driver::Driver;
use crate::errors::{EngineError, EngineResult};
use crate::ir::Method;
use crate::optimizer::{self, MutableMethod, PassCounters};

/// Aggregate result of one launcher run (§6 "stdout summary").
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub classes_seen: usize,
    pub classes_skipped_by_filter: usize,
    pub methods_analyzed: usize,
    pub methods_skipped: usize,
    pub pass_counters: PassCounters,
    pub elapsed: Duration,
}

impl RunSummary {
    /// The one-line human-readable form `--verbose=0..2` prints to stdout.
    pub fn summary_line(&self) -> String {
        format!(
            "dexsimplify: {} classes, {} methods analyzed ({} skipped), {} optimizations applied in {}ms",
            self.classes_seen,
            self.methods_analyzed,
            self.methods_skipped,
            self.pass_counters.total(),
            self.elapsed.as_millis()
        )
    }

    /// Structured form emitted behind `--verbose=3` for machine consumption.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "classesSeen": self.classes_seen,
            "classesSkippedByFilter": self.classes_skipped_by_filter,
            "methodsAnalyzed": self.methods_analyzed,
            "methodsSkipped": self.methods_skipped,
            "optimizationsApplied": self.pass_counters.total(),
            "passCounts": self.pass_counters.iter().collect::<std::collections::BTreeMap<_, _>>(),
            "elapsedMs": self.elapsed.as_millis(),
        })
    }
}

/// Outcome of driving one method to a fixed point, before edits are handed
/// to the `DexBuilder`.
enum MethodOutcome {
    Optimized { edits: Vec<MethodEdit>, counters: PassCounters },
    Skipped,
}

pub struct Launcher<'a> {
    class_manager: &'a dyn ClassManager,
    config: &'a Config,
}

impl<'a> Launcher<'a> {
    pub fn new(class_manager: &'a dyn ClassManager, config: &'a Config) -> Self {
        Launcher { class_manager, config }
    }

    /// Runs the full pipeline: filter classes, optimize every admitted
    /// method, apply the accumulated edits to `dex_builder` in
    /// deterministic class-name order, then finalize the builder.
    pub fn run(&self, dex_builder: &mut dyn DexBuilder) -> EngineResult<RunSummary> {
        let started = Instant::now();
        let mut class_names = self.class_manager.local_class_names();
        class_names.sort();

        let mut summary = RunSummary::default();
        summary.classes_seen = class_names.len();

        let admitted: Vec<&String> = class_names
            .iter()
            .filter(|name| {
                let admitted = self.config.filter.admits_class(name);
                if !admitted {
                    summary.classes_skipped_by_filter += 1;
                }
                admitted
            })
            .collect();

        // Read-only graph-build-and-optimize phase: independent per class,
        // so it may run across `--jobs` worker threads (§4.6). Mutation of
        // `dex_builder` never happens here.
        let per_class_results: Vec<(String, EngineResult<Vec<(Method, MethodOutcome)>>)> = if self.config.jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.jobs)
                .build()
                .map_err(|err| EngineError::Config(err.to_string()))?;
            pool.install(|| {
                admitted
                    .par_iter()
                    .map(|name| ((*name).clone(), self.optimize_class(name)))
                    .collect()
            })
        } else {
            admitted
                .iter()
                .map(|name| ((*name).clone(), self.optimize_class(name)))
                .collect()
        };

        // Sequential application of edits, in class-name order, so output
        // is byte-for-byte identical regardless of `--jobs`.
        for (class_name, result) in per_class_results {
            let outcomes = result?;
            for (method, outcome) in outcomes {
                match outcome {
                    MethodOutcome::Optimized { edits, counters } => {
                        summary.methods_analyzed += 1;
                        summary.pass_counters.merge(&counters);
                        if !edits.is_empty() {
                            dex_builder.apply(&method.owner, &method.name, &method.descriptor, edits);
                        }
                    }
                    MethodOutcome::Skipped => {
                        summary.methods_skipped += 1;
                    }
                }
            }
            info!(class = %class_name, "class processed");
        }

        dex_builder.finish()?;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    fn optimize_class(&self, class_name: &str) -> EngineResult<Vec<(Method, MethodOutcome)>> {
        let Some(class) = self.class_manager.local_class(class_name) else {
            return Ok(Vec::new());
        };
        class
            .methods
            .iter()
            .filter(|method| method.name != "<clinit>")
            .map(|method| {
                let outcome = if self.config.filter.admits_method(&method.signature()) {
                    self.optimize_method(method)?
                } else {
                    MethodOutcome::Skipped
                };
                Ok((method.clone(), outcome))
            })
            .collect()
    }

    /// Drives one method through graph-build + optimizer rounds until a
    /// round makes no changes, `shouldReexecute` is false, or
    /// `maxOptimizationPasses` is reached (§4.3, §5).
    fn optimize_method(&self, method: &Method) -> EngineResult<MethodOutcome> {
        let mut current = method.clone();
        let mut all_edits = Vec::new();
        let mut counters = PassCounters::new();

        for _ in 0..self.config.bounds.max_optimization_passes {
            let mut driver = Driver::new(self.class_manager, self.config);
            let execution = match driver.execute_method(&current) {
                Ok(execution) => execution,
                Err(err) if is_recoverable(&err) => {
                    warn!(
                        method = %method.signature(),
                        error = %err,
                        "skipping method"
                    );
                    return Ok(MethodOutcome::Skipped);
                }
                Err(err) => return Err(err),
            };

            let mut mutable = MutableMethod::new(current.clone());
            let round = optimizer::run_round(&execution.graph, &mut mutable);
            let made_changes = round.made_changes();
            counters.merge(&round.counters);
            let (new_method, edits) = mutable.into_parts();
            all_edits.extend(edits);
            current = new_method;

            if !made_changes || !round.should_reexecute {
                break;
            }
        }

        Ok(MethodOutcome::Optimized {
            edits: all_edits,
            counters,
        })
    }
}

/// `ResourceBoundExceeded` and `MalformedInstruction` are recovered at the
/// per-method boundary by skipping the method (§7); every other error
/// variant propagates and aborts the run.
fn is_recoverable(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::ResourceBoundExceeded(_) | EngineError::MalformedInstruction { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        ArithForm, ArithOp, ArithRhs, ArithType, Class, ConstValue, Instruction, InstructionKind, MethodAccess,
        MoveCategory,
    };
    use crate::test_support::{InMemoryClassManager, InMemoryDexBuilder};

    fn fold_me() -> Method {
        // int f() { return 2 + 3; }
        Method {
            owner: "Lcom/app/A;".to_string(),
            name: "f".to_string(),
            descriptor: "()I".to_string(),
            access: MethodAccess {
                is_static: true,
                ..Default::default()
            },
            register_count: 2,
            parameter_registers: vec![],
            instructions: vec![
                Instruction {
                    offset: 0,
                    size: 1,
                    mnemonic: "const/4",
                    kind: InstructionKind::Const {
                        dest: 0,
                        value: ConstValue::Int(2),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 1,
                    size: 1,
                    mnemonic: "const/4",
                    kind: InstructionKind::Const {
                        dest: 1,
                        value: ConstValue::Int(3),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 2,
                    size: 2,
                    mnemonic: "add-int",
                    kind: InstructionKind::BinaryArith {
                        op: ArithOp::Add,
                        ty: ArithType::Int,
                        form: ArithForm::Wide3,
                        dest: 0,
                        lhs: 0,
                        rhs: ArithRhs::Register(1),
                    },
                },
                Instruction {
                    offset: 4,
                    size: 1,
                    mnemonic: "return",
                    kind: InstructionKind::Return {
                        reg: 0,
                        category: MoveCategory::Single,
                    },
                },
            ],
            exception_handlers: vec![],
        }
    }

    fn class_with(name: &str, method: Method) -> Class {
        Class {
            name: name.to_string(),
            super_name: None,
            interfaces: vec![],
            static_fields: vec![],
            methods: vec![method],
            has_static_initializer: false,
        }
    }

    #[test]
    fn optimizes_admitted_class_and_applies_edits() {
        let mut manager = InMemoryClassManager::default();
        manager.insert(class_with("Lcom/app/A;", fold_me()));
        let config = Config::default();
        let launcher = Launcher::new(&manager, &config);
        let mut builder = InMemoryDexBuilder::default();
        let summary = launcher.run(&mut builder).unwrap();
        assert_eq!(summary.methods_analyzed, 1);
        assert_eq!(summary.methods_skipped, 0);
        assert!(summary.pass_counters.total() > 0);
        assert!(!builder.edits_for("Lcom/app/A;", "f", "()I").is_empty());
    }

    #[test]
    fn include_filter_skips_non_matching_method_signatures() {
        let mut manager = InMemoryClassManager::default();
        manager.insert(class_with("Lcom/app/A;", fold_me()));
        manager.insert(class_with("Lorg/other/B;", fold_me()));
        let mut config = Config::default();
        // A method-signature filter (§6), not a class-name filter: it must
        // match against `owner->name(descriptor)`, so a class-name-shaped
        // prefix still narrows correctly since every signature starts with
        // its owner's name.
        config.filter = crate::config::ClassFilter::new(Some(r"^Lcom/app/"), None, false).unwrap();
        let launcher = Launcher::new(&manager, &config);
        let mut builder = InMemoryDexBuilder::default();
        let summary = launcher.run(&mut builder).unwrap();
        assert_eq!(summary.classes_skipped_by_filter, 0);
        assert_eq!(summary.methods_analyzed, 1);
        assert_eq!(summary.methods_skipped, 1);
        assert!(builder.edits_for("Lorg/other/B;", "f", "()I").is_empty());
    }

    #[test]
    fn include_filter_can_target_a_single_method_signature() {
        let mut manager = InMemoryClassManager::default();
        manager.insert(class_with("Lcom/app/A;", fold_me()));
        let mut config = Config::default();
        config.filter = crate::config::ClassFilter::new(Some(r"->f\(\)I$"), None, false).unwrap();
        let launcher = Launcher::new(&manager, &config);
        let mut builder = InMemoryDexBuilder::default();
        let summary = launcher.run(&mut builder).unwrap();
        assert_eq!(summary.methods_analyzed, 1);
        assert!(!builder.edits_for("Lcom/app/A;", "f", "()I").is_empty());
    }

    #[test]
    fn resource_bound_breach_skips_method_and_preserves_it() {
        let mut manager = InMemoryClassManager::default();
        let looping = Method {
            owner: "Lcom/app/A;".to_string(),
            name: "loop".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess {
                is_static: true,
                ..Default::default()
            },
            register_count: 1,
            parameter_registers: vec![],
            instructions: vec![Instruction {
                offset: 0,
                size: 1,
                mnemonic: "goto",
                kind: InstructionKind::Goto { target: 0 },
            }],
            exception_handlers: vec![],
        };
        manager.insert(class_with("Lcom/app/A;", looping));
        let mut config = Config::default();
        config.bounds.max_address_visits = 5;
        let launcher = Launcher::new(&manager, &config);
        let mut builder = InMemoryDexBuilder::default();
        let summary = launcher.run(&mut builder).unwrap();
        assert_eq!(summary.methods_skipped, 1);
        assert_eq!(summary.methods_analyzed, 0);
        assert!(builder.edits_for("Lcom/app/A;", "loop", "()V").is_empty());
    }
}
