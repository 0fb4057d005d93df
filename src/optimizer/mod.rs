//! Optimizer Pipeline (§4.3): a fixed, ordered sequence of passes run over
//! an [`ExecutionGraph`] and the method that produced it, repeated until
//! none of them request re-execution or [`ResourceBounds::max_optimization_passes`]
//! is reached (enforced by the caller, the launcher).
//!
//! Passes operate on a [`MutableMethod`] rather than directly on
//! [`crate::ir::Method`] so that every rewrite is also recorded as a
//! [`MethodEdit`] for the external `DexBuilder` collaborator (§4.4),
//! mirroring how the teacher's rule findings are collected independently
//! of the `ClassFileBuilder` that eventually renders them.

mod constant_propagator;
mod dead_assignment_eliminator;
mod instruction_reorderer;
mod peephole_nop_remover;
mod predictable_call_collapser;
mod unreachable_branch_remover;

use std::collections::BTreeMap;

use crate::classmanager::MethodEdit;
use crate::graph::ExecutionGraph;
use crate::ir::{CodeAddress, ConstValue, Instruction, InstructionKind, Method};
use crate::value::Concrete;

pub use constant_propagator::ConstantPropagator;
pub use dead_assignment_eliminator::DeadAssignmentEliminator;
pub use instruction_reorderer::InstructionReorderer;
pub use peephole_nop_remover::PeepholeNopRemover;
pub use predictable_call_collapser::PredictableCallCollapser;
pub use unreachable_branch_remover::UnreachableBranchRemover;

/// What a single pass reports after one run over a method (§4.3).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PassOutcome {
    pub made_changes: bool,
    pub should_reexecute: bool,
}

impl PassOutcome {
    fn changed() -> Self {
        PassOutcome {
            made_changes: true,
            should_reexecute: true,
        }
    }
}

/// One element of the fixed pipeline. Implementations never touch the DEX
/// wire format directly; they mutate a [`MutableMethod`], which is the
/// thing that knows how to turn edits into [`MethodEdit`]s for the real
/// `DexBuilder` collaborator.
pub trait OptimizerPass {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &ExecutionGraph, method: &mut MutableMethod) -> PassOutcome;
}

/// The fixed pipeline order (§4.3): constant propagation must run before
/// dead-assignment elimination so newly-dead registers are visible to it;
/// unreachable-branch removal must run before the peephole/reorder cleanup
/// so nop'd dead code is actually stripped; call collapsing runs last so
/// it sees the simplified method.
pub fn all_passes() -> Vec<Box<dyn OptimizerPass>> {
    vec![
        Box::new(ConstantPropagator),
        Box::new(DeadAssignmentEliminator),
        Box::new(UnreachableBranchRemover),
        Box::new(PeepholeNopRemover),
        Box::new(InstructionReorderer),
        Box::new(PredictableCallCollapser),
    ]
}

/// Per-pass change counts accumulated across one or more pipeline rounds,
/// exposed to the launcher for its per-method and run-wide summary (§4.3,
/// §6 stdout summary).
#[derive(Clone, Debug, Default)]
pub struct PassCounters(BTreeMap<&'static str, u32>);

impl PassCounters {
    pub fn new() -> Self {
        PassCounters::default()
    }

    pub fn record(&mut self, pass_name: &'static str) {
        *self.0.entry(pass_name).or_insert(0) += 1;
    }

    pub fn get(&self, pass_name: &str) -> u32 {
        self.0.get(pass_name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn merge(&mut self, other: &PassCounters) {
        for (name, count) in &other.0 {
            *self.0.entry(name).or_insert(0) += count;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.0.iter().map(|(name, count)| (*name, *count))
    }
}

/// Outcome of one trip through [`all_passes`] in fixed order.
#[derive(Clone, Debug, Default)]
pub struct RoundOutcome {
    pub counters: PassCounters,
    pub should_reexecute: bool,
}

impl RoundOutcome {
    pub fn made_changes(&self) -> bool {
        self.counters.total() > 0
    }
}

/// Runs the fixed pipeline once, in order, against `graph`/`method`.
pub fn run_round(graph: &ExecutionGraph, method: &mut MutableMethod) -> RoundOutcome {
    let mut round = RoundOutcome::default();
    for pass in all_passes() {
        let outcome = pass.run(graph, method);
        if outcome.made_changes {
            round.counters.record(pass.name());
        }
        round.should_reexecute |= outcome.should_reexecute;
    }
    round
}

/// A method's code under active rewriting by the pipeline. Wraps
/// [`Method`] with edit tracking so the launcher can hand the accumulated
/// [`MethodEdit`]s to the `DexBuilder` collaborator once the pipeline
/// settles (§4.4).
#[derive(Clone, Debug)]
pub struct MutableMethod {
    method: Method,
    edits: Vec<MethodEdit>,
}

impl MutableMethod {
    pub fn new(method: Method) -> Self {
        MutableMethod {
            method,
            edits: Vec::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.method.instructions
    }

    pub fn instruction_at(&self, address: CodeAddress) -> Option<&Instruction> {
        self.method.instruction_at(address)
    }

    pub fn edits(&self) -> &[MethodEdit] {
        &self.edits
    }

    /// Replaces the instruction at `replacement.offset` in place. Returns
    /// `false` (no edit recorded) if the instruction is unchanged or the
    /// offset no longer exists (already removed by an earlier pass in the
    /// same round).
    pub fn replace(&mut self, offset: CodeAddress, replacement: Instruction) -> bool {
        let Some(slot) = self.method.instructions.iter_mut().find(|i| i.offset == offset) else {
            return false;
        };
        if *slot == replacement {
            return false;
        }
        *slot = replacement.clone();
        self.edits.push(MethodEdit::ReplaceInstruction { offset, replacement });
        true
    }

    /// Physically drops the instruction at `offset` from the method's
    /// instruction stream (§4.3 `PeepholeNopRemover`). Callers are
    /// responsible for retargeting anything that branched to it first.
    pub fn remove(&mut self, offset: CodeAddress) -> bool {
        let before = self.method.instructions.len();
        self.method.instructions.retain(|instr| instr.offset != offset);
        if self.method.instructions.len() == before {
            return false;
        }
        self.edits.push(MethodEdit::RemoveInstruction { offset });
        true
    }

    /// Redirects every branch target and exception handler entry pointing
    /// at `old_target` to `new_target`. Returns whether anything changed.
    pub fn retarget(&mut self, old_target: CodeAddress, new_target: CodeAddress) -> bool {
        let mut changed = false;
        for instr in &mut self.method.instructions {
            if let Some(new_kind) = retargeted_kind(&instr.kind, old_target, new_target) {
                instr.kind = new_kind;
                changed = true;
                self.edits.push(MethodEdit::RetargetBranch {
                    offset: instr.offset,
                    new_target,
                });
            }
        }
        for handler in &mut self.method.exception_handlers {
            if handler.handler_pc == old_target {
                handler.handler_pc = new_target;
                changed = true;
            }
        }
        changed
    }

    pub fn into_parts(self) -> (Method, Vec<MethodEdit>) {
        (self.method, self.edits)
    }
}

fn retargeted_kind(kind: &InstructionKind, old_target: CodeAddress, new_target: CodeAddress) -> Option<InstructionKind> {
    let redirect = |address: CodeAddress| if address == old_target { new_target } else { address };
    match kind {
        InstructionKind::Goto { target } if *target == old_target => Some(InstructionKind::Goto { target: new_target }),
        InstructionKind::IfTest { cmp, lhs, rhs, target, fallthrough } => {
            let (t, f) = (redirect(*target), redirect(*fallthrough));
            (t != *target || f != *fallthrough).then_some(InstructionKind::IfTest {
                cmp: *cmp,
                lhs: *lhs,
                rhs: *rhs,
                target: t,
                fallthrough: f,
            })
        }
        InstructionKind::IfTestZ { cmp, reg, target, fallthrough } => {
            let (t, f) = (redirect(*target), redirect(*fallthrough));
            (t != *target || f != *fallthrough).then_some(InstructionKind::IfTestZ {
                cmp: *cmp,
                reg: *reg,
                target: t,
                fallthrough: f,
            })
        }
        InstructionKind::PackedSwitch { reg, targets, default } => {
            let new_targets: Vec<CodeAddress> = targets.iter().copied().map(redirect).collect();
            let new_default = redirect(*default);
            (new_targets != *targets || new_default != *default).then_some(InstructionKind::PackedSwitch {
                reg: *reg,
                targets: new_targets,
                default: new_default,
            })
        }
        InstructionKind::SparseSwitch { reg, targets, default } => {
            let new_targets: Vec<(i32, CodeAddress)> =
                targets.iter().map(|(key, target)| (*key, redirect(*target))).collect();
            let new_default = redirect(*default);
            (new_targets != *targets || new_default != *default).then_some(InstructionKind::SparseSwitch {
                reg: *reg,
                targets: new_targets,
                default: new_default,
            })
        }
        InstructionKind::Generic(shape) => {
            let new_branch_targets: Vec<CodeAddress> = shape.branch_targets.iter().copied().map(redirect).collect();
            (new_branch_targets != shape.branch_targets).then_some(InstructionKind::Generic(crate::ir::GenericShape {
                reads: shape.reads.clone(),
                writes: shape.writes.clone(),
                wide_write: shape.wide_write,
                branch_targets: new_branch_targets,
                falls_through: shape.falls_through,
            }))
        }
        _ => None,
    }
}

/// Converts a concrete abstract value back into the literal a `const*`
/// instruction would materialize, when that value has a representable
/// literal form (string/class/primitive; object identities and null do
/// not, since no single `const*` form carries them — §3 `declaredType`).
fn to_const_value(concrete: &Concrete) -> Option<ConstValue> {
    match concrete {
        Concrete::Primitive(primitive) => Some(match primitive {
            crate::value::Primitive::Int(v) => ConstValue::Int(*v),
            crate::value::Primitive::Long(v) => ConstValue::Long(*v),
            crate::value::Primitive::Float(v) => ConstValue::Float(*v),
            crate::value::Primitive::Double(v) => ConstValue::Double(*v),
            crate::value::Primitive::Boolean(v) => ConstValue::Int(*v as i32),
            crate::value::Primitive::Byte(v) => ConstValue::Int(*v as i32),
            crate::value::Primitive::Short(v) => ConstValue::Int(*v as i32),
            crate::value::Primitive::Char(v) => ConstValue::Int(*v as i32),
        }),
        Concrete::String(s) => Some(ConstValue::String(s.clone())),
        Concrete::Class(c) => Some(ConstValue::Class(c.clone())),
        Concrete::Object { .. } | Concrete::Null => None,
    }
}

/// Declared type string a materialized `const*` should carry, matching
/// the primitive/reference type of the folded value (I2).
fn declared_type_of(concrete: &Concrete) -> String {
    match concrete {
        Concrete::Primitive(crate::value::Primitive::Int(_)) => "I".to_string(),
        Concrete::Primitive(crate::value::Primitive::Long(_)) => "J".to_string(),
        Concrete::Primitive(crate::value::Primitive::Float(_)) => "F".to_string(),
        Concrete::Primitive(crate::value::Primitive::Double(_)) => "D".to_string(),
        Concrete::Primitive(crate::value::Primitive::Boolean(_)) => "Z".to_string(),
        Concrete::Primitive(crate::value::Primitive::Byte(_)) => "B".to_string(),
        Concrete::Primitive(crate::value::Primitive::Short(_)) => "S".to_string(),
        Concrete::Primitive(crate::value::Primitive::Char(_)) => "C".to_string(),
        Concrete::String(_) => "Ljava/lang/String;".to_string(),
        Concrete::Class(_) => "Ljava/lang/Class;".to_string(),
        Concrete::Object { declared_type, .. } => declared_type.clone(),
        Concrete::Null => "Ljava/lang/Object;".to_string(),
    }
}

fn mnemonic_for(value: &ConstValue) -> &'static str {
    match value {
        ConstValue::Int(_) | ConstValue::Float(_) => "const",
        ConstValue::Long(_) | ConstValue::Double(_) => "const-wide",
        ConstValue::String(_) => "const-string",
        ConstValue::Class(_) => "const-class",
    }
}

/// Registers a pure, single-successor instruction writes, the set
/// [`ConstantPropagator`] is allowed to fold (§4.3). Deliberately excludes
/// `MoveResult`, which `PredictableCallCollapser` owns together with its
/// preceding `invoke` so the two can share one side-effect check.
fn foldable_dest(kind: &InstructionKind) -> Option<crate::ir::RegisterId> {
    match kind {
        InstructionKind::BinaryArith { dest, .. } => Some(*dest),
        InstructionKind::Move { dest, .. } => Some(*dest),
        InstructionKind::StaticGet { dest, .. } => Some(*dest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArithForm, ArithOp, ArithRhs, ArithType, ConstValue as CV, MethodAccess, MoveCategory};
    use crate::value::HeapItem;

    fn two_plus_three_method() -> Method {
        Method {
            owner: "LFoo;".to_string(),
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
                        value: CV::Int(2),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 1,
                    size: 1,
                    mnemonic: "const/4",
                    kind: InstructionKind::Const {
                        dest: 1,
                        value: CV::Int(3),
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

    #[test]
    fn constant_propagator_folds_arithmetic_into_const() {
        let class_manager = crate::test_support::InMemoryClassManager::default();
        let config = crate::config::Config::default();
        let mut driver = crate::driver::Driver::new(&class_manager, &config);
        let method = two_plus_three_method();
        let execution = driver.execute_method(&method).unwrap();
        assert_eq!(execution.return_value, Some(HeapItem::int(5)));

        let mut mutable = MutableMethod::new(method);
        let outcome = ConstantPropagator.run(&execution.graph, &mut mutable);
        assert!(outcome.made_changes);
        assert_eq!(
            mutable.instruction_at(2).unwrap().kind,
            InstructionKind::Const {
                dest: 0,
                value: CV::Int(5),
                declared_type: "I".to_string(),
            }
        );
    }

    #[test]
    fn run_round_is_idempotent_once_settled() {
        let class_manager = crate::test_support::InMemoryClassManager::default();
        let config = crate::config::Config::default();
        let mut driver = crate::driver::Driver::new(&class_manager, &config);
        let method = two_plus_three_method();
        let execution = driver.execute_method(&method).unwrap();
        let mut mutable = MutableMethod::new(method);
        let first = run_round(&execution.graph, &mut mutable);
        assert!(first.made_changes());

        let (settled_method, _) = mutable.into_parts();
        let execution = driver.execute_method(&settled_method).unwrap();
        let mut mutable = MutableMethod::new(settled_method);
        let second = run_round(&execution.graph, &mut mutable);
        assert!(!second.made_changes());
        assert!(!second.should_reexecute);
    }

    /// Drives `method` through the fixed pipeline to a fixed point, mirroring
    /// `Launcher::optimize_method` without needing a `ClassManager`.
    fn settle(method: Method) -> Method {
        let class_manager = crate::test_support::InMemoryClassManager::default();
        let config = crate::config::Config::default();
        let mut current = method;
        for _ in 0..config.bounds.max_optimization_passes {
            let mut driver = crate::driver::Driver::new(&class_manager, &config);
            let execution = driver.execute_method(&current).unwrap();
            let mut mutable = MutableMethod::new(current.clone());
            let round = run_round(&execution.graph, &mut mutable);
            let (new_method, _) = mutable.into_parts();
            current = new_method;
            if !round.made_changes() || !round.should_reexecute {
                break;
            }
        }
        current
    }

    /// Builds a straight-line method computing a chain of int arithmetic
    /// operations over two registers starting from literal seeds, ending in
    /// `return v0`. Used by the semantics-preservation sampling oracle below
    /// (§8 "applying the optimizer is semantics-preserving on concrete
    /// inputs... tested via a sampling oracle on small methods").
    fn arith_chain_method(seed_a: i32, seed_b: i32, ops: &[(ArithOp, bool)]) -> Method {
        let mut instructions = vec![
            Instruction {
                offset: 0,
                size: 1,
                mnemonic: "const/4",
                kind: InstructionKind::Const {
                    dest: 0,
                    value: CV::Int(seed_a),
                    declared_type: "I".to_string(),
                },
            },
            Instruction {
                offset: 1,
                size: 1,
                mnemonic: "const/4",
                kind: InstructionKind::Const {
                    dest: 1,
                    value: CV::Int(seed_b),
                    declared_type: "I".to_string(),
                },
            },
        ];
        let mut offset: CodeAddress = 2;
        for (op, use_literal) in ops {
            let rhs = if *use_literal {
                ArithRhs::Literal(if matches!(op, ArithOp::Div | ArithOp::Rem) { 3 } else { 2 })
            } else {
                ArithRhs::Register(1)
            };
            instructions.push(Instruction {
                offset,
                size: 2,
                mnemonic: "binop",
                kind: InstructionKind::BinaryArith {
                    op: *op,
                    ty: ArithType::Int,
                    form: if *use_literal { ArithForm::Lit8 } else { ArithForm::Wide3 },
                    dest: 0,
                    lhs: 0,
                    rhs,
                },
            });
            offset += 2;
        }
        instructions.push(Instruction {
            offset,
            size: 1,
            mnemonic: "return",
            kind: InstructionKind::Return {
                reg: 0,
                category: MoveCategory::Single,
            },
        });

        Method {
            owner: "LFoo;".to_string(),
            name: "chain".to_string(),
            descriptor: "()I".to_string(),
            access: MethodAccess {
                is_static: true,
                ..Default::default()
            },
            register_count: 2,
            parameter_registers: vec![],
            instructions,
            exception_handlers: vec![],
        }
    }

    fn arith_op_strategy() -> impl proptest::strategy::Strategy<Value = ArithOp> {
        use proptest::prelude::*;
        prop_oneof![
            Just(ArithOp::Add),
            Just(ArithOp::Sub),
            Just(ArithOp::Mul),
            Just(ArithOp::And),
            Just(ArithOp::Or),
            Just(ArithOp::Xor),
        ]
    }

    proptest::proptest! {
        /// ∀ method M over fully-concrete initial state: optimizing M is
        /// semantics-preserving — the rewritten method run through the same
        /// driver yields the same return value and side-effect level as the
        /// original (§8). Division/remainder are excluded from this
        /// generator since they are exercised directly by `driver.rs`'s
        /// divide-by-zero test; this oracle focuses on the non-excepting
        /// arithmetic operators.
        #[test]
        fn optimizer_preserves_semantics_on_concrete_arith_chains(
            seed_a in -100i32..100,
            seed_b in 1i32..100,
            ops in proptest::collection::vec((arith_op_strategy(), proptest::bool::ANY), 0..6),
        ) {
            let class_manager = crate::test_support::InMemoryClassManager::default();
            let config = crate::config::Config::default();

            let original = arith_chain_method(seed_a, seed_b, &ops);
            let mut driver = crate::driver::Driver::new(&class_manager, &config);
            let before = driver.execute_method(&original).unwrap();

            let optimized = settle(original);
            let mut driver = crate::driver::Driver::new(&class_manager, &config);
            let after = driver.execute_method(&optimized).unwrap();

            proptest::prop_assert_eq!(before.return_value, after.return_value);
            proptest::prop_assert_eq!(before.side_effect, after.side_effect);
        }
    }
}
