//! Virtual Machine Driver (§4.2): executes a method by seeding an initial
//! node, repeatedly dequeuing nodes, invoking the opcode handler, and
//! enqueueing children, within the resource bounds of §5.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use thiserror::Error;

use crate::classmanager::ClassManager;
use crate::config::Config;
use crate::errors::{EngineError, EngineResult};
use crate::graph::{ExecutionGraph, NodeId};
use crate::interpreter::{self, ExecutionHost, InvocationHost, StepOutcome};
use crate::ir::{CodeAddress, InstructionKind, InvokeKind, Method, MethodRef};
use crate::safe_call;
use crate::state::{ClassState, InitStatus, MethodState};
use crate::value::{HeapItem, SideEffectLevel};

/// One of the four named resource bounds of §5, each checked at a single
/// well-defined point.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum ResourceBound {
    #[error("address {address:#06x} visited more than {limit} times")]
    AddressVisits { address: CodeAddress, limit: u32 },
    #[error("call depth exceeded limit of {limit}")]
    CallDepth { limit: u32 },
    #[error("method visited more than {limit} times in this run")]
    MethodVisits { limit: u32 },
    #[error("execution time exceeded {limit_ms}ms")]
    ExecutionTime { limit_ms: u64 },
}

/// Result of successfully building a method's execution graph: the graph
/// itself plus the facts the optimizer and any recursive caller need.
pub struct MethodExecution {
    pub graph: ExecutionGraph,
    /// Join of every reachable node's return value, `None` if the method
    /// never reaches a `return` (always throws, or was cut off).
    pub return_value: Option<HeapItem>,
    pub side_effect: SideEffectLevel,
}

/// Executes methods over an abstract value domain, maintaining the
/// per-VM-instance class-state cache (§5 "Shared resources") and the
/// resource-bound counters of §5.
pub struct Driver<'a> {
    class_manager: &'a dyn ClassManager,
    config: &'a Config,
    class_states: BTreeMap<String, ClassState>,
    method_visit_counts: BTreeMap<String, u32>,
    call_depth: u32,
    started_at: Instant,
}

impl<'a> Driver<'a> {
    pub fn new(class_manager: &'a dyn ClassManager, config: &'a Config) -> Self {
        Driver {
            class_manager,
            config,
            class_states: BTreeMap::new(),
            method_visit_counts: BTreeMap::new(),
            call_depth: 0,
            started_at: Instant::now(),
        }
    }

    /// Top-level entry point (§4.2 step 1): seeds the root node with
    /// parameter registers `Unknown` (no caller to supply concrete
    /// arguments) and builds the full graph.
    pub fn execute_method(&mut self, method: &Method) -> EngineResult<MethodExecution> {
        let mut initial = MethodState::new();
        for register in &method.parameter_registers {
            initial.set(*register, HeapItem::Unknown);
        }
        self.run(method, initial)
    }

    /// Recursive entry point used by `invoke-*` resolution (§4.1 "InvokeOp"):
    /// seeds parameter registers from the caller's concrete argument values.
    fn execute_method_with_args(&mut self, method: &Method, args: &[HeapItem]) -> EngineResult<MethodExecution> {
        let mut initial = MethodState::new();
        for (register, value) in method.parameter_registers.iter().zip(args.iter()) {
            initial.set(*register, value.clone());
        }
        self.run(method, initial)
    }

    fn run(&mut self, method: &Method, initial_state: MethodState) -> EngineResult<MethodExecution> {
        let signature = method.signature();
        let visits = self.method_visit_counts.entry(signature).or_insert(0);
        *visits += 1;
        if *visits > self.config.bounds.max_method_visits {
            return Err(EngineError::from(ResourceBound::MethodVisits {
                limit: self.config.bounds.max_method_visits,
            }));
        }

        let mut graph = ExecutionGraph::new();
        let mut address_visits: BTreeMap<CodeAddress, u32> = BTreeMap::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut method_side_effect = SideEffectLevel::None;

        let Some(entry) = method.entry_address() else {
            return Ok(MethodExecution {
                graph,
                return_value: None,
                side_effect: SideEffectLevel::None,
            });
        };
        let (entry_id, _) = graph.merge_or_create(entry, initial_state, None);
        queue.push_back(entry_id);

        while let Some(node_id) = queue.pop_front() {
            if self.started_at.elapsed() > self.config.bounds.max_execution_time {
                return Err(EngineError::from(ResourceBound::ExecutionTime {
                    limit_ms: self.config.bounds.max_execution_time.as_millis() as u64,
                }));
            }

            let address = graph.node(node_id).address;
            let visit_count = address_visits.entry(address).or_insert(0);
            *visit_count += 1;
            if *visit_count > self.config.bounds.max_address_visits {
                return Err(EngineError::from(ResourceBound::AddressVisits {
                    address,
                    limit: self.config.bounds.max_address_visits,
                }));
            }

            let Some(instruction) = method.instruction_at(address) else {
                return Err(EngineError::MalformedInstruction {
                    offset: address,
                    opcode: 0,
                    reason: "no instruction at graph node address".to_string(),
                });
            };
            let instruction = instruction.clone();

            let mut working_state = graph.node(node_id).state_on_entry.clone();
            working_state.begin_instruction();
            let outcome = interpreter::execute(&instruction, &mut working_state, self)?;
            method_side_effect = method_side_effect.join(working_state.side_effect);
            graph.record_instruction_effect(address, working_state.last_instruction_effect);
            graph.mark_expanded(node_id);

            let successors = match &outcome {
                StepOutcome::Fallthrough => Some(instruction.concrete_successors()),
                StepOutcome::Branch(targets) => Some(targets.clone()),
                StepOutcome::Exception(_) => None,
            };

            match outcome {
                StepOutcome::Fallthrough | StepOutcome::Branch(_) => {
                    // A revisit that now computes successfully (e.g. after
                    // a merge widened a divisor away from zero) supersedes
                    // any exception this node carried from an earlier visit
                    // (§3 `clearExceptions`).
                    graph.node_mut(node_id).clear_exceptions();
                    for successor in successors.unwrap_or_default() {
                        let (child_id, changed) =
                            graph.merge_or_create(successor, working_state.clone(), Some(node_id));
                        if changed || !graph.node(child_id).expanded {
                            queue.push_back(child_id);
                        }
                    }
                }
                StepOutcome::Exception(exception) => {
                    let exception_type = virtual_exception_type(&exception);
                    let handler = method
                        .handlers_covering(address)
                        .into_iter()
                        .find(|handler| match &handler.exception_type {
                            None => true,
                            Some(declared) => exception_type.as_deref() == Some(declared.as_str()),
                        });
                    match handler {
                        Some(handler) => {
                            let mut handler_state = working_state.clone();
                            handler_state.pending_exception = Some(exception);
                            let (child_id, changed) =
                                graph.merge_or_create(handler.handler_pc, handler_state, Some(node_id));
                            if changed || !graph.node(child_id).expanded {
                                queue.push_back(child_id);
                            }
                        }
                        None => {
                            // No covering handler: the node stays terminal
                            // with no children, per I3 ("unless the handler
                            // called clearChildren"), but the exception
                            // itself is attached to the node rather than
                            // discarded — exceptions are values on edges,
                            // never raised as host errors (§7 policy).
                            graph.node_mut(node_id).set_exception(exception);
                        }
                    }
                }
            }
        }

        let return_value = aggregate_return_value(method, &graph);

        Ok(MethodExecution {
            graph,
            return_value,
            side_effect: method_side_effect,
        })
    }

    /// Looks up (creating if absent) the cached class state, running
    /// `<clinit>` first if it has not started (I4). Re-entry while a
    /// class's own `<clinit>` is `InProgress` is detected and short
    /// -circuited: the caller sees whatever static fields have been
    /// assigned so far rather than recursing again (§9 re-architecture
    /// guidance).
    fn ensure_class_initialized(&mut self, class_name: &str) -> EngineResult<SideEffectLevel> {
        let status = self
            .class_states
            .entry(class_name.to_string())
            .or_insert_with(|| ClassState::new(class_name))
            .init_status;

        match status {
            InitStatus::InProgress | InitStatus::Completed => {
                return Ok(self.class_states[class_name].aggregate_level);
            }
            InitStatus::NotStarted => {}
        }

        self.class_states.get_mut(class_name).unwrap().init_status = InitStatus::InProgress;

        let aggregate_level = if let Some(class) = self.class_manager.local_class(class_name) {
            if let Some(clinit) = class.clinit().cloned() {
                if self.call_depth >= self.config.bounds.max_call_depth {
                    SideEffectLevel::Strong
                } else {
                    self.call_depth += 1;
                    let outcome = self.execute_method_with_args(&clinit, &[]);
                    self.call_depth -= 1;
                    match outcome {
                        Ok(execution) => execution.side_effect,
                        Err(_) => SideEffectLevel::Strong,
                    }
                }
            } else {
                SideEffectLevel::None
            }
        } else {
            // Non-local (platform) class: assume its `<clinit>` cannot be
            // observed, so conservatively STRONG unless configuration
            // declares the class itself safe.
            if self.config.safe_classes.contains(class_name) {
                SideEffectLevel::None
            } else {
                SideEffectLevel::Strong
            }
        };

        let state = self.class_states.get_mut(class_name).unwrap();
        state.init_status = InitStatus::Completed;
        state.aggregate_level = aggregate_level;
        Ok(aggregate_level)
    }
}

impl<'a> InvocationHost for Driver<'a> {
    fn resolve_call(
        &mut self,
        _kind: InvokeKind,
        method: &MethodRef,
        args: &[HeapItem],
    ) -> EngineResult<interpreter::invoke::InvokeOutcome> {
        // Virtual/interface dispatch is not resolved against a type
        // hierarchy (no such model exists here, §1 Non-goals): any
        // invoke kind whose target resolves to a local method with
        // concrete arguments is analyzed directly, which is exact for
        // `static`/`direct` and a sound approximation (may miss an
        // override) for `virtual`/`interface`/`super`.
        let all_concrete = args.iter().all(|arg| arg.as_concrete().is_some());

        if all_concrete {
            if let Some(local) = self.class_manager.method(&method.owner, &method.name, &method.descriptor) {
                let local = local.clone();
                if self.call_depth >= self.config.bounds.max_call_depth {
                    return Err(EngineError::from(ResourceBound::CallDepth {
                        limit: self.config.bounds.max_call_depth,
                    }));
                }
                self.call_depth += 1;
                let outcome = self.execute_method_with_args(&local, args);
                self.call_depth -= 1;
                return Ok(match outcome {
                    Ok(execution) => interpreter::invoke::InvokeOutcome {
                        return_value: execution.return_value.unwrap_or(HeapItem::Unknown),
                        side_effect: execution.side_effect,
                    },
                    Err(_) => interpreter::invoke::InvokeOutcome::opaque(),
                });
            }

            if self
                .config
                .safe_list
                .contains(&method.owner, &method.name, &method.descriptor)
            {
                if let Some(value) = safe_call::invoke(&method.owner, &method.name, &method.descriptor, args) {
                    return Ok(interpreter::invoke::InvokeOutcome {
                        return_value: value,
                        side_effect: SideEffectLevel::None,
                    });
                }
            }
        }

        Ok(interpreter::invoke::InvokeOutcome::opaque())
    }
}

impl<'a> ExecutionHost for Driver<'a> {
    fn read_static(&mut self, class_name: &str, field_name: &str) -> EngineResult<(HeapItem, SideEffectLevel)> {
        let level = self.ensure_class_initialized(class_name)?;
        let value = self
            .class_states
            .get(class_name)
            .and_then(|state| state.get_static(field_name))
            .cloned()
            .unwrap_or(HeapItem::Unknown);
        Ok((value, level))
    }

    fn write_static(&mut self, class_name: &str, field_name: &str, value: HeapItem) -> EngineResult<SideEffectLevel> {
        let level = self.ensure_class_initialized(class_name)?;
        self.class_states
            .get_mut(class_name)
            .expect("ensure_class_initialized populates the entry")
            .set_static(field_name, value);
        Ok(level.join(SideEffectLevel::Weak))
    }

    fn new_instance_effect(&mut self, class_name: &str) -> EngineResult<SideEffectLevel> {
        if self.config.safe_classes.contains(class_name) {
            return Ok(SideEffectLevel::None);
        }
        if self.class_manager.is_local(class_name) {
            self.ensure_class_initialized(class_name)
        } else {
            Ok(SideEffectLevel::Strong)
        }
    }
}

fn virtual_exception_type(value: &HeapItem) -> Option<String> {
    match value {
        HeapItem::VirtualException { exception_type } => Some(exception_type.clone()),
        _ => None,
    }
}

/// Joins the value returned along every terminal `return`/`return-void`
/// node reachable in the graph. A method that always throws reports `None`.
fn aggregate_return_value(method: &Method, graph: &ExecutionGraph) -> Option<HeapItem> {
    let mut joined: Option<HeapItem> = None;
    for node_id in graph.terminal_nodes() {
        let node = graph.node(node_id);
        let Some(instruction) = method.instruction_at(node.address) else {
            continue;
        };
        let value = match &instruction.kind {
            InstructionKind::ReturnVoid => HeapItem::Unknown,
            InstructionKind::Return { reg, .. } => node.state_on_entry.get(*reg).cloned().unwrap_or(HeapItem::Unknown),
            _ => continue,
        };
        joined = Some(match joined {
            None => value,
            Some(existing) => existing.join(&value),
        });
    }
    joined
}
