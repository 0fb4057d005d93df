//! `DeadAssignmentEliminator` (§4.3): replaces with `nop` any assignment
//! whose destination register is not read on any forward path, computed by
//! a standard backward liveness fixed point over the method's (possibly
//! already rewritten by `ConstantPropagator`) instruction stream.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::ExecutionGraph;
use crate::ir::{ArithRhs, CodeAddress, Instruction, InstructionKind, Method, RegisterId};

use super::{MutableMethod, OptimizerPass, PassOutcome};

pub struct DeadAssignmentEliminator;

impl OptimizerPass for DeadAssignmentEliminator {
    fn name(&self) -> &'static str {
        "DeadAssignmentEliminator"
    }

    fn run(&self, _graph: &ExecutionGraph, method: &mut MutableMethod) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        let live_out = compute_live_out(method.method());

        let addresses: Vec<CodeAddress> = method
            .instructions()
            .iter()
            .filter(|instr| pure_assignment_dest(&instr.kind).is_some())
            .map(|instr| instr.offset)
            .collect();

        for address in addresses {
            let Some(instruction) = method.instruction_at(address) else {
                continue;
            };
            let Some(dest) = pure_assignment_dest(&instruction.kind) else {
                continue;
            };
            let live = live_out.get(&address).map(|set| set.contains(&dest)).unwrap_or(false);
            if live {
                continue;
            }
            let nop = Instruction {
                offset: instruction.offset,
                size: instruction.size,
                mnemonic: "nop",
                kind: InstructionKind::Nop,
            };
            if method.replace(address, nop) {
                outcome = PassOutcome::changed();
            }
        }

        outcome
    }
}

/// Destination register of an instruction whose only effect (in this
/// engine's abstraction) is a register write: safe to drop outright when
/// that register is dead, unlike `sget`/`iget`/`invoke`, which may trigger
/// `<clinit>` or recorded side effects even when their result is unused.
fn pure_assignment_dest(kind: &InstructionKind) -> Option<RegisterId> {
    match kind {
        InstructionKind::Const { dest, .. } => Some(*dest),
        InstructionKind::Move { dest, .. } => Some(*dest),
        InstructionKind::MoveResult { dest, .. } => Some(*dest),
        InstructionKind::MoveException { dest } => Some(*dest),
        InstructionKind::InstanceOf { dest, .. } => Some(*dest),
        InstructionKind::ArrayLength { dest, .. } => Some(*dest),
        _ => None,
    }
}

fn reads(kind: &InstructionKind) -> Vec<RegisterId> {
    match kind {
        InstructionKind::Move { src, .. } => vec![*src],
        InstructionKind::Return { reg, .. } => vec![*reg],
        InstructionKind::MonitorEnter { reg } | InstructionKind::MonitorExit { reg } => vec![*reg],
        InstructionKind::CheckCast { reg, .. } => vec![*reg],
        InstructionKind::InstanceOf { reg, .. } => vec![*reg],
        InstructionKind::ArrayLength { array, .. } => vec![*array],
        InstructionKind::NewArray { size_reg, .. } => vec![*size_reg],
        InstructionKind::FillArrayData { array } => vec![*array],
        InstructionKind::Throw { reg } => vec![*reg],
        InstructionKind::IfTest { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstructionKind::IfTestZ { reg, .. } => vec![*reg],
        InstructionKind::PackedSwitch { reg, .. } | InstructionKind::SparseSwitch { reg, .. } => vec![*reg],
        InstructionKind::ArrayGet { array, index, .. } => vec![*array, *index],
        InstructionKind::ArrayPut { src, array, index, .. } => vec![*src, *array, *index],
        InstructionKind::InstanceGet { obj, .. } => vec![*obj],
        InstructionKind::InstancePut { src, obj, .. } => vec![*src, *obj],
        InstructionKind::StaticPut { src, .. } => vec![*src],
        InstructionKind::Invoke { args, .. } => args.clone(),
        InstructionKind::BinaryArith { lhs, rhs, .. } => match rhs {
            ArithRhs::Register(r) => vec![*lhs, *r],
            ArithRhs::Literal(_) => vec![*lhs],
        },
        InstructionKind::Generic(shape) => shape.reads.clone(),
        _ => vec![],
    }
}

fn writes(kind: &InstructionKind) -> Vec<RegisterId> {
    match kind {
        InstructionKind::Move { dest, .. } => vec![*dest],
        InstructionKind::MoveResult { dest, .. } => vec![*dest],
        InstructionKind::MoveException { dest } => vec![*dest],
        InstructionKind::Const { dest, .. } => vec![*dest],
        InstructionKind::InstanceOf { dest, .. } => vec![*dest],
        InstructionKind::ArrayLength { dest, .. } => vec![*dest],
        InstructionKind::NewInstance { dest, .. } => vec![*dest],
        InstructionKind::NewArray { dest, .. } => vec![*dest],
        InstructionKind::ArrayGet { dest, .. } => vec![*dest],
        InstructionKind::InstanceGet { dest, .. } => vec![*dest],
        InstructionKind::StaticGet { dest, .. } => vec![*dest],
        InstructionKind::BinaryArith { dest, .. } => vec![*dest],
        InstructionKind::Generic(shape) => shape.writes.clone(),
        _ => vec![],
    }
}

/// Successors used for liveness, which (unlike the driver's concrete
/// control flow) must also follow exception-handler edges: a register read
/// only inside a `catch` block still keeps its assignment alive.
fn successors_of(instruction: &Instruction, method: &Method) -> Vec<CodeAddress> {
    let mut successors = instruction.concrete_successors();
    for handler in method.handlers_covering(instruction.offset) {
        successors.push(handler.handler_pc);
    }
    successors
}

fn compute_live_out(method: &Method) -> BTreeMap<CodeAddress, BTreeSet<RegisterId>> {
    let instructions = &method.instructions;
    let mut live_in: BTreeMap<CodeAddress, BTreeSet<RegisterId>> =
        instructions.iter().map(|instr| (instr.offset, BTreeSet::new())).collect();
    let mut live_out: BTreeMap<CodeAddress, BTreeSet<RegisterId>> = live_in.clone();

    let mut changed = true;
    while changed {
        changed = false;
        for instruction in instructions.iter().rev() {
            let mut out = BTreeSet::new();
            for successor in successors_of(instruction, method) {
                if let Some(set) = live_in.get(&successor) {
                    out.extend(set.iter().copied());
                }
            }
            if &out != live_out.get(&instruction.offset).unwrap() {
                live_out.insert(instruction.offset, out.clone());
                changed = true;
            }

            let mut incoming = out;
            for register in writes(&instruction.kind) {
                incoming.remove(&register);
            }
            for register in reads(&instruction.kind) {
                incoming.insert(register);
            }
            if &incoming != live_in.get(&instruction.offset).unwrap() {
                live_in.insert(instruction.offset, incoming);
                changed = true;
            }
        }
    }

    live_out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::driver::Driver;
    use crate::ir::{ConstValue, MethodAccess, MoveCategory};
    use crate::test_support::InMemoryClassManager;

    #[test]
    fn removes_assignment_never_read_on_any_path() {
        // int f(int x) { int unused = 9; return x; }
        let method = Method {
            owner: "LFoo;".to_string(),
            name: "f".to_string(),
            descriptor: "(I)I".to_string(),
            access: MethodAccess {
                is_static: true,
                ..Default::default()
            },
            register_count: 2,
            parameter_registers: vec![0],
            instructions: vec![
                Instruction {
                    offset: 0,
                    size: 1,
                    mnemonic: "const/4",
                    kind: InstructionKind::Const {
                        dest: 1,
                        value: ConstValue::Int(9),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 1,
                    size: 1,
                    mnemonic: "return",
                    kind: InstructionKind::Return {
                        reg: 0,
                        category: MoveCategory::Single,
                    },
                },
            ],
            exception_handlers: vec![],
        };
        let manager = InMemoryClassManager::default();
        let config = Config::default();
        let mut driver = Driver::new(&manager, &config);
        let execution = driver.execute_method(&method).unwrap();
        let mut mutable = MutableMethod::new(method);
        let outcome = DeadAssignmentEliminator.run(&execution.graph, &mut mutable);
        assert!(outcome.made_changes);
        assert_eq!(mutable.instruction_at(0).unwrap().kind, InstructionKind::Nop);
    }

    #[test]
    fn keeps_assignment_read_by_a_later_instruction() {
        let method = Method {
            owner: "LFoo;".to_string(),
            name: "f".to_string(),
            descriptor: "(I)I".to_string(),
            access: MethodAccess {
                is_static: true,
                ..Default::default()
            },
            register_count: 1,
            parameter_registers: vec![0],
            instructions: vec![Instruction {
                offset: 0,
                size: 1,
                mnemonic: "return",
                kind: InstructionKind::Return {
                    reg: 0,
                    category: MoveCategory::Single,
                },
            }],
            exception_handlers: vec![],
        };
        let manager = InMemoryClassManager::default();
        let config = Config::default();
        let mut driver = Driver::new(&manager, &config);
        let execution = driver.execute_method(&method).unwrap();
        let mut mutable = MutableMethod::new(method);
        let outcome = DeadAssignmentEliminator.run(&execution.graph, &mut mutable);
        assert!(!outcome.made_changes);
    }
}
