//! `InstructionReorderer` (§4.3): late cleanup pass that collapses a `goto`
//! whose target is simply its own fall-through address, a shape earlier
//! passes (particularly `UnreachableBranchRemover`'s `if` → `goto`
//! collapse) can leave behind once the method has settled.

use crate::graph::ExecutionGraph;
use crate::ir::{CodeAddress, InstructionKind};

use super::{MutableMethod, OptimizerPass, PassOutcome};

pub struct InstructionReorderer;

impl OptimizerPass for InstructionReorderer {
    fn name(&self) -> &'static str {
        "InstructionReorderer"
    }

    fn run(&self, _graph: &ExecutionGraph, method: &mut MutableMethod) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        let candidates: Vec<CodeAddress> = method
            .instructions()
            .iter()
            .filter_map(|instr| match &instr.kind {
                InstructionKind::Goto { target } if *target == instr.fallthrough() => Some(instr.offset),
                _ => None,
            })
            .collect();

        for address in candidates {
            let Some(instruction) = method.instruction_at(address) else {
                continue;
            };
            let nop = crate::ir::Instruction {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::driver::Driver;
    use crate::ir::{ConstValue, Instruction, Method, MethodAccess, MoveCategory};
    use crate::test_support::InMemoryClassManager;

    #[test]
    fn collapses_goto_to_its_own_fallthrough() {
        let method = Method {
            owner: "LFoo;".to_string(),
            name: "f".to_string(),
            descriptor: "()I".to_string(),
            access: MethodAccess {
                is_static: true,
                ..Default::default()
            },
            register_count: 1,
            parameter_registers: vec![],
            instructions: vec![
                Instruction {
                    offset: 0,
                    size: 1,
                    mnemonic: "goto",
                    kind: InstructionKind::Goto { target: 1 },
                },
                Instruction {
                    offset: 1,
                    size: 1,
                    mnemonic: "const/4",
                    kind: InstructionKind::Const {
                        dest: 0,
                        value: ConstValue::Int(7),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 2,
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
        let outcome = InstructionReorderer.run(&execution.graph, &mut mutable);
        assert!(outcome.made_changes);
        assert_eq!(mutable.instruction_at(0).unwrap().kind, InstructionKind::Nop);
    }

    #[test]
    fn leaves_a_genuine_backward_branch_alone() {
        let method = Method {
            owner: "LFoo;".to_string(),
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
        let manager = InMemoryClassManager::default();
        let mut config = Config::default();
        config.bounds.max_address_visits = 3;
        let mut driver = Driver::new(&manager, &config);
        let _ = driver.execute_method(&method);
        let graph = ExecutionGraph::new();
        let mut mutable = MutableMethod::new(method);
        let outcome = InstructionReorderer.run(&graph, &mut mutable);
        assert!(!outcome.made_changes);
    }
}
