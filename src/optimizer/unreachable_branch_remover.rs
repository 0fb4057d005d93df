//! `UnreachableBranchRemover` (§4.3): collapses a conditional branch whose
//! execution graph shows only one live target into an unconditional `goto`,
//! then nops out anything the resulting code no longer reaches.

use std::collections::BTreeSet;

use crate::graph::ExecutionGraph;
use crate::ir::{CodeAddress, Instruction, InstructionKind};

use super::{MutableMethod, OptimizerPass, PassOutcome};

pub struct UnreachableBranchRemover;

impl OptimizerPass for UnreachableBranchRemover {
    fn name(&self) -> &'static str {
        "UnreachableBranchRemover"
    }

    fn run(&self, graph: &ExecutionGraph, method: &mut MutableMethod) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        let addresses: Vec<CodeAddress> = method
            .instructions()
            .iter()
            .filter(|instr| matches!(instr.kind, InstructionKind::IfTest { .. } | InstructionKind::IfTestZ { .. }))
            .map(|instr| instr.offset)
            .collect();

        for address in addresses {
            let Some(node_id) = graph.node_at(address) else {
                continue;
            };
            let node = graph.node(node_id);
            if !node.expanded || node.successors.len() != 1 {
                continue;
            }
            let only_successor_address = graph.node(node.successors[0]).address;
            let Some(instruction) = method.instruction_at(address) else {
                continue;
            };
            let goto = Instruction {
                offset: instruction.offset,
                size: instruction.size,
                mnemonic: "goto",
                kind: InstructionKind::Goto {
                    target: only_successor_address,
                },
            };
            if method.replace(address, goto) {
                outcome = PassOutcome::changed();
            }
        }

        if let Some(entry) = method.instructions().first().map(|instr| instr.offset) {
            let reachable = reachable_addresses(method, entry);
            let dead: Vec<CodeAddress> = method
                .instructions()
                .iter()
                .filter(|instr| !matches!(instr.kind, InstructionKind::Nop) && !reachable.contains(&instr.offset))
                .map(|instr| instr.offset)
                .collect();
            for address in dead {
                let Some(instruction) = method.instruction_at(address) else {
                    continue;
                };
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
        }

        outcome
    }
}

fn reachable_addresses(method: &MutableMethod, entry: CodeAddress) -> BTreeSet<CodeAddress> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![entry];
    while let Some(address) = stack.pop() {
        if !seen.insert(address) {
            continue;
        }
        let Some(instruction) = method.instruction_at(address) else {
            continue;
        };
        for successor in instruction.concrete_successors() {
            stack.push(successor);
        }
        for handler in method.method().handlers_covering(address) {
            stack.push(handler.handler_pc);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::driver::Driver;
    use crate::ir::{CmpOp, ConstValue, Method, MethodAccess, MoveCategory};
    use crate::test_support::InMemoryClassManager;

    fn always_taken_branch_method() -> Method {
        // int f() { int x = 0; if (x == 0) return 1; else return 2; }
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
                        value: ConstValue::Int(0),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 1,
                    size: 2,
                    mnemonic: "if-eqz",
                    kind: InstructionKind::IfTestZ {
                        cmp: CmpOp::Eq,
                        reg: 0,
                        target: 5,
                        fallthrough: 3,
                    },
                },
                Instruction {
                    offset: 3,
                    size: 1,
                    mnemonic: "const/4",
                    kind: InstructionKind::Const {
                        dest: 1,
                        value: ConstValue::Int(2),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 4,
                    size: 1,
                    mnemonic: "return",
                    kind: InstructionKind::Return {
                        reg: 1,
                        category: MoveCategory::Single,
                    },
                },
                Instruction {
                    offset: 5,
                    size: 1,
                    mnemonic: "const/4",
                    kind: InstructionKind::Const {
                        dest: 1,
                        value: ConstValue::Int(1),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 6,
                    size: 1,
                    mnemonic: "return",
                    kind: InstructionKind::Return {
                        reg: 1,
                        category: MoveCategory::Single,
                    },
                },
            ],
            exception_handlers: vec![],
        }
    }

    #[test]
    fn collapses_always_taken_branch_and_nops_dead_arm() {
        let manager = InMemoryClassManager::default();
        let config = Config::default();
        let mut driver = Driver::new(&manager, &config);
        let method = always_taken_branch_method();
        let execution = driver.execute_method(&method).unwrap();
        assert_eq!(execution.return_value, Some(crate::value::HeapItem::int(1)));

        let mut mutable = MutableMethod::new(method);
        let outcome = UnreachableBranchRemover.run(&execution.graph, &mut mutable);
        assert!(outcome.made_changes);
        assert_eq!(
            mutable.instruction_at(1).unwrap().kind,
            InstructionKind::Goto { target: 5 }
        );
        assert_eq!(mutable.instruction_at(3).unwrap().kind, InstructionKind::Nop);
        assert_eq!(mutable.instruction_at(4).unwrap().kind, InstructionKind::Nop);
    }
}
