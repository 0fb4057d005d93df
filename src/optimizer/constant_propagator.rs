//! `ConstantPropagator` (§4.3): replaces an instruction with a `const*`
//! once the execution graph shows every reachable path producing the same
//! concrete value in its destination register.

use crate::graph::ExecutionGraph;
use crate::ir::{CodeAddress, Instruction, InstructionKind};
use crate::value::HeapItem;

use super::{declared_type_of, foldable_dest, mnemonic_for, to_const_value, MutableMethod, OptimizerPass, PassOutcome};

pub struct ConstantPropagator;

impl OptimizerPass for ConstantPropagator {
    fn name(&self) -> &'static str {
        "ConstantPropagator"
    }

    fn run(&self, graph: &ExecutionGraph, method: &mut MutableMethod) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        let addresses: Vec<CodeAddress> = method.instructions().iter().map(|instr| instr.offset).collect();

        for address in addresses {
            let Some(instruction) = method.instruction_at(address) else {
                continue;
            };
            if matches!(instruction.kind, InstructionKind::Const { .. }) {
                continue;
            }
            let Some(dest) = foldable_dest(&instruction.kind) else {
                continue;
            };
            // Only single-successor (non-branching) instructions have an
            // unambiguous "the value after this instruction ran" state to
            // consult (§4.1: binary arith, move, sget never branch).
            let successors = instruction.concrete_successors();
            let [only_successor] = successors.as_slice() else {
                continue;
            };
            let Some(successor_id) = graph.node_at(*only_successor) else {
                continue;
            };
            let Some(HeapItem::Concrete(concrete)) = graph.node(successor_id).state_on_entry.get(dest) else {
                continue;
            };
            let Some(const_value) = to_const_value(concrete) else {
                continue;
            };
            let declared_type = declared_type_of(concrete);
            let replacement = Instruction {
                offset: instruction.offset,
                size: instruction.size,
                mnemonic: mnemonic_for(&const_value),
                kind: InstructionKind::Const {
                    dest,
                    value: const_value,
                    declared_type,
                },
            };
            if method.replace(address, replacement) {
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
    use crate::ir::{ArithForm, ArithOp, ArithRhs, ArithType, ConstValue, Method, MethodAccess, MoveCategory};
    use crate::test_support::InMemoryClassManager;

    fn method_with_static_get() -> Method {
        Method {
            owner: "LFoo;".to_string(),
            name: "read".to_string(),
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
                    size: 2,
                    mnemonic: "sget",
                    kind: InstructionKind::StaticGet {
                        dest: 0,
                        field: crate::ir::FieldRef {
                            owner: "LFoo;".to_string(),
                            name: "ANSWER".to_string(),
                            field_type: "I".to_string(),
                        },
                        category: MoveCategory::Single,
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
        }
    }

    #[test]
    fn folds_static_get_of_a_constant_initializer() {
        let mut manager = InMemoryClassManager::default();
        manager.insert(crate::ir::Class {
            name: "LFoo;".to_string(),
            super_name: None,
            interfaces: vec![],
            static_fields: vec![crate::ir::StaticField {
                name: "ANSWER".to_string(),
                field_type: "I".to_string(),
            }],
            methods: vec![Method {
                owner: "LFoo;".to_string(),
                name: "<clinit>".to_string(),
                descriptor: "()V".to_string(),
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
                        mnemonic: "const/16",
                        kind: InstructionKind::Const {
                            dest: 0,
                            value: ConstValue::Int(42),
                            declared_type: "I".to_string(),
                        },
                    },
                    Instruction {
                        offset: 1,
                        size: 2,
                        mnemonic: "sput",
                        kind: InstructionKind::StaticPut {
                            src: 0,
                            field: crate::ir::FieldRef {
                                owner: "LFoo;".to_string(),
                                name: "ANSWER".to_string(),
                                field_type: "I".to_string(),
                            },
                            category: MoveCategory::Single,
                        },
                    },
                    Instruction {
                        offset: 3,
                        size: 1,
                        mnemonic: "return-void",
                        kind: InstructionKind::ReturnVoid,
                    },
                ],
                exception_handlers: vec![],
            }],
            has_static_initializer: true,
        });
        let config = Config::default();
        let mut driver = Driver::new(&manager, &config);
        let method = method_with_static_get();
        let execution = driver.execute_method(&method).unwrap();
        assert_eq!(execution.return_value, Some(HeapItem::int(42)));

        let mut mutable = MutableMethod::new(method);
        let outcome = ConstantPropagator.run(&execution.graph, &mut mutable);
        assert!(outcome.made_changes);
        assert_eq!(
            mutable.instruction_at(0).unwrap().kind,
            InstructionKind::Const {
                dest: 0,
                value: ConstValue::Int(42),
                declared_type: "I".to_string(),
            }
        );
    }

    #[test]
    fn does_not_touch_binary_arith_with_unknown_operand() {
        let manager = InMemoryClassManager::default();
        let config = Config::default();
        let mut driver = Driver::new(&manager, &config);
        let method = Method {
            owner: "LFoo;".to_string(),
            name: "g".to_string(),
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
                        value: ConstValue::Int(1),
                        declared_type: "I".to_string(),
                    },
                },
                Instruction {
                    offset: 1,
                    size: 2,
                    mnemonic: "add-int/2addr",
                    kind: InstructionKind::BinaryArith {
                        op: ArithOp::Add,
                        ty: ArithType::Int,
                        form: ArithForm::TwoAddr,
                        dest: 0,
                        lhs: 0,
                        rhs: ArithRhs::Register(1),
                    },
                },
                Instruction {
                    offset: 3,
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
        let execution = driver.execute_method(&method).unwrap();
        let mut mutable = MutableMethod::new(method);
        let outcome = ConstantPropagator.run(&execution.graph, &mut mutable);
        assert!(!outcome.made_changes);
    }
}
