//! `PredictableCallCollapser` (§4.3): folds an `invoke` immediately followed
//! by `move-result*` into a `const*` when the call's own side effect (not
//! the whole path's) was no more than WEAK and the graph shows the result
//! register held a concrete value afterward. This single mechanism covers
//! both local-method inlining (the driver already resolves a local
//! callee's concrete return) and safe-method collapsing (`safe_call`),
//! since both paths end up recorded identically in the graph.

use crate::graph::ExecutionGraph;
use crate::ir::{CodeAddress, Instruction, InstructionKind};
use crate::value::{HeapItem, SideEffectLevel};

use super::{declared_type_of, mnemonic_for, to_const_value, MutableMethod, OptimizerPass, PassOutcome};

pub struct PredictableCallCollapser;

impl OptimizerPass for PredictableCallCollapser {
    fn name(&self) -> &'static str {
        "PredictableCallCollapser"
    }

    fn run(&self, graph: &ExecutionGraph, method: &mut MutableMethod) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        let invoke_offsets: Vec<CodeAddress> = method
            .instructions()
            .iter()
            .filter(|instr| matches!(instr.kind, InstructionKind::Invoke { .. }))
            .map(|instr| instr.offset)
            .collect();

        for invoke_offset in invoke_offsets {
            let Some(invoke_instruction) = method.instruction_at(invoke_offset) else {
                continue;
            };
            let move_result_offset = invoke_instruction.fallthrough();
            let Some(move_result_instruction) = method.instruction_at(move_result_offset) else {
                continue;
            };
            let InstructionKind::MoveResult { dest, .. } = move_result_instruction.kind else {
                continue;
            };

            if graph.instruction_effect(invoke_offset) > SideEffectLevel::Weak {
                continue;
            }
            let Some(node_id) = graph.node_at(move_result_instruction.fallthrough()) else {
                continue;
            };
            let Some(HeapItem::Concrete(concrete)) = graph.node(node_id).state_on_entry.get(dest) else {
                continue;
            };
            let Some(const_value) = to_const_value(concrete) else {
                continue;
            };
            let declared_type = declared_type_of(concrete);

            let invoke_nop = Instruction {
                offset: invoke_instruction.offset,
                size: invoke_instruction.size,
                mnemonic: "nop",
                kind: InstructionKind::Nop,
            };
            let replaced_invoke = method.replace(invoke_offset, invoke_nop);

            let const_instruction = Instruction {
                offset: move_result_instruction.offset,
                size: move_result_instruction.size,
                mnemonic: mnemonic_for(&const_value),
                kind: InstructionKind::Const {
                    dest,
                    value: const_value,
                    declared_type,
                },
            };
            let replaced_move_result = method.replace(move_result_offset, const_instruction);

            if replaced_invoke || replaced_move_result {
                outcome = PassOutcome::changed();
            }
        }

        outcome
    }
}
