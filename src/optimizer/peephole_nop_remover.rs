//! `PeepholeNopRemover` (§4.3): the final cleanup pass, physically dropping
//! every `nop` left behind by earlier passes once every branch/handler that
//! pointed at one has been redirected to its nearest live successor.

use crate::graph::ExecutionGraph;
use crate::ir::{CodeAddress, InstructionKind};

use super::{MutableMethod, OptimizerPass, PassOutcome};

pub struct PeepholeNopRemover;

impl OptimizerPass for PeepholeNopRemover {
    fn name(&self) -> &'static str {
        "PeepholeNopRemover"
    }

    fn run(&self, _graph: &ExecutionGraph, method: &mut MutableMethod) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        let nop_offsets: Vec<CodeAddress> = method
            .instructions()
            .iter()
            .filter(|instr| matches!(instr.kind, InstructionKind::Nop))
            .map(|instr| instr.offset)
            .collect();
        if nop_offsets.is_empty() {
            return outcome;
        }

        let live_offsets: Vec<CodeAddress> = method
            .instructions()
            .iter()
            .filter(|instr| !matches!(instr.kind, InstructionKind::Nop))
            .map(|instr| instr.offset)
            .collect();

        for nop_offset in &nop_offsets {
            if let Some(target) = live_offsets.iter().copied().find(|offset| *offset > *nop_offset) {
                if method.retarget(*nop_offset, target) {
                    outcome = PassOutcome::changed();
                }
            }
        }

        for nop_offset in nop_offsets {
            if method.remove(nop_offset) {
                outcome = PassOutcome::changed();
            }
        }

        outcome
    }
}
