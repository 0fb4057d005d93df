//! `invoke-*` semantics (§4.1): the "InvokeOp (recursive)" capability
//! shape — the only opcode family that needs to call back into the
//! driver rather than acting purely on local state.

use crate::errors::EngineResult;
use crate::ir::{Instruction, InstructionKind, InvokeKind, MethodRef};
use crate::state::MethodState;
use crate::value::{HeapItem, SideEffectLevel};

use super::new_instance;

/// Outcome of resolving and (possibly) recursively analyzing a call.
#[derive(Clone, Debug)]
pub struct InvokeOutcome {
    pub return_value: HeapItem,
    pub side_effect: SideEffectLevel,
}

impl InvokeOutcome {
    pub fn opaque() -> Self {
        InvokeOutcome {
            return_value: HeapItem::Unknown,
            side_effect: SideEffectLevel::Strong,
        }
    }
}

/// Callback the interpreter uses to resolve a call. Implemented by
/// [`crate::driver::Driver`]; a fresh implementation can be substituted in
/// tests that want to stub call resolution without a full class manager.
pub trait InvocationHost {
    fn resolve_call(
        &mut self,
        kind: InvokeKind,
        method: &MethodRef,
        args: &[HeapItem],
    ) -> EngineResult<InvokeOutcome>;
}

/// Applies an `Invoke` instruction, including the special case where the
/// call is `invoke-direct` to `<init>` on a register holding an
/// uninitialized instance (handled entirely locally, without consulting
/// `host`, since completing construction needs no interprocedural
/// information beyond "this constructor ran").
pub fn apply(
    state: &mut MethodState,
    instruction: &Instruction,
    host: &mut dyn InvocationHost,
) -> EngineResult<()> {
    let InstructionKind::Invoke { kind, method, args } = &instruction.kind else {
        unreachable!("invoke::apply called with non-invoke instruction")
    };

    if *kind == InvokeKind::Direct && method.name == "<init>" {
        if let Some(&receiver) = args.first() {
            if new_instance::complete_construction(state, receiver) {
                state.record_side_effect(SideEffectLevel::Strong);
                state.pending_result = None;
                return Ok(());
            }
        }
    }

    let arg_values: Vec<HeapItem> = args
        .iter()
        .map(|reg| state.get(*reg).cloned().unwrap_or(HeapItem::Unknown))
        .collect();

    let outcome = host.resolve_call(*kind, method, &arg_values)?;
    state.record_side_effect(outcome.side_effect);
    state.pending_result = Some(outcome.return_value);
    Ok(())
}
