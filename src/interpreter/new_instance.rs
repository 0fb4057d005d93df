//! `new-instance` semantics (§4.1, fully specified).

use crate::ir::{Instruction, InstructionKind};
use crate::state::MethodState;
use crate::value::{HeapItem, SideEffectLevel};

/// Applies a `NewInstance` instruction: allocates a fresh [`ObjectRef`][crate::value::ObjectRef]
/// and binds it to the destination register as [`HeapItem::UninitializedInstance`].
///
/// The value stays uninitialized until the driver observes a matching
/// `invoke-direct` to `<init>` on the same register (I2); reading any
/// field through it before then is a verifier-rejected program, so the
/// interpreter does not need to guard against it here. `effect` is the
/// side-effect level the host has already computed for this allocation
/// (§4.1: NONE for a configuration-declared safe class, the class's
/// aggregated `<clinit>` level if local, STRONG otherwise) and is recorded
/// exactly once, joined into the path's cumulative level.
pub fn apply(state: &mut MethodState, instruction: &Instruction, effect: SideEffectLevel) {
    let InstructionKind::NewInstance { dest, class_type } = &instruction.kind else {
        unreachable!("new_instance::apply called with non-new-instance instruction")
    };
    let reference = state.allocate_object();
    state.set(
        *dest,
        HeapItem::UninitializedInstance {
            reference,
            class: class_type.clone(),
        },
    );
    state.record_side_effect(effect);
}

/// Applies `invoke-direct` to `<init>` on a register holding an
/// [`HeapItem::UninitializedInstance`], transitioning it to a fully
/// constructed, opaque object reference. Returns `false` if `register`
/// does not currently hold an uninitialized instance (the invoke should
/// then be handled as an ordinary direct call instead).
pub fn complete_construction(state: &mut MethodState, register: u16) -> bool {
    match state.get(register) {
        Some(HeapItem::UninitializedInstance { reference, class }) => {
            let reference = *reference;
            let class = class.clone();
            state.set(
                register,
                HeapItem::Concrete(crate::value::Concrete::Object {
                    declared_type: class,
                    reference,
                }),
            );
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Concrete;

    fn new_instance_instruction(dest: u16, class_type: &str) -> Instruction {
        Instruction {
            offset: 0,
            size: 2,
            mnemonic: "new-instance",
            kind: InstructionKind::NewInstance {
                dest,
                class_type: class_type.to_string(),
            },
        }
    }

    #[test]
    fn new_instance_produces_uninitialized_value() {
        let mut state = MethodState::new();
        apply(&mut state, &new_instance_instruction(0, "LFoo;"), SideEffectLevel::Strong);
        assert!(matches!(
            state.get(0),
            Some(HeapItem::UninitializedInstance { .. })
        ));
        assert_eq!(state.side_effect, SideEffectLevel::Strong);
    }

    #[test]
    fn distinct_allocations_get_distinct_references() {
        let mut state = MethodState::new();
        apply(&mut state, &new_instance_instruction(0, "LFoo;"), SideEffectLevel::Strong);
        apply(&mut state, &new_instance_instruction(1, "LFoo;"), SideEffectLevel::Strong);
        let (HeapItem::UninitializedInstance { reference: r1, .. }, HeapItem::UninitializedInstance { reference: r2, .. }) =
            (state.get(0).unwrap(), state.get(1).unwrap())
        else {
            panic!("expected uninitialized instances");
        };
        assert_ne!(r1, r2);
    }

    #[test]
    fn construction_completes_to_object_reference() {
        let mut state = MethodState::new();
        apply(&mut state, &new_instance_instruction(0, "LFoo;"), SideEffectLevel::Strong);
        assert!(complete_construction(&mut state, 0));
        assert!(matches!(
            state.get(0),
            Some(HeapItem::Concrete(Concrete::Object { .. }))
        ));
    }

    #[test]
    fn construction_on_non_uninitialized_register_is_a_no_op() {
        let mut state = MethodState::new();
        state.set(0, HeapItem::int(1));
        assert!(!complete_construction(&mut state, 0));
        assert_eq!(state.get(0), Some(&HeapItem::int(1)));
    }
}
