//! Opcode dispatch (§4.1): one function per Dalvik instruction shape,
//! reached through a single match on [`InstructionKind`] rather than
//! subclass-per-opcode polymorphism (re-architecture guidance, §9).
//!
//! Each handler is one of three capability shapes, expressed here as which
//! host traits it needs rather than as a type hierarchy:
//! - `MethodStateOp` handlers take only `&mut MethodState`.
//! - `ExecutionContextOp` handlers additionally take `&mut dyn ExecutionHost`
//!   for static-field/class-initialization access.
//! - `InvokeOp` handlers (just `invoke-*`) may recurse through the same host.

pub mod binary_arith;
pub mod invoke;
pub mod new_instance;

use crate::errors::{EngineError, EngineResult};
use crate::ir::{CmpOp, CodeAddress, Instruction, InstructionKind};
use crate::state::MethodState;
use crate::value::{HeapItem, SideEffectLevel};

pub use invoke::InvocationHost;

/// Host services an [`ExecutionContextOp`]-shaped handler needs beyond the
/// local register file: static-field storage and lazy `<clinit>` (I4).
/// Implemented by [`crate::driver::Driver`].
pub trait ExecutionHost: InvocationHost {
    /// Reads a static field, triggering `<clinit>` of `class_name` first if
    /// it has not yet run. Returns the field's current value together with
    /// the side-effect level that reading it should contribute (the
    /// class's aggregated initialization level).
    fn read_static(&mut self, class_name: &str, field_name: &str) -> EngineResult<(HeapItem, SideEffectLevel)>;

    /// Writes a static field, triggering `<clinit>` first for the same
    /// reason as [`ExecutionHost::read_static`].
    fn write_static(&mut self, class_name: &str, field_name: &str, value: HeapItem) -> EngineResult<SideEffectLevel>;

    /// Side-effect level contributed by allocating a `new-instance` of
    /// `class_name`: NONE if configuration declares the class "safe", the
    /// class's aggregated initialization level if it is local (triggering
    /// `<clinit>`), STRONG otherwise (§4.1 "new-instance").
    fn new_instance_effect(&mut self, class_name: &str) -> EngineResult<SideEffectLevel>;
}

/// What the driver should do about control flow after executing an
/// instruction (I3: a node's children are exactly its concrete successors
/// unless the handler cleared them).
#[derive(Clone, Debug)]
pub enum StepOutcome {
    /// Continue along every one of `instruction.concrete_successors()`: the
    /// common case for instructions with no data-dependent branching.
    Fallthrough,
    /// Continue along exactly these addresses. Used by `if-test`/`if-testz`
    /// when both operands are concrete and the comparison is decidable,
    /// narrowing from the two statically-possible successors down to the
    /// one the condition actually takes — the fact `UnreachableBranchRemover`
    /// (§4.3) turns into a rewrite.
    Branch(Vec<CodeAddress>),
    /// The instruction produced an exception value; clear children and let
    /// the driver look for a covering handler (§4.1, §7 policy).
    Exception(HeapItem),
}

/// Executes one instruction against `state`, using `host` for anything that
/// needs class state or recursive invocation.
pub fn execute(
    instruction: &Instruction,
    state: &mut MethodState,
    host: &mut dyn ExecutionHost,
) -> EngineResult<StepOutcome> {
    match &instruction.kind {
        InstructionKind::Nop | InstructionKind::FillArrayData { .. } => Ok(StepOutcome::Fallthrough),

        InstructionKind::Move { dest, src, .. } => {
            let value = state.get(*src).cloned().unwrap_or(HeapItem::Unknown);
            state.set(*dest, value);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::MoveResult { dest, .. } => {
            let value = state.pending_result.take().unwrap_or(HeapItem::Unknown);
            state.set(*dest, value);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::MoveException { dest } => {
            let value = state.pending_exception.take().unwrap_or(HeapItem::Unknown);
            state.set(*dest, value);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::Const {
            dest,
            value,
            declared_type: _,
        } => {
            state.set(*dest, HeapItem::from_const(value));
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::ReturnVoid | InstructionKind::Return { .. } => Ok(StepOutcome::Fallthrough),

        InstructionKind::Throw { reg } => {
            let value = state.get(*reg).cloned().unwrap_or(HeapItem::Unknown);
            Ok(StepOutcome::Exception(value))
        }

        InstructionKind::Goto { .. } => Ok(StepOutcome::Fallthrough),

        InstructionKind::IfTest { cmp, lhs, rhs, target, fallthrough } => {
            let lhs_value = state.get(*lhs).cloned().unwrap_or(HeapItem::Unknown);
            let rhs_value = state.get(*rhs).cloned().unwrap_or(HeapItem::Unknown);
            Ok(branch_outcome(evaluate_cmp(*cmp, &lhs_value, &rhs_value), *target, *fallthrough))
        }

        InstructionKind::IfTestZ { cmp, reg, target, fallthrough } => {
            let value = state.get(*reg).cloned().unwrap_or(HeapItem::Unknown);
            Ok(branch_outcome(evaluate_cmp(*cmp, &value, &HeapItem::int(0)), *target, *fallthrough))
        }

        InstructionKind::PackedSwitch { .. } | InstructionKind::SparseSwitch { .. } => {
            Ok(StepOutcome::Fallthrough)
        }

        // Monitors are concurrency control, not data; no abstract effect
        // beyond a weak side effect (observable lock ordering).
        InstructionKind::MonitorEnter { .. } | InstructionKind::MonitorExit { .. } => {
            state.record_side_effect(SideEffectLevel::Weak);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::CheckCast { reg, target_type } => {
            // A failing cast throws ClassCastException; soundly modeling
            // that would need a subtype oracle this engine does not have
            // (no goal of full soundness, §1 Non-goals), so a successful
            // cast is assumed and the register's declared type narrows.
            let _ = (reg, target_type);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::InstanceOf { dest, .. } => {
            state.set(*dest, HeapItem::Unknown);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::ArrayLength { dest, array } => {
            let _ = state.get(*array);
            state.set(*dest, HeapItem::Unknown);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::NewInstance { class_type, .. } => {
            let effect = host.new_instance_effect(class_type)?;
            new_instance::apply(state, instruction, effect);
            Ok(StepOutcome::Fallthrough)
        }

        // new-array never triggers class initialization, unlike
        // new-instance (§4.1 explicitly contrasts the two).
        InstructionKind::NewArray { dest, size_reg, .. } => {
            let _ = state.get(*size_reg);
            state.set(*dest, HeapItem::Unknown);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::ArrayGet { dest, array, index, .. } => {
            let _ = (state.get(*array), state.get(*index));
            // No array-contents model (§4.1 Non-goal); any element read is
            // Unknown and a null/bounds check could throw, represented
            // conservatively as a WEAK side effect rather than a thrown
            // value since the engine cannot decide reachability of the
            // failure without a soundness model it does not have.
            state.record_side_effect(SideEffectLevel::Weak);
            state.set(*dest, HeapItem::Unknown);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::ArrayPut { src, array, index, .. } => {
            let _ = (state.get(*src), state.get(*array), state.get(*index));
            state.record_side_effect(SideEffectLevel::Weak);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::InstanceGet { dest, obj, .. } => {
            // Conservative: no per-object field model. An uninitialized
            // instance's own fields are NONE (not yet escaped); anything
            // else is WEAK (field of a possibly-shared object).
            let level = match state.get(*obj) {
                Some(HeapItem::UninitializedInstance { .. }) => SideEffectLevel::None,
                _ => SideEffectLevel::Weak,
            };
            state.record_side_effect(level);
            state.set(*dest, HeapItem::Unknown);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::InstancePut { src, obj, .. } => {
            let level = match state.get(*obj) {
                Some(HeapItem::UninitializedInstance { .. }) => SideEffectLevel::None,
                _ => SideEffectLevel::Weak,
            };
            let _ = state.get(*src);
            state.record_side_effect(level);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::StaticGet { dest, field, .. } => {
            let (value, level) = host.read_static(&field.owner, &field.name)?;
            state.record_side_effect(level);
            state.set(*dest, value);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::StaticPut { src, field, .. } => {
            let value = state.get(*src).cloned().unwrap_or(HeapItem::Unknown);
            let level = host.write_static(&field.owner, &field.name, value)?;
            state.record_side_effect(level);
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::Invoke { .. } => {
            invoke::apply(state, instruction, host)?;
            Ok(StepOutcome::Fallthrough)
        }

        InstructionKind::BinaryArith { .. } => match binary_arith::apply(state, instruction)? {
            binary_arith::ArithOutcome::Assigned => Ok(StepOutcome::Fallthrough),
            binary_arith::ArithOutcome::DivideByZero => Ok(StepOutcome::Exception(arithmetic_exception())),
        },

        InstructionKind::Generic(shape) => {
            for register in &shape.writes {
                state.set(*register, HeapItem::Unknown);
            }
            state.record_side_effect(SideEffectLevel::Strong);
            Ok(StepOutcome::Fallthrough)
        }
    }
}

/// Builds the `ArithmeticException` virtual-exception value attached to a
/// node after an integral zero divisor (§8 boundary case).
pub fn arithmetic_exception() -> HeapItem {
    HeapItem::VirtualException {
        exception_type: "Ljava/lang/ArithmeticException;".to_string(),
    }
}

/// Decides which of an `if-test*`'s two statically-possible successors is
/// actually live, given the comparison's decided truth value.
fn branch_outcome(taken: Option<bool>, target: CodeAddress, fallthrough: CodeAddress) -> StepOutcome {
    match taken {
        Some(true) => StepOutcome::Branch(vec![target]),
        Some(false) => StepOutcome::Branch(vec![fallthrough]),
        None => StepOutcome::Fallthrough,
    }
}

/// Evaluates a comparison over two register values when both sides carry a
/// concrete integral primitive. Reference comparisons (object identity,
/// null checks) are left undecided: the engine tracks no aliasing model
/// precise enough to answer them soundly, so both branches stay live.
fn evaluate_cmp(cmp: CmpOp, lhs: &HeapItem, rhs: &HeapItem) -> Option<bool> {
    let a = lhs.as_primitive()?.as_i64()?;
    let b = rhs.as_primitive()?.as_i64()?;
    Some(match cmp {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Ge => a >= b,
        CmpOp::Gt => a > b,
        CmpOp::Le => a <= b,
    })
}
