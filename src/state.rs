//! Per-method and per-class abstract state (§3 `MethodState`, `ClassState`).

use std::collections::{BTreeMap, BTreeSet};

use crate::ir::RegisterId;
use crate::value::{HeapItem, ObjectRef, SideEffectLevel};

/// Register file plus accumulated facts for one in-progress symbolic
/// execution of a method.
///
/// Registers not present in `registers` are considered unassigned; reading
/// one is a caller bug (the driver never emits such a read because the
/// class manager's verifier-equivalent data guarantees definite assignment
/// before use, I1).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodState {
    registers: BTreeMap<RegisterId, HeapItem>,
    pub side_effect: SideEffectLevel,
    /// Side-effect level contributed by the instruction currently being
    /// interpreted, reset by the driver before each `execute` call. Kept
    /// separate from the cumulative `side_effect` (which a node's state
    /// carries forward to its children) so the optimizer can ask "what did
    /// *this* instruction alone contribute" (§4.3 `PredictableCallCollapser`)
    /// without that answer being swamped by an unrelated STRONG effect
    /// earlier on the same path.
    pub last_instruction_effect: SideEffectLevel,
    /// Registers newly written since the last [`MethodState::begin_instruction`]
    /// call (§3 "assigned-this-node" bitset), used for display (which
    /// registers a step just touched) and dataflow queries (e.g. the
    /// optimizer asking whether a particular assignment is the one that
    /// produced the value a later instruction reads). Cleared at the start
    /// of every instruction, not threaded through control-flow merges,
    /// since "newly written by the current instruction" is only meaningful
    /// relative to the instruction currently being interpreted.
    assigned_this_node: BTreeSet<RegisterId>,
    /// Monotonically increasing counter used to mint fresh [`ObjectRef`]s
    /// for `new-instance`/`new-array` within this method's execution.
    next_object_id: u32,
    /// Result of the most recent `invoke-*`, consumed by the following
    /// `move-result*` instruction (Dalvik guarantees these are adjacent
    /// modulo intervening `move-exception`/handler entry).
    pub pending_result: Option<HeapItem>,
    /// Exception value made available to a handler block's leading
    /// `move-exception`, set by the driver when it redirects control flow
    /// to a handler.
    pub pending_exception: Option<HeapItem>,
}

impl MethodState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `register` without marking it (§3 `peek`): used by callers
    /// that inspect state without that inspection itself being part of the
    /// method's interpretation, e.g. the graph's cross-node consensus
    /// queries and display/debug formatting.
    pub fn peek(&self, register: RegisterId) -> Option<&HeapItem> {
        self.registers.get(&register)
    }

    /// Reads `register` during normal instruction interpretation (§3
    /// `read`). Register reads carry no dataflow mark of their own in this
    /// engine — only assignment does (`assigned_this_node`) — so `read`
    /// and `peek` return the same value; the distinct names document the
    /// two call-site intents §3 separates (interpreter vs. introspection).
    pub fn read(&self, register: RegisterId) -> Option<&HeapItem> {
        self.peek(register)
    }

    /// Equivalent to [`MethodState::read`]/[`MethodState::peek`]; kept as
    /// the shorter name already used throughout the interpreter and
    /// optimizer modules.
    pub fn get(&self, register: RegisterId) -> Option<&HeapItem> {
        self.peek(register)
    }

    pub fn set(&mut self, register: RegisterId, value: HeapItem) {
        self.registers.insert(register, value);
        self.assigned_this_node.insert(register);
    }

    /// Writes `register` (§3 `assign`), marking it in the assigned-this-node
    /// bitset. Equivalent to [`MethodState::set`]; the name matches §3's
    /// operation list for call sites that want to say "assign" explicitly.
    pub fn assign(&mut self, register: RegisterId, value: HeapItem) {
        self.set(register, value)
    }

    pub fn clear(&mut self, register: RegisterId) {
        self.registers.remove(&register);
        self.assigned_this_node.remove(&register);
    }

    pub fn is_assigned(&self, register: RegisterId) -> bool {
        self.registers.contains_key(&register)
    }

    pub fn assigned_registers(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.registers.keys().copied()
    }

    /// Registers written by the instruction currently being interpreted
    /// (§3 "assigned-this-node" bitset), cleared at each
    /// [`MethodState::begin_instruction`].
    pub fn assigned_this_node(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.assigned_this_node.iter().copied()
    }

    pub fn record_side_effect(&mut self, level: SideEffectLevel) {
        self.side_effect = self.side_effect.join(level);
        self.last_instruction_effect = self.last_instruction_effect.join(level);
    }

    /// Clears the per-instruction markers; called by the driver immediately
    /// before interpreting each instruction.
    pub fn begin_instruction(&mut self) {
        self.last_instruction_effect = SideEffectLevel::None;
        self.assigned_this_node.clear();
    }

    pub fn allocate_object(&mut self) -> ObjectRef {
        let id = self.next_object_id;
        self.next_object_id += 1;
        ObjectRef(id)
    }

    /// Returns a copy of this state for a new control-flow successor (§3
    /// "branched copy"): the driver clones the predecessor's state once
    /// per outgoing edge so each child node's execution context is
    /// independent (copy-on-branch).
    pub fn branched_copy(&self) -> MethodState {
        self.clone()
    }

    /// Merges another state into `self` at a control-flow join point
    /// (I-MERGE, §4.2). Registers assigned on only one incoming path are
    /// dropped rather than treated as `Unknown`, since Dalvik's verifier
    /// guarantees a register live past a merge is assigned on every path
    /// that reaches it.
    pub fn merge(&mut self, other: &MethodState) {
        let mut merged = BTreeMap::new();
        for (register, value) in &self.registers {
            if let Some(other_value) = other.registers.get(register) {
                merged.insert(*register, value.join(other_value));
            }
        }
        self.registers = merged;
        self.side_effect = self.side_effect.join(other.side_effect);
        self.next_object_id = self.next_object_id.max(other.next_object_id);
        // A merged node isn't "the current instruction" for either
        // incoming path, so the assigned-this-node marker no longer means
        // anything meaningful; the next `begin_instruction` will repopulate
        // it for whichever instruction actually runs at the merged node.
        self.assigned_this_node.clear();
    }
}

/// Static-initialization status of a class under analysis, tracked so the
/// driver can decide whether `<clinit>` needs to run lazily before the
/// first access to one of its static members (§4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Abstract state for one class's static fields, shared across all method
/// executions that touch it within a single analysis run.
#[derive(Clone, Debug)]
pub struct ClassState {
    pub class_name: String,
    pub init_status: InitStatus,
    /// Join of every side-effect level observed while running `<clinit>`;
    /// the level `new-instance` and static-field access report once the
    /// class is (or is being) initialized (§4.1).
    pub aggregate_level: SideEffectLevel,
    static_fields: BTreeMap<String, HeapItem>,
}

impl ClassState {
    pub fn new(class_name: impl Into<String>) -> Self {
        ClassState {
            class_name: class_name.into(),
            init_status: InitStatus::NotStarted,
            aggregate_level: SideEffectLevel::None,
            static_fields: BTreeMap::new(),
        }
    }

    pub fn get_static(&self, field_name: &str) -> Option<&HeapItem> {
        self.static_fields.get(field_name)
    }

    pub fn set_static(&mut self, field_name: impl Into<String>, value: HeapItem) {
        self.static_fields.insert(field_name.into(), value);
    }

    /// Widens every currently-known static field to `Unknown`. Applied
    /// whenever an opaque call (one the engine cannot see into) may have
    /// mutated this class's statics, and whenever `<clinit>` fails to run
    /// to completion within resource bounds.
    pub fn widen_all(&mut self) {
        for value in self.static_fields.values_mut() {
            *value = HeapItem::Unknown;
        }
    }
}
