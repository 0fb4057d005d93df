//! Execution graph: the arena-indexed DAG mirroring a method's concrete and
//! symbolic control flow (§3 `ExecutionNode`, `ExecutionGraph`; §4.2).

use std::collections::BTreeMap;

use crate::ir::CodeAddress;
use crate::state::MethodState;
use crate::value::{HeapItem, SideEffectLevel};

/// Index into an [`ExecutionGraph`]'s node arena. Nodes reference each other
/// by `NodeId` rather than by owned pointer, per the re-architecture
/// guidance in §9: this keeps the graph a plain `Vec`, makes merge-on-loop
/// -backedge a simple lookup-and-mutate, and avoids `Rc<RefCell<_>>` cycles.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(pub u32);

/// One node in the execution graph: a single instruction's address plus the
/// abstract state observed on entry to it.
#[derive(Clone, Debug)]
pub struct ExecutionNode {
    pub address: CodeAddress,
    pub state_on_entry: MethodState,
    pub successors: Vec<NodeId>,
    pub predecessors: Vec<NodeId>,
    /// Set once this node has been visited by the driver at least once;
    /// distinguishes "first visit" from "revisit after a loop backedge
    /// widened incoming state" for the `maxAddressVisits` bound (§5).
    pub visit_count: u32,
    /// True once `successors` has been computed from the address's
    /// instruction; a node can exist (as a merge target) before it is
    /// actually interpreted.
    pub expanded: bool,
    /// The `VirtualException` this node's instruction raised, if any,
    /// still unattributed to a handler (§3 "optional attached
    /// VirtualException"). Set by the driver when a `StepOutcome::Exception`
    /// finds no covering handler, so the node stays terminal but carries
    /// the exception as a value rather than discarding it (§8 scenario 3).
    pub attached_exception: Option<HeapItem>,
}

impl ExecutionNode {
    fn new(address: CodeAddress, state_on_entry: MethodState) -> Self {
        ExecutionNode {
            address,
            state_on_entry,
            successors: Vec::new(),
            predecessors: Vec::new(),
            visit_count: 0,
            expanded: false,
            attached_exception: None,
        }
    }

    /// Attaches `exception` to this node (§3 `setException`).
    pub fn set_exception(&mut self, exception: HeapItem) {
        self.attached_exception = Some(exception);
    }

    /// Clears any previously attached exception (§3 `clearExceptions`),
    /// called by the driver once a node's instruction computes
    /// successfully on a later visit.
    pub fn clear_exceptions(&mut self) {
        self.attached_exception = None;
    }
}

/// The execution graph for a single method's analysis run.
///
/// One node exists per distinct `(address)` reached during interpretation;
/// when two paths reach the same address their entry states are merged
/// into the existing node rather than creating a duplicate (I-MERGE). This
/// makes the graph a DAG over addresses even though the underlying CFG may
/// contain cycles: a loop backedge updates the loop header's entry state
/// and re-enqueues it instead of growing the graph unboundedly.
#[derive(Clone, Debug, Default)]
pub struct ExecutionGraph {
    nodes: Vec<ExecutionNode>,
    by_address: BTreeMap<CodeAddress, NodeId>,
    /// Side-effect level the instruction at each address contributed the
    /// last time it was interpreted, independent of the cumulative
    /// per-path level carried in `MethodState::side_effect`. Consulted by
    /// `PredictableCallCollapser` (§4.3) to decide whether an `invoke`'s
    /// own effect (not the whole path's) is low enough to fold away.
    instruction_effects: BTreeMap<CodeAddress, SideEffectLevel>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        ExecutionGraph::default()
    }

    pub fn node(&self, id: NodeId) -> &ExecutionNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ExecutionNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn node_at(&self, address: CodeAddress) -> Option<NodeId> {
        self.by_address.get(&address).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ExecutionNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index as u32), node))
    }

    /// Returns the node for `address`, merging `incoming_state` into its
    /// existing entry state if the node already exists, or creating a new
    /// node with that state otherwise. Returns the node id and whether the
    /// entry state actually changed (the driver only needs to re-interpret
    /// a previously-expanded node when it did).
    pub fn merge_or_create(
        &mut self,
        address: CodeAddress,
        incoming_state: MethodState,
        from: Option<NodeId>,
    ) -> (NodeId, bool) {
        if let Some(existing) = self.by_address.get(&address).copied() {
            let before = self.nodes[existing.0 as usize].state_on_entry.clone();
            self.nodes[existing.0 as usize]
                .state_on_entry
                .merge(&incoming_state);
            let changed = self.nodes[existing.0 as usize].state_on_entry != before;
            if let Some(from_id) = from {
                self.link(from_id, existing);
            }
            (existing, changed)
        } else {
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(ExecutionNode::new(address, incoming_state));
            self.by_address.insert(address, id);
            if let Some(from_id) = from {
                self.link(from_id, id);
            }
            (id, true)
        }
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        let successors = &mut self.nodes[from.0 as usize].successors;
        if !successors.contains(&to) {
            successors.push(to);
        }
        let predecessors = &mut self.nodes[to.0 as usize].predecessors;
        if !predecessors.contains(&from) {
            predecessors.push(from);
        }
    }

    pub fn record_instruction_effect(&mut self, address: CodeAddress, level: SideEffectLevel) {
        self.instruction_effects.insert(address, level);
    }

    /// The side-effect level the instruction at `address` contributed on
    /// its own, the last time it was reached. `STRONG` (the conservative
    /// default) if the address was never interpreted, so unreached code is
    /// never mistaken for a safe fold target.
    pub fn instruction_effect(&self, address: CodeAddress) -> SideEffectLevel {
        self.instruction_effects
            .get(&address)
            .copied()
            .unwrap_or(SideEffectLevel::Strong)
    }

    pub fn mark_expanded(&mut self, id: NodeId) {
        self.nodes[id.0 as usize].expanded = true;
        self.nodes[id.0 as usize].visit_count += 1;
    }

    /// Nodes with no successors: `return`/`throw` instructions, or
    /// instructions whose driver-visible continuation was cut off by a
    /// resource bound.
    pub fn terminal_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.expanded && node.successors.is_empty())
            .map(|(index, _)| NodeId(index as u32))
            .collect()
    }

    pub fn entry_node(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(NodeId(0))
        }
    }

    /// Whether `target` is reachable from `start` by following successor
    /// edges, used by the optimizer's unreachable-branch pass.
    pub fn is_reachable(&self, start: NodeId, target: NodeId) -> bool {
        if start == target {
            return true;
        }
        let mut stack = vec![start];
        let mut seen = std::collections::BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if current == target {
                return true;
            }
            for successor in &self.node(current).successors {
                stack.push(*successor);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::HeapItem;

    #[test]
    fn merge_or_create_creates_then_merges() {
        let mut graph = ExecutionGraph::new();
        let mut state_a = MethodState::new();
        state_a.set(0, HeapItem::int(1));
        let (entry, created) = graph.merge_or_create(0, state_a, None);
        assert!(created);
        assert_eq!(graph.node(entry).state_on_entry.get(0), Some(&HeapItem::int(1)));

        let mut state_b = MethodState::new();
        state_b.set(0, HeapItem::int(2));
        let (again, changed) = graph.merge_or_create(0, state_b, None);
        assert_eq!(entry, again);
        assert!(changed);
        assert_eq!(graph.node(entry).state_on_entry.get(0), Some(&HeapItem::Unknown));
    }

    #[test]
    fn merge_or_create_reports_unchanged_when_state_stable() {
        let mut graph = ExecutionGraph::new();
        let mut state = MethodState::new();
        state.set(0, HeapItem::int(1));
        let (node, _) = graph.merge_or_create(0, state.clone(), None);
        let (same_node, changed) = graph.merge_or_create(0, state, None);
        assert_eq!(node, same_node);
        assert!(!changed);
    }

    #[test]
    fn link_records_predecessor_and_successor() {
        let mut graph = ExecutionGraph::new();
        let (entry, _) = graph.merge_or_create(0, MethodState::new(), None);
        let (next, _) = graph.merge_or_create(2, MethodState::new(), Some(entry));
        assert_eq!(graph.node(entry).successors, vec![next]);
        assert_eq!(graph.node(next).predecessors, vec![entry]);
    }

    #[test]
    fn reachability_follows_successors_transitively() {
        let mut graph = ExecutionGraph::new();
        let (a, _) = graph.merge_or_create(0, MethodState::new(), None);
        let (b, _) = graph.merge_or_create(2, MethodState::new(), Some(a));
        let (c, _) = graph.merge_or_create(4, MethodState::new(), Some(b));
        assert!(graph.is_reachable(a, c));
        assert!(!graph.is_reachable(c, a));
    }

    #[test]
    fn terminal_nodes_excludes_unexpanded_merge_targets() {
        let mut graph = ExecutionGraph::new();
        let (a, _) = graph.merge_or_create(0, MethodState::new(), None);
        graph.mark_expanded(a);
        let (_b, _) = graph.merge_or_create(2, MethodState::new(), Some(a));
        assert_eq!(graph.terminal_nodes(), Vec::new());
    }
}
