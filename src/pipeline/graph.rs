//! Pipeline graph structure and topology.
//!
//! The [`Pipeline`] is an arena of nodes backed by a petgraph
//! `StableDiGraph`; a [`NodeHandle`] is an index into it. Edges run from
//! producer to consumer and carry the consumer's input slot. Fan-in
//! (several inputs) and fan-out (several consumers of one node) are both
//! legal; cycles are rejected when connecting.
//!
//! Stages are held behind `Arc`, so one stage instance can back nodes in
//! several pipelines and lives as long as its longest-lived user.

use crate::core::error::{GraphError, GraphResult, NodeId, NodeRef};
use crate::io::block::BlockSource;
use crate::pipeline::stage::Stage;
use crate::pipeline::state::{CacheValidity, NodeState};
use crate::stages::source::BlockSourceStage;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Handle of a node inside its [`Pipeline`].
pub type NodeHandle = NodeIndex;

/// A node instance in the pipeline.
pub struct PipelineNode {
    /// Unique identifier
    pub id: NodeId,
    /// The stage implementation
    pub stage: Arc<dyn Stage>,
    /// Optional display name override
    pub label: Option<String>,
    pub(crate) state: NodeState,
}

impl std::fmt::Debug for PipelineNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineNode")
            .field("id", &self.id)
            .field("stage", &self.stage.name())
            .field("label", &self.label)
            .field("state", &self.state)
            .finish()
    }
}

impl PipelineNode {
    /// Create a node around a stage.
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            id: NodeId::new(),
            stage,
            label: None,
            state: NodeState::default(),
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Display name (label or stage name).
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| self.stage.name())
    }

    /// Identity used in error reports.
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.id, self.display_name())
    }

    /// Streaming state of this node.
    pub fn state(&self) -> &NodeState {
        &self.state
    }
}

/// An acyclic graph of stages.
#[derive(Debug, Default)]
pub struct Pipeline {
    graph: StableDiGraph<PipelineNode, usize>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
        }
    }

    // ========================================================================
    // Node Management
    // ========================================================================

    /// Add an unconnected node.
    pub fn add_node(&mut self, node: PipelineNode) -> NodeHandle {
        self.graph.add_node(node)
    }

    /// Add a leaf reading from a block source.
    pub fn add_source(&mut self, source: Arc<dyn BlockSource>) -> NodeHandle {
        self.add_node(PipelineNode::new(Arc::new(BlockSourceStage::new(source))))
    }

    /// Add a stage and connect `inputs` to its slots in order.
    pub fn add_stage<S>(&mut self, stage: S, inputs: &[NodeHandle]) -> GraphResult<NodeHandle>
    where
        S: Stage + 'static,
    {
        self.add_shared_stage(Arc::new(stage), inputs)
    }

    /// Add a shared stage and connect `inputs` to its slots in order.
    pub fn add_shared_stage(
        &mut self,
        stage: Arc<dyn Stage>,
        inputs: &[NodeHandle],
    ) -> GraphResult<NodeHandle> {
        if inputs.len() != stage.input_count() {
            return Err(GraphError::ArityMismatch {
                stage: stage.name().to_string(),
                expected: stage.input_count(),
                got: inputs.len(),
            });
        }
        for &input in inputs {
            self.node(input)?;
        }
        let handle = self.add_node(PipelineNode::new(stage));
        for (slot, &input) in inputs.iter().enumerate() {
            self.graph.add_edge(input, handle, slot);
        }
        Ok(handle)
    }

    /// Set the display label of a node.
    pub fn set_label(&mut self, handle: NodeHandle, label: impl Into<String>) -> GraphResult<()> {
        self.node_mut(handle)?.label = Some(label.into());
        Ok(())
    }

    /// Get a reference to a node.
    pub fn node(&self, handle: NodeHandle) -> GraphResult<&PipelineNode> {
        self.graph
            .node_weight(handle)
            .ok_or(GraphError::NodeNotFound(handle.index()))
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, handle: NodeHandle) -> GraphResult<&mut PipelineNode> {
        self.graph
            .node_weight_mut(handle)
            .ok_or(GraphError::NodeNotFound(handle.index()))
    }

    /// Identity of a node for error reports.
    pub fn node_ref(&self, handle: NodeHandle) -> GraphResult<NodeRef> {
        self.node(handle).map(PipelineNode::node_ref)
    }

    /// All node handles.
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.graph.node_indices()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the pipeline has no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    // ========================================================================
    // Connection Management
    // ========================================================================

    /// Connect `from`'s output to input slot `slot` of `to`.
    pub fn connect(&mut self, from: NodeHandle, to: NodeHandle, slot: usize) -> GraphResult<()> {
        self.node(from)?;
        let target = self.node(to)?;
        let arity = target.stage.input_count();
        let stage = target.stage.name().to_string();

        if slot >= arity {
            return Err(GraphError::InvalidSlot { stage, slot, arity });
        }
        if self.graph.edges_directed(to, Direction::Incoming).any(|e| *e.weight() == slot) {
            return Err(GraphError::SlotAlreadyConnected { stage, slot });
        }
        if from == to || has_path_connecting(&self.graph, to, from, None) {
            return Err(GraphError::WouldCreateCycle {
                from: from.index(),
                to: to.index(),
            });
        }

        self.graph.add_edge(from, to, slot);
        Ok(())
    }

    /// Inputs of `handle` in slot order. Fails if a slot is unconnected.
    pub fn inputs_of(&self, handle: NodeHandle) -> GraphResult<Vec<NodeHandle>> {
        let node = self.node(handle)?;
        let arity = node.stage.input_count();
        let mut slots: Vec<Option<NodeHandle>> = vec![None; arity];
        for edge in self.graph.edges_directed(handle, Direction::Incoming) {
            if let Some(entry) = slots.get_mut(*edge.weight()) {
                *entry = Some(edge.source());
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(slot, input)| {
                input.ok_or_else(|| GraphError::MissingInput {
                    stage: node.display_name().to_string(),
                    slot,
                })
            })
            .collect()
    }

    /// Distinct consumers of `handle`.
    pub fn consumers_of(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut consumers: Vec<NodeHandle> = self
            .graph
            .neighbors_directed(handle, Direction::Outgoing)
            .collect();
        consumers.sort();
        consumers.dedup();
        consumers
    }

    // ========================================================================
    // Topology
    // ========================================================================

    /// All nodes, producers before consumers.
    pub fn topological_order(&self) -> GraphResult<Vec<NodeHandle>> {
        toposort(&self.graph, None).map_err(|cycle| GraphError::CycleDetected(cycle.node_id().index()))
    }

    /// `terminal` and everything it depends on, producers first.
    pub fn upstream_of(&self, terminal: NodeHandle) -> GraphResult<Vec<NodeHandle>> {
        self.node(terminal)?;
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(terminal);
        while let Some(current) = queue.pop_front() {
            if reachable.insert(current) {
                queue.extend(self.graph.neighbors_directed(current, Direction::Incoming));
            }
        }
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|handle| reachable.contains(handle))
            .collect())
    }

    /// Number of nodes on the longest path ending at `terminal`.
    ///
    /// A lone source has depth 1.
    pub fn depth(&self, terminal: NodeHandle) -> GraphResult<usize> {
        let order = self.upstream_of(terminal)?;
        let mut depth: HashMap<NodeHandle, usize> = HashMap::with_capacity(order.len());
        for &handle in &order {
            let parent = self
                .graph
                .neighbors_directed(handle, Direction::Incoming)
                .filter_map(|input| depth.get(&input))
                .max()
                .copied()
                .unwrap_or(0);
            depth.insert(handle, parent + 1);
        }
        Ok(depth.get(&terminal).copied().unwrap_or(1))
    }

    /// Every node downstream of `handle` (not including it).
    pub fn downstream_of(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeHandle> =
            self.graph.neighbors_directed(handle, Direction::Outgoing).collect();
        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                result.push(current);
                queue.extend(self.graph.neighbors_directed(current, Direction::Outgoing));
            }
        }
        result
    }

    /// Nodes with no inputs.
    pub fn sources(&self) -> Vec<NodeHandle> {
        self.graph
            .node_indices()
            .filter(|&h| self.graph.neighbors_directed(h, Direction::Incoming).next().is_none())
            .collect()
    }

    /// Nodes with no consumers.
    pub fn terminals(&self) -> Vec<NodeHandle> {
        self.graph
            .node_indices()
            .filter(|&h| self.graph.neighbors_directed(h, Direction::Outgoing).next().is_none())
            .collect()
    }

    // ========================================================================
    // Streaming State
    // ========================================================================

    /// Mark a node and everything downstream of it as stale, e.g. after its
    /// stage parameters or source data changed.
    pub fn mark_modified(&mut self, handle: NodeHandle) -> GraphResult<()> {
        self.node_mut(handle)?.state.invalidate();
        for downstream in self.downstream_of(handle) {
            self.node_mut(downstream)?.state.invalidate();
        }
        Ok(())
    }

    /// Drop buffered data and requests on every node.
    pub fn release_data(&mut self) {
        for node in self.graph.node_weights_mut() {
            let info = node.state.info;
            node.state.reset();
            node.state.info = info;
        }
    }

    /// Validity of a node's buffered output.
    pub fn validity(&self, handle: NodeHandle) -> GraphResult<CacheValidity> {
        Ok(self.node(handle)?.state.validity)
    }
}
