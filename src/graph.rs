//! Checkpoint graph reachability
//!
//! Breadth-first traversal over a map's directed checkpoint connections.
//! Graphs may contain cycles and converging paths; each node is expanded at
//! most once, so every traversal terminates after visiting each reachable
//! node a single time.

use crate::models::{CheckpointConnection, CheckpointId, MapId};
use crate::store::SqliteLedger;
use anyhow::Result;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Adjacency lookup keyed by `(checkpoint, map)`.
pub trait ChildLookup {
    fn children(&self, cp_id: CheckpointId, map_id: MapId) -> Result<Vec<CheckpointId>>;
}

impl ChildLookup for SqliteLedger {
    fn children(&self, cp_id: CheckpointId, map_id: MapId) -> Result<Vec<CheckpointId>> {
        SqliteLedger::children(self, cp_id, map_id)
    }
}

/// In-memory adjacency list, usually one map's worth of connections.
#[derive(Debug, Clone, Default)]
pub struct CheckpointGraph {
    edges: HashMap<(CheckpointId, MapId), Vec<CheckpointId>>,
}

impl CheckpointGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_connections(connections: impl IntoIterator<Item = CheckpointConnection>) -> Self {
        let mut graph = Self::new();
        for c in connections {
            graph.add_connection(c);
        }
        graph
    }

    pub fn add_connection(&mut self, connection: CheckpointConnection) {
        self.edges
            .entry((connection.from, connection.map_id))
            .or_default()
            .push(connection.to);
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

impl ChildLookup for CheckpointGraph {
    fn children(&self, cp_id: CheckpointId, map_id: MapId) -> Result<Vec<CheckpointId>> {
        Ok(self
            .edges
            .get(&(cp_id, map_id))
            .cloned()
            .unwrap_or_default())
    }
}

/// True iff a directed path leads from `from` to `to` using only edges of
/// `map_id`. A checkpoint is trivially reachable from itself.
pub fn is_reachable<L: ChildLookup + ?Sized>(
    lookup: &L,
    from: CheckpointId,
    to: CheckpointId,
    map_id: MapId,
) -> Result<bool> {
    if from == to {
        return Ok(true);
    }

    let mut visited: HashSet<CheckpointId> = HashSet::new();
    let mut frontier: VecDeque<CheckpointId> = VecDeque::from([from]);
    visited.insert(from);

    while let Some(current) = frontier.pop_front() {
        for child in lookup.children(current, map_id)? {
            if child == to {
                return Ok(true);
            }
            if visited.insert(child) {
                frontier.push_back(child);
            }
        }
    }

    Ok(false)
}

/// Every checkpoint reachable from `from` on `map_id`, including `from`.
pub fn downstream_set<L: ChildLookup + ?Sized>(
    lookup: &L,
    from: CheckpointId,
    map_id: MapId,
) -> Result<BTreeSet<CheckpointId>> {
    let mut visited: BTreeSet<CheckpointId> = BTreeSet::new();
    let mut frontier: VecDeque<CheckpointId> = VecDeque::from([from]);
    visited.insert(from);

    while let Some(current) = frontier.pop_front() {
        for child in lookup.children(current, map_id)? {
            if visited.insert(child) {
                frontier.push_back(child);
            }
        }
    }

    Ok(visited)
}
