//! Cross-stream reuse permissions.
//!
//! A node on stream B may take a freed block from stream A only if B is
//! known to run after A. The resolver derives this from data edges between
//! lanes and keeps it to a single inheritance chain per stream: at a merge
//! point the predecessor whose total footprint is closest to the stream's
//! own is chosen, and everything that predecessor may reuse is inherited.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::graph::{Graph, NodeId};

/// Per-stream summary gathered in one pass over the node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub first: NodeId,
    pub last: NodeId,
    /// Sum of every output and workspace size requested on the stream.
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StreamReuseGraph {
    streams: BTreeMap<i64, StreamInfo>,
    predecessors: BTreeMap<i64, BTreeSet<i64>>,
    chosen: BTreeMap<i64, i64>,
    reusable: BTreeMap<i64, BTreeSet<i64>>,
}

impl StreamReuseGraph {
    pub fn build(graph: &Graph) -> Self {
        let mut streams: BTreeMap<i64, StreamInfo> = BTreeMap::new();
        for node in &graph.nodes {
            let bytes = node
                .outputs
                .iter()
                .map(|o| o.size)
                .chain(node.workspace_bytes.iter().copied())
                .fold(0u64, u64::saturating_add);
            let info = streams.entry(node.stream_id).or_insert(StreamInfo {
                first: node.id,
                last: node.id,
                total_bytes: 0,
            });
            info.last = node.id;
            info.total_bytes = info.total_bytes.saturating_add(bytes);
        }

        let mut predecessors: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for node in &graph.nodes {
            for output in &node.outputs {
                for edge in &output.consumers {
                    let Some(consumer) = graph.node(edge.node) else {
                        continue;
                    };
                    if consumer.stream_id != node.stream_id {
                        predecessors
                            .entry(consumer.stream_id)
                            .or_default()
                            .insert(node.stream_id);
                    }
                }
            }
        }

        let mut chosen = BTreeMap::new();
        for (&stream, preds) in &predecessors {
            let own = streams.get(&stream).map_or(0, |s| s.total_bytes);
            let mut best: Option<(u64, i64)> = None;
            for &pred in preds {
                let gap = streams.get(&pred).map_or(0, |s| s.total_bytes).abs_diff(own);
                if best.map_or(true, |(best_gap, _)| gap < best_gap) {
                    best = Some((gap, pred));
                }
            }
            if let Some((_, pred)) = best {
                debug!("Stream {} inherits reusable blocks from stream {}", stream, pred);
                chosen.insert(stream, pred);
            }
        }

        let mut reusable = BTreeMap::new();
        let mut visiting = BTreeSet::new();
        for &stream in streams.keys() {
            resolve(stream, &chosen, &mut reusable, &mut visiting);
        }

        Self {
            streams,
            predecessors,
            chosen,
            reusable,
        }
    }

    /// May a node on `requester` take a freed block created on `owner`?
    pub fn can_reuse(&self, requester: i64, owner: i64) -> bool {
        self.reusable
            .get(&requester)
            .is_some_and(|set| set.contains(&owner))
    }

    pub fn reusable_from(&self, stream: i64) -> Option<&BTreeSet<i64>> {
        self.reusable.get(&stream)
    }

    pub fn stream_info(&self, stream: i64) -> Option<&StreamInfo> {
        self.streams.get(&stream)
    }

    /// Streams with a node directly feeding `stream`.
    pub fn predecessors(&self, stream: i64) -> Option<&BTreeSet<i64>> {
        self.predecessors.get(&stream)
    }

    /// The single predecessor `stream` inherits from.
    pub fn inherited_from(&self, stream: i64) -> Option<i64> {
        self.chosen.get(&stream).copied()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

fn resolve(
    stream: i64,
    chosen: &BTreeMap<i64, i64>,
    memo: &mut BTreeMap<i64, BTreeSet<i64>>,
    visiting: &mut BTreeSet<i64>,
) -> BTreeSet<i64> {
    if let Some(set) = memo.get(&stream) {
        return set.clone();
    }
    let mut set = BTreeSet::from([stream]);
    // cycle between lanes: stop at the stream already on the path
    if !visiting.insert(stream) {
        return set;
    }
    if let Some(&source) = chosen.get(&stream) {
        set.extend(resolve(source, chosen, memo, visiting));
    }
    visiting.remove(&stream);
    memo.insert(stream, set.clone());
    set
}
