//! Graph fixtures
//!
//! Builders for the small hand-written graphs used by the scenario tests and
//! the random layered graphs used by the property tests.

use tensorplan::graph::{InputRef, OutputRef};
use tensorplan::{Graph, Node, NodeId, OutputDesc};

/// Single-stream chain of compute ops, each feeding the next.
pub fn chain(sizes: &[u64]) -> Graph {
    let mut graph = Graph::new("chain");
    let mut prev: Option<NodeId> = None;
    for (i, size) in sizes.iter().enumerate() {
        let id = graph.add_node(Node::new(format!("n{}", i), "Conv2D").with_output(*size));
        if let Some(p) = prev {
            graph.connect(p, 0, id, 0).expect("chain edge");
        }
        prev = Some(id);
    }
    graph
}

/// D produces 64 bytes, C consumes it in place, X reads C's output.
pub fn in_place_pair() -> (Graph, NodeId, NodeId) {
    let mut graph = Graph::new("in_place");
    let d = graph.add_node(Node::new("d", "Conv2D").with_output(64));
    let c = graph.add_node(
        Node::new("c", "Relu").with_output_desc(OutputDesc::new(64).reusing_input(0)),
    );
    let x = graph.add_node(Node::new("x", "Relu").with_output(64));
    graph.connect(d, 0, c, 0).expect("d -> c");
    graph.connect(c, 0, x, 0).expect("c -> x");
    (graph, d, c)
}

/// Two exclusive dynamic-batch branches: E with three outputs, F with two
/// larger ones. All outputs stay live until the end.
pub fn batch_branches() -> (Graph, Vec<NodeId>, Vec<NodeId>) {
    let mut graph = Graph::new("dynamic_batch");
    let e: Vec<NodeId> = [256u64, 128, 64]
        .iter()
        .enumerate()
        .map(|(i, size)| {
            graph.add_node(
                Node::new(format!("e{}", i), "Conv2D")
                    .with_output(*size)
                    .with_batch_label("batch_e"),
            )
        })
        .collect();
    let f: Vec<NodeId> = [512u64, 96]
        .iter()
        .enumerate()
        .map(|(i, size)| {
            graph.add_node(
                Node::new(format!("f{}", i), "Conv2D")
                    .with_output(*size)
                    .with_batch_label("batch_f"),
            )
        })
        .collect();
    (graph, e, f)
}

/// One randomly generated node: output size, workspace size, stream and an
/// optional edge from an earlier node.
pub type NodeSpec = (u64, u64, i64, Option<usize>);

/// Build a graph from node specs. `from` is reduced modulo the number of
/// earlier nodes, so any value is valid.
pub fn layered_graph(specs: &[NodeSpec]) -> Graph {
    let mut graph = Graph::new("random");
    for (i, (size, workspace, stream, from)) in specs.iter().enumerate() {
        let id = graph.add_node(
            Node::new(format!("n{}", i), "Conv2D")
                .on_stream(*stream)
                .with_output(*size)
                .with_workspace(*workspace),
        );
        if let (Some(from), true) = (*from, i > 0) {
            graph.connect(NodeId(from % i), 0, id, 0).expect("edge to earlier node");
        }
    }
    graph
}

/// Inclusive node window during which output 0 of `node` must stay intact:
/// from its producer to its last consumer, or to the end of the graph when
/// nothing consumes it.
pub fn output_window(graph: &Graph, node: NodeId) -> (usize, usize) {
    let consumers: &[InputRef] = graph.consumers(OutputRef { node, index: 0 });
    let end = if consumers.is_empty() {
        graph.len()
    } else {
        consumers.iter().map(|c| c.node.0).max().unwrap_or(node.0)
    };
    (node.0, end)
}

/// Inclusive node window during which workspace 0 of `node` must stay
/// intact: up to the node before the next one on the same stream, or to the
/// end of the graph when no later node shares the stream.
pub fn workspace_window(graph: &Graph, node: NodeId) -> (usize, usize) {
    let stream = graph.nodes[node.0].stream_id;
    let end = graph.nodes[node.0 + 1..]
        .iter()
        .find(|n| n.stream_id == stream)
        .map_or(graph.len(), |next| next.id.0 - 1);
    (node.0, end)
}
