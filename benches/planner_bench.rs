//! Planner Benchmark Suite
//!
//! Times full planning passes on synthetic graphs:
//! - Long single-stream chains (pool hit on almost every request)
//! - Fan-out graphs spread over several streams
//! - Dynamic-batch graphs exercising the merger
//!
//! Run with: `cargo bench --bench planner_bench`

use std::hint::black_box;
use std::time::{Duration, Instant};

use tensorplan::{Graph, MemoryAssigner, Node, NodeId, PlannerConfig};

struct Benchmark {
    name: String,
    iterations: usize,
    warmup_iterations: usize,
}

impl Benchmark {
    fn new(name: &str, iterations: usize) -> Self {
        Benchmark {
            name: name.to_string(),
            iterations,
            warmup_iterations: iterations.min(10),
        }
    }

    fn run<F, R>(&self, mut f: F) -> BenchmarkResult
    where
        F: FnMut() -> R,
    {
        for _ in 0..self.warmup_iterations {
            black_box(f());
        }

        let mut durations = Vec::with_capacity(self.iterations);
        for _ in 0..self.iterations {
            let start = Instant::now();
            black_box(f());
            durations.push(start.elapsed());
        }

        BenchmarkResult {
            name: self.name.clone(),
            durations,
        }
    }
}

struct BenchmarkResult {
    name: String,
    durations: Vec<Duration>,
}

impl BenchmarkResult {
    fn report(&self) {
        if self.durations.is_empty() {
            return;
        }
        let mut sorted = self.durations.clone();
        sorted.sort();
        let total: Duration = sorted.iter().sum();
        let avg = total / sorted.len() as u32;
        let p50 = sorted[sorted.len() / 2];
        let p95 = sorted[(sorted.len() * 95) / 100];

        println!("\n=== {} ===", self.name);
        println!("Iterations: {}", sorted.len());
        println!("Average: {:?} ({:.3} ms)", avg, avg.as_secs_f64() * 1000.0);
        println!("Min:     {:?}", sorted[0]);
        println!("P50:     {:?}", p50);
        println!("P95:     {:?}", p95);
    }
}

fn chain_graph(len: usize) -> Graph {
    let mut graph = Graph::new("chain");
    for i in 0..len {
        let size = 1024 * (1 + (i % 7) as u64);
        let id = graph.add_node(
            Node::new(format!("n{}", i), "Conv2D")
                .with_output(size)
                .with_workspace(256 * (i % 3) as u64),
        );
        if i > 0 {
            let _ = graph.connect(NodeId(i - 1), 0, id, 0);
        }
    }
    graph
}

fn fan_out_graph(width: usize, depth: usize, streams: i64) -> Graph {
    let mut graph = Graph::new("fan_out");
    let root = graph.add_node(Node::new("root", "Data").with_output(4096));
    let mut previous = vec![root; width];
    for d in 0..depth {
        for (w, prev) in previous.iter_mut().enumerate() {
            let id = graph.add_node(
                Node::new(format!("n{}_{}", d, w), "MatMul")
                    .on_stream(w as i64 % streams)
                    .with_output(2048 + 512 * (w as u64 % 4)),
            );
            let _ = graph.connect(*prev, 0, id, 0);
            *prev = id;
        }
    }
    graph
}

fn batch_graph(branches: usize, per_branch: usize) -> Graph {
    let mut graph = Graph::new("dynamic_batch");
    for b in 0..branches {
        for i in 0..per_branch {
            graph.add_node(
                Node::new(format!("b{}_{}", b, i), "Conv2D")
                    .with_output(512 * (1 + ((b + i) % 5) as u64))
                    .with_batch_label(format!("batch_{}", b)),
            );
        }
    }
    graph
}

fn bench_graph(name: &str, graph: &Graph, iterations: usize) {
    let assigner = MemoryAssigner::new(PlannerConfig::default());
    let result = Benchmark::new(name, iterations).run(|| {
        let mut planned = graph.clone();
        assigner.assign(&mut planned).map(|s| s.arena_size)
    });
    result.report();

    let mut planned = graph.clone();
    if let Ok(summary) = assigner.assign(&mut planned) {
        println!("Arena:   {} bytes in {} blocks", summary.arena_size, summary.live_blocks);
    }
}

fn main() {
    println!("====================================");
    println!("tensorplan Planner Benchmark Suite");
    println!("====================================");

    for len in [100, 1_000, 10_000] {
        bench_graph(&format!("chain/{}", len), &chain_graph(len), 50);
    }
    bench_graph("fan_out/16x64/4 streams", &fan_out_graph(16, 64, 4), 50);
    bench_graph("dynamic_batch/8x32", &batch_graph(8, 32), 50);
}
