//! Data-flow graphs over the statements of one loop region.
use crate::{BlockId, StmId, SynthParams};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DfEdgeKind {
    /// From a defining statement to a statement using the value.
    DefUse,
    /// Ordering between memory or object statements.
    Seq,
    /// From a statement to the terminator of its block. The terminator may
    /// share the last step of its source.
    Control,
    /// From a read of a variable to a later redefinition of it. The write may
    /// happen in the same step as the read but not before.
    Anti,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DfEdge {
    pub kind: DfEdgeKind,
    /// The source is lexically after the destination.
    pub back: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DfNode {
    pub stm: StmId,
    pub block: BlockId,
    /// Program order of the statement inside the region.
    pub order: usize,
    pub latency: i64,
    pub begin: i64,
    pub end: i64,
}

/// One region's statements as a graph, plus the schedule assigned to them.
#[derive(Clone, Debug, Default)]
pub struct DataFlowGraph {
    pub name: String,
    /// Head block of the region.
    pub region: BlockId,
    pub blocks: Vec<BlockId>,
    pub nodes: Vec<DfNode>,
    pub edges: BTreeMap<(usize, usize), DfEdge>,
    pub synth_params: SynthParams,
    /// Index of the enclosing region's graph in the scope's graph list.
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    index: HashMap<StmId, usize>,
}

impl DataFlowGraph {
    pub fn new(name: String, region: BlockId, blocks: Vec<BlockId>) -> Self {
        DataFlowGraph {
            name,
            region,
            blocks,
            ..Default::default()
        }
    }

    pub fn add_node(&mut self, stm: StmId, block: BlockId, latency: i64) -> usize {
        let n = self.nodes.len();
        self.nodes.push(DfNode {
            stm,
            block,
            order: n,
            latency,
            begin: -1,
            end: -1,
        });
        self.index.insert(stm, n);
        n
    }

    pub fn node_of(&self, stm: StmId) -> Option<usize> {
        self.index.get(&stm).copied()
    }

    /// Adds an edge unless one already exists. Self edges are ignored.
    pub fn add_edge(&mut self, kind: DfEdgeKind, src: usize, dst: usize) {
        if src == dst {
            return;
        }
        let back = self.nodes[src].order > self.nodes[dst].order;
        self.edges.entry((src, dst)).or_insert(DfEdge { kind, back });
    }

    pub fn edge(&self, src: usize, dst: usize) -> Option<&DfEdge> {
        self.edges.get(&(src, dst))
    }

    pub fn preds(&self, n: usize) -> Vec<usize> {
        self.edges
            .keys()
            .filter(|(_, d)| *d == n)
            .map(|(s, _)| *s)
            .collect()
    }

    pub fn succs(&self, n: usize) -> Vec<usize> {
        self.edges
            .keys()
            .filter(|(s, _)| *s == n)
            .map(|(_, d)| *d)
            .collect()
    }

    /// Predecessors through forward edges.
    pub fn preds_without_back(&self, n: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|((_, d), e)| *d == n && !e.back)
            .map(|((s, _), _)| *s)
            .collect()
    }

    pub fn succs_without_back(&self, n: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|((s, _), e)| *s == n && !e.back)
            .map(|((_, d), _)| *d)
            .collect()
    }

    /// Nodes without forward predecessors.
    pub fn sources(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|n| self.preds_without_back(*n).is_empty())
            .collect()
    }

    /// The last step any node occupies.
    pub fn makespan(&self) -> i64 {
        self.nodes.iter().map(|n| n.end).max().unwrap_or(0)
    }

    /// The shortest distance between two iterations of a pipelined loop
    /// that still lets each iteration read what the previous one carried
    /// around the loop. A back edge `src -> dst` needs `src.end - dst.begin`.
    pub fn recurrence_ii(&self) -> i64 {
        self.edges
            .iter()
            .filter(|(_, e)| e.back)
            .map(|((s, d), _)| self.nodes[*s].end - self.nodes[*d].begin)
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// Nodes of `blk` grouped by begin step, each group in program order.
    pub fn steps_of_block(&self, blk: BlockId) -> BTreeMap<i64, Vec<usize>> {
        let mut steps: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, n) in self.nodes.iter().enumerate() {
            if n.block == blk {
                steps.entry(n.begin).or_default().push(i);
            }
        }
        steps
    }
}
