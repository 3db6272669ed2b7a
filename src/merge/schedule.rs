//! Bottom-up execution of the merge tree.
//!
//! The tree is flattened into an arena of tasks. Every leaf task is spawned
//! up front; an internal task carries a counter of unfinished children and
//! is spawned by whichever child brings that counter to zero. The first
//! error stops new tasks from starting and is returned once the scope drains.

use super::node::{MergeEnv, merge_children};
use super::tree::{MergeKind, MergeTreeNode};
use crate::block::{Block, BlockSortResult, BlockSorter};
use crate::utils::progress::ProgressBar;
use anyhow::{Context, Result, anyhow};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
enum TaskKind {
    Sort,
    Merge(MergeKind),
}

struct Task {
    kind: TaskKind,
    block: Block,
    parent: Option<usize>,
    children: Vec<usize>,
    pending: AtomicUsize,
    result: Mutex<Option<BlockSortResult>>,
}

/// Merge tree nodes in post-order; the root is the last task
pub struct TaskGraph {
    tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn from_tree(root: &MergeTreeNode) -> Self {
        let mut graph = Self {
            tasks: Vec::with_capacity(root.node_count()),
        };
        graph.push(root);
        graph
    }

    fn push(&mut self, node: &MergeTreeNode) -> usize {
        let (kind, children) = match node {
            MergeTreeNode::Leaf { .. } => (TaskKind::Sort, Vec::new()),
            MergeTreeNode::Internal { children, kind, .. } => {
                let ids: Vec<usize> = children.iter().map(|c| self.push(c)).collect();
                (TaskKind::Merge(*kind), ids)
            }
        };
        let id = self.tasks.len();
        for &child in &children {
            self.tasks[child].parent = Some(id);
        }
        self.tasks.push(Task {
            kind,
            block: node.block(),
            parent: None,
            pending: AtomicUsize::new(children.len()),
            children,
            result: Mutex::new(None),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.children.is_empty())
            .map(|(id, _)| id)
    }

    fn take_result(&self, id: usize) -> Result<BlockSortResult> {
        self.tasks[id]
            .result
            .lock()
            .map_err(|_| anyhow!("Node {id}: result lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("Node {id} finished without a result"))
    }
}

struct Run<'a> {
    graph: &'a TaskGraph,
    env: MergeEnv<'a>,
    sorter: &'a dyn BlockSorter,
    progress: &'a ProgressBar,
    failed: AtomicBool,
    error: Mutex<Option<anyhow::Error>>,
}

impl<'a> Run<'a> {
    fn execute(&self, id: usize) -> Result<BlockSortResult> {
        let task = &self.graph.tasks[id];
        match task.kind {
            TaskKind::Sort => self
                .sorter
                .sort_block(self.env.text, task.block, self.env.ctx, self.env.cfg)
                .with_context(|| format!("Node {id}: sorting leaf {}", task.block)),
            TaskKind::Merge(kind) => {
                let children = task
                    .children
                    .iter()
                    .map(|&c| self.graph.take_result(c))
                    .collect::<Result<Vec<_>>>()?;
                merge_children(&self.env, id, kind, children)
                    .with_context(|| format!("Node {id}: merging {} ({kind})", task.block))
            }
        }
    }

    fn run_task<'s>(&'s self, scope: &rayon::Scope<'s>, id: usize) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        let result = match self.execute(id) {
            Ok(result) => result,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        self.progress.inc(1);

        let task = &self.graph.tasks[id];
        match task.result.lock() {
            Ok(mut slot) => *slot = Some(result),
            Err(_) => {
                self.fail(anyhow!("Node {id}: result lock poisoned"));
                return;
            }
        }
        if let Some(parent) = task.parent {
            // The last child to finish schedules the parent
            if self.graph.tasks[parent].pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                scope.spawn(move |s| self.run_task(s, parent));
            }
        }
    }

    fn fail(&self, error: anyhow::Error) {
        self.failed.store(true, Ordering::Release);
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                log::error!("{error:#}");
                *slot = Some(error);
            }
        }
    }
}

/// Sort every leaf and merge the tree; returns the root block
pub fn run_tree(
    graph: &TaskGraph,
    env: MergeEnv,
    sorter: &dyn BlockSorter,
    progress: &ProgressBar,
) -> Result<BlockSortResult> {
    let root = graph
        .len()
        .checked_sub(1)
        .ok_or_else(|| anyhow!("empty merge tree"))?;
    let run = Run {
        graph,
        env,
        sorter,
        progress,
        failed: AtomicBool::new(false),
        error: Mutex::new(None),
    };

    rayon::scope(|s| {
        let run = &run;
        for id in graph.leaves() {
            s.spawn(move |s| run.run_task(s, id));
        }
    });

    let error = run.error.into_inner().map_err(|_| anyhow!("error lock poisoned"))?;
    if let Some(error) = error {
        return Err(error);
    }
    graph.take_result(root)
}
