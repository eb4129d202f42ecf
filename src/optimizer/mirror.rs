// Recomputation Planning ("mirror stage")
//
// Non-gradient operators carrying a nonzero `mirror_stage` argument declare
// that their first input may be dropped after the forward pass and rebuilt on
// demand. Such tensors are written into a small rotating pool of shared
// buffers, each write tagged with a version. For every buffer version the pass
// records the minimal set of operators that must be replayed to regenerate it.
//
// Minimal replay sets follow the recurrence
//
//     Minimal(i) = {i} + union of Minimal(producer of u), for every input u of
//                  operator i that was redirected to a buffer
//
// and every output of operator i accumulates Minimal(i).

use crate::core::error::{OptimizerError, Result};
use crate::core::workspace::Workspace;
use crate::ir::{GraphDef, Slot, TensorId};
use crate::optimizer::pass::{GraphPass, PassContext};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Number of rotating buffers shared by all recomputed tensors
pub const MIRROR_POOL_SIZE: usize = 2;

/// Name prefix of the rotating buffers; slot `k` is `/share/buffer/symbol:k`
pub const MIRROR_BUFFER_PREFIX: &str = "/share/buffer/symbol:";

/// Buffer version -> operators to replay (ascending) to regenerate it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputePlan {
    replay: BTreeMap<TensorId, Vec<usize>>,
}

impl RecomputePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a buffer version to its replay list
    pub fn bind(&mut self, buffer: TensorId, ops: Vec<usize>) {
        self.replay.insert(buffer, ops);
    }

    pub fn get(&self, buffer: TensorId) -> Option<&[usize]> {
        self.replay.get(&buffer).map(Vec::as_slice)
    }

    /// Look a buffer version up by name in the graph that produced the plan
    pub fn get_by_name(&self, graph: &GraphDef, name: &str) -> Option<&[usize]> {
        graph.tensor(name).and_then(|id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TensorId, &[usize])> + '_ {
        self.replay.iter().map(|(&id, ops)| (id, ops.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.replay.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replay.is_empty()
    }
}

/// Recomputation planning pass; leaves its plan in the pass context
#[derive(Debug, Default)]
pub struct MirrorStage;

impl MirrorStage {
    pub fn new() -> Self {
        Self
    }
}

impl GraphPass for MirrorStage {
    fn run(&mut self, graph: &GraphDef, cx: &mut PassContext<'_>) -> Result<GraphDef> {
        let (out, plan) = mirror_stage(graph, &mut *cx.workspace)?;
        cx.recompute_plan = plan;
        Ok(out)
    }

    fn name(&self) -> &str {
        "mirror-stage"
    }
}

#[derive(Debug, Clone, Copy)]
enum Mirror {
    /// Marked for recomputation, not written yet
    Placeholder,
    /// Written into pool slot `slot` as buffer version `buffer`
    Buffer { buffer: TensorId, slot: usize },
}

/// Rewrite recomputable tensors onto the rotating buffers
///
/// Fails with [`OptimizerError::BufferPoolExhausted`] when an operator needs
/// more simultaneously live buffers than the pool holds.
pub fn mirror_stage(
    graph: &GraphDef,
    workspace: &mut dyn Workspace,
) -> Result<(GraphDef, RecomputePlan)> {
    let mut renamed: FxHashMap<TensorId, Mirror> = FxHashMap::default();
    for op in graph.ops() {
        if op.is_gradient() || !op.mirror_stage() {
            continue;
        }
        if let Some(&Slot::Present(x)) = op.inputs.first() {
            renamed.insert(x, Mirror::Placeholder);
        }
    }
    if renamed.is_empty() {
        return Ok((graph.clone(), RecomputePlan::default()));
    }

    let mut out = graph.clone();
    let mut versions = [0usize; MIRROR_POOL_SIZE];
    for (index, op) in graph.ops().iter().enumerate() {
        let mut rewritten = op.clone();
        let mut in_use = [false; MIRROR_POOL_SIZE];

        for slot in rewritten.inputs.iter_mut() {
            let Slot::Present(id) = *slot else {
                continue;
            };
            if let Some(&Mirror::Buffer { buffer, slot: k }) = renamed.get(&id) {
                *slot = Slot::Present(buffer);
                in_use[k] = true;
            }
        }

        for (j, output) in op.outputs.iter().enumerate() {
            let Slot::Present(id) = *output else {
                continue;
            };
            let Some(&state) = renamed.get(&id) else {
                continue;
            };
            if let Mirror::Buffer { buffer, .. } = state {
                // Written in place: keeps the buffer version of its input
                if op.reads(id) {
                    rewritten.outputs[j] = Slot::Present(buffer);
                    continue;
                }
            }

            let Some(k) = (0..MIRROR_POOL_SIZE).find(|&k| !in_use[k]) else {
                return Err(OptimizerError::BufferPoolExhausted {
                    op_index: index,
                    op_type: op.op_type.clone(),
                    pool_size: MIRROR_POOL_SIZE,
                });
            };
            in_use[k] = true;

            let base = format!("{}{}", MIRROR_BUFFER_PREFIX, k);
            workspace.create_tensor(&base);
            let buffer = out.intern(&format!("{}/ver:{}", base, versions[k]));
            versions[k] += 1;
            log::debug!(
                "{} of #{} ({}) -> {}",
                graph.name_of(id),
                index,
                op.op_type,
                out.name_of(buffer)
            );

            rewritten.outputs[j] = Slot::Present(buffer);
            renamed.insert(id, Mirror::Buffer { buffer, slot: k });
        }

        out.ops_mut()[index] = rewritten;
    }

    let plan = plan_replay(graph, &out, &renamed);
    log::debug!("'{}': {} recomputable buffers", graph.name, plan.len());
    Ok((out, plan))
}

fn plan_replay(
    before: &GraphDef,
    after: &GraphDef,
    renamed: &FxHashMap<TensorId, Mirror>,
) -> RecomputePlan {
    let mut minimal: FxHashMap<TensorId, BTreeSet<usize>> = FxHashMap::default();
    for (index, (op, rewritten)) in before.ops().iter().zip(after.ops()).enumerate() {
        let mut ops = BTreeSet::from([index]);
        for (original, slot) in op.inputs.iter().zip(&rewritten.inputs) {
            if original == slot {
                continue;
            }
            if let Some(replay) = original.tensor().and_then(|id| minimal.get(&id)) {
                ops.extend(replay.iter().copied());
            }
        }
        for id in op.output_tensors() {
            minimal.entry(id).or_default().extend(ops.iter().copied());
        }
    }

    let mut plan = RecomputePlan::new();
    for (original, state) in renamed {
        // Placeholders never written by this graph have nothing to replay
        let Mirror::Buffer { buffer, .. } = *state else {
            continue;
        };
        if let Some(ops) = minimal.get(original) {
            plan.bind(buffer, ops.iter().copied().collect());
        }
    }
    plan
}
