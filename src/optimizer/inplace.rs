// In-place Aliasing Pass
//
// A tensor with a single consumer can hand its storage to that consumer's
// output when the consumer's schema permits the (input slot, output slot)
// pair. Chains of such tensors collapse onto their first tensor, the
// ancestor. Every applied rename is registered as a workspace alias.

use crate::core::error::Result;
use crate::core::schema::OpSchemaRegistry;
use crate::core::workspace::Workspace;
use crate::ir::{DagIndex, GraphDef, Slot, TensorId};
use crate::optimizer::pass::{GraphPass, PassContext};
use rustc_hash::{FxHashMap, FxHashSet};

/// In-place storage aliasing
#[derive(Debug, Default)]
pub struct AddInplace;

impl AddInplace {
    pub fn new() -> Self {
        Self
    }
}

impl GraphPass for AddInplace {
    fn run(&mut self, graph: &GraphDef, cx: &mut PassContext<'_>) -> Result<GraphDef> {
        Ok(add_inplace(graph, &mut *cx.workspace, cx.schemas))
    }

    fn name(&self) -> &str {
        "add-inplace"
    }
}

/// Alias single-consumer tensors onto their ancestors
pub fn add_inplace(
    graph: &GraphDef,
    workspace: &mut dyn Workspace,
    schemas: &OpSchemaRegistry,
) -> GraphDef {
    let dag = DagIndex::build(graph);
    let boundary = graph.boundary();
    let readers = count_readers(graph);

    let mut visited: FxHashSet<TensorId> = FxHashSet::default();
    let mut renamed: FxHashMap<TensorId, TensorId> = FxHashMap::default();
    for op in graph.ops() {
        for start in op.input_tensors().chain(op.output_tensors()) {
            if !visited.insert(start) || boundary.contains(&start) {
                continue;
            }
            let mut u = start;
            while let Some(v) = inplace_child(graph, &dag, &readers, schemas, u) {
                if boundary.contains(&v) || !visited.insert(v) {
                    break;
                }
                renamed.insert(v, start);
                u = v;
            }
        }
    }
    log::debug!("'{}': {} in-place candidates", graph.name, renamed.len());

    let mut renamer = Renamer {
        graph,
        boundary: &boundary,
        renamed,
        workspace,
    };
    let mut out = graph.without_ops();
    for op in graph.ops() {
        let mut op = op.clone();
        for slot in op.inputs.iter_mut() {
            renamer.rewrite(slot);
        }
        if let Some(schema) = schemas.schema_for(&op.op_type) {
            for &(output, input) in schema.shared_outputs() {
                let shared = op.inputs.get(input).and_then(|slot| slot.tensor());
                let original = op.outputs.get(output).and_then(|slot| slot.tensor());
                if let (Some(shared), Some(original)) = (shared, original) {
                    if shared != original {
                        renamer.renamed.insert(original, shared);
                    }
                }
            }
        }
        for slot in op.outputs.iter_mut() {
            renamer.rewrite(slot);
        }
        out.push_op(op);
    }
    out
}

/// Number of input slots reading each tensor, including operators without
/// outputs, which leave no child edges in the DAG
fn count_readers(graph: &GraphDef) -> FxHashMap<TensorId, usize> {
    let mut readers: FxHashMap<TensorId, usize> = FxHashMap::default();
    for op in graph.ops() {
        for u in op.input_tensors() {
            *readers.entry(u).or_insert(0) += 1;
        }
    }
    readers
}

/// The unique child of `u`, if its producer may overwrite `u` to produce it
fn inplace_child(
    graph: &GraphDef,
    dag: &DagIndex,
    readers: &FxHashMap<TensorId, usize>,
    schemas: &OpSchemaRegistry,
    u: TensorId,
) -> Option<TensorId> {
    if readers.get(&u) != Some(&1) {
        return None;
    }
    let &[v] = dag.children(u) else {
        return None;
    };
    let op = graph.op(dag.producer(v)?);
    let schema = schemas.schema_for(&op.op_type)?;
    if !schema.allows_inplace() {
        return None;
    }
    let output = op.outputs.iter().position(|slot| slot.is(v))?;
    let permitted = op
        .input_positions(u)
        .any(|input| schema.check_inplace(input, output));
    permitted.then_some(v)
}

struct Renamer<'a> {
    graph: &'a GraphDef,
    boundary: &'a FxHashSet<TensorId>,
    renamed: FxHashMap<TensorId, TensorId>,
    workspace: &'a mut dyn Workspace,
}

impl Renamer<'_> {
    /// Final target of `id`, following chained renames
    fn target(&self, id: TensorId) -> TensorId {
        let mut current = id;
        for _ in 0..self.renamed.len() {
            match self.renamed.get(&current) {
                Some(&next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    fn rewrite(&mut self, slot: &mut Slot) {
        let Slot::Present(id) = *slot else {
            return;
        };
        if !self.renamed.contains_key(&id) || self.boundary.contains(&id) {
            return;
        }
        let target = self.target(id);
        if target == id || self.boundary.contains(&target) {
            return;
        }

        let name = self.graph.name_of(id);
        let target_name = self.graph.name_of(target);
        if self.workspace.set_tensor_alias(target_name, name) {
            *slot = Slot::Present(target);
        } else {
            log::debug!("Alias {} -> {} refused, keeping {}", name, target_name, name);
            // Later readers keep the original name as well
            self.renamed.remove(&id);
        }
    }
}
