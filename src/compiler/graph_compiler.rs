// Graph Compiler: validation, optimization and memoization
//
// Compile pipeline:
//   GraphDef -> schema validation -> cache lookup -> GraphOptimizer -> cache insert

use crate::compiler::cache::{CacheKey, CacheStats, CompileCache};
use crate::core::error::{OptimizerError, Result};
use crate::core::schema::OpSchemaRegistry;
use crate::core::workspace::Workspace;
use crate::ir::GraphDef;
use crate::optimizer::{GraphOptimizer, OptimizeOptions, OptimizedGraph};
use std::sync::Arc;

/// Compiles graph definitions against an owned workspace
pub struct GraphCompiler<W: Workspace> {
    workspace: W,
    schemas: OpSchemaRegistry,
    cache: CompileCache,
}

impl<W: Workspace> GraphCompiler<W> {
    /// Compiler using the built-in operator schemas
    pub fn new(workspace: W) -> Self {
        Self::with_schemas(workspace, OpSchemaRegistry::with_builtin())
    }

    /// Compiler using a caller-provided schema registry
    pub fn with_schemas(workspace: W, schemas: OpSchemaRegistry) -> Self {
        Self {
            workspace,
            schemas,
            cache: CompileCache::default(),
        }
    }

    /// Replace the cache with one bounded to `capacity` entries
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = CompileCache::new(capacity);
        self
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut W {
        &mut self.workspace
    }

    pub fn schemas(&self) -> &OpSchemaRegistry {
        &self.schemas
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Check every operator against its schema, if it has one
    pub fn validate(&self, graph: &GraphDef) -> Result<()> {
        for (index, op) in graph.ops().iter().enumerate() {
            if op.op_type.is_empty() {
                return Err(OptimizerError::InvalidGraph(format!(
                    "operator #{} of '{}' has no type",
                    index, graph.name
                )));
            }
            if let Some(schema) = self.schemas.schema_for(&op.op_type) {
                schema.verify(index, op)?;
            }
        }
        Ok(())
    }

    /// Validate and optimize `graph`, reusing an earlier result when the
    /// graph, the options and the relevant workspace state are unchanged
    pub fn compile(&mut self, graph: &GraphDef, options: &OptimizeOptions) -> Result<Arc<OptimizedGraph>> {
        self.validate(graph)?;

        let key = CacheKey::from_graph(graph, options, &self.workspace);
        if let Some(cached) = self.cache.get(&key) {
            log::debug!("Compile cache hit for '{}' ({})", graph.name, key.to_hex());
            return Ok(cached);
        }

        let mut optimizer = GraphOptimizer::new(&mut self.workspace, &self.schemas);
        let optimized = Arc::new(optimizer.optimize(graph, options)?);
        log::debug!(
            "Compiled '{}': {} -> {} operators",
            graph.name,
            graph.op_count(),
            optimized.graph.op_count()
        );

        self.cache.insert(key, Arc::clone(&optimized));
        Ok(optimized)
    }

    /// Drop every cached result
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}
