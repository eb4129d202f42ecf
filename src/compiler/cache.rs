// Compile Cache: memoize optimized graphs to avoid re-running the passes
//
// Cache key is a SHA-256 digest of: (graph structure, optimization options,
// workspace state the passes observe for this graph)

use crate::core::workspace::Workspace;
use crate::ir::{ArgValue, GraphDef, Slot, SHAPE_LIKE_ARG};
use crate::optimizer::{OptimizeOptions, OptimizedGraph};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Default number of cached graphs
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Cache key for optimized graphs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    digest: [u8; 32],
}

impl CacheKey {
    /// Create a cache key for compiling `graph` with `options` against `workspace`
    pub fn from_graph(graph: &GraphDef, options: &OptimizeOptions, workspace: &dyn Workspace) -> Self {
        let mut hasher = Sha256::new();
        Self::hash_graph(&mut hasher, graph);

        hasher.update([options.level.as_u8()]);
        hasher.update(options.phase.to_string().as_bytes());

        // Fed tensors decide which inputs survive pruning
        for name in workspace.tensor_names() {
            if graph.tensor(&name).is_some() {
                hasher.update(b"fed:");
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
            }
        }
        // Registered aliases decide which renames the workspace accepts
        for id in graph.symbols().ids() {
            let name = graph.name_of(id);
            if !workspace.has_tensor(name) {
                continue;
            }
            let resolved = workspace.tensor_name(name);
            if resolved != name {
                hasher.update(b"alias:");
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
                hasher.update(resolved.as_bytes());
                hasher.update([0u8]);
            }
        }
        // Names referenced by shape_like arguments are resolved, not interned
        for op in graph.ops() {
            for value in op.args_named(SHAPE_LIKE_ARG) {
                if let ArgValue::Str(name) = value {
                    hasher.update(b"like:");
                    hasher.update(workspace.tensor_name(name).as_bytes());
                    hasher.update([0u8]);
                }
            }
        }
        // Gradient names resolve through workspace aliases
        for request in graph.gradients() {
            for id in [request.cost, request.wrt] {
                let name = graph.gradient_name(id);
                let resolved = if workspace.has_tensor(&name) {
                    workspace.tensor_name(&name)
                } else {
                    name
                };
                hasher.update(b"grad:");
                hasher.update(resolved.as_bytes());
                hasher.update([0u8]);
            }
        }

        let result = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        Self { digest }
    }

    fn hash_graph(hasher: &mut Sha256, graph: &GraphDef) {
        hasher.update(graph.name.as_bytes());
        hasher.update([0u8]);

        let hash_slots = |hasher: &mut Sha256, slots: &[Slot]| {
            hasher.update((slots.len() as u64).to_le_bytes());
            for slot in slots {
                match slot {
                    Slot::Present(id) => hasher.update(graph.name_of(*id).as_bytes()),
                    Slot::Absent => hasher.update(b"\x01absent"),
                }
                hasher.update([0u8]);
            }
        };

        // Operators in definition order; order is part of the semantics
        for op in graph.ops() {
            hasher.update(op.op_type.as_bytes());
            hasher.update([0u8]);
            hash_slots(hasher, &op.inputs);
            hash_slots(hasher, &op.outputs);
            for arg in &op.args {
                hasher.update(arg.name.as_bytes());
                hasher.update([0u8]);
                // Variant tag disambiguates Int(1) from Float(1.0)
                let tag: u8 = match &arg.value {
                    ArgValue::Int(_) => 0,
                    ArgValue::Float(_) => 1,
                    ArgValue::Str(_) => 2,
                    ArgValue::Ints(_) => 3,
                    ArgValue::Floats(_) => 4,
                    ArgValue::Strs(_) => 5,
                };
                hasher.update([tag]);
                hasher.update(arg.value.to_string().as_bytes());
                hasher.update([0u8]);
            }
        }

        for (label, ids) in [(b"in", graph.inputs()), (b"ou", graph.outputs())] {
            hasher.update(label);
            for &id in ids {
                hasher.update(graph.name_of(id).as_bytes());
                hasher.update([0u8]);
            }
        }
        for request in graph.gradients() {
            hasher.update(b"gr");
            hasher.update(graph.name_of(request.cost).as_bytes());
            hasher.update([0u8]);
            hasher.update(graph.name_of(request.wrt).as_bytes());
            hasher.update([0u8]);
        }
    }

    /// Hex form of the digest, for logs
    pub fn to_hex(&self) -> String {
        self.digest.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

/// Optimized graph with metadata
#[derive(Debug, Clone)]
pub struct CachedGraph {
    /// The optimization result
    pub graph: Arc<OptimizedGraph>,
    /// Number of times this entry has been used
    pub use_count: usize,
    /// Insertion order, breaks use-count ties
    sequence: u64,
}

/// Optimized-graph cache with least-used eviction
#[derive(Debug)]
pub struct CompileCache {
    entries: FxHashMap<CacheKey, CachedGraph>,
    capacity: usize,
    next_sequence: u64,
    hits: usize,
    misses: usize,
}

impl CompileCache {
    /// Create a cache holding at most `capacity` graphs; 0 disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity,
            next_sequence: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Try to get an optimized graph from the cache
    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<OptimizedGraph>> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.use_count += 1;
                self.hits += 1;
                Some(Arc::clone(&entry.graph))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert an optimized graph, evicting the least-used entry when full
    pub fn insert(&mut self, key: CacheKey, graph: Arc<OptimizedGraph>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_least_used();
        }

        let entry = CachedGraph {
            graph,
            use_count: 1,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(key, entry);
    }

    fn evict_least_used(&mut self) {
        // Find entry with lowest use count, oldest first
        if let Some(key_to_remove) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.use_count, entry.sequence))
            .map(|(key, _)| key.clone())
        {
            log::trace!("Evicting cached graph {}", key_to_remove.to_hex());
            self.entries.remove(&key_to_remove);
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            num_entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub num_entries: usize,
    pub capacity: usize,
    pub hits: usize,
    pub misses: usize,
}

impl Default for CompileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
