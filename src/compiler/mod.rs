// Compiler Module: validation, optimization and compile caching

pub mod cache;
pub mod graph_compiler;

// Re-exports
pub use cache::{CacheKey, CacheStats, CachedGraph, CompileCache, DEFAULT_CACHE_CAPACITY};
pub use graph_compiler::GraphCompiler;
