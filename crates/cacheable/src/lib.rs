//! Declarative method-result caching.
//!
//! ```text
//! CacheBinding::invoke(method, args, body)
//!        │  cache(ttl)            invalidate / invalidate_method / invalidate_all
//!        ▼                                   ▲ (after body succeeds)
//!   KeyBuilder ── CacheKey ──▶ read_through ─┘
//!                                  │
//!                         dyn CacheLayer
//!                 ┌────────────────┴────────────────┐
//!          CacheCoordinator                    TieredCache
//!                 │                            fast │ slow
//!          dyn CacheBackend               dyn CacheBackend ×2
//!        (MemoryBackend | RedisBackend)
//! ```
//!
//! Reads fail open (a backend error is a miss); writes and invalidations
//! fail closed.

pub mod backend;
pub mod binding;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod observability;
pub mod tier;

pub use backend::{CacheBackend, MemoryBackend, RedisBackend, RedisConfig};
pub use binding::{
    CacheBinding, CachePolicy, Cacheable, ClassSpec, ClassSpecBuilder, Invalidation,
    InvalidationRule, MethodSpec,
};
pub use config::{BackendKind, CacheSettings, build_cache_layer};
pub use coordinator::{CacheCoordinator, CacheLayer, CacheStats, read_through};
pub use error::{CacheError, Result};
pub use key::{CacheKey, CallArgs, KeyBuilder};
pub use observability::{init_tracing, init_tracing_with_level};
pub use tier::TieredCache;
