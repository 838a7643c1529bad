//! The Cairn computation graph.
//!
//! Work is expressed as [`Computable`] nodes wrapped in [`Node`] handles.
//! Each node declares its [`Inputs`], which may include other nodes; the
//! [`Orchestrator`] resolves those first, digests the manifest, consults the
//! cache and runs `compute` only on a miss. Concurrent requests for the same
//! work share a single run through a [`Promise`].
//!
//! ```ignore
//! let orch = Orchestrator::builder()
//!     .cache(Arc::new(LocalCache::open(&root)?))
//!     .registry(CacheableRegistry::builder().register(SerdeCacheable::<String>::new()).build())
//!     .build();
//! let invocation = orch.invocation();
//! let result = invocation.get_value(&Node::deduped(Greeting { name })).await?;
//! ```

#![warn(missing_docs)]

pub mod adapters;
pub mod computable;
pub mod context;
pub mod error;
pub mod inputs;
pub mod lease;
pub mod node;
pub mod orchestrator;
pub mod promise;
pub mod registry;
pub mod resolved;
pub mod result;

pub use adapters::{ByteStream, ByteStreamCacheable, BytesCacheable, SerdeCacheable};
pub use async_trait::async_trait;
pub use cairn_tasks::ActionDef;
pub use computable::{Computable, OutputPolicy};
pub use context::ComputeContext;
pub use error::ComputeError;
pub use inputs::{Inputs, Marshaler};
pub use lease::Leases;
pub use node::{Identity, Node, Scope};
pub use orchestrator::{Invocation, Orchestrator, OrchestratorBuilder};
pub use promise::{Promise, Waiter};
pub use registry::{Cacheable, CacheableRegistry, RegistryBuilder};
pub use resolved::Resolved;
pub use result::{NodeResult, ResultWithTimestamp};
