//! The node contract.

use std::any::{type_name, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use cairn_tasks::ActionDef;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::ComputeContext;
use crate::inputs::Inputs;
use crate::resolved::Resolved;
use crate::result::AnyValue;

/// Caching policy of a node's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputPolicy {
    /// The output may differ between runs with identical inputs, so it is
    /// never cached.
    pub non_deterministic: bool,
    /// The output must never be cached.
    pub not_cacheable: bool,
}

impl OutputPolicy {
    /// A policy that forbids caching.
    pub fn not_cacheable() -> Self {
        Self {
            not_cacheable: true,
            ..Self::default()
        }
    }

    /// A policy for outputs that may differ between runs.
    pub fn non_deterministic() -> Self {
        Self {
            non_deterministic: true,
            ..Self::default()
        }
    }

    /// Returns `true` if the output may be digested and cached.
    pub fn can_cache(&self) -> bool {
        !(self.non_deterministic || self.not_cacheable)
    }
}

/// A unit of cacheable, dependency-aware work.
///
/// Implementations describe their inputs declaratively through
/// [`Computable::inputs`]; the orchestrator resolves the nested nodes,
/// consults the cache and only then calls [`Computable::compute`].
///
/// ```ignore
/// struct Greeting { name: Node<String> }
///
/// #[async_trait]
/// impl Computable for Greeting {
///     type Output = String;
///
///     fn action(&self) -> ActionDef {
///         ActionDef::new("greet")
///     }
///
///     fn inputs(&self) -> Inputs {
///         Inputs::new().computable("name", &self.name)
///     }
///
///     async fn compute(&self, _ctx: &ComputeContext, deps: Resolved) -> anyhow::Result<String> {
///         Ok(format!("hello, {}", deps.get::<String>("name")))
///     }
/// }
/// ```
#[async_trait]
pub trait Computable: Send + Sync + 'static {
    /// The value this node produces.
    type Output: Clone + Send + Sync + 'static;

    /// What this node does, for tracking and error reports.
    fn action(&self) -> ActionDef;

    /// Everything that can change the output.
    fn inputs(&self) -> Inputs;

    /// Caching policy of the output.
    fn output(&self) -> OutputPolicy {
        OutputPolicy::default()
    }

    /// Concurrency label limiting how many nodes with the same label
    /// compute at once.
    fn lease(&self) -> Option<&str> {
        None
    }

    /// Produces the output. Only called once every nested input resolved.
    async fn compute(&self, ctx: &ComputeContext, deps: Resolved)
        -> anyhow::Result<Self::Output>;
}

/// Object-safe view of a [`Computable`] with its output type erased.
pub(crate) trait ErasedComputable: Send + Sync {
    fn action(&self) -> ActionDef;
    fn inputs(&self) -> Inputs;
    fn policy(&self) -> OutputPolicy;
    fn lease(&self) -> Option<String>;
    fn type_name(&self) -> &'static str;
    fn output_type(&self) -> TypeId;
    fn output_type_name(&self) -> &'static str;
    fn compute<'a>(
        &'a self,
        ctx: &'a ComputeContext,
        deps: Resolved,
    ) -> BoxFuture<'a, anyhow::Result<AnyValue>>;
}

impl<C: Computable> ErasedComputable for C {
    fn action(&self) -> ActionDef {
        Computable::action(self)
    }

    fn inputs(&self) -> Inputs {
        Computable::inputs(self)
    }

    fn policy(&self) -> OutputPolicy {
        Computable::output(self)
    }

    fn lease(&self) -> Option<String> {
        Computable::lease(self).map(str::to_string)
    }

    fn type_name(&self) -> &'static str {
        type_name::<C>()
    }

    fn output_type(&self) -> TypeId {
        TypeId::of::<C::Output>()
    }

    fn output_type_name(&self) -> &'static str {
        type_name::<C::Output>()
    }

    fn compute<'a>(
        &'a self,
        ctx: &'a ComputeContext,
        deps: Resolved,
    ) -> BoxFuture<'a, anyhow::Result<AnyValue>> {
        async move {
            let value = Computable::compute(self, ctx, deps).await?;
            Ok(Arc::new(value) as AnyValue)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_caches() {
        let policy = OutputPolicy::default();
        assert!(policy.can_cache());
        assert!(!policy.non_deterministic);
    }

    #[test]
    fn not_cacheable_policy() {
        assert!(!OutputPolicy::not_cacheable().can_cache());
    }

    #[test]
    fn non_deterministic_outputs_are_not_cached() {
        let policy = OutputPolicy::non_deterministic();
        assert!(!policy.can_cache());
        assert!(policy.non_deterministic);
    }

    #[test]
    fn either_flag_forbids_caching() {
        let both = OutputPolicy {
            non_deterministic: true,
            not_cacheable: true,
        };
        assert!(!both.can_cache());
    }
}
