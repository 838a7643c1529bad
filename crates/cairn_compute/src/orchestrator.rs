//! Drives node execution: dependency resolution, cache lookups, leases,
//! compute and persistence.
//!
//! Every computed node runs on its own tokio task. Requests for a node that
//! is already running attach to its promise instead of starting another
//! run. A run proceeds as follows:
//!
//! 1. If the node's identity is stable, look up the identity pointer; a hit
//!    skips resolving the dependencies at all.
//! 2. Resolve the nested inputs concurrently; the first failure wins.
//! 3. Digest the resolved manifest and look up that pointer.
//! 4. On a miss, take the node's lease and compute.
//! 5. Digest the output, hand it to waiters and persist it in the
//!    background under both pointers.

use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cairn_cache::{Cache, CacheError, CachedOutput, DebugMetadata, LocalCache, NoopCache};
use cairn_common::Digest;
use cairn_config::{CacheMode, ResolvedEngine};
use cairn_tasks::{ActionId, ActionTracker, NullTracker, Outcome as ActionOutcome};
use chrono::{DateTime, Utc};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::computable::{ErasedComputable, OutputPolicy};
use crate::context::ComputeContext;
use crate::error::ComputeError;
use crate::inputs::Inputs;
use crate::lease::Leases;
use crate::node::{body_identity, ErasedResult, LocalRun, Node, NodeInner, NodeKind};
use crate::promise::{InterestGuard, Outcome, Promise, RunInterest, Waiter};
use crate::registry::{CacheableRegistry, ErasedCacheable};
use crate::resolved::Resolved;
use crate::result::{AnyValue, ResultWithTimestamp};

struct Inner {
    cache: Arc<dyn Cache>,
    registry: CacheableRegistry,
    tracker: Arc<dyn ActionTracker>,
    leases: Leases,
    mode: CacheMode,
    stores: TaskTracker,
}

/// The execution engine. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// Configures an [`Orchestrator`].
pub struct OrchestratorBuilder {
    cache: Option<Arc<dyn Cache>>,
    registry: Option<CacheableRegistry>,
    tracker: Option<Arc<dyn ActionTracker>>,
    limits: BTreeMap<String, usize>,
    mode: CacheMode,
}

impl OrchestratorBuilder {
    /// Sets the cache. Defaults to [`NoopCache`].
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the cacheable registry. Defaults to
    /// [`CacheableRegistry::with_defaults`].
    pub fn registry(mut self, registry: CacheableRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the action tracker. Defaults to [`NullTracker`].
    pub fn tracker(mut self, tracker: Arc<dyn ActionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Limits how many nodes leasing `label` compute at once.
    pub fn limit(mut self, label: impl Into<String>, max: usize) -> Self {
        self.limits.insert(label.into(), max);
        self
    }

    /// Replaces every lease limit.
    pub fn limits(mut self, limits: BTreeMap<String, usize>) -> Self {
        self.limits = limits;
        self
    }

    /// Sets how the cache is used. Defaults to [`CacheMode::Enabled`].
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> Orchestrator {
        Orchestrator {
            inner: Arc::new(Inner {
                cache: self
                    .cache
                    .unwrap_or_else(|| Arc::new(NoopCache) as Arc<dyn Cache>),
                registry: self.registry.unwrap_or_else(CacheableRegistry::with_defaults),
                tracker: self
                    .tracker
                    .unwrap_or_else(|| Arc::new(NullTracker) as Arc<dyn ActionTracker>),
                leases: Leases::new(&self.limits),
                mode: self.mode,
                stores: TaskTracker::new(),
            }),
        }
    }
}

/// Per-invocation state shared by every run started within it.
pub(crate) struct InvocationState {
    table: Mutex<HashMap<Digest, Arc<Promise<ErasedResult>>>>,
    cancel: CancellationToken,
}

/// One top-level run. Invocation-scoped nodes are deduplicated within it.
pub struct Invocation {
    orchestrator: Orchestrator,
    state: Arc<InvocationState>,
}

impl Invocation {
    /// Resolves a node, waiting under the invocation's cancellation token.
    pub async fn get_value<V: Clone + Send + Sync + 'static>(
        &self,
        node: &Node<V>,
    ) -> Result<ResultWithTimestamp<V>, ComputeError> {
        let cancel = self.state.cancel.clone();
        self.get_value_with(node, &cancel).await
    }

    /// Resolves a node, waiting under the caller's own token.
    ///
    /// Cancelling `cancel` abandons this wait only. A deduped run stops when
    /// the invocation is cancelled; a local run stops once nobody waits on
    /// it any more.
    pub async fn get_value_with<V: Clone + Send + Sync + 'static>(
        &self,
        node: &Node<V>,
        cancel: &CancellationToken,
    ) -> Result<ResultWithTimestamp<V>, ComputeError> {
        self.orchestrator
            .resolve(node, Some(&self.state), &[], cancel)
            .await
    }

    /// The token every run in this invocation observes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.state.cancel
    }

    /// Cancels every run and wait in this invocation.
    pub fn cancel(&self) {
        self.state.cancel.cancel();
    }

    /// Number of distinct invocation-scoped runs started so far.
    pub fn deduped_runs(&self) -> usize {
        self.state.table.lock().len()
    }
}

impl Orchestrator {
    /// Starts configuring an orchestrator.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder {
            cache: None,
            registry: None,
            tracker: None,
            limits: BTreeMap::new(),
            mode: CacheMode::default(),
        }
    }

    /// Builds an orchestrator from resolved engine configuration.
    ///
    /// Opens the local cache at the configured root, or uses [`NoopCache`]
    /// when caching is disabled.
    pub fn from_config(
        engine: &ResolvedEngine,
        registry: CacheableRegistry,
    ) -> Result<Self, CacheError> {
        let cache: Arc<dyn Cache> = match &engine.cache_root {
            Some(root) => Arc::new(LocalCache::open(root)?),
            None => Arc::new(NoopCache),
        };
        Ok(Self::builder()
            .cache(cache)
            .registry(registry)
            .limits(engine.limits.clone())
            .cache_mode(engine.cache_mode)
            .build())
    }

    /// Starts a new invocation with its own cancellation token.
    pub fn invocation(&self) -> Invocation {
        self.invocation_with(CancellationToken::new())
    }

    /// Starts a new invocation cancelled by `cancel`.
    pub fn invocation_with(&self, cancel: CancellationToken) -> Invocation {
        Invocation {
            orchestrator: self.clone(),
            state: Arc::new(InvocationState {
                table: Mutex::new(HashMap::new()),
                cancel,
            }),
        }
    }

    /// Resolves a node outside of any invocation.
    ///
    /// # Panics
    ///
    /// If the node, or any node it depends on, is invocation-scoped.
    pub async fn get_value<V: Clone + Send + Sync + 'static>(
        &self,
        node: &Node<V>,
        cancel: &CancellationToken,
    ) -> Result<ResultWithTimestamp<V>, ComputeError> {
        self.resolve(node, None, &[], cancel).await
    }

    /// The cache in use.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.inner.cache
    }

    /// The cacheable registry in use.
    pub fn registry(&self) -> &CacheableRegistry {
        &self.inner.registry
    }

    /// How the cache is used.
    pub fn cache_mode(&self) -> CacheMode {
        self.inner.mode
    }

    /// Waits until every cache write started so far has finished.
    ///
    /// Writes happen in the background after a value is handed to its
    /// waiters; call this before reading the cache from another process.
    pub async fn wait_for_stores(&self) {
        self.inner.stores.close();
        self.inner.stores.wait().await;
        self.inner.stores.reopen();
    }

    pub(crate) async fn resolve<V: Clone + Send + Sync + 'static>(
        &self,
        node: &Node<V>,
        invocation: Option<&Arc<InvocationState>>,
        chain: &[String],
        cancel: &CancellationToken,
    ) -> Result<ResultWithTimestamp<V>, ComputeError> {
        let erased = self
            .start(&node.inner, invocation, chain)
            .wait(cancel)
            .await?;
        erased.downcast::<V>().ok_or_else(|| {
            ComputeError::internal(format!("node did not produce a {}", type_name::<V>()))
        })
    }

    /// Returns a handle on the node's run, starting the run if needed.
    ///
    /// A local run executes under its own token, which fires once every
    /// request holding a handle on it has gone away. A deduped run stops
    /// with its invocation.
    fn start(
        &self,
        node: &Arc<NodeInner>,
        invocation: Option<&Arc<InvocationState>>,
        chain: &[String],
    ) -> Pending {
        match &node.kind {
            NodeKind::Precomputed {
                value,
                digest,
                output_type,
                ..
            } => {
                let digest = digest
                    .clone()
                    .or_else(|| self.value_digest(*output_type, value));
                let now = Utc::now();
                Pending::ready(Ok(ResultWithTimestamp {
                    digest,
                    value: value.clone(),
                    non_deterministic: false,
                    cached: false,
                    action_id: ActionId::next(),
                    started: now,
                    completed: now,
                    input_digest: None,
                }))
            }
            NodeKind::Local { slot, .. } => {
                let mut slot = slot.lock();
                if let Some(run) = slot.as_ref() {
                    match run.promise.peek() {
                        Some(Err(ComputeError::Cancelled)) => {}
                        Some(outcome) => return Pending::ready(outcome),
                        None => {
                            if let Some(guard) = run.interest.join() {
                                return Pending {
                                    waiter: run.promise.future(),
                                    _interest: Some(guard),
                                };
                            }
                        }
                    }
                }
                let promise = Arc::new(Promise::new());
                let (interest, guard) = RunInterest::new();
                let token = interest.token();
                *slot = Some(LocalRun {
                    promise: promise.clone(),
                    interest,
                });
                let waiter = promise.future();
                self.spawn(node.clone(), promise, invocation.cloned(), chain, token);
                Pending {
                    waiter,
                    _interest: Some(guard),
                }
            }
            NodeKind::Deduped { body } => {
                let Some(invocation) = invocation else {
                    panic!(
                        "invocation-scoped node {} resolved outside of an invocation",
                        body.type_name()
                    );
                };
                let key = node.identity().digest;
                let promise = {
                    let mut table = invocation.table.lock();
                    if let Some(existing) = table.get(&key) {
                        return Pending::shared(existing.future());
                    }
                    let promise = Arc::new(Promise::new());
                    table.insert(key, promise.clone());
                    promise
                };
                let waiter = promise.future();
                let cancel = invocation.cancel.clone();
                self.spawn(node.clone(), promise, Some(invocation.clone()), chain, cancel);
                Pending::shared(waiter)
            }
        }
    }

    fn spawn(
        &self,
        node: Arc<NodeInner>,
        promise: Arc<Promise<ErasedResult>>,
        invocation: Option<Arc<InvocationState>>,
        chain: &[String],
        cancel: CancellationToken,
    ) {
        let def = node.action();
        let action_id = ActionId::next();
        self.inner.tracker.waiting(action_id, &def);

        let tracker = self.inner.tracker.clone();
        let run = self
            .clone()
            .run(node, invocation, chain.to_vec(), cancel, action_id);
        let label = def.label;
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!(action = %label, %message, "compute panicked");
                    Err(ComputeError::Panicked {
                        action: label,
                        message,
                    })
                }
            };
            let reported = match &outcome {
                Ok(result) if result.cached => ActionOutcome::CacheHit,
                Ok(_) => ActionOutcome::Computed,
                Err(e) if e.is_cancelled() => ActionOutcome::Cancelled,
                Err(e) => ActionOutcome::Failed(e.to_string()),
            };
            tracker.done(action_id, &reported);
            promise.resolve(outcome);
        });
    }

    fn run(
        self,
        node: Arc<NodeInner>,
        invocation: Option<Arc<InvocationState>>,
        chain: Vec<String>,
        cancel: CancellationToken,
        action_id: ActionId,
    ) -> BoxFuture<'static, Outcome<ErasedResult>> {
        async move {
            let Some(body) = node.body() else {
                return Err(ComputeError::internal("precomputed nodes never run"));
            };
            self.execute(body, invocation, chain, &cancel, action_id)
                .await
        }
        .boxed()
    }

    async fn execute(
        &self,
        body: &dyn ErasedComputable,
        invocation: Option<Arc<InvocationState>>,
        mut chain: Vec<String>,
        cancel: &CancellationToken,
        action_id: ActionId,
    ) -> Outcome<ErasedResult> {
        let action = body.action().label;
        chain.push(action.clone());
        let started = Utc::now();

        let inputs = body.inputs();
        if let Some(reason) = inputs.error() {
            return Err(ComputeError::Inputs { action, reason });
        }
        let policy = body.policy();
        let adapter = self.adapter_for(body, &policy, &inputs);
        let use_cache = adapter.is_some()
            && self.inner.mode.uses_cache()
            && self.inner.cache.is_enabled();
        let verify = self.inner.mode == CacheMode::Verify;
        let (identity, _) = body_identity(body, &inputs);
        let cache_adapter = if use_cache { adapter.as_ref() } else { None };

        if let Some(adapter) = cache_adapter.filter(|_| !verify && identity.stable) {
            if let Some((value, digest)) =
                self.load_cached(adapter, vec![identity.digest.clone()]).await
            {
                debug!(%action, pointer = %identity.digest, "cache hit before resolving inputs");
                self.inner.tracker.running(action_id);
                return Ok(cached_result(value, digest, &policy, action_id, started, None));
            }
        }

        let resolved = self
            .resolve_inputs(&inputs, invocation.as_ref(), &chain, cancel)
            .await?;
        self.inner.tracker.running(action_id);

        let input_digest = inputs
            .digest_resolved(&resolved)
            .map_err(|e| ComputeError::Inputs {
                action: action.clone(),
                reason: e.to_string(),
            })?;

        let mut expected = None;
        if let (Some(adapter), Some(key)) = (cache_adapter, &input_digest) {
            if let Some((value, digest)) = self.load_cached(adapter, vec![key.clone()]).await {
                if verify {
                    expected = Some(digest);
                } else {
                    debug!(%action, pointer = %key, "cache hit");
                    return Ok(cached_result(
                        value,
                        digest,
                        &policy,
                        action_id,
                        started,
                        input_digest,
                    ));
                }
            }
        }

        let input_digests: BTreeMap<String, Digest> = resolved
            .digests()
            .map(|(name, d)| (name.to_string(), d.clone()))
            .collect();

        let permit = self
            .inner
            .leases
            .acquire(body.lease().as_deref(), cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(ComputeError::Cancelled);
        }
        let ctx = ComputeContext {
            orchestrator: self.clone(),
            invocation,
            cancel: cancel.clone(),
            chain,
            action_id,
        };
        let value = body
            .compute(&ctx, resolved)
            .await
            .map_err(|e| ComputeError::from_compute(e, &action, &ctx.chain, cancel))?;
        drop(permit);

        let digest = match &adapter {
            Some(adapter) => self.output_digest(adapter, &value, &action).await,
            None => None,
        };

        if let (Some(expected), Some(actual)) = (&expected, &digest) {
            if expected != actual {
                error!(
                    %action,
                    cached = %expected,
                    fresh = %actual,
                    "cached output differs from a fresh computation"
                );
            }
        }

        if let (Some(adapter), Some(output)) = (cache_adapter, &digest) {
            let mut pointers: Vec<Digest> = input_digest.iter().cloned().collect();
            if identity.stable && !pointers.contains(&identity.digest) {
                pointers.push(identity.digest.clone());
            }
            let entry = CachedOutput {
                input_digests,
                ..CachedOutput::new(output.clone())
            }
            .with_debug(DebugMetadata {
                action: action.clone(),
                node_type: body.type_name().to_string(),
            });
            self.store(adapter.clone(), value.clone(), pointers, entry);
        }

        Ok(ResultWithTimestamp {
            digest,
            value,
            non_deterministic: policy.non_deterministic,
            cached: false,
            action_id,
            started,
            completed: Utc::now(),
            input_digest,
        })
    }

    async fn resolve_inputs(
        &self,
        inputs: &Inputs,
        invocation: Option<&Arc<InvocationState>>,
        chain: &[String],
        cancel: &CancellationToken,
    ) -> Result<Resolved, ComputeError> {
        let pending: Vec<_> = inputs
            .nodes()
            .map(|(name, dep)| {
                let pending = self.start(dep, invocation, chain);
                async move { pending.wait(cancel).await.map(|r| (name.to_string(), r)) }
            })
            .collect();

        let mut resolved = Resolved::new();
        for (name, result) in try_join_all(pending).await? {
            resolved.insert(name, result);
        }
        Ok(resolved)
    }

    fn adapter_for(
        &self,
        body: &dyn ErasedComputable,
        policy: &OutputPolicy,
        inputs: &Inputs,
    ) -> Option<Arc<dyn ErasedCacheable>> {
        if !policy.can_cache() || inputs.has_indigestible() {
            return None;
        }
        match self.inner.registry.lookup(body.output_type()) {
            Some(registered) => Some(registered.adapter.clone()),
            None => {
                debug!(
                    output = body.output_type_name(),
                    node = body.type_name(),
                    "no cacheable adapter registered; output will not be cached"
                );
                None
            }
        }
    }

    fn value_digest(&self, output_type: TypeId, value: &AnyValue) -> Option<Digest> {
        let registered = self.inner.registry.lookup(output_type)?;
        match registered.adapter.compute_digest(value) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(
                    output = registered.type_name,
                    error = %e,
                    "failed to digest precomputed value"
                );
                None
            }
        }
    }

    async fn output_digest(
        &self,
        adapter: &Arc<dyn ErasedCacheable>,
        value: &AnyValue,
        action: &str,
    ) -> Option<Digest> {
        let adapter = adapter.clone();
        let value = value.clone();
        match tokio::task::spawn_blocking(move || adapter.compute_digest(&value)).await {
            Ok(Ok(digest)) => Some(digest),
            Ok(Err(e)) => {
                warn!(%action, error = %e, "failed to digest output; it will not be cached");
                None
            }
            Err(e) => {
                warn!(%action, error = %e, "output digest task failed");
                None
            }
        }
    }

    /// Loads the first pointer that yields a readable output.
    ///
    /// Every cache error is logged and treated as a miss.
    async fn load_cached(
        &self,
        adapter: &Arc<dyn ErasedCacheable>,
        pointers: Vec<Digest>,
    ) -> Option<(AnyValue, Digest)> {
        let cache = self.inner.cache.clone();
        let adapter = adapter.clone();
        let lookup = tokio::task::spawn_blocking(move || {
            for pointer in pointers {
                match cache.load_entry(&pointer) {
                    Ok(Some(entry)) => match adapter.load_cached(&cache, &entry.digest) {
                        Ok(value) => return Some((value, entry.digest)),
                        Err(e) => {
                            debug!(%pointer, error = %e, "cached output unreadable; recomputing")
                        }
                    },
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%pointer, error = %e, "cache lookup failed; treating as a miss")
                    }
                }
            }
            None
        });
        lookup.await.unwrap_or_else(|e| {
            warn!(error = %e, "cache lookup task failed");
            None
        })
    }

    /// Persists an output in the background. Failures are logged only.
    fn store(
        &self,
        adapter: Arc<dyn ErasedCacheable>,
        value: AnyValue,
        pointers: Vec<Digest>,
        entry: CachedOutput,
    ) {
        let cache = self.inner.cache.clone();
        self.inner.stores.spawn_blocking(move || {
            let stored = match adapter.cache(cache.as_ref(), &value) {
                Ok(digest) => digest,
                Err(e) => {
                    warn!(output = %entry.digest, error = %e, "failed to store output");
                    return;
                }
            };
            if stored != entry.digest {
                warn!(
                    expected = %entry.digest,
                    stored = %stored,
                    "stored output digest differs from the computed one"
                );
            }
            let entry = CachedOutput {
                digest: stored,
                ..entry
            };
            if let Err(e) = cache.store_entry(&pointers, &entry) {
                warn!(error = %e, "failed to record cache entry");
            }
        });
    }
}

/// A request's handle on a run.
///
/// Holding one keeps a local run alive; dropping it, or waiting on it to
/// completion, releases that interest.
struct Pending {
    waiter: Waiter<ErasedResult>,
    _interest: Option<InterestGuard>,
}

impl Pending {
    fn ready(outcome: Outcome<ErasedResult>) -> Self {
        Self::shared(Waiter::ready(outcome))
    }

    fn shared(waiter: Waiter<ErasedResult>) -> Self {
        Self {
            waiter,
            _interest: None,
        }
    }

    async fn wait(self, cancel: &CancellationToken) -> Outcome<ErasedResult> {
        self.waiter.wait(cancel).await
    }
}

fn cached_result(
    value: AnyValue,
    digest: Digest,
    policy: &OutputPolicy,
    action_id: ActionId,
    started: DateTime<Utc>,
    input_digest: Option<Digest>,
) -> ErasedResult {
    ResultWithTimestamp {
        digest: Some(digest),
        value,
        non_deterministic: policy.non_deterministic,
        cached: true,
        action_id,
        started,
        completed: Utc::now(),
        input_digest,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
