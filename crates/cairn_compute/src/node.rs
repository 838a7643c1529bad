//! Typed node handles and their scoping disciplines.
//!
//! A [`Node`] wraps either a [`Computable`] or an already-known value, and
//! fixes how often the work may run:
//!
//! - [`Node::local`]: once per node instance, for the life of the process.
//! - [`Node::deduped`]: once per input identity, within one invocation.
//! - [`Node::precomputed`]: never; the value is known up front.

use std::any::{type_name, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cairn_common::Digest;
use cairn_tasks::ActionDef;
use parking_lot::Mutex;

use crate::computable::{Computable, ErasedComputable};
use crate::inputs::Inputs;
use crate::promise::{Promise, RunInterest};
use crate::result::{AnyValue, ResultWithTimestamp};

/// How a node's executions are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One execution per node instance, shared by every request for it.
    Local,
    /// One execution per input identity within an invocation.
    Deduped,
    /// The value is known; nothing executes.
    Precomputed,
}

/// A digest of a node's declared inputs before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The identity digest.
    pub digest: Digest,
    /// The identity is reproducible in another process and may therefore be
    /// used as a cache key.
    pub stable: bool,
}

pub(crate) type ErasedResult = ResultWithTimestamp<AnyValue>;

/// The current execution of a locally-scoped node.
pub(crate) struct LocalRun {
    pub(crate) promise: Arc<Promise<ErasedResult>>,
    pub(crate) interest: Arc<RunInterest>,
}

pub(crate) enum NodeKind {
    Local {
        body: Box<dyn ErasedComputable>,
        /// The current execution.
        slot: Mutex<Option<LocalRun>>,
    },
    Deduped {
        body: Box<dyn ErasedComputable>,
    },
    Precomputed {
        value: AnyValue,
        digest: Option<Digest>,
        output_type: TypeId,
        type_name: &'static str,
    },
}

pub(crate) struct NodeInner {
    pub(crate) id: u64,
    pub(crate) kind: NodeKind,
}

impl NodeInner {
    fn new(kind: NodeKind) -> Arc<Self> {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Arc::new(Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            kind,
        })
    }

    pub(crate) fn scope(&self) -> Scope {
        match &self.kind {
            NodeKind::Local { .. } => Scope::Local,
            NodeKind::Deduped { .. } => Scope::Deduped,
            NodeKind::Precomputed { .. } => Scope::Precomputed,
        }
    }

    pub(crate) fn body(&self) -> Option<&dyn ErasedComputable> {
        match &self.kind {
            NodeKind::Local { body, .. } | NodeKind::Deduped { body } => Some(&**body),
            NodeKind::Precomputed { .. } => None,
        }
    }

    pub(crate) fn action(&self) -> ActionDef {
        match &self.kind {
            NodeKind::Local { body, .. } | NodeKind::Deduped { body } => body.action(),
            NodeKind::Precomputed { type_name, .. } => {
                ActionDef::new("precomputed").arg("type", type_name)
            }
        }
    }

    /// Identity of the node's work.
    ///
    /// A precomputed value without a digest, and a node whose manifest did
    /// not digest completely, get an identity unique to this instance, so
    /// they never deduplicate against another node.
    pub(crate) fn identity(&self) -> Identity {
        match &self.kind {
            NodeKind::Local { body, .. } | NodeKind::Deduped { body } => {
                let (identity, complete) = body_identity(&**body, &body.inputs());
                if complete {
                    identity
                } else {
                    Identity {
                        digest: Digest::of_bytes(
                            format!("instance\0{}\0{}", self.id, identity.digest).as_bytes(),
                        ),
                        stable: false,
                    }
                }
            }
            NodeKind::Precomputed {
                digest: Some(digest),
                ..
            } => Identity {
                digest: Digest::of_bytes(format!("precomputed\0{digest}").as_bytes()),
                stable: true,
            },
            NodeKind::Precomputed { digest: None, .. } => Identity {
                digest: Digest::of_bytes(format!("instance\0{}", self.id).as_bytes()),
                stable: false,
            },
        }
    }
}

/// Identity of a computed node given its manifest, and whether every entry
/// of the manifest went into it.
///
/// Outputs that may not be cached make the identity unstable, and so does
/// every identity built on top of it.
pub(crate) fn body_identity(body: &dyn ErasedComputable, inputs: &Inputs) -> (Identity, bool) {
    let (mut identity, complete) = inputs.fingerprint(body.type_name());
    if !body.policy().can_cache() {
        identity.stable = false;
    }
    (identity, complete)
}

/// A typed handle on a node producing a `V`.
///
/// Cloning a handle shares the node: clones of a locally-scoped node share
/// its single execution.
pub struct Node<V> {
    pub(crate) inner: Arc<NodeInner>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for Node<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _value: PhantomData,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Node<V> {
    fn wrap(inner: Arc<NodeInner>) -> Self {
        Self {
            inner,
            _value: PhantomData,
        }
    }

    /// A node that computes at most once for the life of this instance.
    ///
    /// A run that ended in cancellation is forgotten, so the next request
    /// starts a fresh one.
    pub fn local<C: Computable<Output = V>>(body: C) -> Self {
        Self::wrap(NodeInner::new(NodeKind::Local {
            body: Box::new(body),
            slot: Mutex::new(None),
        }))
    }

    /// A node deduplicated by input identity within an invocation.
    ///
    /// Resolving one outside of an invocation is a bug and panics.
    pub fn deduped<C: Computable<Output = V>>(body: C) -> Self {
        Self::wrap(NodeInner::new(NodeKind::Deduped {
            body: Box::new(body),
        }))
    }

    /// A node whose value is already known.
    ///
    /// Its digest is derived through the registry when it is resolved.
    pub fn precomputed(value: V) -> Self {
        Self::precomputed_inner(value, None)
    }

    /// A node whose value and digest are already known.
    pub fn precomputed_with_digest(value: V, digest: Digest) -> Self {
        Self::precomputed_inner(value, Some(digest))
    }

    fn precomputed_inner(value: V, digest: Option<Digest>) -> Self {
        Self::wrap(NodeInner::new(NodeKind::Precomputed {
            value: Arc::new(value),
            digest,
            output_type: TypeId::of::<V>(),
            type_name: type_name::<V>(),
        }))
    }

    /// The node's scoping discipline.
    pub fn scope(&self) -> Scope {
        self.inner.scope()
    }

    /// What the node does.
    pub fn action(&self) -> ActionDef {
        self.inner.action()
    }

    /// Digest of the node's declared inputs, before resolution.
    pub fn identity(&self) -> Identity {
        self.inner.identity()
    }
}

impl<V> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("scope", &self.inner.scope())
            .field("action", &self.inner.action().label)
            .finish()
    }
}
