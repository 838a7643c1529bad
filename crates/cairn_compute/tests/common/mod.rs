//! Test nodes shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cairn_compute::{
    async_trait, ActionDef, CacheableRegistry, Computable, ComputeContext, Inputs, Node,
    OutputPolicy, Resolved, SerdeCacheable,
};

/// A registry that can cache `String` and `u32` outputs.
pub fn registry() -> CacheableRegistry {
    CacheableRegistry::builder()
        .register(SerdeCacheable::<String>::new())
        .register(SerdeCacheable::<u32>::new())
        .build()
}

pub fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

pub fn count(c: &Arc<AtomicUsize>) -> usize {
    c.load(Ordering::SeqCst)
}

/// A configurable string-producing node.
///
/// Produces its text followed by `+<dep>` for each dependency, in order.
pub struct Step {
    label: &'static str,
    text: String,
    deps: Vec<(String, Node<String>)>,
    runs: Arc<AtomicUsize>,
    delay: Duration,
    policy: OutputPolicy,
    fail: bool,
    lease: Option<&'static str>,
    indigestible: bool,
}

impl Step {
    pub fn new(label: &'static str, text: &str) -> Self {
        Self {
            label,
            text: text.to_string(),
            deps: Vec::new(),
            runs: counter(),
            delay: Duration::ZERO,
            policy: OutputPolicy::default(),
            fail: false,
            lease: None,
            indigestible: false,
        }
    }

    pub fn dep(mut self, name: &str, node: &Node<String>) -> Self {
        self.deps.push((name.to_string(), node.clone()));
        self
    }

    pub fn runs(mut self, runs: &Arc<AtomicUsize>) -> Self {
        self.runs = runs.clone();
        self
    }

    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn policy(mut self, policy: OutputPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn lease(mut self, label: &'static str) -> Self {
        self.lease = Some(label);
        self
    }

    pub fn indigestible(mut self) -> Self {
        self.indigestible = true;
        self
    }
}

#[async_trait]
impl Computable for Step {
    type Output = String;

    fn action(&self) -> ActionDef {
        ActionDef::new(self.label)
    }

    fn inputs(&self) -> Inputs {
        let mut inputs = Inputs::new().str("text", &self.text);
        for (name, node) in &self.deps {
            inputs = inputs.computable(name.clone(), node);
        }
        if self.indigestible {
            inputs = inputs.indigestible("handle");
        }
        inputs
    }

    fn output(&self) -> OutputPolicy {
        self.policy
    }

    fn lease(&self) -> Option<&str> {
        self.lease
    }

    async fn compute(&self, ctx: &ComputeContext, deps: Resolved) -> anyhow::Result<String> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = ctx.cancel_token().cancelled() => anyhow::bail!("interrupted"),
            }
        }
        if self.fail {
            anyhow::bail!("{} exploded", self.label);
        }
        let mut out = self.text.clone();
        for (name, _) in &self.deps {
            out.push('+');
            out.push_str(&deps.get::<String>(name));
        }
        Ok(out)
    }
}

/// A node whose output changes on every run.
pub struct Tick {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Computable for Tick {
    type Output = u32;

    fn action(&self) -> ActionDef {
        ActionDef::new("tick")
    }

    fn inputs(&self) -> Inputs {
        Inputs::new().str("clock", "wall")
    }

    async fn compute(&self, _ctx: &ComputeContext, _deps: Resolved) -> anyhow::Result<u32> {
        Ok(self.runs.fetch_add(1, Ordering::SeqCst) as u32)
    }
}
