//! Minimal stage runner for the orchestrated pipeline variant.
//!
//! Instead of decorating functions, each stage is described by a
//! [`StagePolicy`]: plain data carrying a retry budget and an optional
//! memoization window, interpreted by [`FlowRunner`]. Retries do not
//! distinguish transient from permanent causes; every failure inside the
//! budget is retried.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::Result;

/// How one named stage is executed.
#[derive(Debug, Clone, Copy)]
pub struct StagePolicy {
    pub name: &'static str,
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// When set, successful results are reused for identical inputs until the
    /// window expires.
    pub cache_ttl: Option<Duration>,
}

impl StagePolicy {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            retries: 0,
            cache_ttl: None,
        }
    }

    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Hash of a stage's inputs, used as the memoization key.
pub fn input_hash<T: Hash + ?Sized>(input: &T) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}

struct CacheEntry {
    stored_at: Instant,
    value: Box<dyn Any + Send>,
}

/// Interprets stage policies: cache lookup, execution, retry, cache fill.
#[derive(Default)]
pub struct FlowRunner {
    cache: Mutex<HashMap<(&'static str, u64), CacheEntry>>,
}

impl FlowRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one stage. `input` is the memoization key; pass `None` for stages
    /// whose results must never be reused.
    pub async fn run<T, F, Fut>(&self, policy: &StagePolicy, input: Option<u64>, op: F) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let (Some(hash), Some(ttl)) = (input, policy.cache_ttl) {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&(policy.name, hash)) {
                if entry.stored_at.elapsed() < ttl {
                    if let Some(value) = entry.value.downcast_ref::<T>() {
                        info!(stage = policy.name, "reusing cached stage result");
                        return Ok(value.clone());
                    }
                }
            }
        }

        let mut attempt = 0u32;
        let value = loop {
            match op().await {
                Ok(value) => break value,
                Err(err) if attempt < policy.retries => {
                    attempt += 1;
                    warn!(
                        stage = policy.name,
                        attempt,
                        budget = policy.retries,
                        error = %err,
                        "stage failed; retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        };

        if let (Some(hash), Some(_)) = (input, policy.cache_ttl) {
            let mut cache = self.cache.lock().unwrap();
            cache.insert(
                (policy.name, hash),
                CacheEntry {
                    stored_at: Instant::now(),
                    value: Box::new(value.clone()),
                },
            );
        }
        Ok(value)
    }
}
