//! Request pacing for the external services.
//!
//! Both the classifier endpoint and the profile source impose rate limits; the
//! pipeline wraps them in decorators that keep a fixed minimum spacing between
//! consecutive calls.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{Sender, UserProfile},
    ports::{ClassifierEndpoint, ProfileSource},
    Result,
};

/// Slot bookkeeping behind one [`Pacer`]: the earliest instant the next
/// classifier request or `getChat` lookup may start (`CLASSIFY_DELAY_MS` and
/// `API_DELAY_MS` respectively).
#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Claim the next free slot; returns how long the caller must sleep first.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let slot = self.next.max(now);
        self.next = slot + self.interval;
        slot - now
    }
}

/// Fixed minimum spacing between calls. The first call never waits.
#[derive(Debug)]
pub struct Pacer {
    limiter: Mutex<IntervalLimiter>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            limiter: Mutex::new(IntervalLimiter::new(interval)),
        }
    }

    pub async fn wait(&self) {
        let wait = { self.limiter.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

/// ClassifierEndpoint decorator that paces outbound requests.
pub struct PacedClassifier {
    inner: Arc<dyn ClassifierEndpoint>,
    pacer: Pacer,
}

impl PacedClassifier {
    pub fn new(inner: Arc<dyn ClassifierEndpoint>, interval: Duration) -> Self {
        Self {
            inner,
            pacer: Pacer::new(interval),
        }
    }
}

#[async_trait]
impl ClassifierEndpoint for PacedClassifier {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.pacer.wait().await;
        self.inner.complete(prompt).await
    }
}

/// ProfileSource decorator that paces uncached lookups.
pub struct PacedProfileSource {
    inner: Arc<dyn ProfileSource>,
    pacer: Pacer,
}

impl PacedProfileSource {
    pub fn new(inner: Arc<dyn ProfileSource>, interval: Duration) -> Self {
        Self {
            inner,
            pacer: Pacer::new(interval),
        }
    }
}

#[async_trait]
impl ProfileSource for PacedProfileSource {
    async fn fetch_profile(&self, sender: &Sender) -> Result<UserProfile> {
        self.pacer.wait().await;
        self.inner.fetch_profile(sender).await
    }
}
