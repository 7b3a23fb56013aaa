//! Dispatch pipeline
//!
//! Each job gets its own rendezvous stream. The capability's `invoke` and a
//! single drain run side by side; the drain logs every entity, collects the
//! serialized non-job entities and runs every streamed job to completion
//! before taking the next item. Nested results are folded into the parent's.
//!
//! An enforced timeout covers the capability's own work. The clock stops
//! while the drain is running one of its child jobs.

use futures::future::{BoxFuture, FutureExt};
use outpost_common::DispatchConfig;
use outpost_core::{
    Capability, Entity, Error, Job, JobStatus, NoSecrets, Result, SecretProvider, Stream,
    StreamReceiver,
};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::registry::Registry;

/// What a dispatch produced
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The dispatched job, `JP` or `JF`
    pub job: Job,
    /// Serialized non-job entities, nested jobs' included
    pub results: Vec<String>,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.job.status == JobStatus::Pass
    }
}

/// Bookkeeping shared by every job of one top-level dispatch
struct Run {
    visited: Mutex<HashSet<String>>,
    children: AtomicUsize,
}

impl Run {
    fn new(seed: &str) -> Self {
        Self {
            visited: Mutex::new(HashSet::from([seed.to_string()])),
            children: AtomicUsize::new(0),
        }
    }

    /// False if `key` already ran in this dispatch
    fn visit(&self, key: &str) -> bool {
        match self.visited.lock() {
            Ok(mut visited) => visited.insert(key.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(key.to_string()),
        }
    }

    /// Claim a child slot; false once `limit` children have been started
    fn claim(&self, limit: usize) -> bool {
        self.children.fetch_add(1, Ordering::SeqCst) < limit
    }
}

/// Time a job has spent waiting on its children
#[derive(Default)]
struct Blocked {
    state: Mutex<BlockedState>,
    changed: Notify,
}

#[derive(Default)]
struct BlockedState {
    total: Duration,
    since: Option<Instant>,
}

impl Blocked {
    fn with_state<T>(&self, f: impl FnOnce(&mut BlockedState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn start(&self) {
        self.with_state(|state| state.since = Some(Instant::now()));
        self.changed.notify_waiters();
    }

    fn stop(&self) {
        self.with_state(|state| {
            if let Some(since) = state.since.take() {
                state.total += since.elapsed();
            }
        });
        self.changed.notify_waiters();
    }

    /// Total blocked time, or `None` while a child is running
    fn total(&self) -> Option<Duration> {
        self.with_state(|state| state.since.is_none().then_some(state.total))
    }

    /// Resolve once `budget` of unblocked time has passed since `started`
    async fn expire(&self, started: Instant, budget: Duration) {
        loop {
            let changed = self.changed.notified();
            match self.total() {
                None => changed.await,
                Some(total) => {
                    let deadline = started + budget + total;
                    if Instant::now() >= deadline {
                        return;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = changed => {}
                    }
                }
            }
        }
    }
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    secrets: Arc<dyn SecretProvider>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(registry: impl Into<Arc<Registry>>, config: DispatchConfig) -> Self {
        Self {
            registry: registry.into(),
            secrets: Arc::new(NoSecrets),
            config,
        }
    }

    /// Resolve capability secrets through `provider`
    pub fn with_secrets(mut self, provider: impl SecretProvider + 'static) -> Self {
        self.secrets = Arc::new(provider);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run `job` and everything it spawns.
    ///
    /// An unknown capability is rejected before anything runs. Any other
    /// failure is recorded on the returned job instead.
    pub async fn dispatch(&self, job: Job) -> Result<Outcome> {
        if !self.registry.contains(&job.source) {
            return Err(Error::UnknownCapability {
                name: job.source.clone(),
            });
        }

        let run = Run::new(&job.key);
        let (job, results) = self.process(job, 0, &run).await;
        info!(
            job = %job.key,
            status = %job.status,
            results = results.len(),
            children = run.children.load(Ordering::SeqCst),
            "dispatch complete"
        );
        Ok(Outcome { job, results })
    }

    fn process<'a>(
        &'a self,
        mut job: Job,
        depth: usize,
        run: &'a Run,
    ) -> BoxFuture<'a, (Job, Vec<String>)> {
        async move {
            job.update(JobStatus::Running);
            debug!(job = %job.key, capability = %job.source, depth, "job running");

            let (stream, receiver) = Stream::channel();
            let capability = match self.bind(&mut job, stream) {
                Ok(capability) => capability,
                Err(err) => {
                    self.fail(&mut job, &err);
                    return (job, Vec::new());
                }
            };

            let blocked = Blocked::default();
            let (result, results) = tokio::join!(
                guarded_invoke(capability, self.config.enforce_timeout, &blocked),
                self.drain(receiver, depth, run, &blocked)
            );

            match result {
                Ok(()) => {
                    job.update(JobStatus::Pass);
                    debug!(job = %job.key, results = results.len(), "job passed");
                }
                Err(err) => self.fail(&mut job, &err),
            }
            (job, results)
        }
        .boxed()
    }

    /// Resolve the capability's secret into the job config, then build it
    /// against a copy of the job carrying the stream
    fn bind(&self, job: &mut Job, stream: Stream) -> Result<Box<dyn Capability>> {
        let unbound = self.registry.build(&job.source, job.clone())?;
        if let Some(path) = unbound.secret() {
            match self.secrets.resolve(path) {
                Some(secret) => {
                    job.config.insert("secret".to_string(), secret);
                }
                None => debug!(capability = %job.source, path, "secret not resolved"),
            }
        }
        drop(unbound);

        let mut bound = job.clone();
        bound.stream = Some(stream);
        self.registry.build(&job.source, bound)
    }

    async fn drain(
        &self,
        mut receiver: StreamReceiver,
        depth: usize,
        run: &Run,
        blocked: &Blocked,
    ) -> Vec<String> {
        let mut results = Vec::new();
        while let Some(entity) = receiver.recv().await {
            match &entity {
                Entity::Asset(asset) => info!(key = %asset.key, status = %asset.status, "asset found"),
                Entity::Risk(risk) => info!(key = %risk.key, status = %risk.status, "risk found"),
                Entity::Attribute(attribute) => info!(key = %attribute.key, "attribute found"),
                Entity::File(file) => info!(name = %file.name, bytes = file.bytes.len(), "file created"),
                Entity::Job(child) => info!(key = %child.key, capability = %child.source, "job created"),
            }

            match entity {
                Entity::Job(child) => {
                    blocked.start();
                    results.extend(self.child(child, depth + 1, run).await);
                    blocked.stop();
                }
                other => match serde_json::to_string(&other) {
                    Ok(line) => results.push(line),
                    Err(err) => warn!(key = %other.key(), error = %err, "entity not serializable"),
                },
            }
        }
        results
    }

    /// Run a streamed job inline unless a guard says otherwise
    async fn child(&self, job: Job, depth: usize, run: &Run) -> Vec<String> {
        if depth > self.config.max_depth {
            warn!(job = %job.key, depth, max_depth = self.config.max_depth, "job skipped: too deep");
            return Vec::new();
        }
        if !self.registry.contains(&job.source) {
            error!(job = %job.key, capability = %job.source, "job skipped: unknown capability");
            return Vec::new();
        }
        if self.config.dedup_jobs && !run.visit(&job.key) {
            debug!(job = %job.key, "job skipped: already ran");
            return Vec::new();
        }
        if !run.claim(self.config.max_children) {
            warn!(job = %job.key, max_children = self.config.max_children, "job skipped: too many children");
            return Vec::new();
        }

        let (_, results) = self.process(job, depth, run).await;
        results
    }

    fn fail(&self, job: &mut Job, err: &Error) {
        job.update(JobStatus::Fail);
        error!(
            job = %job.key,
            capability = %job.source,
            target = %job.target.key,
            error = %err,
            code = err.code(),
            username = %job.username,
            "job failed"
        );
    }
}

/// Invoke, turning a panic or an overrun into an error. The capability, and
/// with it the job's stream, is dropped on return.
async fn guarded_invoke(
    capability: Box<dyn Capability>,
    enforce_timeout: bool,
    blocked: &Blocked,
) -> Result<()> {
    let name = capability.name();
    let seconds = capability.timeout();
    let invoke = AssertUnwindSafe(capability.invoke()).catch_unwind();

    let outcome = if enforce_timeout {
        let expired = blocked.expire(Instant::now(), Duration::from_secs(seconds));
        tokio::select! {
            outcome = invoke => outcome,
            _ = expired => {
                return Err(Error::Timeout {
                    capability: name.to_string(),
                    seconds,
                })
            }
        }
    } else {
        invoke.await
    };
    outcome.unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
