//! Resource pool controller.

use std::sync::Arc;

use spawner_broker::TicketId;
use tracing::{debug, info, warn};

use crate::broker::TicketBroker;
use crate::error::{Error, Result};
use crate::hooks::HookRunner;
use crate::types::{OwnedTicketSet, SkipReason, StopOutcome};

/// Starts and stops broker-backed resources and tracks which tickets it owns.
pub struct ResourcePool {
    /// Ticket broker.
    broker: Arc<dyn TicketBroker>,
    /// Lifecycle hooks.
    hooks: HookRunner,
    /// Tags attached to every ticket request.
    tags: Vec<String>,
    /// Tickets believed to be held.
    owned: OwnedTicketSet,
}

impl ResourcePool {
    /// Create a new pool that owns nothing.
    pub fn new(broker: Arc<dyn TicketBroker>, hooks: HookRunner, tags: Vec<String>) -> Self {
        Self {
            broker,
            hooks,
            tags,
            owned: OwnedTicketSet::new(),
        }
    }

    /// Start `count` resources, one after another.
    ///
    /// Each ticket is recorded as owned as soon as the broker accepts the
    /// request, before its resource is ready. The first failure, including a
    /// failed take hook, aborts the call and is returned to the caller.
    pub async fn start(&mut self, count: usize) -> Result<Vec<TicketId>> {
        info!(count, tags = ?self.tags, "Starting resources");
        let mut started = Vec::with_capacity(count);

        for _ in 0..count {
            let id = self.broker.new_ticket(&self.tags).await?;
            debug!(ticket = %id, "Taking ticket");
            self.owned.push(id.clone());

            let payload = self.broker.wait(&id).await?;
            debug!(ticket = %id, %payload, "Ticket ready");

            self.hooks.take(&payload).await?;
            started.push(id);
        }

        Ok(started)
    }

    /// Try to stop `count` resources, oldest first.
    ///
    /// A ticket is only forgotten after its release hook succeeded and the
    /// broker closed it. Any ticket that can't get there is kept and skipped
    /// for this call, whatever the reason, so stopping never fails. At most
    /// `count` tickets are removed, possibly fewer.
    pub async fn stop(&mut self, count: usize) -> StopOutcome {
        info!(count, "Trying to stop resources");
        let mut outcome = StopOutcome::default();

        let candidates: Vec<TicketId> = self.owned.iter().cloned().collect();
        for id in candidates {
            if outcome.stopped_count() >= count {
                break;
            }

            match self.stop_one(&id).await {
                Ok(()) => {
                    self.owned.remove(&id);
                    outcome.stopped.push(id);
                }
                Err(reason) => outcome.skipped.push((id, reason)),
            }
        }

        if outcome.stopped_count() < count {
            info!(
                requested = count,
                stopped = outcome.stopped_count(),
                skipped = outcome.skipped_count(),
                "Stopped fewer resources than requested"
            );
        }

        outcome
    }

    /// Release and close one ticket, or say why it has to stay.
    async fn stop_one(&self, id: &TicketId) -> std::result::Result<(), SkipReason> {
        let collected = self.broker.collect(id).await.map_err(|e| {
            warn!(ticket = %id, error = %e, "Can't collect ticket");
            SkipReason::BrokerError
        })?;
        let Some(payload) = collected.payload() else {
            debug!(ticket = %id, "Ticket has no resource yet");
            return Err(SkipReason::NotReady);
        };

        match self.hooks.release(&payload).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(ticket = %id, %payload, "Can't release");
                return Err(SkipReason::ReleaseFailed);
            }
            Err(e) => {
                warn!(ticket = %id, %payload, error = %e, "Can't run release hook");
                return Err(SkipReason::ReleaseError);
            }
        }

        debug!(ticket = %id, "Closing ticket");
        self.broker.close(id).await.map_err(|e| {
            warn!(ticket = %id, error = %e, "Can't close ticket");
            SkipReason::BrokerError
        })
    }

    /// Tickets currently believed to be held.
    pub const fn owned(&self) -> &OwnedTicketSet {
        &self.owned
    }

    /// Number of tickets currently believed to be held.
    pub fn owned_count(&self) -> usize {
        self.owned.len()
    }

    /// Get the hook runner.
    pub const fn hooks(&self) -> &HookRunner {
        &self.hooks
    }

    /// Get the tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// Builder for ResourcePool.
pub struct ResourcePoolBuilder {
    broker: Option<Arc<dyn TicketBroker>>,
    hooks: Option<HookRunner>,
    tags: Vec<String>,
}

impl ResourcePoolBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            broker: None,
            hooks: None,
            tags: Vec::new(),
        }
    }

    /// Set the ticket broker.
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn TicketBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Set the hook runner.
    #[must_use]
    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Add a tag to every ticket request.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Replace the tag set.
    #[must_use]
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<ResourcePool> {
        let broker = self
            .broker
            .ok_or_else(|| Error::invalid_config("ticket broker is required"))?;
        let hooks = self
            .hooks
            .ok_or_else(|| Error::invalid_config("hook runner is required"))?;
        if self.tags.is_empty() {
            return Err(Error::invalid_config("at least one tag is required"));
        }

        Ok(ResourcePool::new(broker, hooks, self.tags))
    }
}

impl Default for ResourcePoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookPaths;
    use crate::testing::{InMemoryBroker, ScriptedRunner};

    fn setup() -> (ResourcePool, Arc<InMemoryBroker>, Arc<ScriptedRunner>) {
        let broker = Arc::new(InMemoryBroker::new());
        let runner = Arc::new(ScriptedRunner::new(HookPaths::default()));
        let hooks = HookRunner::new(runner.clone(), HookPaths::default());
        let pool = ResourcePool::new(broker.clone(), hooks, vec!["arch_x86_64".to_string()]);
        (pool, broker, runner)
    }

    fn ids(raw: &[u64]) -> Vec<TicketId> {
        raw.iter().copied().map(TicketId::from).collect()
    }

    fn owned_ids(pool: &ResourcePool) -> Vec<TicketId> {
        pool.owned().iter().cloned().collect()
    }

    #[tokio::test]
    async fn start_requests_waits_and_takes_each_ticket() -> Result<()> {
        let (mut pool, broker, runner) = setup();

        let started = pool.start(3).await?;

        assert_eq!(started, ids(&[1, 2, 3]));
        assert_eq!(owned_ids(&pool), ids(&[1, 2, 3]));
        assert_eq!(broker.requested_tags(), vec![vec!["arch_x86_64".to_string()]; 3]);
        assert_eq!(
            runner.args_for(&HookPaths::default().take),
            vec![
                vec!["resource-1".to_string()],
                vec!["resource-2".to_string()],
                vec!["resource-3".to_string()],
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn start_zero_does_nothing() -> Result<()> {
        let (mut pool, broker, _) = setup();
        assert!(pool.start(0).await?.is_empty());
        assert_eq!(broker.issued(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn start_fails_fast_on_take_failure() {
        let (mut pool, broker, runner) = setup();
        runner.fail_take_for("resource-2");

        let result = pool.start(4).await;

        assert!(matches!(result, Err(Error::ProvisionFailed { .. })));
        // The failing ticket stays owned; nothing after it was requested.
        assert_eq!(owned_ids(&pool), ids(&[1, 2]));
        assert_eq!(broker.issued(), 2);
    }

    #[tokio::test]
    async fn ticket_is_owned_before_its_resource_is_ready() {
        let (mut pool, broker, runner) = setup();
        broker.fail_wait_for(1u64);

        let result = pool.start(1).await;

        assert!(matches!(result, Err(Error::Broker(_))));
        assert_eq!(owned_ids(&pool), ids(&[1]));
        assert_eq!(runner.calls_to(&HookPaths::default().take), 0);
    }

    #[tokio::test]
    async fn stop_releases_oldest_first() -> Result<()> {
        let (mut pool, broker, runner) = setup();
        pool.start(4).await?;

        let outcome = pool.stop(2).await;

        assert_eq!(outcome.stopped, ids(&[1, 2]));
        assert!(outcome.all_succeeded());
        assert_eq!(owned_ids(&pool), ids(&[3, 4]));
        assert_eq!(broker.closed(), ids(&[1, 2]));
        assert_eq!(runner.calls_to(&HookPaths::default().release), 2);
        Ok(())
    }

    #[tokio::test]
    async fn stop_skips_failed_releases_and_falls_short() -> Result<()> {
        let (mut pool, broker, runner) = setup();
        pool.start(5).await?;
        for payload in ["resource-1", "resource-2", "resource-3"] {
            runner.fail_release_for(payload);
        }

        let outcome = pool.stop(3).await;

        assert_eq!(outcome.stopped, ids(&[4, 5]));
        assert_eq!(
            outcome.skipped,
            ids(&[1, 2, 3])
                .into_iter()
                .map(|id| (id, SkipReason::ReleaseFailed))
                .collect::<Vec<_>>()
        );
        assert_eq!(pool.owned_count(), 3);
        assert_eq!(owned_ids(&pool), ids(&[1, 2, 3]));
        assert_eq!(broker.closed(), ids(&[4, 5]));
        // Each failing ticket was tried exactly once.
        assert_eq!(runner.calls_to(&HookPaths::default().release), 5);
        Ok(())
    }

    #[tokio::test]
    async fn failed_release_is_retried_on_next_stop() -> Result<()> {
        let (mut pool, _, runner) = setup();
        pool.start(2).await?;
        runner.fail_release_for("resource-1");

        let first = pool.stop(1).await;
        assert_eq!(first.stopped, ids(&[2]));

        runner.allow_release_for("resource-1");
        let second = pool.stop(1).await;
        assert_eq!(second.stopped, ids(&[1]));
        assert!(pool.owned().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn stop_skips_tickets_without_resource() -> Result<()> {
        let (mut pool, broker, runner) = setup();
        pool.start(2).await?;
        broker.mark_pending(1u64);

        let outcome = pool.stop(2).await;

        assert_eq!(outcome.stopped, ids(&[2]));
        assert_eq!(outcome.skipped, vec![(TicketId::from(1u64), SkipReason::NotReady)]);
        assert_eq!(
            runner.args_for(&HookPaths::default().release),
            vec![vec!["resource-2".to_string()]]
        );
        Ok(())
    }

    #[tokio::test]
    async fn stop_skips_tickets_the_broker_rejects() -> Result<()> {
        let (mut pool, broker, runner) = setup();
        pool.start(3).await?;
        broker.close_externally(1u64);

        let outcome = pool.stop(2).await;

        assert_eq!(outcome.stopped, ids(&[2, 3]));
        assert_eq!(outcome.skipped, vec![(TicketId::from(1u64), SkipReason::BrokerError)]);
        assert_eq!(owned_ids(&pool), ids(&[1]));
        assert_eq!(
            runner.args_for(&HookPaths::default().release),
            vec![vec!["resource-2".to_string()], vec!["resource-3".to_string()]]
        );
        Ok(())
    }

    #[tokio::test]
    async fn stop_skips_tickets_whose_release_hook_cannot_run() -> Result<()> {
        let (mut pool, broker, runner) = setup();
        pool.start(2).await?;
        runner.missing_release_for("resource-1");

        let outcome = pool.stop(1).await;

        assert_eq!(outcome.stopped, ids(&[2]));
        assert_eq!(outcome.skipped, vec![(TicketId::from(1u64), SkipReason::ReleaseError)]);
        assert_eq!(owned_ids(&pool), ids(&[1]));
        assert_eq!(broker.closed(), ids(&[2]));
        Ok(())
    }

    #[tokio::test]
    async fn failed_close_keeps_the_ticket() -> Result<()> {
        let (mut pool, broker, _) = setup();
        pool.start(2).await?;
        broker.fail_close_for(1u64);

        let outcome = pool.stop(2).await;

        assert_eq!(outcome.stopped, ids(&[2]));
        assert_eq!(outcome.skipped, vec![(TicketId::from(1u64), SkipReason::BrokerError)]);
        assert_eq!(owned_ids(&pool), ids(&[1]));
        Ok(())
    }

    #[tokio::test]
    async fn stop_more_than_owned_empties_the_pool() -> Result<()> {
        let (mut pool, _, _) = setup();
        pool.start(2).await?;

        let outcome = pool.stop(10).await;

        assert_eq!(outcome.stopped_count(), 2);
        assert!(pool.owned().is_empty());
        Ok(())
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn block_on<F: std::future::Future>(future: F) -> std::result::Result<F::Output, TestCaseError> {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map(|runtime| runtime.block_on(future))
                .map_err(|e| TestCaseError::fail(e.to_string()))
        }

        proptest! {
            /// stop(k) removes at most k tickets, and the removed ones are the
            /// oldest tickets whose release succeeds.
            #[test]
            fn stop_removes_oldest_releasable_prefix(
                failing in proptest::collection::vec(any::<bool>(), 0..12),
                count in 0usize..15,
            ) {
                let (outcome, owned_after) = block_on(async {
                    let (mut pool, _, runner) = setup();
                    pool.start(failing.len()).await?;
                    for (id, fails) in (1u64..).zip(&failing) {
                        if *fails {
                            runner.fail_release_for(&format!("resource-{id}"));
                        }
                    }
                    let outcome = pool.stop(count).await;
                    Ok::<_, Error>((outcome, owned_ids(&pool)))
                })?
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

                let releasable: Vec<TicketId> = (1u64..)
                    .zip(&failing)
                    .filter(|(_, fails)| !**fails)
                    .map(|(id, _)| TicketId::from(id))
                    .take(count)
                    .collect();

                prop_assert!(outcome.stopped_count() <= count);
                prop_assert_eq!(&outcome.stopped, &releasable);
                prop_assert_eq!(
                    owned_after.len(),
                    failing.len().saturating_sub(releasable.len())
                );
                prop_assert!(owned_after.iter().all(|id| !releasable.contains(id)));
            }
        }
    }

    #[test]
    fn test_builder() {
        let broker: Arc<dyn TicketBroker> = Arc::new(InMemoryBroker::new());
        let hooks = HookRunner::new(
            Arc::new(ScriptedRunner::new(HookPaths::default())),
            HookPaths::default(),
        );

        let result = ResourcePoolBuilder::new()
            .with_broker(broker)
            .with_hooks(hooks)
            .tag("arch_aarch64")
            .tag("large")
            .build();

        assert!(result.is_ok());
        assert_eq!(
            result.ok().map(|p| p.tags().to_vec()),
            Some(vec!["arch_aarch64".to_string(), "large".to_string()])
        );
    }

    #[test]
    fn test_builder_requires_broker_and_tags() {
        let hooks = HookRunner::new(
            Arc::new(ScriptedRunner::new(HookPaths::default())),
            HookPaths::default(),
        );
        assert!(
            ResourcePoolBuilder::new()
                .with_hooks(hooks.clone())
                .tag("x")
                .build()
                .is_err()
        );
        assert!(
            ResourcePoolBuilder::new()
                .with_broker(Arc::new(InMemoryBroker::new()))
                .with_hooks(hooks)
                .build()
                .is_err()
        );
    }
}
