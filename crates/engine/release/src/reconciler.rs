//! Reconciliation loop
//!
//! One loop per workspace. It wakes on store notifications, on a periodic
//! tick, and at the earliest instant a waiting target asked for, then runs a
//! reconciliation pass over the affected targets.

use engine_store::ChangeNotifier;
use engine_types::{Clock, Shutdown};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::manager::ReleaseManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Interval of the periodic full pass
    pub tick_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct Reconciler {
    manager: Arc<ReleaseManager>,
    notifier: Arc<ChangeNotifier>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        manager: Arc<ReleaseManager>,
        notifier: Arc<ChangeNotifier>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            manager,
            notifier,
            clock,
            config,
        }
    }

    /// Time until the earliest requested wake-up, if any
    fn until_wake(&self) -> Option<Duration> {
        let wake = self.manager.next_wake()?;
        Some((wake - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// Run until `shutdown` fires
    pub async fn run(self, mut shutdown: Shutdown) {
        info!(tick_secs = self.config.tick_interval.as_secs(), "Reconciler started");
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = self.until_wake();
            let wake_timer = async {
                match wake {
                    Some(delay) => sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.notifier.wait() => {
                    let batch = self.notifier.drain();
                    if batch.is_empty() {
                        continue;
                    }
                    let targets = self.manager.affected_by(&batch);
                    debug!(
                        notifications = batch.notifications.len(),
                        resync = batch.resync,
                        "Change notifications received"
                    );
                    self.manager.reconcile(targets, shutdown.clone()).await;
                }
                _ = ticker.tick() => {
                    self.manager.reconcile_all(shutdown.clone()).await;
                }
                _ = wake_timer => {
                    debug!("Deferred wake-up");
                    self.manager.reconcile_all(shutdown.clone()).await;
                }
            }
        }

        info!("Reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use engine_dispatch::{
        AgentRegistry, DispatchGateway, GatewayConfig, InMemoryAgent, InMemoryJobLedger, RetryPolicy,
    };
    use engine_store::{ChangeSet, EntityStore};
    use engine_types::{Deployment, DeploymentVersion, Environment, Resource, Selector, ShutdownTrigger, SystemClock};

    #[tokio::test]
    async fn test_loop_reacts_to_store_changes() {
        let notifier = Arc::new(ChangeNotifier::default());
        let store = Arc::new(EntityStore::new(Arc::clone(&notifier)));
        let agent = Arc::new(InMemoryAgent::default());
        let registry = AgentRegistry::new();
        registry.register(agent.clone());
        let gateway = Arc::new(DispatchGateway::new(
            registry,
            Arc::new(InMemoryJobLedger::new()),
            GatewayConfig::default(),
        ));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let manager = Arc::new(ReleaseManager::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&clock),
            RetryPolicy::default(),
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&manager),
            Arc::clone(&notifier),
            clock,
            ReconcilerConfig {
                tick_interval: Duration::from_secs(3600),
            },
        );
        let (trigger, shutdown) = ShutdownTrigger::new();
        let handle = tokio::spawn(reconciler.run(shutdown));

        let mut cs = ChangeSet::new(DateTime::<Utc>::default());
        store.upsert_resource(&mut cs, Resource::new("r1", "service")).unwrap();
        store
            .upsert_deployment(&mut cs, Deployment::new("d1", "s1").with_selector(Selector::All))
            .unwrap();
        store
            .upsert_environment(&mut cs, Environment::new("e1", "s1").with_selector(Selector::All))
            .unwrap();
        store
            .upsert_deployment_version(&mut cs, DeploymentVersion::new("v1", "d1", Utc::now()))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while agent.dispatch_count() == 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(agent.dispatch_count(), 1);
    }
}
