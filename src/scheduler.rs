use crate::tabs::TabManager;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic check refreshing pinned tabs whose interval has elapsed
#[derive(Clone)]
pub struct AutoRefresh {
    tabs: TabManager,
}

impl AutoRefresh {
    pub fn new(tabs: TabManager) -> Self {
        Self { tabs }
    }

    /// One pass over the live tab collection. Returns the ids refreshed at `now`.
    pub async fn check_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let due = self.tabs.store().read(|s| s.due_tabs(now)).await;
        let mut refreshed = Vec::new();
        for id in due {
            debug!("Auto-refreshing tab {}", id);
            match self.tabs.refresh_at(&id, Some(now)).await {
                Ok(true) => refreshed.push(id),
                Ok(false) => {}
                // Due again one full interval later
                Err(e) => warn!("Auto-refresh of tab {} failed: {}", id, e),
            }
        }
        refreshed
    }

    /// Starts checking every `period`. The task stops when the handle is dropped.
    pub fn spawn(self, period: Duration) -> SchedulerHandle {
        info!("Auto-refresh checking every {:?}", period);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check_at(Utc::now()).await;
            }
        });
        SchedulerHandle { task }
    }
}

#[derive(Debug)]
pub struct SchedulerHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
