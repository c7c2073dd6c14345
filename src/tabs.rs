use crate::error::{ConsoleError, ConsoleResult};
use crate::execution::{ExecutionHandle, Executor};
use crate::execution::ExecutionOutcome;
use crate::model::{ExecutionSession, Plugin, RefreshInterval, Resource, ScanTab};
use crate::store::{Action, Store};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Scan result tabs: creation from finished executions, pinning, refresh and closing
#[derive(Clone)]
pub struct TabManager {
    executor: Executor,
}

impl TabManager {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    pub fn store(&self) -> &Store {
        self.executor.store()
    }

    /// Runs the plugin and opens its result tab, replacing the tab of the same pair.
    /// Returns the id of the new tab.
    pub async fn select(&self, plugin: Plugin, resource: Resource) -> ConsoleResult<String> {
        let outcome = self.executor.run(plugin, resource).await?;
        Ok(self.open_tab(outcome).await)
    }

    /// Materializes the result as a tab and takes the finished session off screen
    async fn open_tab(&self, outcome: ExecutionOutcome) -> String {
        let session = outcome.session;
        let tab = ScanTab::new(
            outcome.plugin,
            outcome.resource,
            outcome.results,
            outcome.logs,
            Utc::now(),
        );
        let id = tab.id.clone();
        info!("Opening scan tab {}", tab.label);
        self.store().dispatch(Action::TabCreated(tab)).await;
        self.store().dispatch(Action::ExecutionCleared(session)).await;
        id
    }

    /// `select` on its own task, aborted when the handle is dropped
    pub fn spawn_select(&self, plugin: Plugin, resource: Resource) -> ExecutionHandle<String> {
        let manager = self.clone();
        let handle = self.executor.spawn(plugin, resource);
        let session = handle.session;
        ExecutionHandle::new(
            session,
            tokio::spawn(async move {
                let outcome = handle.join().await?;
                Ok::<_, ConsoleError>(manager.open_tab(outcome).await)
            }),
        )
    }

    pub async fn pin(&self, id: &str) {
        self.set_pinned(id, true).await;
    }

    pub async fn unpin(&self, id: &str) {
        self.set_pinned(id, false).await;
    }

    async fn set_pinned(&self, id: &str, pinned: bool) {
        self.store()
            .dispatch(Action::TabPinned {
                id: id.to_string(),
                pinned,
            })
            .await;
    }

    pub async fn set_refresh_interval(&self, id: &str, interval: RefreshInterval) {
        debug!("Tab {} refresh interval set to {}", id, interval);
        self.store()
            .dispatch(Action::RefreshIntervalSet {
                id: id.to_string(),
                interval,
                at: Utc::now(),
            })
            .await;
    }

    /// Reruns the tab's plugin and replaces its results, the tab keeps its id, pin and interval.
    /// Returns false when the tab no longer exists. A failure still stamps the tab, so the
    /// auto-refresh waits a full interval before trying again.
    pub async fn refresh(&self, id: &str) -> ConsoleResult<bool> {
        self.refresh_at(id, None).await
    }

    pub(crate) async fn refresh_at(
        &self,
        id: &str,
        at: Option<DateTime<Utc>>,
    ) -> ConsoleResult<bool> {
        let target = self
            .store()
            .read(|s| s.tab(id).map(|t| (t.plugin.clone(), t.resource.clone())))
            .await;
        let Some((plugin, resource)) = target else {
            debug!("Tab {} is gone, nothing to refresh", id);
            return Ok(false);
        };

        let session = ExecutionSession::new(plugin, resource);
        let session_id = session.id;
        let at = at.unwrap_or_else(Utc::now);
        match self.executor.run_session(session).await {
            Ok(outcome) => {
                self.store()
                    .dispatch(Action::TabRefreshed {
                        id: id.to_string(),
                        results: outcome.results,
                        logs: outcome.logs,
                        at,
                    })
                    .await;
                self.store()
                    .dispatch(Action::ExecutionCleared(session_id))
                    .await;
                Ok(true)
            }
            Err(e) => {
                warn!("Refresh of tab {} failed: {}", id, e);
                self.store()
                    .dispatch(Action::TabRefreshFailed {
                        id: id.to_string(),
                        session: session_id,
                        at,
                    })
                    .await;
                Err(e)
            }
        }
    }

    pub async fn activate(&self, id: &str) {
        self.store()
            .dispatch(Action::TabActivated(id.to_string()))
            .await;
    }

    /// Pinned tabs are left open
    pub async fn close(&self, id: &str) {
        self.store().dispatch(Action::TabClosed(id.to_string())).await;
    }

    pub async fn close_all(&self) {
        self.store().dispatch(Action::TabsClosedAll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use crate::model::ResultScreen;
    use crate::transport::fake::FakeTransport;
    use crate::view::View;
    use std::sync::Arc;

    fn manager(transport: Arc<FakeTransport>) -> TabManager {
        TabManager::new(Executor::new(Store::default(), transport))
    }

    fn screen(text: &str) -> Vec<ResultScreen> {
        vec![ResultScreen::text("out", vec![text.to_string()])]
    }

    #[tokio::test]
    async fn test_select_same_pair_twice_keeps_one_tab() {
        let transport = Arc::new(FakeTransport::default());
        transport.completing(screen("first"));
        transport.completing(screen("second"));
        let tabs = manager(transport);

        let first = tabs
            .select(plugin("disk"), resource("10.0.0.1", "web"))
            .await
            .unwrap();
        tabs.pin(&first).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = tabs
            .select(plugin("disk"), resource("10.0.0.1", "web"))
            .await
            .unwrap();

        let state = tabs.store().snapshot().await;
        assert_eq!(state.tabs.len(), 1);
        let tab = &state.tabs[0];
        assert_eq!(tab.id, second);
        assert_eq!(tab.results, screen("second"));
        // Replacement starts fresh
        assert!(!tab.pinned);
        assert_eq!(tab.refresh_interval, RefreshInterval::Off);
        assert_eq!(state.active_tab.as_deref(), Some(second.as_str()));
        assert_eq!(state.view, View::ScanResults);
        // Finished sessions are gone once their tab exists
        assert!(state.executions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_select_opens_no_tab() {
        let transport = Arc::new(FakeTransport::default());
        transport.push(crate::transport::fake::Script {
            refuse: true,
            ..Default::default()
        });
        let tabs = manager(transport);
        assert!(tabs
            .select(plugin("disk"), resource("10.0.0.1", "web"))
            .await
            .is_err());
        let state = tabs.store().snapshot().await;
        assert!(state.tabs.is_empty());
        assert_eq!(state.view, View::Directory);
    }

    #[tokio::test]
    async fn test_refresh_replaces_results_only() {
        let transport = Arc::new(FakeTransport::default());
        transport.completing(screen("first"));
        transport.completing(screen("fresh"));
        let tabs = manager(transport);

        let id = tabs
            .select(plugin("disk"), resource("10.0.0.1", "web"))
            .await
            .unwrap();
        tabs.pin(&id).await;
        tabs.set_refresh_interval(&id, RefreshInterval::FiveMinutes)
            .await;
        assert!(tabs.refresh(&id).await.unwrap());

        let state = tabs.store().snapshot().await;
        let tab = state.tab(&id).unwrap();
        assert_eq!(tab.results, screen("fresh"));
        assert!(tab.pinned);
        assert_eq!(tab.refresh_interval, RefreshInterval::FiveMinutes);

        assert!(!tabs.refresh("missing").await.unwrap());
        assert!(state.executions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_stamps_tab() {
        let transport = Arc::new(FakeTransport::default());
        transport.completing(screen("first"));
        let tabs = manager(transport.clone());
        let id = tabs
            .select(plugin("disk"), resource("10.0.0.1", "web"))
            .await
            .unwrap();
        let before = tabs.store().read(|s| s.tab(&id).unwrap().last_refreshed).await;

        // No script left, the stream ends without a terminal event
        assert!(tabs.refresh(&id).await.is_err());
        assert!(tabs.refresh(&id).await.is_err());

        let state = tabs.store().snapshot().await;
        let tab = state.tab(&id).unwrap();
        assert!(tab.last_refreshed >= before);
        assert_eq!(tab.results, screen("first"));
        assert_eq!(state.executions.len(), 1);
        assert_eq!(tab.failed_session, Some(state.executions[0].id));
    }

    #[tokio::test]
    async fn test_spawn_select_and_close() {
        let transport = Arc::new(FakeTransport::default());
        transport.completing(screen("a"));
        transport.completing(screen("b"));
        let tabs = manager(transport);

        let a = tabs
            .spawn_select(plugin("a"), resource("10.0.0.1", "web"))
            .join()
            .await
            .unwrap();
        let b = tabs
            .spawn_select(plugin("b"), resource("10.0.0.1", "web"))
            .join()
            .await
            .unwrap();
        tabs.pin(&a).await;
        tabs.close(&a).await;
        tabs.activate(&a).await;
        tabs.close_all().await;

        let state = tabs.store().snapshot().await;
        assert_eq!(state.tabs.len(), 1);
        assert!(state.tab(&b).is_none());
        assert_eq!(state.active_tab.as_deref(), Some(a.as_str()));

        tabs.unpin(&a).await;
        tabs.close(&a).await;
        let state = tabs.store().snapshot().await;
        assert!(state.tabs.is_empty());
        assert_eq!(state.view, View::Directory);
    }
}
