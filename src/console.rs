use crate::client::HttpBackend;
use crate::config::ConsoleConfig;
use crate::error::ConsoleResult;
use crate::execution::Executor;
use crate::plugins::PluginRegistry;
use crate::resources::ResourceDirectory;
use crate::scheduler::{AutoRefresh, SchedulerHandle};
use crate::store::{Action, Store};
use crate::tabs::TabManager;
use crate::transport::transport_for;
use crate::view::View;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a front end binds to, wired on one store and one backend
pub struct Console {
    pub store: Store,
    pub backend: Arc<HttpBackend>,
    pub resources: ResourceDirectory<HttpBackend>,
    pub plugins: PluginRegistry<HttpBackend>,
    pub tabs: TabManager,
    refresh_period: Duration,
    auto_refresh: Option<SchedulerHandle>,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> ConsoleResult<Self> {
        let refresh_period = config.refresh_check_period;
        let backend = Arc::new(HttpBackend::new(config)?);
        let store = Store::default();
        let executor = Executor::new(store.clone(), transport_for(&backend));
        Ok(Self {
            resources: ResourceDirectory::new(backend.clone(), store.clone()),
            plugins: PluginRegistry::new(backend.clone(), store.clone()),
            tabs: TabManager::new(executor),
            store,
            backend,
            refresh_period,
            auto_refresh: None,
        })
    }

    /// First load: CSRF token, then the resource and plugin lists
    pub async fn mount(&self) {
        if let Err(e) = self.backend.bootstrap_csrf("/").await {
            warn!("Could not load the CSRF token: {}", e);
        }
        // Failures are already on the section banners
        let _ = self.resources.list().await;
        let _ = self.plugins.list().await;
    }

    pub async fn show(&self, view: View) {
        self.store.dispatch(Action::ViewSelected(view)).await;
    }

    pub fn start_auto_refresh(&mut self) {
        if self.auto_refresh.is_none() {
            let scheduler = AutoRefresh::new(self.tabs.clone());
            self.auto_refresh = Some(scheduler.spawn(self.refresh_period));
        }
    }

    /// Releases the scheduler task
    pub fn stop_auto_refresh(&mut self) {
        if self.auto_refresh.take().is_some() {
            info!("Auto-refresh stopped");
        }
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.auto_refresh.as_ref().is_some_and(SchedulerHandle::is_running)
    }
}
