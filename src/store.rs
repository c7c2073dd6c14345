//! Application state and the only place it changes.
//!
//! Every section of the console reads from one `AppState` and mutates it by
//! dispatching an `Action`. The reducer is synchronous and pure so the tab
//! invariants (one tab per resource/plugin pair, pinned tabs survive bulk
//! close) can be checked without any I/O.

use crate::editor::CodeEditor;
use crate::model::*;
use crate::rwlock::CustomRwLock;
use crate::view::{ManagementSection, Role, UserDraft, View};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use strum_macros::AsRefStr;
use tracing::{debug, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Notice {
    Success(String),
    Error(String),
}

/// Inline success/error messages of one section
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Banner {
    pub success: Option<String>,
    pub error: Option<String>,
}

impl Banner {
    fn show(&mut self, notice: Notice) {
        match notice {
            Notice::Success(message) => {
                self.success = Some(message);
                self.error = None;
            }
            Notice::Error(message) => {
                self.error = Some(message);
                self.success = None;
            }
        }
    }

    fn clear(&mut self) {
        self.success = None;
        self.error = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSection {
    pub items: Vec<Resource>,
    pub query: String,
    pub loading: bool,
    pub enrollment_open: bool,
    pub banner: Banner,
}

impl ResourceSection {
    /// Resources matching the search box
    pub fn visible(&self) -> Vec<&Resource> {
        self.items.iter().filter(|r| r.matches(&self.query)).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PluginEditor {
    /// Plugin being edited, `None` when creating a new one
    pub editing: Option<PluginId>,
    pub name: String,
    pub code: CodeEditor,
    pub saving: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PluginSection {
    pub items: Vec<Plugin>,
    pub editor: Option<PluginEditor>,
    pub banner: Banner,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppState {
    pub view: View,
    pub resources: ResourceSection,
    pub plugins: PluginSection,
    pub users: UserDraft,
    pub executions: Vec<ExecutionSession>,
    pub tabs: Vec<ScanTab>,
    pub active_tab: Option<String>,
}

#[derive(Debug, Clone, AsRefStr)]
pub enum Action {
    ViewSelected(View),

    ResourcesLoading,
    ResourcesLoaded(Vec<Resource>),
    ResourcesFailed(String),
    ResourceQueryChanged(String),
    EnrollmentOpened,
    EnrollmentClosed,
    ResourceNotice(Notice),

    PluginsLoaded(Vec<Plugin>),
    PluginNotice(Notice),
    PluginEditorOpened(Option<Plugin>),
    PluginNameChanged(String),
    PluginCodeInput { text: String, caret: usize },
    PluginSaving(bool),
    PluginEditorClosed,
    PluginCreated(Plugin),
    PluginUpdated(Plugin),
    PluginDeleted(PluginId),

    UserFormOpened,
    UserFormChanged { username: String, role: Role },
    UserFormSubmitted,
    UserFormClosed,

    ExecutionStarted(ExecutionSession),
    ExecutionLogged { session: Uuid, lines: Vec<String> },
    ExecutionFailed { session: Uuid, lines: Vec<String> },
    ExecutionCompleted { session: Uuid },
    ExecutionDismissed(Uuid),
    /// The result was taken over by a tab, or the run was abandoned
    ExecutionCleared(Uuid),

    TabCreated(ScanTab),
    TabRefreshed {
        id: String,
        results: Vec<ResultScreen>,
        logs: Vec<String>,
        at: DateTime<Utc>,
    },
    TabRefreshFailed {
        id: String,
        session: Uuid,
        at: DateTime<Utc>,
    },
    TabPinned { id: String, pinned: bool },
    RefreshIntervalSet {
        id: String,
        interval: RefreshInterval,
        at: DateTime<Utc>,
    },
    TabActivated(String),
    TabClosed(String),
    TabsClosedAll,
}

impl AppState {
    pub fn reduce(&mut self, action: Action) {
        match action {
            Action::ViewSelected(view) => self.view = view,

            Action::ResourcesLoading => self.resources.loading = true,
            Action::ResourcesLoaded(items) => {
                self.resources.items = items;
                self.resources.loading = false;
            }
            Action::ResourcesFailed(message) => {
                self.resources.loading = false;
                self.resources.banner.show(Notice::Error(message));
            }
            Action::ResourceQueryChanged(query) => self.resources.query = query,
            Action::EnrollmentOpened => {
                self.resources.enrollment_open = true;
                self.resources.banner.clear();
            }
            Action::EnrollmentClosed => self.resources.enrollment_open = false,
            Action::ResourceNotice(notice) => self.resources.banner.show(notice),

            Action::PluginsLoaded(items) => self.plugins.items = items,
            Action::PluginNotice(notice) => self.plugins.banner.show(notice),
            Action::PluginEditorOpened(plugin) => {
                self.plugins.banner.clear();
                self.plugins.editor = Some(match plugin {
                    Some(plugin) => PluginEditor {
                        editing: Some(plugin.id.clone()),
                        name: plugin.name.clone(),
                        code: CodeEditor::with_text(&plugin.role_config),
                        saving: false,
                    },
                    None => PluginEditor::default(),
                });
            }
            Action::PluginNameChanged(name) => {
                if let Some(editor) = self.plugins.editor.as_mut() {
                    editor.name = name;
                }
            }
            Action::PluginCodeInput { text, caret } => {
                if let Some(editor) = self.plugins.editor.as_mut() {
                    editor.code.input(&text, caret);
                }
            }
            Action::PluginSaving(saving) => {
                if let Some(editor) = self.plugins.editor.as_mut() {
                    editor.saving = saving;
                }
            }
            Action::PluginEditorClosed => self.plugins.editor = None,
            Action::PluginCreated(plugin) => self.plugins.items.push(plugin),
            Action::PluginUpdated(plugin) => {
                if let Some(existing) = self.plugins.items.iter_mut().find(|p| p.id == plugin.id) {
                    *existing = plugin;
                }
            }
            Action::PluginDeleted(id) => self.plugins.items.retain(|p| p.id != id),

            Action::UserFormOpened => self.users.open(),
            Action::UserFormChanged { username, role } => {
                self.users.username = username;
                self.users.role = role;
            }
            Action::UserFormSubmitted => self.users.submit(),
            Action::UserFormClosed => self.users.close(),

            Action::ExecutionStarted(session) => self.executions.push(session),
            Action::ExecutionLogged { session, lines } => {
                if let Some(s) = self.session_mut(session) {
                    s.logs.extend(lines);
                }
            }
            Action::ExecutionFailed { session, lines } => {
                if let Some(s) = self.session_mut(session) {
                    s.logs.extend(lines);
                    s.status = ExecutionStatus::Error;
                }
            }
            Action::ExecutionCompleted { session } => {
                if let Some(s) = self.session_mut(session) {
                    s.complete();
                }
            }
            Action::ExecutionDismissed(session) => {
                match self.session(session).map(ExecutionSession::can_dismiss) {
                    Some(true) => self.executions.retain(|s| s.id != session),
                    Some(false) => warn!("Refusing to dismiss running execution {}", session),
                    None => {}
                }
            }
            Action::ExecutionCleared(session) => self.executions.retain(|s| s.id != session),

            Action::TabCreated(tab) => {
                let id = tab.id.clone();
                match self
                    .tabs
                    .iter_mut()
                    .find(|t| t.is_for(&tab.resource.ip_address, &tab.plugin.name))
                {
                    Some(existing) => *existing = tab,
                    None => self.tabs.push(tab),
                }
                self.active_tab = Some(id);
                self.view = View::ScanResults;
            }
            Action::TabRefreshed {
                id,
                results,
                logs,
                at,
            } => match self.tab_mut(&id) {
                Some(tab) => {
                    tab.results = results;
                    tab.logs = logs;
                    tab.last_refreshed = at;
                    let failed = tab.failed_session.take();
                    self.drop_failed_session(failed);
                }
                None => debug!("Refreshed tab {} is gone, dropping results", id),
            },
            // The next attempt waits a full interval, and only the latest failure stays on screen
            Action::TabRefreshFailed { id, session, at } => match self.tab_mut(&id) {
                Some(tab) => {
                    tab.last_refreshed = at;
                    let previous = tab.failed_session.replace(session);
                    self.drop_failed_session(previous.filter(|p| *p != session));
                }
                None => debug!("Failed refresh of tab {} which is gone", id),
            },
            Action::TabPinned { id, pinned } => {
                if let Some(tab) = self.tab_mut(&id) {
                    tab.pinned = pinned;
                }
            }
            Action::RefreshIntervalSet { id, interval, at } => {
                if let Some(tab) = self.tab_mut(&id) {
                    tab.refresh_interval = interval;
                    tab.last_refreshed = at;
                }
            }
            Action::TabActivated(id) => {
                if self.tab(&id).is_some() {
                    self.active_tab = Some(id);
                    self.view = View::ScanResults;
                }
            }
            Action::TabClosed(id) => self.close_tab(&id),
            Action::TabsClosedAll => self.close_all_tabs(),
        }
    }

    pub fn tab(&self, id: &str) -> Option<&ScanTab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    fn tab_mut(&mut self, id: &str) -> Option<&mut ScanTab> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    pub fn session(&self, id: Uuid) -> Option<&ExecutionSession> {
        self.executions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: Uuid) -> Option<&mut ExecutionSession> {
        self.executions.iter_mut().find(|s| s.id == id)
    }

    fn drop_failed_session(&mut self, session: Option<Uuid>) {
        if let Some(session) = session {
            self.executions
                .retain(|s| s.id != session || s.status != ExecutionStatus::Error);
        }
    }

    /// Most recently added tab, replacements count as new
    fn newest_tab(&self) -> Option<String> {
        self.tabs
            .iter()
            .max_by_key(|t| t.created_at)
            .map(|t| t.id.clone())
    }

    pub fn active(&self) -> Option<&ScanTab> {
        self.active_tab.as_deref().and_then(|id| self.tab(id))
    }

    /// Pinned tabs with auto-refresh enabled whose interval has elapsed at `now`
    pub fn due_tabs(&self, now: DateTime<Utc>) -> Vec<String> {
        self.tabs
            .iter()
            .filter(|t| t.is_due(now))
            .map(|t| t.id.clone())
            .collect()
    }

    fn close_tab(&mut self, id: &str) {
        let Some(index) = self.tabs.iter().position(|t| t.id == id) else {
            return;
        };
        if self.tabs[index].pinned {
            debug!("Ignoring close request for pinned tab {}", id);
            return;
        }
        self.tabs.remove(index);
        if self.active_tab.as_deref() == Some(id) {
            self.active_tab = self.newest_tab();
            if self.active_tab.is_none() {
                self.view = View::Directory;
            }
        }
    }

    fn close_all_tabs(&mut self) {
        self.tabs.retain(|t| t.pinned);
        if self.tabs.is_empty() {
            self.active_tab = None;
            self.view = View::Directory;
            return;
        }
        let active_survived = self
            .active_tab
            .as_deref()
            .map(|id| self.tabs.iter().any(|t| t.id == id))
            .unwrap_or(false);
        if !active_survived {
            self.active_tab = self.newest_tab();
        }
    }
}

/// Shared handle on the application state
#[derive(Debug, Clone)]
pub struct Store {
    state: Arc<CustomRwLock<AppState>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}

impl Store {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(CustomRwLock::new("console_state", state)),
        }
    }

    pub async fn dispatch(&self, action: Action) {
        trace!("Dispatching {}", action.as_ref());
        self.state.write().await.reduce(action);
    }

    /// Reads the live state, never a snapshot taken earlier
    pub async fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&*self.state.read().await)
    }

    pub async fn snapshot(&self) -> AppState {
        self.state.read().await.clone()
    }

    pub async fn show_management(&self, section: ManagementSection) {
        self.dispatch(Action::ViewSelected(View::Management(section)))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use chrono::Duration;

    fn tab_at(plugin_name: &str, ip: &str, now: DateTime<Utc>) -> ScanTab {
        ScanTab::new(
            plugin(plugin_name),
            resource(ip, "host"),
            vec![ResultScreen::text("out", vec!["hi".to_string()])],
            vec![],
            now,
        )
    }

    #[test]
    fn test_tab_created_replaces_same_pair() {
        let mut state = AppState::default();
        let t0 = Utc::now();
        let first = tab_at("disk", "10.0.0.1", t0);
        let other = tab_at("mem", "10.0.0.1", t0);
        state.reduce(Action::TabCreated(first.clone()));
        state.reduce(Action::TabCreated(other.clone()));

        let mut second = tab_at("disk", "10.0.0.1", t0 + Duration::seconds(5));
        second.results = vec![ResultScreen::text("out", vec!["second".to_string()])];
        state.reduce(Action::TabCreated(second.clone()));

        assert_eq!(state.tabs.len(), 2);
        // Replaced in place, order kept
        assert_eq!(state.tabs[0].id, second.id);
        assert_eq!(state.tabs[0].results, second.results);
        assert_eq!(state.tabs[1].id, other.id);
        assert_eq!(state.active_tab.as_deref(), Some(second.id.as_str()));
        assert_eq!(state.view, View::ScanResults);
    }

    #[test]
    fn test_close_pinned_is_ignored() {
        let mut state = AppState::default();
        let tab = tab_at("disk", "10.0.0.1", Utc::now());
        let id = tab.id.clone();
        state.reduce(Action::TabCreated(tab));
        state.reduce(Action::TabPinned { id: id.clone(), pinned: true });
        state.reduce(Action::TabClosed(id.clone()));
        assert_eq!(state.tabs.len(), 1);

        state.reduce(Action::TabPinned { id: id.clone(), pinned: false });
        state.reduce(Action::TabClosed(id));
        assert!(state.tabs.is_empty());
        assert_eq!(state.active_tab, None);
        assert_eq!(state.view, View::Directory);
    }

    #[test]
    fn test_close_active_falls_back_to_last() {
        let mut state = AppState::default();
        let now = Utc::now();
        let a = tab_at("a", "10.0.0.1", now);
        let b = tab_at("b", "10.0.0.1", now);
        let c = tab_at("c", "10.0.0.1", now);
        for t in [a.clone(), b.clone(), c.clone()] {
            state.reduce(Action::TabCreated(t));
        }
        state.reduce(Action::TabActivated(b.id.clone()));
        state.reduce(Action::TabClosed(b.id.clone()));
        assert_eq!(state.active_tab.as_deref(), Some(c.id.as_str()));

        // Closing an inactive tab keeps the active one
        state.reduce(Action::TabClosed(a.id.clone()));
        assert_eq!(state.active_tab.as_deref(), Some(c.id.as_str()));
        assert_eq!(state.view, View::ScanResults);
    }

    #[test]
    fn test_close_all_keeps_pinned() {
        let mut state = AppState::default();
        let now = Utc::now();
        let a = tab_at("a", "10.0.0.1", now);
        let b = tab_at("b", "10.0.0.2", now);
        let c = tab_at("c", "10.0.0.3", now);
        for t in [a.clone(), b.clone(), c.clone()] {
            state.reduce(Action::TabCreated(t));
        }
        state.reduce(Action::TabPinned { id: a.id.clone(), pinned: true });
        state.reduce(Action::TabPinned { id: b.id.clone(), pinned: true });

        // c is active and unpinned
        state.reduce(Action::TabsClosedAll);
        let ids: Vec<&str> = state.tabs.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
        assert_eq!(state.active_tab.as_deref(), Some(b.id.as_str()));
        assert_eq!(state.view, View::ScanResults);

        // A pinned active tab stays active
        state.reduce(Action::TabActivated(a.id.clone()));
        state.reduce(Action::TabsClosedAll);
        assert_eq!(state.active_tab.as_deref(), Some(a.id.as_str()));
    }

    #[test]
    fn test_close_all_without_pinned_returns_to_directory() {
        let mut state = AppState::default();
        state.reduce(Action::TabCreated(tab_at("a", "10.0.0.1", Utc::now())));
        state.reduce(Action::TabsClosedAll);
        assert!(state.tabs.is_empty());
        assert_eq!(state.active_tab, None);
        assert_eq!(state.view, View::Directory);
    }

    #[test]
    fn test_refresh_keeps_identity() {
        let mut state = AppState::default();
        let t0 = Utc::now();
        let tab = tab_at("disk", "10.0.0.1", t0);
        let id = tab.id.clone();
        state.reduce(Action::TabCreated(tab));
        state.reduce(Action::TabPinned { id: id.clone(), pinned: true });
        state.reduce(Action::RefreshIntervalSet {
            id: id.clone(),
            interval: RefreshInterval::Minute,
            at: t0,
        });

        let later = t0 + Duration::seconds(61);
        state.reduce(Action::TabRefreshed {
            id: id.clone(),
            results: vec![ResultScreen::text("out", vec!["fresh".to_string()])],
            logs: vec!["log".to_string()],
            at: later,
        });
        let tab = state.tab(&id).unwrap();
        assert!(tab.pinned);
        assert_eq!(tab.refresh_interval, RefreshInterval::Minute);
        assert_eq!(tab.last_refreshed, later);
        assert_eq!(tab.logs, vec!["log".to_string()]);
    }

    #[test]
    fn test_due_tabs() {
        let mut state = AppState::default();
        let t0 = Utc::now();
        let pinned = tab_at("a", "10.0.0.1", t0);
        let unpinned = tab_at("b", "10.0.0.1", t0);
        state.reduce(Action::TabCreated(pinned.clone()));
        state.reduce(Action::TabCreated(unpinned.clone()));
        for t in [&pinned, &unpinned] {
            state.reduce(Action::RefreshIntervalSet {
                id: t.id.clone(),
                interval: RefreshInterval::Minute,
                at: t0,
            });
        }
        state.reduce(Action::TabPinned { id: pinned.id.clone(), pinned: true });

        assert!(state.due_tabs(t0 + Duration::seconds(59)).is_empty());
        assert_eq!(state.due_tabs(t0 + Duration::seconds(60)), vec![pinned.id.clone()]);
    }

    #[test]
    fn test_execution_lifecycle() {
        let mut state = AppState::default();
        let session = ExecutionSession::new(plugin("disk"), resource("10.0.0.1", "web"));
        let id = session.id;
        state.reduce(Action::ExecutionStarted(session));

        state.reduce(Action::ExecutionDismissed(id));
        assert!(state.session(id).is_some(), "running session cannot be dismissed");

        state.reduce(Action::ExecutionFailed {
            session: id,
            lines: vec!["Connection failed".to_string()],
        });
        assert_eq!(state.session(id).unwrap().status, ExecutionStatus::Error);
        state.reduce(Action::ExecutionDismissed(id));
        assert!(state.session(id).is_none());

        let session = ExecutionSession::new(plugin("disk"), resource("10.0.0.1", "web"));
        let id = session.id;
        state.reduce(Action::ExecutionStarted(session));
        state.reduce(Action::ExecutionCompleted { session: id });
        let done = state.session(id).unwrap();
        assert_eq!(done.status, ExecutionStatus::Done);
        assert_eq!(done.progress, 100);
        state.reduce(Action::ExecutionCleared(id));
        assert!(state.executions.is_empty());
    }

    #[test]
    fn test_close_active_falls_back_to_newest() {
        let mut state = AppState::default();
        let t0 = Utc::now();
        let a = tab_at("a", "10.0.0.1", t0);
        let b = tab_at("b", "10.0.0.1", t0 + Duration::seconds(1));
        let c = tab_at("c", "10.0.0.1", t0 + Duration::seconds(2));
        for t in [a, b.clone(), c.clone()] {
            state.reduce(Action::TabCreated(t));
        }
        // Reselecting a keeps its position but makes it the newest tab
        let a2 = tab_at("a", "10.0.0.1", t0 + Duration::seconds(3));
        state.reduce(Action::TabCreated(a2.clone()));
        assert_eq!(state.tabs[0].id, a2.id);

        state.reduce(Action::TabActivated(c.id.clone()));
        state.reduce(Action::TabClosed(c.id.clone()));
        assert_eq!(state.active_tab.as_deref(), Some(a2.id.as_str()));

        state.reduce(Action::TabPinned { id: b.id.clone(), pinned: true });
        state.reduce(Action::TabsClosedAll);
        assert_eq!(state.active_tab.as_deref(), Some(b.id.as_str()));
    }

    #[test]
    fn test_failed_refresh_replaces_previous_failure() {
        let mut state = AppState::default();
        let t0 = Utc::now();
        let tab = tab_at("disk", "10.0.0.1", t0);
        let id = tab.id.clone();
        state.reduce(Action::TabCreated(tab));

        let mut failed = Vec::new();
        for n in 1..=3 {
            let session = ExecutionSession::new(plugin("disk"), resource("10.0.0.1", "host"));
            let sid = session.id;
            state.reduce(Action::ExecutionStarted(session));
            state.reduce(Action::ExecutionFailed {
                session: sid,
                lines: vec!["Connection failed".to_string()],
            });
            state.reduce(Action::TabRefreshFailed {
                id: id.clone(),
                session: sid,
                at: t0 + Duration::seconds(60 * n),
            });
            failed.push(sid);
        }
        assert_eq!(state.executions.len(), 1);
        assert_eq!(state.executions[0].id, failed[2]);
        assert_eq!(state.tab(&id).unwrap().last_refreshed, t0 + Duration::seconds(180));

        // A later success takes the error modal down
        state.reduce(Action::TabRefreshed {
            id: id.clone(),
            results: vec![],
            logs: vec![],
            at: t0 + Duration::seconds(240),
        });
        assert!(state.executions.is_empty());
        assert_eq!(state.tab(&id).unwrap().failed_session, None);
    }

    #[test]
    fn test_plugin_mirror_patching() {
        let mut state = AppState::default();
        state.reduce(Action::PluginsLoaded(vec![plugin("a"), plugin("b")]));
        let mut edited = plugin("a");
        edited.role_config = "uptime".to_string();
        state.reduce(Action::PluginUpdated(edited.clone()));
        state.reduce(Action::PluginCreated(plugin("c")));
        state.reduce(Action::PluginDeleted(plugin("b").id));
        assert_eq!(state.plugins.items, vec![edited, plugin("c")]);
    }

    #[test]
    fn test_user_form() {
        let mut state = AppState::default();
        state.reduce(Action::UserFormOpened);
        assert!(state.users.open);
        state.reduce(Action::UserFormChanged {
            username: "bob".to_string(),
            role: Role::Viewer,
        });
        state.reduce(Action::UserFormSubmitted);
        assert!(!state.users.open);
        assert_eq!(state.users.role, Role::Viewer);

        // Reopening starts from a blank admin draft
        state.reduce(Action::UserFormOpened);
        assert_eq!(state.users.username, "");
        assert_eq!(state.users.role, Role::Admin);
        state.reduce(Action::UserFormClosed);
        assert!(!state.users.open);
    }

    #[tokio::test]
    async fn test_store_dispatch() {
        let store = Store::default();
        store.show_management(ManagementSection::Plugins).await;
        store
            .dispatch(Action::ResourceQueryChanged("web".to_string()))
            .await;
        let view = store.read(|s| s.view).await;
        assert_eq!(view, View::Management(ManagementSection::Plugins));
        assert_eq!(store.snapshot().await.resources.query, "web");
    }
}
