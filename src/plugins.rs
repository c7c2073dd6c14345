use crate::backend::Backend;
use crate::error::ConsoleResult;
use crate::model::{Plugin, PluginDraft, PluginId};
use crate::store::{Action, Notice, Store};
use std::sync::Arc;
use tracing::{error, info, warn};

const LOAD_FAILED: &str = "Failed to load scripts.";
const MISSING_FIELDS: &str = "Both name and script content are required.";
const SAVE_FAILED: &str = "An error occurred while saving the script.";
const DELETED: &str = "Plugin script deleted successfully.";
const DELETE_FAILED: &str = "Failed to delete the script.";

/// Plugin scripts. After each mutation the local mirror is patched, not re-fetched.
pub struct PluginRegistry<B: Backend> {
    backend: Arc<B>,
    store: Store,
}

impl<B: Backend> PluginRegistry<B> {
    pub fn new(backend: Arc<B>, store: Store) -> Self {
        Self { backend, store }
    }

    pub async fn list(&self) -> ConsoleResult<Vec<Plugin>> {
        match self.backend.list_plugins().await {
            Ok(plugins) => {
                info!("Fetched {} plugins", plugins.len());
                self.store
                    .dispatch(Action::PluginsLoaded(plugins.clone()))
                    .await;
                Ok(plugins)
            }
            Err(e) => {
                error!("Error fetching plugins: {}", e);
                self.store
                    .dispatch(Action::PluginNotice(Notice::Error(LOAD_FAILED.to_string())))
                    .await;
                Err(e)
            }
        }
    }

    /// Opens the editor on an existing plugin, or empty for a new one
    pub async fn open_editor(&self, plugin: Option<Plugin>) {
        self.store.dispatch(Action::PluginEditorOpened(plugin)).await;
    }

    pub async fn close_editor(&self) {
        self.store.dispatch(Action::PluginEditorClosed).await;
    }

    pub async fn rename(&self, name: &str) {
        self.store
            .dispatch(Action::PluginNameChanged(name.to_string()))
            .await;
    }

    /// Records the raw editor text and caret, returns the re-highlighted markup
    pub async fn input(&self, text: &str, caret: usize) -> String {
        self.store
            .dispatch(Action::PluginCodeInput {
                text: text.to_string(),
                caret,
            })
            .await;
        self.store
            .read(|s| {
                s.plugins
                    .editor
                    .as_ref()
                    .map(|e| e.code.view())
                    .unwrap_or_default()
            })
            .await
    }

    /// Creates or updates the plugin in the editor. Returns `None` when the editor is closed.
    pub async fn save(&self) -> Option<Notice> {
        let editor = self.store.read(|s| s.plugins.editor.clone()).await?;
        let draft = PluginDraft {
            name: editor.name.trim().to_string(),
            role_config: editor.code.text().to_string(),
        };
        if draft.name.is_empty() || editor.code.is_empty() {
            // The editor stays open so the operator can fix the form
            let notice = Notice::Error(MISSING_FIELDS.to_string());
            self.store
                .dispatch(Action::PluginNotice(notice.clone()))
                .await;
            return Some(notice);
        }

        self.store.dispatch(Action::PluginSaving(true)).await;
        let notice = match editor.editing {
            Some(id) => self.update(id, draft).await,
            None => self.create(draft).await,
        };
        self.store
            .dispatch(Action::PluginNotice(notice.clone()))
            .await;
        self.store.dispatch(Action::PluginSaving(false)).await;
        self.close_editor().await;
        Some(notice)
    }

    async fn update(&self, id: PluginId, draft: PluginDraft) -> Notice {
        info!("Updating plugin {} ({})", draft.name, id);
        match self.backend.update_plugin(&id, &draft).await {
            Ok(reply) => {
                let current = self
                    .store
                    .read(|s| s.plugins.items.iter().find(|p| p.id == id).cloned())
                    .await;
                if let Some(mut plugin) = current {
                    plugin.name = draft.name;
                    plugin.role_config = draft.role_config;
                    // The preview follows the new body
                    plugin.snippet = None;
                    self.store.dispatch(Action::PluginUpdated(plugin)).await;
                }
                Notice::Success(reply.message.unwrap_or_default())
            }
            Err(e) => {
                warn!("Failed to update plugin {}: {}", id, e);
                Notice::Error(e.user_message(SAVE_FAILED))
            }
        }
    }

    async fn create(&self, draft: PluginDraft) -> Notice {
        info!("Creating plugin {}", draft.name);
        match self.backend.create_plugin(&draft).await {
            Ok(created) => {
                let id = created
                    .id
                    .unwrap_or_else(|| PluginId::new(draft.name.clone()));
                self.store
                    .dispatch(Action::PluginCreated(Plugin {
                        id,
                        name: draft.name,
                        role_config: draft.role_config,
                        snippet: None,
                    }))
                    .await;
                Notice::Success(created.message.unwrap_or_default())
            }
            Err(e) => {
                warn!("Failed to create plugin {}: {}", draft.name, e);
                Notice::Error(e.user_message(SAVE_FAILED))
            }
        }
    }

    /// Deletes after `confirm` agrees. Returns `None` when cancelled or the plugin is unknown.
    pub async fn delete(&self, id: &PluginId, confirm: impl FnOnce(&Plugin) -> bool) -> Option<Notice> {
        let plugin = self
            .store
            .read(|s| s.plugins.items.iter().find(|p| &p.id == id).cloned())
            .await?;
        if !confirm(&plugin) {
            info!("Deletion of plugin {} cancelled", plugin.name);
            return None;
        }

        let notice = match self.backend.delete_plugin(id).await {
            Ok(()) => {
                info!("Deleted plugin {}", plugin.name);
                self.store.dispatch(Action::PluginDeleted(id.clone())).await;
                Notice::Success(DELETED.to_string())
            }
            Err(e) => {
                warn!("Failed to delete plugin {}: {}", plugin.name, e);
                Notice::Error(e.user_message(DELETE_FAILED))
            }
        };
        self.store
            .dispatch(Action::PluginNotice(notice.clone()))
            .await;
        Some(notice)
    }
}
