use crate::error::ConsoleResult;
use crate::model::{Plugin, PluginDraft, PluginId, ResourceRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of `POST /api/resources/`
#[derive(Clone, PartialEq, Serialize)]
pub struct Enrollment {
    #[serde(rename = "ipAddress")]
    pub ip_address: String,
    pub username: String,
    pub password: String,
}

// Keep the password out of any log line
impl fmt::Debug for Enrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enrollment")
            .field("ip_address", &self.ip_address)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

impl MessageResponse {
    pub fn is(&self, expected: &str) -> bool {
        self.message.as_deref() == Some(expected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CreatedPlugin {
    #[serde(default)]
    pub id: Option<PluginId>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The REST surface of the console backend
pub trait Backend {
    async fn list_resources(&self) -> ConsoleResult<Vec<ResourceRecord>>;

    async fn save_resource(&self, enrollment: &Enrollment) -> ConsoleResult<MessageResponse>;

    async fn delete_resource(&self, ip_address: &str) -> ConsoleResult<MessageResponse>;

    async fn list_plugins(&self) -> ConsoleResult<Vec<Plugin>>;

    async fn create_plugin(&self, draft: &PluginDraft) -> ConsoleResult<CreatedPlugin>;

    async fn update_plugin(
        &self,
        id: &PluginId,
        draft: &PluginDraft,
    ) -> ConsoleResult<MessageResponse>;

    async fn delete_plugin(&self, id: &PluginId) -> ConsoleResult<()>;
}
