use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::info;

/// Sections of the management side-nav
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ManagementSection {
    #[default]
    Users,
    Resources,
    Plugins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum View {
    /// Resource dashboard with the enroll/search/action controls
    Directory,
    ScanResults,
    Management(ManagementSection),
}

impl Default for View {
    fn default() -> Self {
        View::Directory
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Role {
    #[default]
    Admin,
    Operator,
    Viewer,
}

// There is no user API yet, the form is kept locally and only logged on submit
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UserDraft {
    pub open: bool,
    pub username: String,
    pub role: Role,
}

impl UserDraft {
    pub fn open(&mut self) {
        *self = UserDraft {
            open: true,
            ..Default::default()
        };
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn submit(&mut self) {
        info!("New user draft: {} ({})", self.username, self.role);
        self.close();
    }
}
