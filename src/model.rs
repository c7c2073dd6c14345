use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt::{self, Display};
use strum::IntoEnumIterator;
use strum_macros::{Display as StrumDisplay, EnumIter};
use uuid::Uuid;

// Number of characters shown as plugin preview when the backend sends no snippet
const PREVIEW_CHARS: usize = 100;

/// Compliance shown next to a resource.
/// The backend computes no score yet, the dashboard value is a placeholder derived from the list position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compliance {
    Synthetic(u8),
}

impl Compliance {
    pub fn for_index(index: usize) -> Self {
        Compliance::Synthetic(80 + (index % 3) as u8 * 5)
    }

    pub fn percent(&self) -> u8 {
        match self {
            Compliance::Synthetic(value) => *value,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Compliance::Synthetic(_))
    }
}

/// Resource as returned by `GET /api/resources/list/`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceRecord {
    pub ip_address: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub ip_address: String,
    pub hostname: String,
    pub port: Option<u16>,
    pub status: Option<String>,
    pub compliance: Compliance,
}

impl Resource {
    /// Decorates the backend list with the placeholder compliance, in list order
    pub fn decorate(records: Vec<ResourceRecord>) -> Vec<Resource> {
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| Resource {
                ip_address: record.ip_address,
                hostname: record
                    .hostname
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string()),
                port: record.port,
                status: record.status,
                compliance: Compliance::for_index(index),
            })
            .collect()
    }

    /// Case-insensitive match on hostname or IP, an empty query matches everything
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.hostname.to_lowercase().contains(&query)
            || self.ip_address.to_lowercase().contains(&query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(id: impl Into<String>) -> Self {
        PluginId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The backend has used both integer and string ids
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl From<RawId> for PluginId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => PluginId(n.to_string()),
            RawId::Text(s) => PluginId(s),
        }
    }
}

impl Serialize for PluginId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PluginId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer).map(PluginId::from)
    }
}

#[derive(Deserialize)]
struct RawPlugin {
    #[serde(default)]
    id: Option<PluginId>,
    name: String,
    #[serde(default, rename = "roleConfig")]
    role_config: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPlugin")]
pub struct Plugin {
    pub id: PluginId,
    pub name: String,
    #[serde(rename = "roleConfig")]
    pub role_config: String,
    pub snippet: Option<String>,
}

impl From<RawPlugin> for Plugin {
    fn from(raw: RawPlugin) -> Self {
        // Script listings keyed by file name carry no id
        let id = raw.id.unwrap_or_else(|| PluginId::new(raw.name.clone()));
        Plugin {
            id,
            name: raw.name,
            role_config: raw.role_config.unwrap_or_default(),
            snippet: raw.snippet,
        }
    }
}

impl Plugin {
    pub fn preview(&self) -> String {
        match &self.snippet {
            Some(snippet) if !snippet.is_empty() => snippet.clone(),
            _ => self.role_config.chars().take(PREVIEW_CHARS).collect(),
        }
    }
}

/// Body of plugin create and update calls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDraft {
    pub name: String,
    #[serde(rename = "roleConfig")]
    pub role_config: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScreenContent {
    Lines(Vec<String>),
    Table(Vec<Vec<String>>),
}

impl Serialize for ScreenContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScreenContent::Lines(lines) => lines.serialize(serializer),
            ScreenContent::Table(rows) => rows.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
struct RawResultScreen {
    #[serde(default)]
    screen_name: String,
    #[serde(default)]
    is_table: bool,
    #[serde(default)]
    content: Vec<Value>,
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One named pane of a scan, free text or a table whose first row is the header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawResultScreen")]
pub struct ResultScreen {
    pub screen_name: String,
    pub is_table: bool,
    pub content: ScreenContent,
}

impl From<RawResultScreen> for ResultScreen {
    fn from(raw: RawResultScreen) -> Self {
        let content = if raw.is_table {
            ScreenContent::Table(
                raw.content
                    .iter()
                    .map(|item| match item {
                        Value::Array(cells) => cells.iter().map(cell_text).collect(),
                        Value::String(line) => {
                            line.split_whitespace().map(str::to_string).collect()
                        }
                        other => vec![cell_text(other)],
                    })
                    .collect(),
            )
        } else {
            ScreenContent::Lines(
                raw.content
                    .iter()
                    .map(|item| match item {
                        Value::Array(cells) => cells
                            .iter()
                            .map(cell_text)
                            .collect::<Vec<_>>()
                            .join(" "),
                        other => cell_text(other),
                    })
                    .collect(),
            )
        };
        ResultScreen {
            screen_name: raw.screen_name,
            is_table: raw.is_table,
            content,
        }
    }
}

impl ResultScreen {
    pub fn text(screen_name: &str, lines: Vec<String>) -> Self {
        ResultScreen {
            screen_name: screen_name.to_string(),
            is_table: false,
            content: ScreenContent::Lines(lines),
        }
    }

    pub fn table(screen_name: &str, rows: Vec<Vec<String>>) -> Self {
        ResultScreen {
            screen_name: screen_name.to_string(),
            is_table: true,
            content: ScreenContent::Table(rows),
        }
    }
}

/// Auto-refresh choices offered on a scan tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, StrumDisplay)]
pub enum RefreshInterval {
    #[default]
    #[strum(to_string = "No refresh")]
    Off,
    #[strum(to_string = "30 seconds")]
    HalfMinute,
    #[strum(to_string = "1 minute")]
    Minute,
    #[strum(to_string = "5 minutes")]
    FiveMinutes,
    #[strum(to_string = "10 minutes")]
    TenMinutes,
}

impl RefreshInterval {
    pub fn secs(&self) -> u64 {
        match self {
            RefreshInterval::Off => 0,
            RefreshInterval::HalfMinute => 30,
            RefreshInterval::Minute => 60,
            RefreshInterval::FiveMinutes => 300,
            RefreshInterval::TenMinutes => 600,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.secs() > 0
    }

    pub fn options() -> Vec<(String, u64)> {
        RefreshInterval::iter()
            .map(|interval| (interval.to_string(), interval.secs()))
            .collect()
    }
}

impl TryFrom<u64> for RefreshInterval {
    type Error = String;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        RefreshInterval::iter()
            .find(|interval| interval.secs() == secs)
            .ok_or_else(|| format!("unsupported refresh interval: {}s", secs))
    }
}

impl Serialize for RefreshInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.secs())
    }
}

impl<'de> Deserialize<'de> for RefreshInterval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        RefreshInterval::try_from(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Error,
    Done,
}

/// A plugin run in flight, shown in the progress modal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSession {
    pub id: Uuid,
    pub plugin: Plugin,
    pub resource: Resource,
    pub status: ExecutionStatus,
    pub logs: Vec<String>,
    pub progress: u8,
}

impl ExecutionSession {
    pub fn new(plugin: Plugin, resource: Resource) -> Self {
        let first_line = format!(
            "Starting execution of {} on {}...",
            plugin.name, resource.hostname
        );
        ExecutionSession {
            id: Uuid::new_v4(),
            plugin,
            resource,
            status: ExecutionStatus::Running,
            logs: vec![first_line],
            progress: 0,
        }
    }

    /// A running session keeps its live log on screen
    pub fn can_dismiss(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Done;
        self.progress = 100;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanTab {
    pub id: String,
    pub label: String,
    pub plugin: Plugin,
    pub resource: Resource,
    pub results: Vec<ResultScreen>,
    pub logs: Vec<String>,
    pub pinned: bool,
    pub refresh_interval: RefreshInterval,
    pub last_refreshed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Failed refresh still shown in the progress modal
    #[serde(skip)]
    pub failed_session: Option<Uuid>,
}

impl ScanTab {
    pub fn new(
        plugin: Plugin,
        resource: Resource,
        results: Vec<ResultScreen>,
        logs: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        ScanTab {
            id: format!(
                "{}-{}-{}",
                resource.ip_address,
                plugin.name,
                now.timestamp_millis()
            ),
            label: format!("{} ({})", plugin.name, resource.hostname),
            plugin,
            resource,
            results,
            logs,
            pinned: false,
            refresh_interval: RefreshInterval::Off,
            last_refreshed: now,
            created_at: now,
            failed_session: None,
        }
    }

    /// Tabs are unique per (resource IP, plugin name)
    pub fn is_for(&self, ip_address: &str, plugin_name: &str) -> bool {
        self.resource.ip_address == ip_address && self.plugin.name == plugin_name
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.pinned || !self.refresh_interval.is_enabled() {
            return false;
        }
        let elapsed_ms = (now - self.last_refreshed).num_milliseconds();
        elapsed_ms >= (self.refresh_interval.secs() * 1000) as i64
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn plugin(name: &str) -> Plugin {
        Plugin {
            id: PluginId::new(format!("id-{}", name)),
            name: name.to_string(),
            role_config: "echo hi".to_string(),
            snippet: None,
        }
    }

    pub fn resource(ip: &str, hostname: &str) -> Resource {
        Resource {
            ip_address: ip.to_string(),
            hostname: hostname.to_string(),
            port: None,
            status: None,
            compliance: Compliance::for_index(0),
        }
    }
}
