use serde::{Deserialize, Serialize};

/// Schema version for `instance.json`. Bump this, and add a migration arm in
/// `beacon::instances::migrate`, whenever a field is added or renamed.
pub const INSTANCE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    Fabric,
    Quilt,
    Forge,
    NeoForge,
}

impl LoaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fabric => "fabric",
            Self::Quilt => "quilt",
            Self::Forge => "forge",
            Self::NeoForge => "neoforge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fabric" => Some(Self::Fabric),
            "quilt" => Some(Self::Quilt),
            "forge" => Some(Self::Forge),
            "neoforge" => Some(Self::NeoForge),
            _ => None,
        }
    }
}

/// State machine from spec §3/§8: `ready -> installing -> {ready, error}`,
/// `ready -> running -> {ready, crashed}`, `crashed -> {installing, running}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Ready,
    Installing,
    Running,
    Crashed,
    Error,
}

impl InstanceState {
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Ready, Installing)
                | (Installing, Ready)
                | (Installing, Error)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Crashed)
                | (Crashed, Installing)
                | (Crashed, Running)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub schema_version: u32,
    pub id: String,
    pub name: String,
    /// Launcher-visible version id — may be a derived loader id such as
    /// `fabric-loader-0.15.11-1.20.4`.
    pub version: String,
    /// Pure vanilla id; equals `version` until a loader is installed.
    pub mc_version: String,
    pub loader: Option<LoaderType>,
    pub loader_version: Option<String>,
    pub icon: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_played: Option<chrono::DateTime<chrono::Utc>>,
    pub playtime_minutes: u64,
    pub last_crash: Option<String>,
    pub state: InstanceState,

    pub min_memory: Option<u32>,
    pub max_memory: Option<u32>,
    pub java_path_override: Option<String>,
    pub java_args: Option<String>,
    #[serde(default)]
    pub java_warning_ignored: bool,
}

impl Instance {
    pub fn new(id: String, name: String, version: String, mc_version: String) -> Self {
        Self {
            schema_version: INSTANCE_SCHEMA_VERSION,
            id,
            name,
            version,
            mc_version,
            loader: None,
            loader_version: None,
            icon: None,
            created_at: chrono::Utc::now(),
            last_played: None,
            playtime_minutes: 0,
            last_crash: None,
            state: InstanceState::Ready,
            min_memory: None,
            max_memory: None,
            java_path_override: None,
            java_args: None,
            java_warning_ignored: false,
        }
    }

    /// Sets `java_path_override`, clearing the ignored-warning flag per spec §3
    /// ("cleared whenever `java_path_override` changes").
    pub fn set_java_path_override(&mut self, path: Option<String>) {
        self.java_path_override = path;
        self.java_warning_ignored = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub min_memory: u32,
    pub max_memory: u32,
    pub global_java_path: Option<String>,
    pub global_java_args: Option<String>,
    pub skip_java_check: bool,
    pub close_on_launch: bool,
    pub keep_logs_open: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_memory: 1024,
            max_memory: 4096,
            global_java_path: None,
            global_java_args: None,
            skip_java_check: false,
            close_on_launch: false,
            keep_logs_open: false,
        }
    }
}

/// A single entry read back from `.minecraft/servers.dat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerListEntry {
    pub name: String,
    pub ip: String,
    pub icon: Option<String>,
}

/// Crash classification buckets from spec §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashCategory {
    Memory,
    JavaVersion,
    ModConflict,
    LoaderIssue,
    Unknown,
}

impl CrashCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "Memory",
            Self::JavaVersion => "Java version",
            Self::ModConflict => "Mod conflict",
            Self::LoaderIssue => "Loader issue",
            Self::Unknown => "Unknown",
        }
    }
}
