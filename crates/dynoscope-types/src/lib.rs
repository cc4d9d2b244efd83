//! Shared types for dynoscope
//!
//! This crate contains data structures used across multiple dynoscope crates.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Platform Resource Types
// ============================================================================

/// A platform application
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    /// Owning organization, if the app is org-owned
    #[serde(default)]
    pub organization: Option<String>,
    /// Owning team, if the app is team-owned
    #[serde(default)]
    pub team: Option<String>,
}

impl App {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            organization: None,
            team: None,
        }
    }

    /// Display label including the owner when known
    pub fn display_name(&self) -> String {
        match self.team.as_deref().or(self.organization.as_deref()) {
            Some(owner) => format!("{} ({})", self.name, owner),
            None => self.name.clone(),
        }
    }
}

/// Dyno run state as reported by the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynoState {
    Up,
    Starting,
    Restarting,
    Crashed,
    Idle,
    Down,
    Unknown,
}

impl From<&str> for DynoState {
    fn from(s: &str) -> Self {
        match s {
            "up" => Self::Up,
            "starting" => Self::Starting,
            "restarting" => Self::Restarting,
            "crashed" => Self::Crashed,
            "idle" => Self::Idle,
            "down" => Self::Down,
            _ => Self::Unknown,
        }
    }
}

impl DynoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Starting => "starting",
            Self::Restarting => "restarting",
            Self::Crashed => "crashed",
            Self::Idle => "idle",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }

    /// Terminal states do not transition further without a new process start
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Down)
    }
}

/// A single dyno (one running process instance)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dyno {
    pub id: String,
    /// Process name, e.g. `web.1`
    pub name: String,
    pub state: DynoState,
    /// Dyno size, e.g. `Standard-1X`
    #[serde(default)]
    pub size: Option<String>,
    /// Command the dyno runs
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Dyno {
    pub fn new(id: String, name: String, state: DynoState) -> Self {
        Self {
            id,
            name,
            state,
            size: None,
            command: None,
            updated_at: None,
        }
    }

    /// Process type prefix of the dyno name (`web.1` -> `web`)
    pub fn process_type(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Numeric suffix of the dyno name (`web.10` -> 10), used for ordering.
    /// Names without a numeric suffix sort first.
    pub fn ordinal(&self) -> u64 {
        self.name
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// A formation entry (desired scale for one process type at one size)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Formation {
    pub id: String,
    /// Process type, e.g. `web` or `worker`
    #[serde(rename = "type")]
    pub process_type: String,
    pub size: String,
    pub quantity: i64,
}

impl Formation {
    pub fn new(id: String, process_type: String, size: String, quantity: i64) -> Self {
        Self {
            id,
            process_type,
            size,
            quantity,
        }
    }
}

/// Add-on provisioning state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddOnState {
    Provisioning,
    Provisioned,
    Deprovisioning,
    Deprovisioned,
    Unknown,
}

impl From<&str> for AddOnState {
    fn from(s: &str) -> Self {
        match s {
            "provisioning" => Self::Provisioning,
            "provisioned" => Self::Provisioned,
            "deprovisioning" => Self::Deprovisioning,
            "deprovisioned" => Self::Deprovisioned,
            _ => Self::Unknown,
        }
    }
}

/// A provisioned add-on attached to an app
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddOn {
    pub id: String,
    pub name: String,
    /// Backing service, e.g. `postgresql`
    #[serde(default)]
    pub service: Option<String>,
    pub state: AddOnState,
}

impl AddOn {
    pub fn new(id: String, name: String, state: AddOnState) -> Self {
        Self {
            id,
            name,
            service: None,
            state,
        }
    }
}

// ============================================================================
// Domain Events
// ============================================================================

/// A typed fact derived from one platform log line.
///
/// Events are transient: produced by the extractor, consumed once by the
/// sync engine, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEvent {
    StateChanged {
        dyno_name: String,
        from: DynoState,
        to: DynoState,
    },
    ScaledTo {
        dyno_type: String,
        quantity: i64,
        size: String,
    },
    StartingProcess {
        dyno_name: String,
        command: String,
    },
    AttachmentAttached {
        config_var: String,
        reference: Option<String>,
    },
    AttachmentDetached {
        config_var: String,
        reference: Option<String>,
    },
    AttachmentUpdated {
        config_var: String,
        reference: Option<String>,
    },
    ProvisioningCompleted {
        reference: String,
    },
}

/// One item on the multiplexer's outward channel
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A session was opened for the app
    SessionStarted { app: String },
    /// A session ended (normal close, error, or abort); ending is final
    SessionEnded { app: String },
    /// A typed event derived from one of the app's log lines
    Event { app: App, event: LogEvent },
}

// ============================================================================
// Tracked Set & Notifications
// ============================================================================

/// Diff of the tracked-application set, keyed by app name
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppSetDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl AppSetDiff {
    /// Diff that only adds the given names
    pub fn adding<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            added: names.into_iter().map(Into::into).collect(),
            removed: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Change notification consumed by the presentation layer to refresh a tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// A single dyno changed
    Dyno { app: String, name: String },
    /// The formation collection for an app changed
    Formations { app: String },
    /// A single add-on changed
    AddOn { app: String, id: String },
    /// The add-on collection for an app changed
    AddOns { app: String },
    /// An app entry changed as a whole
    App { app: String },
    /// The tracked set changed; re-render everything
    Everything,
}

/// Per-application sync progress
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Uninitialized,
    Syncing,
    Synced,
}

/// Presentation category nodes shown under each app in the tree
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Dynos,
    Formations,
    AddOns,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Dynos, Category::Formations, Category::AddOns];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Dynos => "Dynos",
            Self::Formations => "Formations",
            Self::AddOns => "Add-ons",
        }
    }
}
