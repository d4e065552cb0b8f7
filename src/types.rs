//! Shared directory types: domains, node status, record kinds, node handles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Directory domain a node is resolved in.
///
/// The raw values are stable and line up with the numeric constants used by
/// the administrative tooling this library serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// The local machine's own directory node.
    Local,
    /// The default search path of the local machine.
    Default,
    /// A named directory service reachable from this machine.
    DirectoryService,
    /// A directory server administered through a proxy connection.
    ProxyDirectoryServer,
}

impl Domain {
    /// Stable numeric value for this domain.
    pub fn raw(self) -> u32 {
        match self {
            Domain::Local => 0x2200,
            Domain::Default => 0x2201,
            Domain::DirectoryService => 0x2202,
            Domain::ProxyDirectoryServer => 0x2203,
        }
    }

    /// Whether sessions in this domain authenticate as remote (proxy-class)
    /// connections rather than local ones.
    pub fn is_proxy(self) -> bool {
        matches!(self, Domain::DirectoryService | Domain::ProxyDirectoryServer)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Domain::Local => "local domain",
            Domain::Default => "default search path",
            Domain::DirectoryService => "directory service",
            Domain::ProxyDirectoryServer => "proxy directory server",
        };
        write!(f, "{}", s)
    }
}

/// Authentication status of the session's node.
///
/// The sign of the raw value distinguishes authenticated (positive) from not
/// authenticated (negative); the magnitude distinguishes local (1) from
/// proxy (2) connections. `NotSet` (0) only occurs before the first
/// authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotSet,
    AuthenticatedLocal,
    AuthenticatedProxy,
    NotAuthenticatedLocal,
    NotAuthenticatedProxy,
}

impl NodeStatus {
    /// Signed raw value of this status.
    pub fn raw(self) -> i8 {
        match self {
            NodeStatus::NotSet => 0,
            NodeStatus::AuthenticatedLocal => 1,
            NodeStatus::AuthenticatedProxy => 2,
            NodeStatus::NotAuthenticatedLocal => -1,
            NodeStatus::NotAuthenticatedProxy => -2,
        }
    }

    /// True for either authenticated status.
    pub fn is_authenticated(self) -> bool {
        self.raw() > 0
    }

    /// The authenticated status appropriate for `domain`.
    pub fn authenticated(domain: Domain) -> Self {
        if domain.is_proxy() {
            NodeStatus::AuthenticatedProxy
        } else {
            NodeStatus::AuthenticatedLocal
        }
    }

    /// The not-authenticated status appropriate for `domain`.
    pub fn not_authenticated(domain: Domain) -> Self {
        if domain.is_proxy() {
            NodeStatus::NotAuthenticatedProxy
        } else {
            NodeStatus::NotAuthenticatedLocal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::NotSet => "not set",
            NodeStatus::AuthenticatedLocal => "authenticated (local)",
            NodeStatus::AuthenticatedProxy => "authenticated (proxy)",
            NodeStatus::NotAuthenticatedLocal => "not authenticated (local)",
            NodeStatus::NotAuthenticatedProxy => "not authenticated (proxy)",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    User,
    Group,
    Preset,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::User => "user",
            RecordKind::Group => "group",
            RecordKind::Preset => "preset",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque reference to a resolved directory node.
///
/// A handle is valid only while its generation matches the backend's current
/// generation for the node; re-resolving a node supersedes outstanding
/// handles, and operations made through them fail with a session error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    id: u64,
    generation: u64,
    domain: Domain,
    name: String,
}

impl NodeHandle {
    pub fn new(id: u64, generation: u64, domain: Domain, name: impl Into<String>) -> Self {
        Self {
            id,
            generation,
            domain,
            name: name.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Node name, e.g. `/Local/Default`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.generation)
    }
}

/// A single record discovered by a streaming query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub kind: RecordKind,
    pub name: String,
}

impl QueryRecord {
    pub fn new(kind: RecordKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}
