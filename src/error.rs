//! Error types for directory sessions, record editing, and queries.
//!
//! The taxonomy is flat with stable numeric codes so callers and logs can
//! classify failures without parsing backend-specific message text.

use crate::types::{Domain, RecordKind};
use thiserror::Error;

/// Failure of a directory operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    // Connectivity / session
    #[error("Could not connect to directory node: {0}")]
    CouldNotConnectToNode(String),

    #[error("No directory node available for {0}")]
    NoDirectoryNode(Domain),

    #[error("Directory session error: {0}")]
    SessionError(String),

    // Credentials
    #[error("Wrong password supplied")]
    WrongPassword,

    #[error("No password supplied")]
    NoPasswordSupplied,

    #[error("Invalid credentials for {0}")]
    InvalidCredentials(String),

    // Lookup
    #[error("No user record named {0}")]
    NoUserRecord(String),

    #[error("No group record named {0}")]
    NoGroupRecord(String),

    #[error("No preset record named {0}")]
    NoPresetRecord(String),

    #[error("No {kind} record matching GUID {guid}")]
    NoMatchingRecord { guid: String, kind: RecordKind },

    // Mutation
    #[error("Could not add user {name}: {detail}")]
    CouldNotAddUser { name: String, detail: String },

    #[error("User {0} already exists")]
    UserAlreadyExists(String),

    #[error("Could not remove user {name}: {detail}")]
    CouldNotRemoveUser { name: String, detail: String },

    #[error("Could not add group {name}: {detail}")]
    CouldNotAddGroup { name: String, detail: String },

    #[error("Could not remove group {name}: {detail}")]
    CouldNotRemoveGroup { name: String, detail: String },

    #[error("Could not add user {user} to group {group}: {detail}")]
    CouldNotAddUserToGroup {
        user: String,
        group: String,
        detail: String,
    },

    #[error("Could not remove user {user} from group {group}: {detail}")]
    CouldNotRemoveUserFromGroup {
        user: String,
        group: String,
        detail: String,
    },

    // Validation
    #[error("Incomplete user object: {0}")]
    IncompleteUserObject(String),

    #[error("Incomplete group object: {0}")]
    IncompleteGroupObject(String),
}

/// Concern group an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Credentials,
    Lookup,
    Mutation,
    Validation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Credentials => "credentials",
            ErrorKind::Lookup => "lookup",
            ErrorKind::Mutation => "mutation",
            ErrorKind::Validation => "validation",
        }
    }
}

impl DirectoryError {
    /// Stable numeric code for this error.
    pub fn code(&self) -> u32 {
        match self {
            DirectoryError::CouldNotConnectToNode(_) => 1000,
            DirectoryError::NoUserRecord(_) => 1001,
            DirectoryError::NoGroupRecord(_) => 1002,
            DirectoryError::NoPresetRecord(_) => 1003,
            DirectoryError::NoMatchingRecord { .. } => 1004,
            DirectoryError::WrongPassword => 2002,
            DirectoryError::NoPasswordSupplied => 2003,
            DirectoryError::InvalidCredentials(_) => 2004,
            DirectoryError::SessionError(_) => 2005,
            DirectoryError::NoDirectoryNode(_) => 2006,
            DirectoryError::CouldNotAddUser { .. } => 3000,
            DirectoryError::UserAlreadyExists(_) => 3001,
            DirectoryError::CouldNotRemoveUser { .. } => 3002,
            DirectoryError::CouldNotAddGroup { .. } => 3003,
            DirectoryError::CouldNotRemoveGroup { .. } => 3004,
            DirectoryError::CouldNotAddUserToGroup { .. } => 3005,
            DirectoryError::CouldNotRemoveUserFromGroup { .. } => 3006,
            DirectoryError::IncompleteUserObject(_) => 3007,
            DirectoryError::IncompleteGroupObject(_) => 3008,
        }
    }

    /// Concern group for logging and batch policy decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DirectoryError::CouldNotConnectToNode(_)
            | DirectoryError::NoDirectoryNode(_)
            | DirectoryError::SessionError(_) => ErrorKind::Connectivity,
            DirectoryError::WrongPassword
            | DirectoryError::NoPasswordSupplied
            | DirectoryError::InvalidCredentials(_) => ErrorKind::Credentials,
            DirectoryError::NoUserRecord(_)
            | DirectoryError::NoGroupRecord(_)
            | DirectoryError::NoPresetRecord(_)
            | DirectoryError::NoMatchingRecord { .. } => ErrorKind::Lookup,
            DirectoryError::CouldNotAddUser { .. }
            | DirectoryError::UserAlreadyExists(_)
            | DirectoryError::CouldNotRemoveUser { .. }
            | DirectoryError::CouldNotAddGroup { .. }
            | DirectoryError::CouldNotRemoveGroup { .. }
            | DirectoryError::CouldNotAddUserToGroup { .. }
            | DirectoryError::CouldNotRemoveUserFromGroup { .. } => ErrorKind::Mutation,
            DirectoryError::IncompleteUserObject(_)
            | DirectoryError::IncompleteGroupObject(_) => ErrorKind::Validation,
        }
    }

    /// Whether a batch must stop when it sees this error.
    ///
    /// Connectivity and credential failures mean the authenticated node is
    /// gone; iterating further would fail every remaining item. Lookup,
    /// mutation, and validation failures are per-item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connectivity | ErrorKind::Credentials
        )
    }

    /// Session error with a detail message.
    pub fn session(detail: impl Into<String>) -> Self {
        DirectoryError::SessionError(detail.into())
    }

    /// The lookup error for an absent record of `kind`.
    pub fn no_record(kind: RecordKind, name: impl Into<String>) -> Self {
        let name = name.into();
        match kind {
            RecordKind::User => DirectoryError::NoUserRecord(name),
            RecordKind::Group => DirectoryError::NoGroupRecord(name),
            RecordKind::Preset => DirectoryError::NoPresetRecord(name),
        }
    }
}
