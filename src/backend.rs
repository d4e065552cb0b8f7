//! Directory Backend Abstraction
//!
//! Unified interface to the directory service a session operates against.
//! The session, record store, editor, and query engine all program against
//! this trait; `MemoryDirectory` is the in-process implementation used for
//! local deployments and tests, and network backends implement the same
//! surface out of crate.

use crate::error::DirectoryError;
use crate::records::RecordAttributes;
use crate::types::{Domain, NodeHandle, RecordKind};
use async_trait::async_trait;

pub mod memory;

pub use memory::MemoryDirectory;

/// A single modification of one attribute of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeOp {
    /// Append one value to the attribute's value list.
    Append(String),
    /// Remove one value from the attribute's value list; absent values are
    /// ignored.
    RemoveValue(String),
    /// Replace the whole value list.
    Replace(Vec<String>),
    /// Remove the attribute entirely.
    Clear,
}

/// Directory backend trait.
///
/// Implementations map their native failures into the `DirectoryError`
/// taxonomy and must validate the handle's generation on every call: a
/// handle resolved before the node was re-opened is superseded and every
/// operation through it fails with `SessionError`.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    /// Resolve a node for the domain. `server` names the proxy host for
    /// `ProxyDirectoryServer`, the service node for `DirectoryService`, and
    /// is ignored for `Local`/`Default`.
    async fn open_node(
        &self,
        domain: Domain,
        server: Option<&str>,
    ) -> Result<NodeHandle, DirectoryError>;

    /// Authenticate administrator credentials against the node.
    async fn authenticate(
        &self,
        node: &NodeHandle,
        name: &str,
        password: &str,
    ) -> Result<(), DirectoryError>;

    /// Fetch a record's attributes, `None` when no record has that name.
    async fn fetch_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
    ) -> Result<Option<RecordAttributes>, DirectoryError>;

    /// Find the record of `kind` whose generated GUID matches, returning its
    /// name and attributes.
    async fn find_by_guid(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        guid: &str,
    ) -> Result<Option<(String, RecordAttributes)>, DirectoryError>;

    /// Create a record. The backend owns secret handling: password
    /// attributes are stored out of band and never returned by fetches.
    async fn create_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
        attributes: RecordAttributes,
    ) -> Result<(), DirectoryError>;

    /// Delete a record by name.
    async fn delete_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
    ) -> Result<(), DirectoryError>;

    /// Apply one attribute modification to an existing record.
    async fn modify_attribute(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
        attribute: &str,
        op: AttributeOp,
    ) -> Result<(), DirectoryError>;

    /// Change a user's password after verifying the old one.
    async fn change_password(
        &self,
        node: &NodeHandle,
        name: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), DirectoryError>;

    /// Enumerate record names of a kind, in the backend's stable order.
    async fn list_record_names(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
    ) -> Result<Vec<String>, DirectoryError>;

    /// Directory nodes visible to the local machine, independent of any
    /// session or authentication state.
    fn local_nodes(&self) -> Vec<String>;
}
