//! Typed record fetch and lookup against an authenticated node.

use crate::backend::DirectoryBackend;
use crate::error::DirectoryError;
use crate::records::{DirectoryRecord, GroupRecord, PresetRecord, UserRecord};
use crate::session::NodeSession;
use crate::types::RecordKind;
use std::sync::Arc;
use tracing::debug;

/// Read-side access to directory records.
///
/// Every operation resolves the session's node first and fails fast with a
/// session error when the session is not authenticated.
pub struct RecordStore {
    backend: Arc<dyn DirectoryBackend>,
    session: Arc<NodeSession>,
}

impl RecordStore {
    pub fn new(backend: Arc<dyn DirectoryBackend>, session: Arc<NodeSession>) -> Self {
        Self { backend, session }
    }

    /// Fetch a raw record of any kind.
    pub async fn get_record(
        &self,
        kind: RecordKind,
        name: &str,
    ) -> Result<DirectoryRecord, DirectoryError> {
        let node = self.session.node()?;
        let attrs = self
            .backend
            .fetch_record(&node, kind, name)
            .await?
            .ok_or_else(|| DirectoryError::no_record(kind, name))?;
        Ok(DirectoryRecord::new(kind, name, attrs))
    }

    /// Whether a record of `kind` with `name` exists.
    pub async fn record_exists(
        &self,
        kind: RecordKind,
        name: &str,
    ) -> Result<bool, DirectoryError> {
        let node = self.session.node()?;
        Ok(self.backend.fetch_record(&node, kind, name).await?.is_some())
    }

    pub async fn get_user(&self, name: &str) -> Result<UserRecord, DirectoryError> {
        let record = self.get_record(RecordKind::User, name).await?;
        Ok(UserRecord::from_attributes(name, &record.attributes))
    }

    pub async fn get_group(&self, name: &str) -> Result<GroupRecord, DirectoryError> {
        let record = self.get_record(RecordKind::Group, name).await?;
        Ok(GroupRecord::from_attributes(name, &record.attributes))
    }

    pub async fn get_preset(&self, name: &str) -> Result<PresetRecord, DirectoryError> {
        let record = self.get_record(RecordKind::Preset, name).await?;
        Ok(PresetRecord::from_attributes(name, &record.attributes))
    }

    /// Fetch a preset as a provisioning template. Same lookup as
    /// `get_preset`; named for the administrative tooling vocabulary.
    pub async fn settings_for_preset(&self, name: &str) -> Result<PresetRecord, DirectoryError> {
        self.get_preset(name).await
    }

    /// Find the record of `kind` whose generated GUID matches.
    pub async fn get_by_guid(
        &self,
        guid: &str,
        kind: RecordKind,
    ) -> Result<DirectoryRecord, DirectoryError> {
        let node = self.session.node()?;
        let found = self.backend.find_by_guid(&node, kind, guid).await?;
        match found {
            Some((name, attrs)) => Ok(DirectoryRecord::new(kind, name, attrs)),
            None => Err(DirectoryError::NoMatchingRecord {
                guid: guid.to_string(),
                kind,
            }),
        }
    }

    /// Member user names of a group, in stored order. A memberless group
    /// yields an empty list, not an error.
    pub async fn group_members(&self, group: &str) -> Result<Vec<String>, DirectoryError> {
        let record = self.get_record(RecordKind::Group, group).await?;
        let members = record.members();
        debug!(group = %group, members = members.len(), "read group membership");
        Ok(members)
    }

    /// Whether `user` is a member of `group`. Both records must exist.
    pub async fn is_member(&self, user: &str, group: &str) -> Result<bool, DirectoryError> {
        if !self.record_exists(RecordKind::User, user).await? {
            return Err(DirectoryError::NoUserRecord(user.to_string()));
        }
        let members = self.group_members(group).await?;
        Ok(members.iter().any(|m| m == user))
    }
}
