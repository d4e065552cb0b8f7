//! Record value objects: users, groups, presets, record lists, and server
//! credentials.
//!
//! These are plain structured data with a versioned field set. Decoding
//! rejects unknown fields; semantic validation happens separately so callers
//! can distinguish a malformed payload from an incomplete record.

use crate::error::DirectoryError;
use crate::types::RecordKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Current schema version of every serialized record type.
pub const SCHEMA_VERSION: u32 = 1;

fn current_schema() -> u32 {
    SCHEMA_VERSION
}

/// Well-known attribute names used in raw directory records.
pub mod attr {
    pub const RECORD_NAME: &str = "RecordName";
    pub const FIRST_NAME: &str = "FirstName";
    pub const LAST_NAME: &str = "LastName";
    pub const REAL_NAME: &str = "RealName";
    pub const PASSWORD: &str = "Password";
    pub const UNIQUE_ID: &str = "UniqueID";
    pub const PRIMARY_GROUP_ID: &str = "PrimaryGroupID";
    pub const EMAIL_DOMAIN: &str = "EMailDomain";
    pub const KEYWORDS: &str = "Keywords";
    pub const PRESET_NAME: &str = "PresetName";
    pub const SHARE_POINT: &str = "SharePoint";
    pub const SHARE_PATH: &str = "SharePath";
    pub const NFS_HOME_DIRECTORY: &str = "NFSHomeDirectory";
    pub const HOME_DIRECTORY: &str = "HomeDirectory";
    pub const USER_SHELL: &str = "UserShell";
    pub const GENERATED_UID: &str = "GeneratedUID";
    pub const OWNER_GUID: &str = "OwnerGUID";
    pub const GROUP_MEMBERSHIP: &str = "GroupMembership";
    pub const MCX_FLAGS: &str = "MCXFlags";
    pub const MCX_SETTINGS: &str = "MCXSettings";
}

/// Multi-valued attribute map of a raw directory record.
///
/// Sorted keys keep fetched records deterministic across backends.
pub type RecordAttributes = BTreeMap<String, Vec<String>>;

/// Generate an uppercase UUID string for a new record's GUID.
pub(crate) fn generate_guid() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

fn first_value<'a>(attributes: &'a RecordAttributes, name: &str) -> &'a str {
    attributes
        .get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
        .unwrap_or("")
}

fn insert_value(attributes: &mut RecordAttributes, name: &str, value: &Option<String>) {
    if let Some(v) = value {
        attributes.insert(name.to_string(), vec![v.clone()]);
    }
}

fn optional(attributes: &RecordAttributes, name: &str) -> Option<String> {
    let v = first_value(attributes, name);
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// A raw record as fetched from a directory node.
///
/// Convenience accessors are pure derivations from the attribute map; they
/// never touch the network and return an empty string when the underlying
/// attribute is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub name: String,
    pub kind: RecordKind,
    pub attributes: RecordAttributes,
}

impl DirectoryRecord {
    pub fn new(kind: RecordKind, name: impl Into<String>, attributes: RecordAttributes) -> Self {
        Self {
            name: name.into(),
            kind,
            attributes,
        }
    }

    /// First value of the named attribute, empty string when absent.
    pub fn first(&self, attribute: &str) -> &str {
        first_value(&self.attributes, attribute)
    }

    pub fn first_name(&self) -> &str {
        self.first(attr::FIRST_NAME)
    }

    pub fn last_name(&self) -> &str {
        self.first(attr::LAST_NAME)
    }

    /// Real name if recorded, otherwise composed from first and last name.
    pub fn full_name(&self) -> String {
        let real = self.first(attr::REAL_NAME);
        if !real.is_empty() {
            return real.to_string();
        }
        let first = self.first_name();
        let last = self.last_name();
        match (first.is_empty(), last.is_empty()) {
            (false, false) => format!("{} {}", first, last),
            (false, true) => first.to_string(),
            (true, false) => last.to_string(),
            (true, true) => String::new(),
        }
    }

    pub fn uid(&self) -> &str {
        self.first(attr::UNIQUE_ID)
    }

    pub fn primary_group(&self) -> &str {
        self.first(attr::PRIMARY_GROUP_ID)
    }

    pub fn share_path(&self) -> &str {
        self.first(attr::SHARE_PATH)
    }

    pub fn shell(&self) -> &str {
        self.first(attr::USER_SHELL)
    }

    pub fn guid(&self) -> &str {
        self.first(attr::GENERATED_UID)
    }

    /// Home directory: the explicit attribute, else the NFS home, else the
    /// share path joined with the record name.
    pub fn home_directory(&self) -> String {
        let explicit = self.first(attr::HOME_DIRECTORY);
        if !explicit.is_empty() {
            return explicit.to_string();
        }
        let nfs = self.first(attr::NFS_HOME_DIRECTORY);
        if !nfs.is_empty() {
            return nfs.to_string();
        }
        let share = self.share_path();
        if !share.is_empty() {
            return format!("{}/{}", share.trim_end_matches('/'), self.name);
        }
        String::new()
    }

    /// Membership list for group records, in stored order.
    pub fn members(&self) -> Vec<String> {
        self.attributes
            .get(attr::GROUP_MEMBERSHIP)
            .cloned()
            .unwrap_or_default()
    }
}

/// A user account record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserRecord {
    #[serde(default = "current_schema")]
    pub schema: u32,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            user_name: String::new(),
            first_name: None,
            last_name: None,
            password: None,
            uid: None,
            primary_group: None,
            email_domain: None,
            keyword: None,
            preset_name: None,
            share_point: None,
            share_path: None,
            nfs_path: None,
            home_directory: None,
            shell: None,
        }
    }
}

fn fill(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        if let Some(v) = value {
            *slot = Some(v.clone());
        }
    }
}

impl UserRecord {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Self::default()
        }
    }

    /// Copy preset fields under this record's explicit fields. Fields the
    /// user already specifies are left untouched.
    pub fn apply_preset(&mut self, preset: &PresetRecord) {
        fill(&mut self.shell, &preset.shell);
        fill(&mut self.nfs_path, &preset.nfs_path);
        fill(&mut self.share_path, &preset.share_path);
        fill(&mut self.share_point, &preset.share_point);
        fill(&mut self.primary_group, &preset.primary_group);
        if self.preset_name.is_none() {
            self.preset_name = Some(preset.preset_name.clone());
        }
    }

    /// Creation requirements: a user name plus at least one of password and
    /// uid. Also rejects payloads from an unsupported schema version.
    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.schema != SCHEMA_VERSION {
            return Err(DirectoryError::IncompleteUserObject(format!(
                "unsupported schema version {}",
                self.schema
            )));
        }
        if self.user_name.trim().is_empty() {
            return Err(DirectoryError::IncompleteUserObject(
                "missing user name".to_string(),
            ));
        }
        if self.password.is_none() && self.uid.is_none() {
            return Err(DirectoryError::IncompleteUserObject(
                "either a password or a uid is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_attributes(&self) -> RecordAttributes {
        let mut attrs = RecordAttributes::new();
        attrs.insert(
            attr::RECORD_NAME.to_string(),
            vec![self.user_name.clone()],
        );
        insert_value(&mut attrs, attr::FIRST_NAME, &self.first_name);
        insert_value(&mut attrs, attr::LAST_NAME, &self.last_name);
        insert_value(&mut attrs, attr::PASSWORD, &self.password);
        insert_value(&mut attrs, attr::UNIQUE_ID, &self.uid);
        insert_value(&mut attrs, attr::PRIMARY_GROUP_ID, &self.primary_group);
        insert_value(&mut attrs, attr::EMAIL_DOMAIN, &self.email_domain);
        insert_value(&mut attrs, attr::KEYWORDS, &self.keyword);
        insert_value(&mut attrs, attr::PRESET_NAME, &self.preset_name);
        insert_value(&mut attrs, attr::SHARE_POINT, &self.share_point);
        insert_value(&mut attrs, attr::SHARE_PATH, &self.share_path);
        insert_value(&mut attrs, attr::NFS_HOME_DIRECTORY, &self.nfs_path);
        insert_value(&mut attrs, attr::HOME_DIRECTORY, &self.home_directory);
        insert_value(&mut attrs, attr::USER_SHELL, &self.shell);
        attrs
    }

    pub fn from_attributes(name: impl Into<String>, attributes: &RecordAttributes) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            user_name: name.into(),
            first_name: optional(attributes, attr::FIRST_NAME),
            last_name: optional(attributes, attr::LAST_NAME),
            password: optional(attributes, attr::PASSWORD),
            uid: optional(attributes, attr::UNIQUE_ID),
            primary_group: optional(attributes, attr::PRIMARY_GROUP_ID),
            email_domain: optional(attributes, attr::EMAIL_DOMAIN),
            keyword: optional(attributes, attr::KEYWORDS),
            preset_name: optional(attributes, attr::PRESET_NAME),
            share_point: optional(attributes, attr::SHARE_POINT),
            share_path: optional(attributes, attr::SHARE_PATH),
            nfs_path: optional(attributes, attr::NFS_HOME_DIRECTORY),
            home_directory: optional(attributes, attr::HOME_DIRECTORY),
            shell: optional(attributes, attr::USER_SHELL),
        }
    }
}

/// A group record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupRecord {
    #[serde(default = "current_schema")]
    pub schema: u32,
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl Default for GroupRecord {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            group_name: String::new(),
            full_name: None,
            guid: None,
            owner: None,
        }
    }
}

impl GroupRecord {
    pub fn new(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.schema != SCHEMA_VERSION {
            return Err(DirectoryError::IncompleteGroupObject(format!(
                "unsupported schema version {}",
                self.schema
            )));
        }
        if self.group_name.trim().is_empty() {
            return Err(DirectoryError::IncompleteGroupObject(
                "missing group name".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_attributes(&self) -> RecordAttributes {
        let mut attrs = RecordAttributes::new();
        attrs.insert(
            attr::RECORD_NAME.to_string(),
            vec![self.group_name.clone()],
        );
        insert_value(&mut attrs, attr::REAL_NAME, &self.full_name);
        insert_value(&mut attrs, attr::GENERATED_UID, &self.guid);
        insert_value(&mut attrs, attr::OWNER_GUID, &self.owner);
        attrs
    }

    pub fn from_attributes(name: impl Into<String>, attributes: &RecordAttributes) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            group_name: name.into(),
            full_name: optional(attributes, attr::REAL_NAME),
            guid: optional(attributes, attr::GENERATED_UID),
            owner: optional(attributes, attr::OWNER_GUID),
        }
    }
}

/// A provisioning preset: a template whose fields seed new user records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresetRecord {
    #[serde(default = "current_schema")]
    pub schema: u32,
    pub preset_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcx_flags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcx_settings: Option<String>,
}

impl Default for PresetRecord {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            preset_name: String::new(),
            shell: None,
            nfs_path: None,
            share_path: None,
            share_point: None,
            primary_group: None,
            mcx_flags: None,
            mcx_settings: None,
        }
    }
}

impl PresetRecord {
    pub fn new(preset_name: impl Into<String>) -> Self {
        Self {
            preset_name: preset_name.into(),
            ..Self::default()
        }
    }

    pub fn to_attributes(&self) -> RecordAttributes {
        let mut attrs = RecordAttributes::new();
        attrs.insert(
            attr::RECORD_NAME.to_string(),
            vec![self.preset_name.clone()],
        );
        insert_value(&mut attrs, attr::USER_SHELL, &self.shell);
        insert_value(&mut attrs, attr::NFS_HOME_DIRECTORY, &self.nfs_path);
        insert_value(&mut attrs, attr::SHARE_PATH, &self.share_path);
        insert_value(&mut attrs, attr::SHARE_POINT, &self.share_point);
        insert_value(&mut attrs, attr::PRIMARY_GROUP_ID, &self.primary_group);
        insert_value(&mut attrs, attr::MCX_FLAGS, &self.mcx_flags);
        insert_value(&mut attrs, attr::MCX_SETTINGS, &self.mcx_settings);
        attrs
    }

    pub fn from_attributes(name: impl Into<String>, attributes: &RecordAttributes) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            preset_name: name.into(),
            shell: optional(attributes, attr::USER_SHELL),
            nfs_path: optional(attributes, attr::NFS_HOME_DIRECTORY),
            share_path: optional(attributes, attr::SHARE_PATH),
            share_point: optional(attributes, attr::SHARE_POINT),
            primary_group: optional(attributes, attr::PRIMARY_GROUP_ID),
            mcx_flags: optional(attributes, attr::MCX_FLAGS),
            mcx_settings: optional(attributes, attr::MCX_SETTINGS),
        }
    }
}

/// An ordered batch of records plus an exclusion filter, submitted as one
/// unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordList {
    #[serde(default = "current_schema")]
    pub schema: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupRecord>,
    /// Record names excluded from the batch, matched exactly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
}

impl Default for RecordList {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            users: Vec::new(),
            groups: Vec::new(),
            filter: Vec::new(),
        }
    }
}

impl RecordList {
    pub fn from_users(users: Vec<UserRecord>) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            users,
            groups: Vec::new(),
            filter: Vec::new(),
        }
    }

    pub fn from_groups(groups: Vec<GroupRecord>) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            groups,
            users: Vec::new(),
            filter: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Vec<String>) -> Self {
        self.filter = filter;
        self
    }

    /// Users in batch order with filtered names excluded.
    pub fn effective_users(&self) -> Vec<&UserRecord> {
        self.users
            .iter()
            .filter(|u| !self.filter.iter().any(|f| f == &u.user_name))
            .collect()
    }

    /// Groups in batch order with filtered names excluded.
    pub fn effective_groups(&self) -> Vec<&GroupRecord> {
        self.groups
            .iter()
            .filter(|g| !self.filter.iter().any(|f| f == &g.group_name))
            .collect()
    }
}

/// Connection parameters and administrator credentials for a directory
/// server, suitable for handing a session across a process boundary.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialSet {
    #[serde(default = "current_schema")]
    pub schema: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub domain: crate::types::Domain,
    pub admin_name: String,
    pub admin_password: String,
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("schema", &self.schema)
            .field("address", &self.address)
            .field("domain", &self.domain)
            .field("admin_name", &self.admin_name)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}
