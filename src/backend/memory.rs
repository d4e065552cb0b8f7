//! In-memory directory backend.
//!
//! A complete, thread-safe directory held in process, used for local
//! deployments and as the integration-test double. Node handles carry
//! generations: re-opening a node bumps the generation and supersedes
//! outstanding handles, the same way a reconnect invalidates a remote
//! backend's connection objects.

use super::{AttributeOp, DirectoryBackend};
use crate::error::DirectoryError;
use crate::records::{attr, GroupRecord, PresetRecord, RecordAttributes, UserRecord};
use crate::types::{Domain, NodeHandle, RecordKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Node name used for the `Local` domain.
pub const LOCAL_NODE: &str = "/Local/Default";

/// Node name used for the `Default` (search path) domain.
pub const SEARCH_NODE: &str = "/Search";

#[derive(Debug, Clone, Copy)]
struct NodeEntry {
    id: u64,
    generation: u64,
}

#[derive(Default)]
struct MemoryState {
    nodes: HashMap<(Domain, String), NodeEntry>,
    authenticated: HashSet<(u64, u64)>,
    records: HashMap<RecordKind, BTreeMap<String, RecordAttributes>>,
    passwords: HashMap<String, String>,
}

/// In-process directory service.
pub struct MemoryDirectory {
    state: RwLock<MemoryState>,
    admins: HashMap<String, String>,
    proxy_address: Option<String>,
    directory_node: Option<String>,
    local_nodes: Vec<String>,
    offline: AtomicBool,
    next_node_id: AtomicU64,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            admins: HashMap::new(),
            proxy_address: None,
            directory_node: None,
            local_nodes: vec![LOCAL_NODE.to_string(), "/BSD/local".to_string()],
            offline: AtomicBool::new(false),
            next_node_id: AtomicU64::new(1),
        }
    }

    /// Register an administrator account accepted by `authenticate`.
    pub fn with_admin(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.admins.insert(name.into(), password.into());
        self
    }

    /// Address this instance answers proxy connections on. When set, proxy
    /// opens against any other address fail to connect.
    pub fn with_proxy_address(mut self, address: impl Into<String>) -> Self {
        self.proxy_address = Some(address.into());
        self
    }

    /// Node name served for the `DirectoryService` domain when the caller
    /// does not name one.
    pub fn with_directory_node(mut self, node: impl Into<String>) -> Self {
        let node = node.into();
        self.local_nodes.push(node.clone());
        self.directory_node = Some(node);
        self
    }

    /// Simulate losing the network: every subsequent operation fails with
    /// `CouldNotConnectToNode` until the flag is cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert a user record directly, bypassing the node surface. The
    /// password moves to the out-of-band secret table.
    pub fn seed_user(&self, user: &UserRecord) {
        let mut attrs = user.to_attributes();
        let password = attrs
            .remove(attr::PASSWORD)
            .and_then(|mut v| if v.is_empty() { None } else { Some(v.remove(0)) });
        let mut state = self.state.write();
        if let Some(p) = password {
            state.passwords.insert(user.user_name.clone(), p);
        }
        state
            .records
            .entry(RecordKind::User)
            .or_default()
            .insert(user.user_name.clone(), attrs);
    }

    /// Insert a group record directly, with an initial membership list.
    pub fn seed_group(&self, group: &GroupRecord, members: &[&str]) {
        let mut attrs = group.to_attributes();
        if !members.is_empty() {
            attrs.insert(
                attr::GROUP_MEMBERSHIP.to_string(),
                members.iter().map(|m| m.to_string()).collect(),
            );
        }
        self.state
            .write()
            .records
            .entry(RecordKind::Group)
            .or_default()
            .insert(group.group_name.clone(), attrs);
    }

    /// Insert a preset record directly.
    pub fn seed_preset(&self, preset: &PresetRecord) {
        self.state
            .write()
            .records
            .entry(RecordKind::Preset)
            .or_default()
            .insert(preset.preset_name.clone(), preset.to_attributes());
    }

    fn check_online(&self, node_name: &str) -> Result<(), DirectoryError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(DirectoryError::CouldNotConnectToNode(node_name.to_string()))
        } else {
            Ok(())
        }
    }

    fn check_handle(&self, state: &MemoryState, node: &NodeHandle) -> Result<(), DirectoryError> {
        let entry = state
            .nodes
            .get(&(node.domain(), node.name().to_string()))
            .ok_or_else(|| DirectoryError::session(format!("unknown node {}", node.name())))?;
        if entry.id != node.id() || entry.generation != node.generation() {
            return Err(DirectoryError::session(format!(
                "node handle {} superseded",
                node
            )));
        }
        Ok(())
    }

    fn check_authenticated(
        &self,
        state: &MemoryState,
        node: &NodeHandle,
    ) -> Result<(), DirectoryError> {
        self.check_handle(state, node)?;
        if !state
            .authenticated
            .contains(&(node.id(), node.generation()))
        {
            return Err(DirectoryError::session(format!(
                "node {} is not authenticated",
                node.name()
            )));
        }
        Ok(())
    }

    fn resolve_name(
        &self,
        domain: Domain,
        server: Option<&str>,
    ) -> Result<String, DirectoryError> {
        match domain {
            Domain::Local => Ok(LOCAL_NODE.to_string()),
            Domain::Default => Ok(SEARCH_NODE.to_string()),
            Domain::DirectoryService => {
                let name = server
                    .map(str::to_string)
                    .or_else(|| self.directory_node.clone())
                    .ok_or(DirectoryError::NoDirectoryNode(domain))?;
                if let Some(expected) = &self.directory_node {
                    if &name != expected {
                        return Err(DirectoryError::CouldNotConnectToNode(name));
                    }
                }
                Ok(name)
            }
            Domain::ProxyDirectoryServer => {
                let address = server
                    .map(str::to_string)
                    .ok_or(DirectoryError::NoDirectoryNode(domain))?;
                if let Some(expected) = &self.proxy_address {
                    if &address != expected {
                        return Err(DirectoryError::CouldNotConnectToNode(address));
                    }
                }
                Ok(address)
            }
        }
    }
}

#[async_trait]
impl DirectoryBackend for MemoryDirectory {
    async fn open_node(
        &self,
        domain: Domain,
        server: Option<&str>,
    ) -> Result<NodeHandle, DirectoryError> {
        let name = self.resolve_name(domain, server)?;
        self.check_online(&name)?;

        let mut state = self.state.write();
        let entry = match state.nodes.get(&(domain, name.clone())).copied() {
            Some(mut existing) => {
                existing.generation += 1;
                existing
            }
            None => NodeEntry {
                id: self.next_node_id.fetch_add(1, Ordering::SeqCst),
                generation: 1,
            },
        };
        state.nodes.insert((domain, name.clone()), entry);
        Ok(NodeHandle::new(entry.id, entry.generation, domain, name))
    }

    async fn authenticate(
        &self,
        node: &NodeHandle,
        name: &str,
        password: &str,
    ) -> Result<(), DirectoryError> {
        self.check_online(node.name())?;
        let mut state = self.state.write();
        self.check_handle(&state, node)?;

        let known = match self.admins.get(name) {
            Some(stored) => Some(stored.clone()),
            None => state.passwords.get(name).cloned(),
        };
        match known {
            Some(stored) if stored == password => {
                state.authenticated.insert((node.id(), node.generation()));
                Ok(())
            }
            Some(_) => Err(DirectoryError::WrongPassword),
            None => Err(DirectoryError::InvalidCredentials(name.to_string())),
        }
    }

    async fn fetch_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
    ) -> Result<Option<RecordAttributes>, DirectoryError> {
        self.check_online(node.name())?;
        let state = self.state.read();
        self.check_handle(&state, node)?;
        Ok(state
            .records
            .get(&kind)
            .and_then(|table| table.get(name))
            .cloned())
    }

    async fn find_by_guid(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        guid: &str,
    ) -> Result<Option<(String, RecordAttributes)>, DirectoryError> {
        self.check_online(node.name())?;
        let state = self.state.read();
        self.check_handle(&state, node)?;
        let found = state.records.get(&kind).and_then(|table| {
            table
                .iter()
                .find(|(_, attrs)| {
                    attrs
                        .get(attr::GENERATED_UID)
                        .and_then(|v| v.first())
                        .map(|v| v == guid)
                        .unwrap_or(false)
                })
                .map(|(name, attrs)| (name.clone(), attrs.clone()))
        });
        Ok(found)
    }

    async fn create_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
        mut attributes: RecordAttributes,
    ) -> Result<(), DirectoryError> {
        self.check_online(node.name())?;
        let mut state = self.state.write();
        self.check_authenticated(&state, node)?;

        let exists = state
            .records
            .get(&kind)
            .map(|table| table.contains_key(name))
            .unwrap_or(false);
        if exists {
            // Presets are templates; recreating one replaces it.
            match kind {
                RecordKind::User => {
                    return Err(DirectoryError::UserAlreadyExists(name.to_string()))
                }
                RecordKind::Group => {
                    return Err(DirectoryError::CouldNotAddGroup {
                        name: name.to_string(),
                        detail: "group already exists".to_string(),
                    })
                }
                RecordKind::Preset => {}
            }
        }

        if kind == RecordKind::User {
            let password = attributes
                .remove(attr::PASSWORD)
                .and_then(|mut v| if v.is_empty() { None } else { Some(v.remove(0)) });
            if let Some(p) = password {
                state.passwords.insert(name.to_string(), p);
            }
        }
        state
            .records
            .entry(kind)
            .or_default()
            .insert(name.to_string(), attributes);
        Ok(())
    }

    async fn delete_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
    ) -> Result<(), DirectoryError> {
        self.check_online(node.name())?;
        let mut state = self.state.write();
        self.check_authenticated(&state, node)?;

        let removed = state
            .records
            .get_mut(&kind)
            .and_then(|table| table.remove(name));
        if removed.is_none() {
            return Err(DirectoryError::no_record(kind, name));
        }
        if kind == RecordKind::User {
            state.passwords.remove(name);
        }
        Ok(())
    }

    async fn modify_attribute(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
        attribute: &str,
        op: AttributeOp,
    ) -> Result<(), DirectoryError> {
        self.check_online(node.name())?;
        let mut state = self.state.write();
        self.check_authenticated(&state, node)?;

        let table = state.records.entry(kind).or_default();
        let record = table
            .get_mut(name)
            .ok_or_else(|| DirectoryError::no_record(kind, name))?;

        match op {
            AttributeOp::Append(value) => {
                record.entry(attribute.to_string()).or_default().push(value);
            }
            AttributeOp::RemoveValue(value) => {
                if let Some(values) = record.get_mut(attribute) {
                    values.retain(|v| v != &value);
                    if values.is_empty() {
                        record.remove(attribute);
                    }
                }
            }
            AttributeOp::Replace(values) => {
                if values.is_empty() {
                    record.remove(attribute);
                } else {
                    record.insert(attribute.to_string(), values);
                }
            }
            AttributeOp::Clear => {
                record.remove(attribute);
            }
        }
        Ok(())
    }

    async fn change_password(
        &self,
        node: &NodeHandle,
        name: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), DirectoryError> {
        self.check_online(node.name())?;
        let mut state = self.state.write();
        self.check_handle(&state, node)?;

        let exists = state
            .records
            .get(&RecordKind::User)
            .map(|table| table.contains_key(name))
            .unwrap_or(false);
        if !exists {
            return Err(DirectoryError::NoUserRecord(name.to_string()));
        }
        let stored = state.passwords.get(name).cloned().unwrap_or_default();
        if stored != old_password {
            return Err(DirectoryError::WrongPassword);
        }
        state
            .passwords
            .insert(name.to_string(), new_password.to_string());
        Ok(())
    }

    async fn list_record_names(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
    ) -> Result<Vec<String>, DirectoryError> {
        self.check_online(node.name())?;
        let state = self.state.read();
        self.check_handle(&state, node)?;
        Ok(state
            .records
            .get(&kind)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn local_nodes(&self) -> Vec<String> {
        self.local_nodes.clone()
    }
}
