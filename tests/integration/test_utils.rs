//! Shared test utilities for integration tests
//!
//! Seeded directories and authenticated managers used across the suite, a
//! backend wrapper that lets a test run an action at an exact position in a
//! batch, and environment variable scoping for configuration tests.

use async_trait::async_trait;
use futures::future::BoxFuture;
use muster::backend::{AttributeOp, DirectoryBackend, MemoryDirectory};
use muster::error::DirectoryError;
use muster::manager::DirectoryManager;
use muster::records::{GroupRecord, PresetRecord, RecordAttributes, UserRecord};
use muster::types::{Domain, NodeHandle, RecordKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ADMIN_NAME: &str = "diradmin";
pub const ADMIN_PASSWORD: &str = "trustno1";

/// A user record that passes creation validation.
pub fn user(name: &str) -> UserRecord {
    let mut user = UserRecord::new(name);
    user.uid = Some("1000".to_string());
    user
}

/// A directory with an administrator, an empty `staff` group, and a `lab`
/// preset whose shell is `/bin/bash`.
pub fn seeded_directory() -> Arc<MemoryDirectory> {
    let dir = MemoryDirectory::new().with_admin(ADMIN_NAME, ADMIN_PASSWORD);
    let mut preset = PresetRecord::new("lab");
    preset.shell = Some("/bin/bash".to_string());
    preset.primary_group = Some("20".to_string());
    dir.seed_preset(&preset);
    dir.seed_group(&GroupRecord::new("staff"), &[]);
    Arc::new(dir)
}

/// A manager over `backend`, authenticated as the test administrator.
pub async fn authed_manager_over(backend: Arc<dyn DirectoryBackend>) -> DirectoryManager {
    let manager = DirectoryManager::with_defaults(backend);
    manager
        .authenticate(ADMIN_NAME, ADMIN_PASSWORD)
        .await
        .unwrap();
    manager
}

/// An authenticated manager directly over an in-memory directory.
pub async fn authed_manager(dir: Arc<MemoryDirectory>) -> DirectoryManager {
    authed_manager_over(dir).await
}

/// Hook run after each successful mutation, with the mutation count so far.
pub type MutationHook = Arc<dyn Fn(usize) -> BoxFuture<'static, ()> + Send + Sync>;

/// Backend wrapper that counts successful mutations and awaits a hook after
/// each one. Batches process items one at a time, so a hook that cancels or
/// refreshes at mutation `k` takes effect at a known item boundary.
pub struct TappedDirectory {
    inner: Arc<MemoryDirectory>,
    mutations: AtomicUsize,
    hook: Mutex<Option<MutationHook>>,
}

impl TappedDirectory {
    pub fn new(inner: Arc<MemoryDirectory>) -> Self {
        Self {
            inner,
            mutations: AtomicUsize::new(0),
            hook: Mutex::new(None),
        }
    }

    pub fn set_hook(&self, hook: MutationHook) {
        *self.hook.lock().unwrap() = Some(hook);
    }

    /// Drop the hook. Hooks usually capture the manager, which holds this
    /// backend; clearing breaks that cycle once the batch is done.
    pub fn clear_hook(&self) {
        *self.hook.lock().unwrap() = None;
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    async fn after_mutation(&self) {
        let count = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(count).await;
        }
    }
}

#[async_trait]
impl DirectoryBackend for TappedDirectory {
    async fn open_node(
        &self,
        domain: Domain,
        server: Option<&str>,
    ) -> Result<NodeHandle, DirectoryError> {
        self.inner.open_node(domain, server).await
    }

    async fn authenticate(
        &self,
        node: &NodeHandle,
        name: &str,
        password: &str,
    ) -> Result<(), DirectoryError> {
        self.inner.authenticate(node, name, password).await
    }

    async fn fetch_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
    ) -> Result<Option<RecordAttributes>, DirectoryError> {
        self.inner.fetch_record(node, kind, name).await
    }

    async fn find_by_guid(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        guid: &str,
    ) -> Result<Option<(String, RecordAttributes)>, DirectoryError> {
        self.inner.find_by_guid(node, kind, guid).await
    }

    async fn create_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
        attributes: RecordAttributes,
    ) -> Result<(), DirectoryError> {
        self.inner
            .create_record(node, kind, name, attributes)
            .await?;
        self.after_mutation().await;
        Ok(())
    }

    async fn delete_record(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
        name: &str,
    ) -> Result<(), DirectoryError> {
        self.inner.delete_record(node, kind, name).await?;
        self.after_mutation().await;
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
        self.inner
            .modify_attribute(node, kind, name, attribute, op)
            .await?;
        self.after_mutation().await;
        Ok(())
    }

    async fn change_password(
        &self,
        node: &NodeHandle,
        name: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), DirectoryError> {
        self.inner
            .change_password(node, name, old_password, new_password)
            .await?;
        self.after_mutation().await;
        Ok(())
    }

    async fn list_record_names(
        &self,
        node: &NodeHandle,
        kind: RecordKind,
    ) -> Result<Vec<String>, DirectoryError> {
        self.inner.list_record_names(node, kind).await
    }

    fn local_nodes(&self) -> Vec<String> {
        self.inner.local_nodes()
    }
}

/// Global mutex to serialize environment variable access across all tests
/// This prevents race conditions when tests run in parallel
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Run `f` with the given environment variables set (`Some`) or removed
/// (`None`), restoring the previous values afterwards.
pub fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

    let previous: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(name, _)| (name.to_string(), std::env::var(name).ok()))
        .collect();

    for (name, value) in vars {
        match value {
            Some(v) => std::env::set_var(name, v),
            None => std::env::remove_var(name),
        }
    }

    let result = f();

    for (name, value) in previous {
        match value {
            Some(v) => std::env::set_var(&name, v),
            None => std::env::remove_var(&name),
        }
    }

    result
}
