//! Record editor: single-record mutations and the batch engine.
//!
//! Batches run on the runtime, report per-item progress through the event
//! sink, and honor cooperative cancellation at item boundaries. One add-kind
//! and one remove-kind batch run at a time; a second submission of the same
//! kind queues behind the first.

use crate::backend::{AttributeOp, DirectoryBackend};
use crate::config::BatchConfig;
use crate::error::DirectoryError;
use crate::events::{DirectoryEvent, EventSink, OpId};
use crate::records::{attr, generate_guid, GroupRecord, PresetRecord, RecordList, UserRecord};
use crate::session::NodeSession;
use crate::store::RecordStore;
use crate::types::{NodeHandle, RecordKind};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag.
///
/// Single writer, single reader per batch kind. A request takes effect at
/// the next item boundary; the flag is reset to proceed when the next batch
/// of the same kind starts, regardless of how the previous one ended.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Which of the two batch lanes an operation runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Import,
    Removal,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Import => "import",
            BatchKind::Removal => "removal",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Ran to its natural end, possibly with per-item errors.
    Completed,
    /// Stopped at an item boundary by a cancellation request.
    Cancelled,
}

/// Final report of a batch, delivered exactly once through the completion
/// callback.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub kind: BatchKind,
    pub outcome: BatchOutcome,
    /// Items attempted (successfully or not) before the batch ended.
    pub processed: usize,
    /// Items the batch set out to process, after filter exclusion.
    pub total: usize,
    /// Most recent per-item or fatal error, if any.
    pub last_error: Option<DirectoryError>,
}

impl BatchReport {
    pub fn error(&self) -> Option<&DirectoryError> {
        self.last_error.as_ref()
    }

    pub fn skipped(&self) -> usize {
        self.total - self.processed
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == BatchOutcome::Cancelled
    }
}

/// One unit of work inside a batch.
#[derive(Debug, Clone)]
enum BatchItem {
    AddUser(UserRecord),
    AddGroup(GroupRecord),
    RemoveUser(String),
    RemoveGroup(String),
    AddMember { user: String, group: String },
    RemoveMember { user: String, group: String },
}

impl BatchItem {
    fn identifier(&self) -> &str {
        match self {
            BatchItem::AddUser(user) => &user.user_name,
            BatchItem::AddGroup(group) => &group.group_name,
            BatchItem::RemoveUser(name) | BatchItem::RemoveGroup(name) => name,
            BatchItem::AddMember { user, .. } | BatchItem::RemoveMember { user, .. } => user,
        }
    }

    /// Progress event for this item. Adds and membership adds report through
    /// the add channel; removals of any kind report through the removal
    /// channel, carrying the group name for membership removals.
    fn progress_event(&self, op: OpId, percent: f64) -> DirectoryEvent {
        match self {
            BatchItem::AddUser(_) | BatchItem::AddGroup(_) | BatchItem::AddMember { .. } => {
                DirectoryEvent::AddProgress {
                    op,
                    name: self.identifier().to_string(),
                    percent,
                }
            }
            BatchItem::RemoveUser(name) | BatchItem::RemoveGroup(name) => {
                DirectoryEvent::RemovalProgress {
                    op,
                    user: name.clone(),
                    group: None,
                    percent,
                }
            }
            BatchItem::RemoveMember { user, group } => DirectoryEvent::RemovalProgress {
                op,
                user: user.clone(),
                group: Some(group.clone()),
                percent,
            },
        }
    }
}

struct EditorCore {
    backend: Arc<dyn DirectoryBackend>,
    session: Arc<NodeSession>,
    store: RecordStore,
}

// Core operations take the node handle explicitly. Single ops resolve the
// session's current handle per call; a batch captures one handle at start,
// so a node refresh mid-batch supersedes it and the batch stops.
impl EditorCore {
    async fn add_user(
        &self,
        node: &NodeHandle,
        user: &UserRecord,
        preset: Option<&str>,
    ) -> Result<(), DirectoryError> {
        let resolved = match preset {
            Some(name) => Some(self.store.get_preset(name).await?),
            None => None,
        };
        self.add_user_resolved(node, user, resolved.as_ref()).await
    }

    /// Add a user with an already-fetched preset. The explicit preset wins;
    /// without one, the record's own `preset_name` is fetched.
    async fn add_user_resolved(
        &self,
        node: &NodeHandle,
        user: &UserRecord,
        preset: Option<&PresetRecord>,
    ) -> Result<(), DirectoryError> {
        let fetched: Option<PresetRecord> = if preset.is_none() {
            match &user.preset_name {
                Some(name) => Some(self.store.get_preset(name).await?),
                None => None,
            }
        } else {
            None
        };
        let preset = preset.or(fetched.as_ref());

        let mut record = user.clone();
        if let Some(p) = preset {
            record.apply_preset(p);
        }
        record.validate()?;

        if self
            .backend
            .fetch_record(node, RecordKind::User, &record.user_name)
            .await?
            .is_some()
        {
            return Err(DirectoryError::UserAlreadyExists(record.user_name.clone()));
        }

        let mut attrs = record.to_attributes();
        if let Some(p) = preset {
            if let Some(flags) = &p.mcx_flags {
                attrs.insert(attr::MCX_FLAGS.to_string(), vec![flags.clone()]);
            }
            if let Some(settings) = &p.mcx_settings {
                attrs.insert(attr::MCX_SETTINGS.to_string(), vec![settings.clone()]);
            }
        }

        self.backend
            .create_record(node, RecordKind::User, &record.user_name, attrs)
            .await?;
        info!(user = %record.user_name, preset = ?record.preset_name, "added user record");
        Ok(())
    }

    async fn add_group(&self, node: &NodeHandle, group: &GroupRecord) -> Result<(), DirectoryError> {
        let mut record = group.clone();
        record.validate()?;
        if record.guid.is_none() {
            record.guid = Some(generate_guid());
        }
        self.backend
            .create_record(
                node,
                RecordKind::Group,
                &record.group_name,
                record.to_attributes(),
            )
            .await?;
        info!(group = %record.group_name, "added group record");
        Ok(())
    }

    async fn remove_user(&self, node: &NodeHandle, name: &str) -> Result<(), DirectoryError> {
        self.backend
            .delete_record(node, RecordKind::User, name)
            .await?;
        info!(user = %name, "removed user record");
        Ok(())
    }

    async fn remove_group(&self, node: &NodeHandle, name: &str) -> Result<(), DirectoryError> {
        self.backend
            .delete_record(node, RecordKind::Group, name)
            .await?;
        info!(group = %name, "removed group record");
        Ok(())
    }

    async fn user_exists(&self, node: &NodeHandle, user: &str) -> Result<bool, DirectoryError> {
        Ok(self
            .backend
            .fetch_record(node, RecordKind::User, user)
            .await?
            .is_some())
    }

    async fn group_membership(
        &self,
        node: &NodeHandle,
        group: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let attrs = self
            .backend
            .fetch_record(node, RecordKind::Group, group)
            .await?
            .ok_or_else(|| DirectoryError::NoGroupRecord(group.to_string()))?;
        Ok(attrs.get(attr::GROUP_MEMBERSHIP).cloned().unwrap_or_default())
    }

    async fn add_user_to_group(
        &self,
        node: &NodeHandle,
        user: &str,
        group: &str,
    ) -> Result<(), DirectoryError> {
        if !self.user_exists(node, user).await? {
            return Err(DirectoryError::NoUserRecord(user.to_string()));
        }
        let members = self.group_membership(node, group).await?;
        if members.iter().any(|m| m == user) {
            debug!(user = %user, group = %group, "membership add skipped: already a member");
            return Ok(());
        }
        self.backend
            .modify_attribute(
                node,
                RecordKind::Group,
                group,
                attr::GROUP_MEMBERSHIP,
                AttributeOp::Append(user.to_string()),
            )
            .await?;
        debug!(user = %user, group = %group, "added group membership");
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        node: &NodeHandle,
        user: &str,
        group: &str,
    ) -> Result<(), DirectoryError> {
        if !self.user_exists(node, user).await? {
            return Err(DirectoryError::NoUserRecord(user.to_string()));
        }
        let members = self.group_membership(node, group).await?;
        if !members.iter().any(|m| m == user) {
            debug!(user = %user, group = %group, "membership removal skipped: not a member");
            return Ok(());
        }
        self.backend
            .modify_attribute(
                node,
                RecordKind::Group,
                group,
                attr::GROUP_MEMBERSHIP,
                AttributeOp::RemoveValue(user.to_string()),
            )
            .await?;
        debug!(user = %user, group = %group, "removed group membership");
        Ok(())
    }

    async fn remove_all_users_from_group(
        &self,
        node: &NodeHandle,
        group: &str,
    ) -> Result<(), DirectoryError> {
        if self
            .backend
            .fetch_record(node, RecordKind::Group, group)
            .await?
            .is_none()
        {
            return Err(DirectoryError::NoGroupRecord(group.to_string()));
        }
        self.backend
            .modify_attribute(
                node,
                RecordKind::Group,
                group,
                attr::GROUP_MEMBERSHIP,
                AttributeOp::Clear,
            )
            .await?;
        info!(group = %group, "cleared group membership");
        Ok(())
    }

    async fn change_password(
        &self,
        node: &NodeHandle,
        old_password: &str,
        new_password: &str,
        user: &str,
    ) -> Result<(), DirectoryError> {
        self.backend
            .change_password(node, user, old_password, new_password)
            .await?;
        info!(user = %user, "changed password");
        Ok(())
    }

    async fn apply_item(
        &self,
        node: &NodeHandle,
        item: &BatchItem,
        preset: Option<&PresetRecord>,
    ) -> Result<(), DirectoryError> {
        match item {
            BatchItem::AddUser(user) => self.add_user_resolved(node, user, preset).await,
            BatchItem::AddGroup(group) => self.add_group(node, group).await,
            BatchItem::RemoveUser(name) => self.remove_user(node, name).await,
            BatchItem::RemoveGroup(name) => self.remove_group(node, name).await,
            BatchItem::AddMember { user, group } => self.add_user_to_group(node, user, group).await,
            BatchItem::RemoveMember { user, group } => {
                self.remove_user_from_group(node, user, group).await
            }
        }
    }
}

struct BatchSpec {
    op: OpId,
    kind: BatchKind,
    items: Vec<BatchItem>,
    /// Name of a preset to resolve once at batch start and apply to every
    /// user item.
    preset: Option<String>,
    flag: CancelFlag,
    continue_on_error: bool,
}

/// Single and bulk mutations against the session's node.
pub struct RecordEditor {
    core: Arc<EditorCore>,
    events: EventSink,
    policy: BatchConfig,
    import_cancel: CancelFlag,
    removal_cancel: CancelFlag,
    import_gate: Arc<Mutex<()>>,
    removal_gate: Arc<Mutex<()>>,
}

impl RecordEditor {
    pub fn new(
        backend: Arc<dyn DirectoryBackend>,
        session: Arc<NodeSession>,
        events: EventSink,
        policy: BatchConfig,
    ) -> Self {
        let store = RecordStore::new(backend.clone(), session.clone());
        Self {
            core: Arc::new(EditorCore {
                backend,
                session,
                store,
            }),
            events,
            policy,
            import_cancel: CancelFlag::new(),
            removal_cancel: CancelFlag::new(),
            import_gate: Arc::new(Mutex::new(())),
            removal_gate: Arc::new(Mutex::new(())),
        }
    }

    // Single-record operations, against the session's current handle.

    pub async fn add_user(
        &self,
        user: &UserRecord,
        preset: Option<&str>,
    ) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core.add_user(&node, user, preset).await
    }

    pub async fn add_group(&self, group: &GroupRecord) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core.add_group(&node, group).await
    }

    pub async fn remove_user(&self, name: &str) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core.remove_user(&node, name).await
    }

    pub async fn remove_group(&self, name: &str) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core.remove_group(&node, name).await
    }

    pub async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core.add_user_to_group(&node, user, group).await
    }

    pub async fn remove_user_from_group(
        &self,
        user: &str,
        group: &str,
    ) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core.remove_user_from_group(&node, user, group).await
    }

    pub async fn remove_all_users_from_group(&self, group: &str) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core.remove_all_users_from_group(&node, group).await
    }

    /// Change a user's password. The backend verifies the old password; the
    /// editor never bypasses that check.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        user: &str,
    ) -> Result<(), DirectoryError> {
        let node = self.core.session.node()?;
        self.core
            .change_password(&node, old_password, new_password, user)
            .await
    }

    // Batch operations. Callers allocate the `OpId` and register callbacks
    // with the dispatcher before spawning; every outcome, including the
    // fail-fast unauthenticated case, arrives as a `BatchFinished` event.

    pub fn spawn_add_user_list(&self, op: OpId, list: RecordList, preset: Option<String>) {
        let items = list
            .effective_users()
            .into_iter()
            .cloned()
            .map(BatchItem::AddUser)
            .collect();
        self.spawn(BatchSpec {
            op,
            kind: BatchKind::Import,
            items,
            preset,
            flag: self.import_cancel.clone(),
            continue_on_error: self.policy.continue_on_error,
        });
    }

    pub fn spawn_remove_user_list(&self, op: OpId, names: Vec<String>) {
        let items = names.into_iter().map(BatchItem::RemoveUser).collect();
        self.spawn(BatchSpec {
            op,
            kind: BatchKind::Removal,
            items,
            preset: None,
            flag: self.removal_cancel.clone(),
            continue_on_error: self.policy.continue_on_error,
        });
    }

    pub fn spawn_add_group_list(&self, op: OpId, list: RecordList) {
        let items = list
            .effective_groups()
            .into_iter()
            .cloned()
            .map(BatchItem::AddGroup)
            .collect();
        self.spawn(BatchSpec {
            op,
            kind: BatchKind::Import,
            items,
            preset: None,
            flag: self.import_cancel.clone(),
            continue_on_error: self.policy.continue_on_error,
        });
    }

    pub fn spawn_remove_group_list(&self, op: OpId, names: Vec<String>) {
        let items = names.into_iter().map(BatchItem::RemoveGroup).collect();
        self.spawn(BatchSpec {
            op,
            kind: BatchKind::Removal,
            items,
            preset: None,
            flag: self.removal_cancel.clone(),
            continue_on_error: self.policy.continue_on_error,
        });
    }

    pub fn spawn_add_members(&self, op: OpId, users: Vec<String>, group: String) {
        let items = users
            .into_iter()
            .map(|user| BatchItem::AddMember {
                user,
                group: group.clone(),
            })
            .collect();
        self.spawn(BatchSpec {
            op,
            kind: BatchKind::Import,
            items,
            preset: None,
            flag: self.import_cancel.clone(),
            continue_on_error: self.policy.continue_on_error,
        });
    }

    pub fn spawn_remove_members(&self, op: OpId, users: Vec<String>, group: String) {
        let items = users
            .into_iter()
            .map(|user| BatchItem::RemoveMember {
                user,
                group: group.clone(),
            })
            .collect();
        self.spawn(BatchSpec {
            op,
            kind: BatchKind::Removal,
            items,
            preset: None,
            flag: self.removal_cancel.clone(),
            continue_on_error: self.policy.continue_on_error,
        });
    }

    /// Request cancellation of the in-flight add-kind batch.
    pub fn cancel_import(&self) {
        self.import_cancel.request();
    }

    /// Request cancellation of the in-flight remove-kind batch.
    pub fn cancel_removal(&self) {
        self.removal_cancel.request();
    }

    fn spawn(&self, spec: BatchSpec) {
        let core = self.core.clone();
        let events = self.events.clone();
        let gate = match spec.kind {
            BatchKind::Import => self.import_gate.clone(),
            BatchKind::Removal => self.removal_gate.clone(),
        };
        tokio::spawn(async move {
            let _lane = gate.lock().await;
            run_batch(core, events, spec).await;
        });
    }
}

async fn run_batch(core: Arc<EditorCore>, events: EventSink, spec: BatchSpec) {
    // This batch owns its lane now; a cancel request aimed at the previous
    // batch must not leak into this one.
    spec.flag.reset();

    let total = spec.items.len();
    let finish = |outcome, processed, last_error| {
        events.emit(DirectoryEvent::BatchFinished {
            op: spec.op,
            report: BatchReport {
                kind: spec.kind,
                outcome,
                processed,
                total,
                last_error,
            },
        });
    };

    // The handle captured here is the one every item uses; a node refresh
    // mid-batch supersedes it and the next item stops the batch.
    let node = match core.session.node() {
        Ok(node) => node,
        Err(err) => {
            warn!(op = %spec.op, error = %err, "batch refused: session not ready");
            finish(BatchOutcome::Completed, 0, Some(err));
            return;
        }
    };

    let preset = match &spec.preset {
        Some(name) => match core.store.get_preset(name).await {
            Ok(p) => Some(p),
            Err(err) => {
                warn!(op = %spec.op, preset = %name, error = %err, "batch refused: preset unavailable");
                finish(BatchOutcome::Completed, 0, Some(err));
                return;
            }
        },
        None => None,
    };

    info!(op = %spec.op, kind = %spec.kind, total, "batch started");

    let mut processed = 0usize;
    let mut last_error: Option<DirectoryError> = None;
    let mut outcome = BatchOutcome::Completed;

    for (index, item) in spec.items.iter().enumerate() {
        if spec.flag.is_requested() {
            outcome = BatchOutcome::Cancelled;
            info!(op = %spec.op, processed, total, "batch cancelled");
            break;
        }

        let result = core.apply_item(&node, item, preset.as_ref()).await;
        processed += 1;
        let percent = ((index + 1) as f64 / total as f64) * 100.0;

        let stop = match result {
            Ok(()) => false,
            Err(err) => {
                let stop = err.is_fatal() || !spec.continue_on_error;
                warn!(
                    op = %spec.op,
                    item = %item.identifier(),
                    error = %err,
                    fatal = err.is_fatal(),
                    "batch item failed"
                );
                last_error = Some(err);
                stop
            }
        };
        events.emit(item.progress_event(spec.op, percent));
        if stop {
            break;
        }
    }

    finish(outcome, processed, last_error);
}
