//! Directory manager facade.
//!
//! One manager owns one node session plus the editor, store, and query
//! engine that operate through it, and runs the dispatcher task that
//! delivers every observer and per-operation callback in event order.

use crate::backend::DirectoryBackend;
use crate::config::MusterConfig;
use crate::editor::RecordEditor;
use crate::error::DirectoryError;
use crate::events::{
    spawn_dispatcher, AddProgressCallback, CallbackRegistry, CompletionCallback, DirectoryEvent,
    EventSink, ListReply, ObserverSet, OpId, QueryCallback, RemovalProgressCallback,
    StatusCallback,
};
use crate::query::{QueryEngine, RecordStream};
use crate::records::{
    CredentialSet, DirectoryRecord, GroupRecord, PresetRecord, RecordList, UserRecord,
};
use crate::session::NodeSession;
use crate::store::RecordStore;
use crate::types::{Domain, NodeStatus, RecordKind};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Administration surface over one directory node.
///
/// Single ops are plain async methods. Batch and list ops return
/// immediately; their progress and completion arrive through observers and
/// the callbacks passed at the call site, all invoked from the manager's
/// dispatcher task. Dropping the manager stops the dispatcher once in-flight
/// operations have drained.
pub struct DirectoryManager {
    /// Node session shared with every subsystem
    session: Arc<NodeSession>,
    /// Single and batch mutations
    editor: RecordEditor,
    /// Typed record reads
    store: RecordStore,
    /// Listing queries
    query: Arc<QueryEngine>,
    /// Event channel into the dispatcher
    events: EventSink,
    /// Manager-wide observers
    observers: Arc<ObserverSet>,
    /// Per-operation callbacks
    callbacks: Arc<CallbackRegistry>,
    dispatcher: JoinHandle<()>,
}

impl fmt::Debug for DirectoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryManager")
            .field("domain", &self.session.domain())
            .field("status", &self.session.status())
            .finish_non_exhaustive()
    }
}

impl DirectoryManager {
    /// Create a manager over `backend` with `config`. No directory traffic
    /// happens until the node is resolved or authenticated.
    pub fn new(backend: Arc<dyn DirectoryBackend>, config: MusterConfig) -> Self {
        let observers = Arc::new(ObserverSet::default());
        let callbacks = Arc::new(CallbackRegistry::default());
        let (events, rx) = EventSink::channel();
        let dispatcher = spawn_dispatcher(rx, observers.clone(), callbacks.clone());

        let session = Arc::new(NodeSession::new(
            backend.clone(),
            config.session.settings(),
            events.clone(),
        ));
        let editor = RecordEditor::new(
            backend.clone(),
            session.clone(),
            events.clone(),
            config.batch.clone(),
        );
        let store = RecordStore::new(backend.clone(), session.clone());
        let query = Arc::new(QueryEngine::new(backend, session.clone()));

        info!(domain = %session.domain(), "directory manager created");
        Self {
            session,
            editor,
            store,
            query,
            events,
            observers,
            callbacks,
            dispatcher,
        }
    }

    /// Create a manager with default configuration (local domain).
    pub fn with_defaults(backend: Arc<dyn DirectoryBackend>) -> Self {
        Self::new(backend, MusterConfig::default())
    }

    /// Create a manager, resolve its node, and authenticate when the config
    /// carries administrator credentials.
    pub async fn connect(
        backend: Arc<dyn DirectoryBackend>,
        config: MusterConfig,
    ) -> Result<Self, DirectoryError> {
        let admin_name = config.session.admin_name.clone();
        let admin_password = config.session.admin_password.clone();

        let manager = Self::new(backend, config);
        manager.session.resolve_node().await?;
        if let (Some(name), Some(password)) = (admin_name, admin_password) {
            manager.authenticate(&name, &password).await?;
        }
        Ok(manager)
    }

    // Session.

    /// Authenticate against the session's node, resolving it first when
    /// needed. Status observers see the resulting transition.
    pub async fn authenticate(&self, name: &str, password: &str) -> Result<(), DirectoryError> {
        self.session.authenticate(name, password).await.map(|_| ())
    }

    /// Re-resolve the node and re-authenticate with retained credentials.
    /// Returns whether the session is authenticated afterwards; without
    /// retained credentials this is a no-op returning `false`.
    pub async fn refresh_node(&self) -> bool {
        self.session.refresh().await
    }

    pub fn status(&self) -> NodeStatus {
        self.session.status()
    }

    pub fn domain(&self) -> Domain {
        self.session.domain()
    }

    pub fn server(&self) -> Option<&str> {
        self.session.server()
    }

    /// Connection parameters plus retained credentials, `None` before the
    /// first successful authentication.
    pub fn credentials(&self) -> Option<CredentialSet> {
        self.session.credential_set()
    }

    // Observers. Passing `None` clears a channel.

    pub fn set_status_observer(&self, cb: Option<StatusCallback>) {
        self.observers.set_status(cb);
    }

    pub fn set_query_observer(&self, cb: Option<QueryCallback>) {
        self.observers.set_query(cb);
    }

    pub fn set_add_progress_observer(&self, cb: Option<AddProgressCallback>) {
        self.observers.set_add_progress(cb);
    }

    pub fn set_removal_progress_observer(&self, cb: Option<RemovalProgressCallback>) {
        self.observers.set_removal_progress(cb);
    }

    // Record reads.

    pub async fn get_record(
        &self,
        kind: RecordKind,
        name: &str,
    ) -> Result<DirectoryRecord, DirectoryError> {
        self.store.get_record(kind, name).await
    }

    pub async fn record_exists(
        &self,
        kind: RecordKind,
        name: &str,
    ) -> Result<bool, DirectoryError> {
        self.store.record_exists(kind, name).await
    }

    pub async fn get_user(&self, name: &str) -> Result<UserRecord, DirectoryError> {
        self.store.get_user(name).await
    }

    pub async fn get_group(&self, name: &str) -> Result<GroupRecord, DirectoryError> {
        self.store.get_group(name).await
    }

    pub async fn get_preset(&self, name: &str) -> Result<PresetRecord, DirectoryError> {
        self.store.get_preset(name).await
    }

    /// Fetch a preset as a provisioning template.
    pub async fn settings_for_preset(&self, name: &str) -> Result<PresetRecord, DirectoryError> {
        self.store.settings_for_preset(name).await
    }

    /// Find the record of `kind` whose generated GUID matches.
    pub async fn get_by_guid(
        &self,
        guid: &str,
        kind: RecordKind,
    ) -> Result<DirectoryRecord, DirectoryError> {
        self.store.get_by_guid(guid, kind).await
    }

    pub async fn group_members(&self, group: &str) -> Result<Vec<String>, DirectoryError> {
        self.store.group_members(group).await
    }

    pub async fn is_member(&self, user: &str, group: &str) -> Result<bool, DirectoryError> {
        self.store.is_member(user, group).await
    }

    // Single-record mutations.

    /// Add one user. An explicit `preset` name wins over the record's own
    /// `preset_name`; preset fields fill only what the record leaves unset.
    pub async fn add_user(
        &self,
        user: &UserRecord,
        preset: Option<&str>,
    ) -> Result<(), DirectoryError> {
        self.editor.add_user(user, preset).await
    }

    pub async fn add_group(&self, group: &GroupRecord) -> Result<(), DirectoryError> {
        self.editor.add_group(group).await
    }

    pub async fn remove_user(&self, name: &str) -> Result<(), DirectoryError> {
        self.editor.remove_user(name).await
    }

    pub async fn remove_group(&self, name: &str) -> Result<(), DirectoryError> {
        self.editor.remove_group(name).await
    }

    /// Add `user` to `group`. Adding an existing member is a no-op.
    pub async fn add_user_to_group(&self, user: &str, group: &str) -> Result<(), DirectoryError> {
        self.editor.add_user_to_group(user, group).await
    }

    /// Remove `user` from `group`. Removing a non-member is a no-op.
    pub async fn remove_user_from_group(
        &self,
        user: &str,
        group: &str,
    ) -> Result<(), DirectoryError> {
        self.editor.remove_user_from_group(user, group).await
    }

    pub async fn remove_all_users_from_group(&self, group: &str) -> Result<(), DirectoryError> {
        self.editor.remove_all_users_from_group(group).await
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        user: &str,
    ) -> Result<(), DirectoryError> {
        self.editor
            .change_password(old_password, new_password, user)
            .await
    }

    // Batch mutations. Each starter returns once the batch is queued on its
    // lane; a second batch of the same lane queues behind the first.

    /// Import every user in `list` not excluded by its filter. Progress and
    /// completion are delivered through the dispatcher.
    pub fn add_user_list(
        &self,
        list: RecordList,
        preset: Option<String>,
        on_progress: Option<AddProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) {
        let op = OpId::next();
        self.callbacks.register_add_batch(op, on_progress, on_complete);
        self.editor.spawn_add_user_list(op, list, preset);
    }

    pub fn remove_user_list(
        &self,
        names: Vec<String>,
        on_progress: Option<RemovalProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) {
        let op = OpId::next();
        self.callbacks
            .register_removal_batch(op, on_progress, on_complete);
        self.editor.spawn_remove_user_list(op, names);
    }

    pub fn add_group_list(
        &self,
        list: RecordList,
        on_progress: Option<AddProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) {
        let op = OpId::next();
        self.callbacks.register_add_batch(op, on_progress, on_complete);
        self.editor.spawn_add_group_list(op, list);
    }

    pub fn remove_group_list(
        &self,
        names: Vec<String>,
        on_progress: Option<RemovalProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) {
        let op = OpId::next();
        self.callbacks
            .register_removal_batch(op, on_progress, on_complete);
        self.editor.spawn_remove_group_list(op, names);
    }

    pub fn add_users_to_group(
        &self,
        users: Vec<String>,
        group: impl Into<String>,
        on_progress: Option<AddProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) {
        let op = OpId::next();
        self.callbacks.register_add_batch(op, on_progress, on_complete);
        self.editor.spawn_add_members(op, users, group.into());
    }

    pub fn remove_users_from_group(
        &self,
        users: Vec<String>,
        group: impl Into<String>,
        on_progress: Option<RemovalProgressCallback>,
        on_complete: Option<CompletionCallback>,
    ) {
        let op = OpId::next();
        self.callbacks
            .register_removal_batch(op, on_progress, on_complete);
        self.editor.spawn_remove_members(op, users, group.into());
    }

    /// Request cancellation of the in-flight add-kind batch. Takes effect at
    /// the next item boundary.
    pub fn cancel_import(&self) {
        self.editor.cancel_import();
    }

    /// Request cancellation of the in-flight remove-kind batch.
    pub fn cancel_removal(&self) {
        self.editor.cancel_removal();
    }

    // Queries.

    pub async fn user_names(&self) -> Result<Vec<String>, DirectoryError> {
        self.query.list_users().await
    }

    pub async fn group_names(&self) -> Result<Vec<String>, DirectoryError> {
        self.query.list_groups().await
    }

    pub async fn preset_names(&self) -> Result<Vec<String>, DirectoryError> {
        self.query.list_presets().await
    }

    /// List records of `kind`, delivering the buffered result through
    /// `reply` on the dispatcher task.
    pub fn list_names(&self, kind: RecordKind, reply: ListReply) {
        let op = OpId::next();
        self.callbacks.register_list(op, reply);
        let query = self.query.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = query.list_names(kind).await;
            events.emit(DirectoryEvent::ListFinished { op, result });
        });
    }

    pub fn list_users(&self, reply: ListReply) {
        self.list_names(RecordKind::User, reply);
    }

    pub fn list_groups(&self, reply: ListReply) {
        self.list_names(RecordKind::Group, reply);
    }

    pub fn list_presets(&self, reply: ListReply) {
        self.list_names(RecordKind::Preset, reply);
    }

    /// Stream records of `kind` through `on_record`, one dispatcher-ordered
    /// invocation per record. A failed query logs and ends the stream; the
    /// per-record callback never sees partial garbage.
    pub fn stream_names(&self, kind: RecordKind, on_record: QueryCallback) {
        let op = OpId::next();
        self.callbacks.register_query(op, Some(on_record));
        let query = self.query.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut stream = query.stream_records(kind).await;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(record) => events.emit(DirectoryEvent::RecordFound { op, record }),
                    Err(err) => {
                        warn!(op = %op, kind = kind.as_str(), error = %err, "record stream failed");
                        break;
                    }
                }
            }
            events.emit(DirectoryEvent::StreamFinished { op });
        });
    }

    pub fn stream_user_list(&self, on_record: QueryCallback) {
        self.stream_names(RecordKind::User, on_record);
    }

    pub fn stream_group_list(&self, on_record: QueryCallback) {
        self.stream_names(RecordKind::Group, on_record);
    }

    pub fn stream_preset_list(&self, on_record: QueryCallback) {
        self.stream_names(RecordKind::Preset, on_record);
    }

    /// Stream records of `kind` directly, without the dispatcher.
    pub async fn record_stream(&self, kind: RecordKind) -> RecordStream {
        self.query.stream_records(kind).await
    }

    /// Paths of the local directory nodes the backend exposes. Available
    /// without authentication.
    pub fn available_local_nodes(&self) -> Vec<String> {
        self.query.available_local_nodes()
    }

    /// Shut down: stop accepting events and wait for the dispatcher to
    /// drain. In-flight batches keep the channel open until they finish.
    pub async fn close(self) {
        let DirectoryManager {
            session,
            editor,
            store,
            query,
            events,
            observers,
            callbacks,
            dispatcher,
        } = self;
        drop(events);
        drop(editor);
        drop(session);
        drop(store);
        drop(query);
        drop(observers);
        drop(callbacks);
        let _ = dispatcher.await;
    }
}
