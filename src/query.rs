//! Read-side queries: record listings as streams or buffered vectors.

use crate::backend::DirectoryBackend;
use crate::error::DirectoryError;
use crate::session::NodeSession;
use crate::types::{QueryRecord, RecordKind};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Stream of query results.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<QueryRecord, DirectoryError>> + Send>>;

/// Runs listings against the session's node.
///
/// Listings snapshot the directory at call time; records created or removed
/// while a stream is being consumed do not appear in it.
pub struct QueryEngine {
    backend: Arc<dyn DirectoryBackend>,
    session: Arc<NodeSession>,
}

impl QueryEngine {
    pub fn new(backend: Arc<dyn DirectoryBackend>, session: Arc<NodeSession>) -> Self {
        Self { backend, session }
    }

    /// Names of every record of `kind`, in directory order.
    pub async fn list_names(&self, kind: RecordKind) -> Result<Vec<String>, DirectoryError> {
        let node = self.session.node()?;
        let names = self.backend.list_record_names(&node, kind).await?;
        debug!(kind = kind.as_str(), count = names.len(), "listed records");
        Ok(names)
    }

    pub async fn list_users(&self) -> Result<Vec<String>, DirectoryError> {
        self.list_names(RecordKind::User).await
    }

    pub async fn list_groups(&self) -> Result<Vec<String>, DirectoryError> {
        self.list_names(RecordKind::Group).await
    }

    pub async fn list_presets(&self) -> Result<Vec<String>, DirectoryError> {
        self.list_names(RecordKind::Preset).await
    }

    /// Stream the records of `kind` one at a time. A session or connectivity
    /// failure surfaces as the single item of the stream.
    pub async fn stream_records(&self, kind: RecordKind) -> RecordStream {
        match self.list_names(kind).await {
            Ok(names) => stream::iter(names)
                .map(move |name| Ok(QueryRecord::new(kind, name)))
                .boxed(),
            Err(err) => stream::iter([Err(err)]).boxed(),
        }
    }

    pub async fn stream_users(&self) -> RecordStream {
        self.stream_records(RecordKind::User).await
    }

    pub async fn stream_groups(&self) -> RecordStream {
        self.stream_records(RecordKind::Group).await
    }

    pub async fn stream_presets(&self) -> RecordStream {
        self.stream_records(RecordKind::Preset).await
    }

    /// Paths of the local nodes the backend exposes. Available without
    /// authentication.
    pub fn available_local_nodes(&self) -> Vec<String> {
        self.backend.local_nodes()
    }
}
