//! Directory node session: resolve, authenticate, refresh.
//!
//! One session owns one node within one domain. Every status transition is
//! emitted through the event sink so registered observers see the full
//! authentication lifecycle.

use crate::backend::DirectoryBackend;
use crate::error::DirectoryError;
use crate::events::{DirectoryEvent, EventSink};
use crate::records::{CredentialSet, SCHEMA_VERSION};
use crate::types::{Domain, NodeHandle, NodeStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connection parameters for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub domain: Domain,
    /// Proxy host for `ProxyDirectoryServer`, service node name for
    /// `DirectoryService`; ignored for `Local`/`Default`.
    pub server: Option<String>,
}

impl SessionSettings {
    pub fn local() -> Self {
        Self {
            domain: Domain::Local,
            server: None,
        }
    }

    pub fn proxy(server: impl Into<String>) -> Self {
        Self {
            domain: Domain::ProxyDirectoryServer,
            server: Some(server.into()),
        }
    }
}

#[derive(Clone)]
struct Credentials {
    name: String,
    password: String,
}

/// An authenticated connection to one directory node.
pub struct NodeSession {
    backend: Arc<dyn DirectoryBackend>,
    settings: SessionSettings,
    status: RwLock<NodeStatus>,
    node: RwLock<Option<NodeHandle>>,
    credentials: RwLock<Option<Credentials>>,
    events: EventSink,
}

impl NodeSession {
    pub fn new(
        backend: Arc<dyn DirectoryBackend>,
        settings: SessionSettings,
        events: EventSink,
    ) -> Self {
        Self {
            backend,
            settings,
            status: RwLock::new(NodeStatus::NotSet),
            node: RwLock::new(None),
            credentials: RwLock::new(None),
            events,
        }
    }

    pub fn domain(&self) -> Domain {
        self.settings.domain
    }

    pub fn server(&self) -> Option<&str> {
        self.settings.server.as_deref()
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    /// The authenticated node handle, or a session error when the node is
    /// unresolved or not authenticated. Editor and query operations call
    /// this first so they fail fast instead of half-running.
    pub fn node(&self) -> Result<NodeHandle, DirectoryError> {
        let node = self
            .node
            .read()
            .clone()
            .ok_or_else(|| DirectoryError::session("no directory node resolved"))?;
        if !self.status().is_authenticated() {
            return Err(DirectoryError::session("session is not authenticated"));
        }
        Ok(node)
    }

    /// Connection parameters plus retained credentials, for handing this
    /// session to another process. `None` before the first successful
    /// authentication.
    pub fn credential_set(&self) -> Option<CredentialSet> {
        self.credentials.read().as_ref().map(|c| CredentialSet {
            schema: SCHEMA_VERSION,
            address: self.settings.server.clone(),
            domain: self.settings.domain,
            admin_name: c.name.clone(),
            admin_password: c.password.clone(),
        })
    }

    fn set_status(&self, status: NodeStatus) {
        let changed = {
            let mut current = self.status.write();
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        };
        if changed {
            self.events.emit(DirectoryEvent::StatusChanged(status));
        }
    }

    /// Resolve the node for this session's domain and server.
    pub async fn resolve_node(&self) -> Result<NodeHandle, DirectoryError> {
        let handle = self
            .backend
            .open_node(self.settings.domain, self.settings.server.as_deref())
            .await?;
        info!(node = %handle, domain = %self.settings.domain, "resolved directory node");
        *self.node.write() = Some(handle.clone());
        Ok(handle)
    }

    /// Authenticate administrator credentials against the session's node,
    /// resolving it first if needed. On success the credentials are retained
    /// for `refresh`.
    pub async fn authenticate(
        &self,
        name: &str,
        password: &str,
    ) -> Result<NodeStatus, DirectoryError> {
        if password.is_empty() {
            self.set_status(NodeStatus::not_authenticated(self.settings.domain));
            return Err(DirectoryError::NoPasswordSupplied);
        }

        let node = {
            let existing = self.node.read().clone();
            match existing {
                Some(node) => node,
                None => match self.resolve_node().await {
                    Ok(node) => node,
                    Err(err) => {
                        self.set_status(NodeStatus::not_authenticated(self.settings.domain));
                        return Err(err);
                    }
                },
            }
        };

        match self.backend.authenticate(&node, name, password).await {
            Ok(()) => {
                *self.credentials.write() = Some(Credentials {
                    name: name.to_string(),
                    password: password.to_string(),
                });
                let status = NodeStatus::authenticated(self.settings.domain);
                self.set_status(status);
                info!(admin = %name, node = %node, "authenticated to directory node");
                Ok(status)
            }
            Err(err) => {
                let status = NodeStatus::not_authenticated(self.settings.domain);
                self.set_status(status);
                warn!(admin = %name, node = %node, error = %err, "authentication failed");
                Err(err)
            }
        }
    }

    /// Re-resolve the node and re-authenticate with the retained
    /// credentials. Returns `false` without touching status when no
    /// credentials were retained. Re-resolving supersedes the previous
    /// handle; a batch still holding it will stop with a session error.
    pub async fn refresh(&self) -> bool {
        let creds = self.credentials.read().clone();
        let Some(creds) = creds else {
            debug!("refresh skipped: no retained credentials");
            return false;
        };

        let node = match self
            .backend
            .open_node(self.settings.domain, self.settings.server.as_deref())
            .await
        {
            Ok(node) => node,
            Err(err) => {
                warn!(error = %err, "refresh could not re-resolve node");
                self.set_status(NodeStatus::not_authenticated(self.settings.domain));
                return false;
            }
        };
        *self.node.write() = Some(node.clone());

        match self.backend.authenticate(&node, &creds.name, &creds.password).await {
            Ok(()) => {
                self.set_status(NodeStatus::authenticated(self.settings.domain));
                info!(node = %node, "session refreshed");
                true
            }
            Err(err) => {
                warn!(node = %node, error = %err, "refresh re-authentication failed");
                self.set_status(NodeStatus::not_authenticated(self.settings.domain));
                false
            }
        }
    }
}
