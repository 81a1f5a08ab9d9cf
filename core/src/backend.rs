//! Collaborator ports.
//!
//! The core never talks to a concrete transport: credentials, the realtime
//! message store, and the attachment service are injected as trait objects
//! so the whole state machine runs against scripted fakes in tests.

use async_trait::async_trait;

use crate::crypto::MessageKey;
use crate::state::{AttachmentRef, MessageStatus, SenderKind, SharedRef};

/// Per-conversation realtime access token plus the message key.
#[derive(Clone)]
pub struct Credentials {
    pub access_token: String,
    pub cipher_key: MessageKey,
}

// Neither field may reach logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(..)")
    }
}

/// A message as stored by the realtime backend. `content` is base64
/// ciphertext when `iv` is set, plaintext otherwise (system messages).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherMessage {
    pub id: String,
    pub sender: SenderKind,
    pub content: String,
    pub iv: Option<String>,
    pub sent_at: i64,
    pub status: MessageStatus,
    pub attachment: Option<AttachmentRef>,
    pub shared: Option<SharedRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub ciphertext: String,
    pub iv: String,
    pub attachment: Option<AttachmentRef>,
}

/// A file picked by the user, not yet uploaded. Content validation
/// (type allowlist, size cap) is the attachment service's contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendErrorKind {
    Auth,
    Network,
    Rejected,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Auth,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn timeout(operation: &str) -> Self {
        Self {
            kind: BackendErrorKind::Timeout,
            message: format!("{operation} timed out"),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Full-snapshot delivery: each call supersedes the previous one entirely.
pub type SnapshotSink = Box<dyn Fn(Vec<CipherMessage>) + Send + Sync>;
/// Counterpart last-read timestamp delivery, epoch seconds.
pub type ReceiptSink = Box<dyn Fn(i64) + Send + Sync>;

/// Live subscription handle. `cancel` must be synchronous and complete:
/// after it returns the backend may no longer invoke the sink (the core
/// additionally discards stale deliveries by generation).
pub trait SubscriptionHandle: Send + Sync {
    fn cancel(&self);
}

#[async_trait]
pub trait CredentialResolver: Send + Sync + 'static {
    async fn resolve(&self, conversation_id: &str) -> BackendResult<Credentials>;
}

#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// Subscribe to the newest `page_depth` pages of a conversation. Each
    /// delivery is the full recomputed window, not a patch.
    fn subscribe_messages(
        &self,
        conversation_id: &str,
        page_depth: u32,
        sink: SnapshotSink,
    ) -> Box<dyn SubscriptionHandle>;

    fn subscribe_read_receipt(
        &self,
        conversation_id: &str,
        sink: ReceiptSink,
    ) -> Box<dyn SubscriptionHandle>;

    async fn mark_read(&self, conversation_id: &str) -> BackendResult<()>;

    async fn send_message(&self, message: OutgoingMessage) -> BackendResult<()>;

    /// Replace a message's body, handing the backend the original wire
    /// message so it can version the previous content.
    async fn modify_message(
        &self,
        conversation_id: &str,
        original: CipherMessage,
        new_ciphertext: String,
        new_iv: String,
    ) -> BackendResult<()>;

    /// Soft delete: the backend keeps the row and flips its status.
    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> BackendResult<()>;

    /// Whole-history fetch used by client-side search (the backend cannot
    /// match against ciphertext).
    async fn fetch_all_messages(&self, conversation_id: &str) -> BackendResult<Vec<CipherMessage>>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync + 'static {
    async fn upload(
        &self,
        conversation_ids: &[String],
        file: &LocalFile,
    ) -> BackendResult<AttachmentRef>;

    async fn delete(&self, attachment_id: &str) -> BackendResult<()>;
}
