#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tandem_core::{
    crypto, Action, AttachmentRef, AttachmentStore, BackendResult, ChatClient, ChatStore,
    CipherMessage, ClientConfig, ConversationState, CredentialResolver, Credentials, LocalFile,
    MessageKey, MessageStatus, OutgoingMessage, ReceiptSink, Reconciler, SenderKind, SnapshotSink,
    SubscriptionHandle, Update,
};

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Dispatch a marker draft edit and wait for it to be applied, guaranteeing
/// every previously queued message has been processed by the actor.
pub fn settle(client: &ChatClient, marker: &str) {
    client.dispatch(Action::DraftChanged {
        text: marker.to_string(),
    });
    let marker = marker.to_string();
    wait_until("actor settled", Duration::from_secs(5), || {
        client.state().composer.text == marker
    });
}

pub fn timeline_message_count(state: &ConversationState) -> usize {
    state.timeline.iter().map(|d| d.messages.len()).sum()
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<Update>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl Reconciler for Collector {
    fn reconcile(&self, update: Update) {
        self.0.lock().unwrap().push(update);
    }
}

// Message fixtures

pub fn encrypted_message(
    key: &MessageKey,
    id: &str,
    sender: SenderKind,
    text: &str,
    sent_at: i64,
) -> CipherMessage {
    let sealed = crypto::seal(key, text).unwrap();
    CipherMessage {
        id: id.to_string(),
        sender,
        content: sealed.ciphertext,
        iv: Some(sealed.iv),
        sent_at,
        status: MessageStatus::Sent,
        attachment: None,
        shared: None,
    }
}

pub fn system_message(id: &str, text: &str, sent_at: i64) -> CipherMessage {
    CipherMessage {
        id: id.to_string(),
        sender: SenderKind::System,
        content: text.to_string(),
        iv: None,
        sent_at,
        status: MessageStatus::Sent,
        attachment: None,
        shared: None,
    }
}

// Scripted collaborators

struct RecordingCancel {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle for RecordingCancel {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.events.lock().unwrap().push(self.label.to_string());
    }
}

pub struct SinkEntry {
    pub sink: SnapshotSink,
    pub cancelled: Arc<AtomicBool>,
}

pub struct ReceiptEntry {
    pub sink: ReceiptSink,
    pub cancelled: Arc<AtomicBool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyCall {
    pub conversation_id: String,
    pub original: CipherMessage,
    pub new_ciphertext: String,
    pub new_iv: String,
}

/// Realtime store fake: scripted snapshots per (conversation, depth)
/// delivered synchronously at subscribe time, plus manual push for live
/// deliveries, with an ordered subscribe/cancel event log.
pub struct ScriptedStore {
    snapshots: Mutex<HashMap<(String, u32), Vec<CipherMessage>>>,
    pub message_sinks: Mutex<Vec<SinkEntry>>,
    pub receipt_sinks: Mutex<Vec<ReceiptEntry>>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub depths: Mutex<Vec<u32>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub send_result: Mutex<BackendResult<()>>,
    pub modify_calls: Mutex<Vec<ModifyCall>>,
    pub modify_result: Mutex<BackendResult<()>>,
    pub delete_calls: Mutex<Vec<(String, String)>>,
    pub delete_result: Mutex<BackendResult<()>>,
    pub mark_read_calls: AtomicUsize,
    pub mark_read_result: Mutex<BackendResult<()>>,
    pub fetch_result: Mutex<BackendResult<Vec<CipherMessage>>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            message_sinks: Mutex::new(vec![]),
            receipt_sinks: Mutex::new(vec![]),
            events: Arc::new(Mutex::new(vec![])),
            depths: Mutex::new(vec![]),
            sent: Mutex::new(vec![]),
            send_result: Mutex::new(Ok(())),
            modify_calls: Mutex::new(vec![]),
            modify_result: Mutex::new(Ok(())),
            delete_calls: Mutex::new(vec![]),
            delete_result: Mutex::new(Ok(())),
            mark_read_calls: AtomicUsize::new(0),
            mark_read_result: Mutex::new(Ok(())),
            fetch_result: Mutex::new(Ok(vec![])),
        }
    }

    pub fn script_snapshot(&self, conversation_id: &str, depth: u32, messages: Vec<CipherMessage>) {
        self.snapshots
            .lock()
            .unwrap()
            .insert((conversation_id.to_string(), depth), messages);
    }

    /// Deliver a snapshot through the most recent message sink.
    pub fn push_snapshot(&self, messages: Vec<CipherMessage>) {
        let sinks = self.message_sinks.lock().unwrap();
        let entry = sinks.last().expect("no message subscription");
        (entry.sink)(messages);
    }

    /// Deliver through an arbitrary (possibly already cancelled) sink, to
    /// model a collaborator misbehaving across a teardown boundary.
    pub fn push_snapshot_to(&self, index: usize, messages: Vec<CipherMessage>) {
        let sinks = self.message_sinks.lock().unwrap();
        (sinks[index].sink)(messages);
    }

    pub fn push_receipt(&self, last_read_at: i64) {
        let sinks = self.receipt_sinks.lock().unwrap();
        let entry = sinks.last().expect("no receipt subscription");
        (entry.sink)(last_read_at);
    }

    pub fn message_events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.contains("messages"))
            .cloned()
            .collect()
    }

    pub fn subscribe_count(&self, stream: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(&format!("subscribe_{stream}")))
            .count()
    }

    pub fn cancel_count(&self, stream: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(&format!("cancel_{stream}")))
            .count()
    }
}

#[async_trait]
impl ChatStore for ScriptedStore {
    fn subscribe_messages(
        &self,
        conversation_id: &str,
        page_depth: u32,
        sink: SnapshotSink,
    ) -> Box<dyn SubscriptionHandle> {
        self.events
            .lock()
            .unwrap()
            .push(format!("subscribe_messages:{conversation_id}:{page_depth}"));
        self.depths.lock().unwrap().push(page_depth);

        let scripted = self
            .snapshots
            .lock()
            .unwrap()
            .get(&(conversation_id.to_string(), page_depth))
            .cloned();
        if let Some(messages) = scripted {
            sink(messages);
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        self.message_sinks.lock().unwrap().push(SinkEntry {
            sink,
            cancelled: cancelled.clone(),
        });
        Box::new(RecordingCancel {
            label: "cancel_messages",
            events: self.events.clone(),
            cancelled,
        })
    }

    fn subscribe_read_receipt(
        &self,
        conversation_id: &str,
        sink: ReceiptSink,
    ) -> Box<dyn SubscriptionHandle> {
        self.events
            .lock()
            .unwrap()
            .push(format!("subscribe_receipt:{conversation_id}"));
        let cancelled = Arc::new(AtomicBool::new(false));
        self.receipt_sinks.lock().unwrap().push(ReceiptEntry {
            sink,
            cancelled: cancelled.clone(),
        });
        Box::new(RecordingCancel {
            label: "cancel_receipt",
            events: self.events.clone(),
            cancelled,
        })
    }

    async fn mark_read(&self, _conversation_id: &str) -> BackendResult<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        self.mark_read_result.lock().unwrap().clone()
    }

    async fn send_message(&self, message: OutgoingMessage) -> BackendResult<()> {
        self.sent.lock().unwrap().push(message);
        self.send_result.lock().unwrap().clone()
    }

    async fn modify_message(
        &self,
        conversation_id: &str,
        original: CipherMessage,
        new_ciphertext: String,
        new_iv: String,
    ) -> BackendResult<()> {
        self.modify_calls.lock().unwrap().push(ModifyCall {
            conversation_id: conversation_id.to_string(),
            original,
            new_ciphertext,
            new_iv,
        });
        self.modify_result.lock().unwrap().clone()
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> BackendResult<()> {
        self.delete_calls
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), message_id.to_string()));
        self.delete_result.lock().unwrap().clone()
    }

    async fn fetch_all_messages(&self, _conversation_id: &str) -> BackendResult<Vec<CipherMessage>> {
        self.fetch_result.lock().unwrap().clone()
    }
}

pub struct ScriptedResolver {
    pub result: Mutex<BackendResult<Credentials>>,
    pub calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn ok(key: &MessageKey) -> Self {
        Self {
            result: Mutex::new(Ok(Credentials {
                access_token: "token".to_string(),
                cipher_key: key.clone(),
            })),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: tandem_core::BackendError) -> Self {
        Self {
            result: Mutex::new(Err(error)),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CredentialResolver for ScriptedResolver {
    async fn resolve(&self, _conversation_id: &str) -> BackendResult<Credentials> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

pub struct ScriptedAttachments {
    pub upload_result: Mutex<BackendResult<AttachmentRef>>,
    pub uploads: Mutex<Vec<(Vec<String>, LocalFile)>>,
    pub delete_calls: Mutex<Vec<String>>,
    pub delete_result: Mutex<BackendResult<()>>,
}

impl ScriptedAttachments {
    pub fn new() -> Self {
        Self {
            upload_result: Mutex::new(Ok(AttachmentRef {
                id: "id-fichier".to_string(),
                name: "imageupload.png".to_string(),
            })),
            uploads: Mutex::new(vec![]),
            delete_calls: Mutex::new(vec![]),
            delete_result: Mutex::new(Ok(())),
        }
    }
}

#[async_trait]
impl AttachmentStore for ScriptedAttachments {
    async fn upload(
        &self,
        conversation_ids: &[String],
        file: &LocalFile,
    ) -> BackendResult<AttachmentRef> {
        self.uploads
            .lock()
            .unwrap()
            .push((conversation_ids.to_vec(), file.clone()));
        self.upload_result.lock().unwrap().clone()
    }

    async fn delete(&self, attachment_id: &str) -> BackendResult<()> {
        self.delete_calls
            .lock()
            .unwrap()
            .push(attachment_id.to_string());
        self.delete_result.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub client: Arc<ChatClient>,
    pub store: Arc<ScriptedStore>,
    pub resolver: Arc<ScriptedResolver>,
    pub attachments: Arc<ScriptedAttachments>,
    pub key: MessageKey,
}

pub fn harness() -> Harness {
    let key = MessageKey::generate();
    let store = Arc::new(ScriptedStore::new());
    let resolver = Arc::new(ScriptedResolver::ok(&key));
    let attachments = Arc::new(ScriptedAttachments::new());
    let client = ChatClient::new(
        store.clone(),
        resolver.clone(),
        attachments.clone(),
        ClientConfig::default(),
    );
    Harness {
        client,
        store,
        resolver,
        attachments,
        key,
    }
}

/// Mount a conversation and wait until it is ready.
pub fn mount(h: &Harness, conversation_id: &str) {
    h.client.dispatch(Action::Open {
        conversation_id: conversation_id.to_string(),
    });
    wait_until("conversation ready", Duration::from_secs(5), || {
        h.client.state().phase == tandem_core::Phase::Ready
    });
}
