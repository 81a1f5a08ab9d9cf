//! Interactive shell driving the conversation core against an in-memory
//! backend. Useful for poking at paging, editing, search, and receipts
//! without a real realtime service.

use std::io::{BufRead, Write as _};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::Parser;

use tandem_core::{
    now_seconds, Action, AttachmentRef, AttachmentStore, BackendResult, ChatClient, ChatStore,
    CipherMessage, ClientConfig, ConversationState, CredentialResolver, Credentials, LocalFile,
    MessageKey, MessageStatus, OutgoingMessage, Phase, ReceiptSink, Reconciler, SearchState,
    SenderKind, SnapshotSink, SubscriptionHandle, Update,
};

const PAGE_SIZE: usize = 10;

#[derive(Parser)]
#[command(name = "tandemchat", about = "Tandem conversation core demo shell")]
struct Args {
    /// Directory holding tandem_config.json (optional).
    #[arg(long, default_value = ".")]
    data_dir: String,

    /// Conversation id to mount.
    #[arg(long, default_value = "demo")]
    conversation: String,
}

struct MessageSub {
    depth: u32,
    sink: SnapshotSink,
    active: Arc<AtomicBool>,
}

struct ReceiptSub {
    sink: ReceiptSink,
    active: Arc<AtomicBool>,
}

struct CancelFlag(Arc<AtomicBool>);

impl SubscriptionHandle for CancelFlag {
    fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Whole backend in memory: realtime store, credential resolver, and
/// attachment service rolled into one.
struct MemoryBackend {
    key: MessageKey,
    messages: Mutex<Vec<CipherMessage>>,
    message_subs: Mutex<Vec<MessageSub>>,
    receipt_subs: Mutex<Vec<ReceiptSub>>,
    next_id: AtomicU64,
    next_file_id: AtomicU64,
}

impl MemoryBackend {
    fn new(key: MessageKey) -> Arc<Self> {
        let backend = Arc::new(Self {
            key,
            messages: Mutex::new(vec![]),
            message_subs: Mutex::new(vec![]),
            receipt_subs: Mutex::new(vec![]),
            next_id: AtomicU64::new(1),
            next_file_id: AtomicU64::new(1),
        });
        backend.seed();
        backend
    }

    fn seed(&self) {
        let yesterday = now_seconds() - 86_400;
        self.append(SenderKind::System, None, "Conversation opened".to_string(), yesterday);
        let sealed = tandem_core::crypto::seal(&self.key, "Hello! I looked at the offer you sent.")
            .expect("seal");
        self.append(
            SenderKind::Beneficiary,
            Some(sealed.iv),
            sealed.ciphertext,
            yesterday + 60,
        );
    }

    fn append(&self, sender: SenderKind, iv: Option<String>, content: String, sent_at: i64) {
        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.messages.lock().unwrap().push(CipherMessage {
            id,
            sender,
            content,
            iv,
            sent_at,
            status: MessageStatus::Sent,
            attachment: None,
            shared: None,
        });
    }

    fn window(&self, depth: u32) -> Vec<CipherMessage> {
        let messages = self.messages.lock().unwrap();
        let keep = (depth as usize) * PAGE_SIZE;
        let skip = messages.len().saturating_sub(keep);
        messages.iter().skip(skip).cloned().collect()
    }

    fn notify(&self) {
        let subs = self.message_subs.lock().unwrap();
        for sub in subs.iter().filter(|s| s.active.load(Ordering::SeqCst)) {
            (sub.sink)(self.window(sub.depth));
        }
    }

    /// Simulate the beneficiary typing a reply.
    fn reply(&self, text: &str) {
        let sealed = tandem_core::crypto::seal(&self.key, text).expect("seal");
        self.append(
            SenderKind::Beneficiary,
            Some(sealed.iv),
            sealed.ciphertext,
            now_seconds(),
        );
        self.notify();
    }

    /// Simulate the beneficiary reading everything up to now.
    fn mark_peer_read(&self) {
        let now = now_seconds();
        let subs = self.receipt_subs.lock().unwrap();
        for sub in subs.iter().filter(|s| s.active.load(Ordering::SeqCst)) {
            (sub.sink)(now);
        }
    }
}

#[async_trait]
impl CredentialResolver for MemoryBackend {
    async fn resolve(&self, _conversation_id: &str) -> BackendResult<Credentials> {
        Ok(Credentials {
            access_token: "local".to_string(),
            cipher_key: self.key.clone(),
        })
    }
}

#[async_trait]
impl ChatStore for MemoryBackend {
    fn subscribe_messages(
        &self,
        _conversation_id: &str,
        page_depth: u32,
        sink: SnapshotSink,
    ) -> Box<dyn SubscriptionHandle> {
        sink(self.window(page_depth));
        let active = Arc::new(AtomicBool::new(true));
        self.message_subs.lock().unwrap().push(MessageSub {
            depth: page_depth,
            sink,
            active: active.clone(),
        });
        Box::new(CancelFlag(active))
    }

    fn subscribe_read_receipt(
        &self,
        _conversation_id: &str,
        sink: ReceiptSink,
    ) -> Box<dyn SubscriptionHandle> {
        let active = Arc::new(AtomicBool::new(true));
        self.receipt_subs.lock().unwrap().push(ReceiptSub {
            sink,
            active: active.clone(),
        });
        Box::new(CancelFlag(active))
    }

    async fn mark_read(&self, _conversation_id: &str) -> BackendResult<()> {
        Ok(())
    }

    async fn send_message(&self, message: OutgoingMessage) -> BackendResult<()> {
        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.messages.lock().unwrap().push(CipherMessage {
            id,
            sender: SenderKind::Counselor,
            content: message.ciphertext,
            iv: Some(message.iv),
            sent_at: now_seconds(),
            status: MessageStatus::Sent,
            attachment: message.attachment,
            shared: None,
        });
        self.notify();
        Ok(())
    }

    async fn modify_message(
        &self,
        _conversation_id: &str,
        original: CipherMessage,
        new_ciphertext: String,
        new_iv: String,
    ) -> BackendResult<()> {
        {
            let mut messages = self.messages.lock().unwrap();
            if let Some(m) = messages.iter_mut().find(|m| m.id == original.id) {
                m.content = new_ciphertext;
                m.iv = Some(new_iv);
                m.status = MessageStatus::Edited;
            }
        }
        self.notify();
        Ok(())
    }

    async fn delete_message(&self, _conversation_id: &str, message_id: &str) -> BackendResult<()> {
        {
            let mut messages = self.messages.lock().unwrap();
            if let Some(m) = messages.iter_mut().find(|m| m.id == message_id) {
                m.status = MessageStatus::Deleted;
            }
        }
        self.notify();
        Ok(())
    }

    async fn fetch_all_messages(&self, _conversation_id: &str) -> BackendResult<Vec<CipherMessage>> {
        Ok(self.messages.lock().unwrap().clone())
    }
}

#[async_trait]
impl AttachmentStore for MemoryBackend {
    async fn upload(
        &self,
        _conversation_ids: &[String],
        file: &LocalFile,
    ) -> BackendResult<AttachmentRef> {
        Ok(AttachmentRef {
            id: format!("file-{}", self.next_file_id.fetch_add(1, Ordering::SeqCst)),
            name: file.name.clone(),
        })
    }

    async fn delete(&self, _attachment_id: &str) -> BackendResult<()> {
        Ok(())
    }
}

struct Printer;

impl Reconciler for Printer {
    fn reconcile(&self, update: Update) {
        match update {
            Update::FullState(state) => print_state(&state),
            Update::PhaseChanged { phase, .. } => println!("-- phase: {phase:?}"),
            Update::TimelineChanged {
                timeline,
                no_more_history,
                ..
            } => {
                for day in &timeline {
                    println!("== {} ==", day.date);
                    for m in &day.messages {
                        let who = match m.sender {
                            SenderKind::Counselor => "me",
                            SenderKind::Beneficiary => "them",
                            SenderKind::System => "sys",
                        };
                        let mut line = format!("  [{}] {who}: {}", m.id, m.content);
                        if m.status == MessageStatus::Edited {
                            line.push_str(" (edited)");
                        }
                        if m.status == MessageStatus::Deleted {
                            line = format!("  [{}] {who}: <deleted>", m.id);
                        }
                        if m.seen_by_peer {
                            line.push_str(" ✓✓");
                        }
                        println!("{line}");
                    }
                }
                if no_more_history {
                    println!("-- beginning of history --");
                }
            }
            Update::ComposerChanged { composer, .. } => {
                if let Some(e) = &composer.error {
                    println!("-- composer error: {e}");
                }
                if let Some(e) = &composer.attachment_error {
                    println!("-- attachment error: {e}");
                }
                if let Some(a) = &composer.attachment {
                    println!("-- attachment pending: {} ({})", a.name, a.id);
                }
            }
            Update::SearchChanged { search, .. } => match search {
                SearchState::NoResults { term } => println!("-- no results for \"{term}\""),
                SearchState::Results { term, hits } => {
                    println!("-- {} result(s) for \"{term}\":", hits.len());
                    for hit in hits {
                        println!("  [{}] {}", hit.message.id, hit.message.content);
                    }
                }
                SearchState::Failed { message, .. } => println!("-- search failed: {message}"),
                _ => {}
            },
            Update::ReadReceiptChanged {
                peer_last_read_at, ..
            } => {
                if peer_last_read_at.is_some() {
                    println!("-- peer read receipt updated");
                }
            }
            Update::ErrorChanged { last_error, .. } => {
                if let Some(e) = last_error {
                    println!("-- error: {e}");
                }
            }
            Update::BusyChanged { .. } => {}
        }
    }
}

fn print_state(state: &ConversationState) {
    match &state.phase {
        Phase::Failed { message } => println!("-- conversation unavailable: {message}"),
        phase => println!("-- phase: {phase:?}"),
    }
}

const HELP: &str = "\
commands:
  <text>           send a message
  /older           load one more page of history
  /search <term>   search the conversation
  /clearsearch     leave search mode
  /edit <id>       edit one of your messages
  /canceledit      abandon the pending edit
  /delete <id>     delete one of your messages
  /attach <path>   upload a file and attach it to the next send
  /remove          remove the pending attachment
  /focus | /blur   toggle input focus (drives mark-read)
  /reply <text>    simulate a beneficiary reply
  /read            simulate the beneficiary reading everything
  /quit";

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let backend = MemoryBackend::new(MessageKey::generate());
    let config = ClientConfig::load(&args.data_dir);

    let client = ChatClient::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        config,
    );
    client.listen_for_updates(Box::new(Printer));
    client.dispatch(Action::Open {
        conversation_id: args.conversation,
    });
    client.dispatch(Action::ComposerFocused);

    println!("{HELP}");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ') {
            _ if line == "/quit" => break,
            _ if line == "/older" => client.dispatch(Action::LoadOlder),
            _ if line == "/clearsearch" => client.dispatch(Action::ClearSearch),
            _ if line == "/canceledit" => client.dispatch(Action::CancelEdit),
            _ if line == "/remove" => client.dispatch(Action::RemoveAttachment),
            _ if line == "/focus" => client.dispatch(Action::ComposerFocused),
            _ if line == "/blur" => client.dispatch(Action::ComposerBlurred),
            _ if line == "/read" => backend.mark_peer_read(),
            _ if line == "/help" => println!("{HELP}"),
            Some(("/search", term)) => client.dispatch(Action::Search {
                term: term.to_string(),
            }),
            Some(("/edit", id)) => client.dispatch(Action::EditMessage {
                message_id: id.to_string(),
            }),
            Some(("/delete", id)) => client.dispatch(Action::DeleteMessage {
                message_id: id.to_string(),
            }),
            Some(("/attach", path)) => {
                let name = path.rsplit('/').next().unwrap_or(path).to_string();
                client.dispatch(Action::AttachFile {
                    file: LocalFile {
                        name,
                        path: path.to_string(),
                    },
                });
            }
            Some(("/reply", text)) => backend.reply(text),
            _ => {
                client.dispatch(Action::DraftChanged {
                    text: line.to_string(),
                });
                client.dispatch(Action::Submit);
            }
        }

        // Give the actor a beat so output lands before the next prompt.
        std::thread::sleep(std::time::Duration::from_millis(120));
    }

    client.dispatch(Action::Close);
    Ok(())
}
