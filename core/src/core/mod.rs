mod composer;
mod config;
mod search;

pub use composer::ATTACHMENT_ONLY_TEXT;
pub use config::ClientConfig;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;

use crate::actions::Action;
use crate::backend::{
    AttachmentStore, BackendError, BackendResult, ChatStore, CipherMessage, CredentialResolver,
    Credentials, ReceiptSink, SnapshotSink, SubscriptionHandle,
};
use crate::crypto;
use crate::state::{
    group_by_day, seen_by_peer, BusyState, ComposerState, ConversationState, Message, Phase,
    SearchState,
};
use crate::updates::{CoreMsg, InternalEvent, Update};

/// Shown in place of a body that cannot be decrypted with the conversation
/// key (key rotation, corrupted payload). The row is kept; dropping it
/// would corrupt paging counts.
pub const UNREADABLE_MESSAGE_TEXT: &str = "This message could not be decrypted";

/// Paging proof: this many consecutive post-`LoadOlder` snapshots without
/// growth mean the history is exhausted.
const NO_GROWTH_LIMIT: u32 = 2;

struct Session {
    conversation_id: String,
    credentials: Credentials,
    message_sub: Option<Box<dyn SubscriptionHandle>>,
    receipt_sub: Option<Box<dyn SubscriptionHandle>>,
}

pub struct ConversationCore {
    pub state: ConversationState,
    rev: u64,

    update_sender: Sender<Update>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<ConversationState>>,

    store: Arc<dyn ChatStore>,
    resolver: Arc<dyn CredentialResolver>,
    attachments: Arc<dyn AttachmentStore>,
    config: ClientConfig,
    runtime: tokio::runtime::Runtime,

    session: Option<Session>,

    // Staleness guards. `generation` is bumped on every teardown and every
    // resubscribe (depth change); subscription sinks carry it and stale
    // deliveries are dropped regardless of collaborator teardown timing.
    // `epoch` is bumped on teardown only; unary completions carry it so a
    // conversation switch invalidates in-flight send/search/upload results
    // without a mere depth change doing so.
    generation: u64,
    epoch: u64,

    page_depth: u32,
    // Growth watch for "no more history" detection.
    last_snapshot_count: usize,
    awaiting_growth: bool,
    no_growth_streak: u32,

    // Latest decrypted snapshot, flat. The day-grouped timeline is always
    // rebuilt fresh from this plus the read receipt, never patched.
    latest_flat: Vec<Message>,
    // Latest wire forms by id, kept so `modify` can hand the backend the
    // original message for version history.
    raw_index: HashMap<String, CipherMessage>,
}

impl ConversationCore {
    pub fn new(
        update_sender: Sender<Update>,
        core_sender: Sender<CoreMsg>,
        shared_state: Arc<RwLock<ConversationState>>,
        store: Arc<dyn ChatStore>,
        resolver: Arc<dyn CredentialResolver>,
        attachments: Arc<dyn AttachmentStore>,
        config: ClientConfig,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: ConversationState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            store,
            resolver,
            attachments,
            config,
            runtime,
            session: None,
            generation: 0,
            epoch: 0,
            page_depth: 1,
            last_snapshot_count: 0,
            awaiting_growth: false,
            no_growth_streak: 0,
            latest_flat: vec![],
            raw_index: HashMap::new(),
        };

        // Ensure ChatClient::state() has an immediately-available snapshot.
        this.commit_state();
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn emit(&mut self, update: Update) {
        self.commit_state();
        let _ = self.update_sender.send(update);
    }

    fn commit_state(&self) {
        let snapshot = self.state.clone();
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot,
            Err(poison) => *poison.into_inner() = snapshot,
        }
    }

    fn emit_full(&mut self) {
        self.next_rev();
        self.emit(Update::FullState(self.state.clone()));
    }

    fn emit_phase(&mut self) {
        let rev = self.next_rev();
        self.emit(Update::PhaseChanged {
            rev,
            phase: self.state.phase.clone(),
        });
    }

    fn emit_timeline(&mut self) {
        let rev = self.next_rev();
        self.emit(Update::TimelineChanged {
            rev,
            timeline: self.state.timeline.clone(),
            no_more_history: self.state.no_more_history,
        });
    }

    fn emit_receipt(&mut self) {
        let rev = self.next_rev();
        self.emit(Update::ReadReceiptChanged {
            rev,
            peer_last_read_at: self.state.peer_last_read_at,
        });
    }

    pub(super) fn emit_composer(&mut self) {
        let rev = self.next_rev();
        self.emit(Update::ComposerChanged {
            rev,
            composer: self.state.composer.clone(),
        });
    }

    pub(super) fn emit_search(&mut self) {
        let rev = self.next_rev();
        self.emit(Update::SearchChanged {
            rev,
            search: self.state.search.clone(),
        });
    }

    fn emit_busy(&mut self) {
        let rev = self.next_rev();
        self.emit(Update::BusyChanged {
            rev,
            busy: self.state.busy.clone(),
        });
    }

    fn emit_error(&mut self) {
        let rev = self.next_rev();
        self.emit(Update::ErrorChanged {
            rev,
            last_error: self.state.last_error.clone(),
        });
    }

    pub(super) fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_busy();
        }
    }

    fn note_error(&mut self, message: impl Into<String>) {
        // Kept in state until the UI explicitly clears it.
        self.state.last_error = Some(message.into());
        self.emit_error();
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Open { conversation_id } => self.open_conversation(conversation_id),
            Action::Close => {
                self.teardown_session();
                self.reset_transient();
                self.state.conversation_id = None;
                self.state.phase = Phase::Idle;
                self.emit_full();
            }

            Action::DraftChanged { text } => {
                if self.state.conversation_id.is_none() {
                    return;
                }
                self.state.composer.text = text;
                self.state.composer.error = None;
                self.emit_composer();
            }
            Action::ComposerFocused => {
                self.state.composer.has_focus = true;
                self.emit_composer();
                self.mark_read();
            }
            Action::ComposerBlurred => {
                self.state.composer.has_focus = false;
                self.emit_composer();
            }
            Action::Submit => self.submit_composer(),
            Action::AttachFile { file } => self.attach_file(file),
            Action::RemoveAttachment => self.remove_attachment(),
            Action::EditMessage { message_id } => self.begin_edit(&message_id),
            Action::CancelEdit => self.cancel_edit(),
            Action::DeleteMessage { message_id } => self.delete_message(&message_id),

            Action::LoadOlder => self.load_older(),
            Action::Search { term } => self.start_search(term),
            Action::ClearSearch => {
                if self.state.search != SearchState::NotSearched {
                    self.state.search = SearchState::NotSearched;
                    self.emit_search();
                }
            }

            Action::ClearError => {
                if self.state.last_error.is_some() {
                    self.state.last_error = None;
                    self.emit_error();
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::CredentialsResolved {
                epoch,
                conversation_id,
                result,
            } => self.apply_credentials(epoch, conversation_id, result),
            InternalEvent::MessagesSnapshot {
                generation,
                messages,
            } => self.apply_snapshot(generation, messages),
            InternalEvent::ReadReceiptUpdated {
                generation,
                last_read_at,
            } => self.apply_read_receipt(generation, last_read_at),
            InternalEvent::MarkReadFinished { result } => {
                // Non-critical; the next focus or snapshot retries implicitly.
                if let Err(e) = result {
                    tracing::debug!(%e, "mark_read failed (ignored)");
                }
            }
            InternalEvent::SendFinished { epoch, result } => self.apply_send_finished(epoch, result),
            InternalEvent::ModifyFinished {
                epoch,
                message_id,
                result,
            } => self.apply_modify_finished(epoch, &message_id, result),
            InternalEvent::DeleteFinished {
                epoch,
                message_id,
                result,
            } => self.apply_delete_finished(epoch, &message_id, result),
            InternalEvent::SearchFinished {
                epoch,
                term,
                result,
            } => self.apply_search_finished(epoch, term, result),
            InternalEvent::UploadFinished { epoch, result } => {
                self.apply_upload_finished(epoch, result)
            }
            InternalEvent::RemoveAttachmentFinished {
                epoch,
                attachment_id,
                result,
            } => self.apply_attachment_removed(epoch, &attachment_id, result),
        }
    }

    // Lifecycle

    fn open_conversation(&mut self, conversation_id: String) {
        let already_mounted = self.state.conversation_id.as_deref() == Some(&conversation_id)
            && !matches!(self.state.phase, Phase::Failed { .. });
        if already_mounted {
            return;
        }

        self.teardown_session();
        self.reset_transient();
        self.state.conversation_id = Some(conversation_id.clone());
        self.state.phase = Phase::Resolving;
        self.emit_full();

        let epoch = self.epoch;
        let resolver = self.resolver.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        tracing::info!(conversation = %conversation_id, "resolving credentials");
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "credential resolution", async {
                resolver.resolve(&conversation_id).await
            })
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::CredentialsResolved {
                    epoch,
                    conversation_id,
                    result,
                },
            )));
        });
    }

    fn apply_credentials(
        &mut self,
        epoch: u64,
        conversation_id: String,
        result: BackendResult<Credentials>,
    ) {
        if epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, "stale credential result dropped");
            return;
        }
        match result {
            Err(e) => {
                tracing::warn!(conversation = %conversation_id, %e, "credential resolution failed");
                self.state.phase = Phase::Failed {
                    message: e.to_string(),
                };
                self.emit_phase();
            }
            Ok(credentials) => {
                self.session = Some(Session {
                    conversation_id,
                    credentials,
                    message_sub: None,
                    receipt_sub: None,
                });
                self.state.phase = Phase::Ready;
                self.open_subscriptions();
                self.mark_read();
                self.emit_phase();
            }
        }
    }

    /// Bumps both staleness guards and cancels any live subscriptions.
    /// Cancellation is synchronous; no delivery for the old generation can
    /// be applied afterwards even if the collaborator misbehaves.
    fn teardown_session(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(sess) = self.session.take() {
            if let Some(sub) = sess.message_sub {
                sub.cancel();
            }
            if let Some(sub) = sess.receipt_sub {
                sub.cancel();
            }
            tracing::debug!(conversation = %sess.conversation_id, "session torn down");
        }
    }

    fn reset_transient(&mut self) {
        self.state.timeline = vec![];
        self.state.no_more_history = false;
        self.state.peer_last_read_at = None;
        self.state.composer = ComposerState::empty();
        self.state.search = SearchState::NotSearched;
        self.state.busy = BusyState::idle();
        self.state.last_error = None;
        self.page_depth = 1;
        self.last_snapshot_count = 0;
        self.awaiting_growth = false;
        self.no_growth_streak = 0;
        self.latest_flat = vec![];
        self.raw_index = HashMap::new();
    }

    fn open_subscriptions(&mut self) {
        let generation = self.generation;
        let depth = self.page_depth;
        let store = self.store.clone();
        let Some(sess) = self.session.as_mut() else {
            return;
        };

        let tx = self.core_sender.clone();
        let message_sink: SnapshotSink = Box::new(move |messages| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MessagesSnapshot {
                generation,
                messages,
            })));
        });
        sess.message_sub = Some(store.subscribe_messages(&sess.conversation_id, depth, message_sink));

        let tx = self.core_sender.clone();
        let receipt_sink: ReceiptSink = Box::new(move |last_read_at| {
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ReadReceiptUpdated {
                    generation,
                    last_read_at,
                },
            )));
        });
        sess.receipt_sub = Some(store.subscribe_read_receipt(&sess.conversation_id, receipt_sink));

        tracing::debug!(
            conversation = %sess.conversation_id,
            depth,
            generation,
            "subscriptions opened"
        );
    }

    // Timeline

    fn load_older(&mut self) {
        if self.session.is_none() || self.state.no_more_history {
            return;
        }

        self.page_depth += 1;
        self.generation = self.generation.wrapping_add(1);
        if let Some(sess) = self.session.as_mut() {
            // Exactly one teardown per resubscription; cancel before the
            // new subscription exists so the two are never live together.
            if let Some(sub) = sess.message_sub.take() {
                sub.cancel();
            }
            if let Some(sub) = sess.receipt_sub.take() {
                sub.cancel();
            }
        }
        self.awaiting_growth = true;
        self.set_busy(|b| b.loading_older = true);
        self.open_subscriptions();
    }

    fn apply_snapshot(&mut self, generation: u64, messages: Vec<CipherMessage>) {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "stale snapshot dropped");
            return;
        }
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let key = sess.credentials.cipher_key.clone();

        let count = messages.len();
        let mut raw_index = HashMap::with_capacity(count);
        let mut flat = Vec::with_capacity(count);
        let mut undecryptable = 0usize;
        for raw in messages {
            let content = match &raw.iv {
                Some(iv) => match crypto::open(&key, &raw.content, iv) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(message_id = %raw.id, %e, "message decrypt failed");
                        undecryptable += 1;
                        UNREADABLE_MESSAGE_TEXT.to_string()
                    }
                },
                None => raw.content.clone(),
            };
            flat.push(Message {
                id: raw.id.clone(),
                sender: raw.sender.clone(),
                content,
                iv: raw.iv.clone(),
                sent_at: raw.sent_at,
                status: raw.status.clone(),
                attachment: raw.attachment.clone(),
                shared: raw.shared.clone(),
                seen_by_peer: false,
            });
            raw_index.insert(raw.id.clone(), raw);
        }
        self.latest_flat = flat;
        self.raw_index = raw_index;

        if self.awaiting_growth {
            self.awaiting_growth = false;
            if count <= self.last_snapshot_count {
                self.no_growth_streak += 1;
                if self.no_growth_streak >= NO_GROWTH_LIMIT {
                    self.state.no_more_history = true;
                    tracing::info!(count, "history exhausted");
                }
            } else {
                self.no_growth_streak = 0;
            }
        }
        self.last_snapshot_count = count;

        self.set_busy(|b| b.loading_older = false);
        self.rebuild_timeline();
        self.emit_timeline();
        if undecryptable > 0 {
            self.note_error(format!("{undecryptable} message(s) could not be decrypted"));
        }

        if self.state.composer.has_focus {
            self.mark_read();
        }
    }

    fn apply_read_receipt(&mut self, generation: u64, last_read_at: i64) {
        if generation != self.generation {
            return;
        }
        if self.state.peer_last_read_at == Some(last_read_at) {
            return;
        }
        self.state.peer_last_read_at = Some(last_read_at);
        self.rebuild_timeline();
        self.emit_receipt();
        self.emit_timeline();
    }

    fn rebuild_timeline(&mut self) {
        let receipt = self.state.peer_last_read_at;
        let messages: Vec<Message> = self
            .latest_flat
            .iter()
            .cloned()
            .map(|mut m| {
                m.seen_by_peer = seen_by_peer(&m.sender, m.sent_at, receipt);
                m
            })
            .collect();
        self.state.timeline = group_by_day(messages, &chrono::Local);
    }

    /// Fire-and-forget; only triggered by mount, a successful send, focus
    /// gain, or a snapshot arriving while the input has focus. Failures are
    /// swallowed (logged at debug).
    pub(super) fn mark_read(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let conversation_id = sess.conversation_id.clone();
        let store = self.store.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "mark_read", async {
                store.mark_read(&conversation_id).await
            })
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MarkReadFinished {
                result,
            })));
        });
    }

    // Helpers shared with the composer/search extension impls.

    pub(super) fn current_session(&self) -> Option<(&str, &Credentials)> {
        self.session
            .as_ref()
            .map(|s| (s.conversation_id.as_str(), &s.credentials))
    }

    pub(super) fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.latest_flat.iter().find(|m| m.id == message_id)
    }

    pub(super) fn raw_message(&self, message_id: &str) -> Option<&CipherMessage> {
        self.raw_index.get(message_id)
    }
}

/// Wrap a unary collaborator call in the configured deadline. `None`
/// disables the deadline entirely.
pub(super) async fn with_timeout<T, F>(
    timeout: Option<Duration>,
    operation: &str,
    fut: F,
) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(operation)),
        },
        None => fut.await,
    }
}
