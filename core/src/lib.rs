//! Conversation view-model core for the Tandem counselor messaging client.
//!
//! One `ChatClient` owns one conversation thread at a time: timeline paging,
//! composing/editing, attachments, search, and read receipts. All state
//! lives in a single actor; the UI dispatches [`Action`]s and reconciles
//! rev-tagged [`Update`]s (or re-reads the full [`ConversationState`]
//! snapshot at any time). The realtime store, credential resolver, and
//! attachment service are injected as trait objects; see [`backend`].

mod actions;
mod backend;
mod core;
pub mod crypto;
mod logging;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::Action;
pub use backend::*;
pub use crate::core::{ClientConfig, ATTACHMENT_ONLY_TEXT, UNREADABLE_MESSAGE_TEXT};
pub use crypto::{CryptoError, MessageKey, Sealed};
pub use state::*;
pub use updates::*;

/// UI-side receiver for state updates.
pub trait Reconciler: Send + Sync + 'static {
    fn reconcile(&self, update: Update);
}

pub struct ChatClient {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<Update>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<ConversationState>>,
}

impl ChatClient {
    /// All collaborators are explicit constructor parameters; there is no
    /// ambient context, so the whole client runs against fakes in tests.
    pub fn new(
        store: Arc<dyn ChatStore>,
        resolver: Arc<dyn CredentialResolver>,
        attachments: Arc<dyn AttachmentStore>,
        config: ClientConfig,
    ) -> Arc<Self> {
        logging::init_logging();
        tracing::info!("ChatClient::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(ConversationState::empty()));

        // Actor loop thread; all mutable state lives inside it.
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = crate::core::ConversationCore::new(
                update_tx,
                core_tx_for_core,
                shared_for_core,
                store,
                resolver,
                attachments,
                config,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }

    pub fn state(&self) -> ConversationState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: Action) {
        // Contract: never block the caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn Reconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
