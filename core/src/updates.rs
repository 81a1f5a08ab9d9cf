use crate::actions::Action;
use crate::backend::{BackendError, CipherMessage, Credentials};
use crate::state::{
    AttachmentRef, BusyState, ComposerState, ConversationState, DayMessages, Phase, SearchHit,
    SearchState,
};

#[derive(Clone, Debug)]
pub enum Update {
    FullState(ConversationState),
    PhaseChanged {
        rev: u64,
        phase: Phase,
    },
    TimelineChanged {
        rev: u64,
        timeline: Vec<DayMessages>,
        no_more_history: bool,
    },
    ReadReceiptChanged {
        rev: u64,
        peer_last_read_at: Option<i64>,
    },
    ComposerChanged {
        rev: u64,
        composer: ComposerState,
    },
    SearchChanged {
        rev: u64,
        search: SearchState,
    },
    BusyChanged {
        rev: u64,
        busy: BusyState,
    },
    ErrorChanged {
        rev: u64,
        last_error: Option<String>,
    },
}

impl Update {
    pub fn rev(&self) -> u64 {
        match self {
            Update::FullState(s) => s.rev,
            Update::PhaseChanged { rev, .. } => *rev,
            Update::TimelineChanged { rev, .. } => *rev,
            Update::ReadReceiptChanged { rev, .. } => *rev,
            Update::ComposerChanged { rev, .. } => *rev,
            Update::SearchChanged { rev, .. } => *rev,
            Update::BusyChanged { rev, .. } => *rev,
            Update::ErrorChanged { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(Action),
    Internal(Box<InternalEvent>),
}

/// Subscription deliveries and async collaborator results re-entering the
/// actor. Subscription events carry the generation they were opened under;
/// unary completions carry the session epoch. Mismatches are discarded.
#[derive(Debug)]
pub enum InternalEvent {
    CredentialsResolved {
        epoch: u64,
        conversation_id: String,
        result: Result<Credentials, BackendError>,
    },
    MessagesSnapshot {
        generation: u64,
        messages: Vec<CipherMessage>,
    },
    ReadReceiptUpdated {
        generation: u64,
        last_read_at: i64,
    },
    MarkReadFinished {
        result: Result<(), BackendError>,
    },
    SendFinished {
        epoch: u64,
        result: Result<(), BackendError>,
    },
    ModifyFinished {
        epoch: u64,
        message_id: String,
        result: Result<(), BackendError>,
    },
    DeleteFinished {
        epoch: u64,
        message_id: String,
        result: Result<(), BackendError>,
    },
    SearchFinished {
        epoch: u64,
        term: String,
        result: Result<Vec<SearchHit>, BackendError>,
    },
    UploadFinished {
        epoch: u64,
        result: Result<AttachmentRef, BackendError>,
    },
    RemoveAttachmentFinished {
        epoch: u64,
        attachment_id: String,
        result: Result<(), BackendError>,
    },
}
