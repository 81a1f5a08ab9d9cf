use crate::backend::LocalFile;

#[derive(Clone, Debug)]
pub enum Action {
    // Lifecycle
    /// Mount a conversation, or switch to another one. Opening the id that
    /// is already mounted is a no-op.
    Open { conversation_id: String },
    Close,

    // Composer
    DraftChanged { text: String },
    ComposerFocused,
    ComposerBlurred,
    /// Send the draft, or submit the pending edit when in edit mode.
    Submit,
    AttachFile { file: LocalFile },
    RemoveAttachment,
    EditMessage { message_id: String },
    CancelEdit,
    DeleteMessage { message_id: String },

    // Timeline
    LoadOlder,
    Search { term: String },
    ClearSearch,

    // UI
    ClearError,
}

impl Action {
    /// Log-safe action tag (never includes draft text or search terms).
    pub fn tag(&self) -> &'static str {
        match self {
            Action::Open { .. } => "Open",
            Action::Close => "Close",
            Action::DraftChanged { .. } => "DraftChanged",
            Action::ComposerFocused => "ComposerFocused",
            Action::ComposerBlurred => "ComposerBlurred",
            Action::Submit => "Submit",
            Action::AttachFile { .. } => "AttachFile",
            Action::RemoveAttachment => "RemoveAttachment",
            Action::EditMessage { .. } => "EditMessage",
            Action::CancelEdit => "CancelEdit",
            Action::DeleteMessage { .. } => "DeleteMessage",
            Action::LoadOlder => "LoadOlder",
            Action::Search { .. } => "Search",
            Action::ClearSearch => "ClearSearch",
            Action::ClearError => "ClearError",
        }
    }
}
