// Composer side effects: send, edit, soft delete, attachments.

use super::*;
use crate::backend::{LocalFile, OutgoingMessage};
use crate::state::{EditTarget, MessageStatus, SenderKind};

/// Body used when a message carries an attachment and no typed text.
pub const ATTACHMENT_ONLY_TEXT: &str = "Attachment shared";

impl ConversationCore {
    pub(super) fn submit_composer(&mut self) {
        if self.state.composer.editing.is_some() {
            self.submit_edit();
            return;
        }

        let Some((conversation_id, credentials)) = self.current_session() else {
            return;
        };
        let conversation_id = conversation_id.to_string();
        let key = credentials.cipher_key.clone();

        let text = self.state.composer.text.trim().to_string();
        let attachment = self.state.composer.attachment.clone();
        if text.is_empty() && attachment.is_none() {
            // Prevent empty sends entirely; the collaborator is not called.
            return;
        }
        let body = if text.is_empty() {
            ATTACHMENT_ONLY_TEXT.to_string()
        } else {
            text
        };

        // Plaintext never crosses the port.
        let sealed = match crypto::seal(&key, &body) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.state.composer.error = Some(format!("encrypt failed: {e}"));
                self.emit_composer();
                return;
            }
        };
        let outgoing = OutgoingMessage {
            conversation_id,
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            attachment,
        };

        let epoch = self.epoch;
        let store = self.store.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        self.set_busy(|b| b.sending = true);
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "send", async {
                store.send_message(outgoing).await
            })
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SendFinished {
                epoch,
                result,
            })));
        });
    }

    pub(super) fn apply_send_finished(&mut self, epoch: u64, result: BackendResult<()>) {
        if epoch != self.epoch {
            return;
        }
        self.set_busy(|b| b.sending = false);
        match result {
            Ok(()) => {
                // The message itself arrives with the next snapshot; no
                // optimistic insert.
                self.state.composer.text = String::new();
                self.state.composer.attachment = None;
                self.state.composer.error = None;
                self.emit_composer();
                self.mark_read();
            }
            Err(e) => {
                tracing::warn!(%e, "send failed");
                // Keep the draft so the user can retry.
                self.state.composer.error = Some(e.to_string());
                self.emit_composer();
            }
        }
    }

    pub(super) fn begin_edit(&mut self, message_id: &str) {
        if self.session.is_none() {
            return;
        }
        let Some(message) = self.find_message(message_id) else {
            return;
        };
        if message.sender != SenderKind::Counselor || message.status == MessageStatus::Deleted {
            return;
        }
        let original_content = message.content.clone();
        self.state.composer.editing = Some(EditTarget {
            message_id: message_id.to_string(),
            original_content: original_content.clone(),
        });
        self.state.composer.text = original_content;
        self.state.composer.error = None;
        self.emit_composer();
    }

    pub(super) fn cancel_edit(&mut self) {
        if self.state.composer.editing.is_none() {
            return;
        }
        // Back to an empty composer, not to the original text.
        self.state.composer.editing = None;
        self.state.composer.text = String::new();
        self.emit_composer();
    }

    fn submit_edit(&mut self) {
        let Some((conversation_id, credentials)) = self.current_session() else {
            return;
        };
        let conversation_id = conversation_id.to_string();
        let key = credentials.cipher_key.clone();
        let Some(target) = self.state.composer.editing.clone() else {
            return;
        };

        let new_content = self.state.composer.text.trim().to_string();
        if new_content.is_empty() {
            return;
        }
        let Some(original) = self.raw_message(&target.message_id).cloned() else {
            self.state.composer.error = Some("message is no longer available".to_string());
            self.emit_composer();
            return;
        };

        let sealed = match crypto::seal(&key, &new_content) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.state.composer.error = Some(format!("encrypt failed: {e}"));
                self.emit_composer();
                return;
            }
        };

        let epoch = self.epoch;
        let message_id = target.message_id.clone();
        let store = self.store.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        self.set_busy(|b| b.sending = true);
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "modify", async {
                store
                    .modify_message(&conversation_id, original, sealed.ciphertext, sealed.iv)
                    .await
            })
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ModifyFinished {
                epoch,
                message_id,
                result,
            })));
        });
    }

    pub(super) fn apply_modify_finished(
        &mut self,
        epoch: u64,
        message_id: &str,
        result: BackendResult<()>,
    ) {
        if epoch != self.epoch {
            return;
        }
        self.set_busy(|b| b.sending = false);
        match result {
            Ok(()) => {
                self.state.composer.editing = None;
                self.state.composer.text = String::new();
                self.state.composer.error = None;
                self.emit_composer();
            }
            Err(e) => {
                tracing::warn!(message_id, %e, "modify failed");
                self.state.composer.error = Some(e.to_string());
                self.emit_composer();
            }
        }
    }

    pub(super) fn delete_message(&mut self, message_id: &str) {
        let Some((conversation_id, _)) = self.current_session() else {
            return;
        };
        let conversation_id = conversation_id.to_string();
        let Some(message) = self.find_message(message_id) else {
            return;
        };
        if message.sender != SenderKind::Counselor || message.status == MessageStatus::Deleted {
            return;
        }

        let epoch = self.epoch;
        let message_id = message_id.to_string();
        let store = self.store.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "delete", async {
                store.delete_message(&conversation_id, &message_id).await
            })
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::DeleteFinished {
                epoch,
                message_id,
                result,
            })));
        });
    }

    pub(super) fn apply_delete_finished(
        &mut self,
        epoch: u64,
        message_id: &str,
        result: BackendResult<()>,
    ) {
        if epoch != self.epoch {
            return;
        }
        match result {
            // The tombstone arrives with the next snapshot; the row is
            // never removed locally.
            Ok(()) => tracing::debug!(message_id, "message deleted"),
            Err(e) => {
                tracing::warn!(message_id, %e, "delete failed");
                self.state.composer.error = Some(e.to_string());
                self.emit_composer();
            }
        }
    }

    pub(super) fn attach_file(&mut self, file: LocalFile) {
        let Some((conversation_id, _)) = self.current_session() else {
            return;
        };
        let conversation_ids = vec![conversation_id.to_string()];

        if self.state.composer.attachment_error.is_some() {
            self.state.composer.attachment_error = None;
            self.emit_composer();
        }

        let epoch = self.epoch;
        let attachments = self.attachments.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        self.set_busy(|b| b.uploading = true);
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "upload", async {
                attachments.upload(&conversation_ids, &file).await
            })
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::UploadFinished {
                epoch,
                result,
            })));
        });
    }

    pub(super) fn apply_upload_finished(
        &mut self,
        epoch: u64,
        result: BackendResult<crate::state::AttachmentRef>,
    ) {
        if epoch != self.epoch {
            return;
        }
        self.set_busy(|b| b.uploading = false);
        match result {
            Ok(reference) => {
                self.state.composer.attachment = Some(reference);
                self.state.composer.attachment_error = None;
                self.emit_composer();
            }
            Err(e) => {
                tracing::warn!(%e, "attachment upload failed");
                // Any previously uploaded attachment stays untouched.
                self.state.composer.attachment_error = Some(e.to_string());
                self.emit_composer();
            }
        }
    }

    pub(super) fn remove_attachment(&mut self) {
        let Some(attachment) = self.state.composer.attachment.clone() else {
            return;
        };

        // Remote delete first; the local reference is cleared only once the
        // service confirms, so a crash mid-operation cannot double-delete.
        let epoch = self.epoch;
        let attachments = self.attachments.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "remove attachment", async {
                attachments.delete(&attachment.id).await
            })
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::RemoveAttachmentFinished {
                    epoch,
                    attachment_id: attachment.id,
                    result,
                },
            )));
        });
    }

    pub(super) fn apply_attachment_removed(
        &mut self,
        epoch: u64,
        attachment_id: &str,
        result: BackendResult<()>,
    ) {
        if epoch != self.epoch {
            return;
        }
        match result {
            Ok(()) => {
                let still_current = self
                    .state
                    .composer
                    .attachment
                    .as_ref()
                    .map(|a| a.id == attachment_id)
                    .unwrap_or(false);
                if still_current {
                    self.state.composer.attachment = None;
                    self.state.composer.attachment_error = None;
                    self.emit_composer();
                }
            }
            Err(e) => {
                tracing::warn!(attachment_id, %e, "attachment removal failed");
                self.state.composer.attachment_error = Some(e.to_string());
                self.emit_composer();
            }
        }
    }
}
