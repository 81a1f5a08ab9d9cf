// Client-side search: fetch the full history, decrypt, scan for spans.
// A separate mode entirely; the live subscription is never touched.

use super::*;
use crate::crypto::MessageKey;
use crate::state::{match_spans, MessageStatus, SearchHit};

impl ConversationCore {
    pub(super) fn start_search(&mut self, term: String) {
        let term = term.trim().to_string();
        if term.is_empty() {
            return;
        }
        let Some((conversation_id, credentials)) = self.current_session() else {
            return;
        };
        let conversation_id = conversation_id.to_string();
        let key = credentials.cipher_key.clone();

        self.state.search = SearchState::Searching { term: term.clone() };
        self.emit_search();

        let epoch = self.epoch;
        let store = self.store.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.call_timeout();
        self.runtime.spawn(async move {
            let result = with_timeout(timeout, "search", async {
                store.fetch_all_messages(&conversation_id).await
            })
            .await
            .map(|messages| scan_messages(messages, &key, &term));
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SearchFinished {
                epoch,
                term,
                result,
            })));
        });
    }

    pub(super) fn apply_search_finished(
        &mut self,
        epoch: u64,
        term: String,
        result: BackendResult<Vec<SearchHit>>,
    ) {
        if epoch != self.epoch {
            return;
        }
        // Only the search the UI is still waiting on may land.
        match &self.state.search {
            SearchState::Searching { term: current } if *current == term => {}
            _ => return,
        }

        self.state.search = match result {
            Ok(hits) if hits.is_empty() => SearchState::NoResults { term },
            Ok(hits) => SearchState::Results { term, hits },
            Err(e) => {
                tracing::warn!(%e, "search failed");
                SearchState::Failed {
                    term,
                    message: e.to_string(),
                }
            }
        };
        self.emit_search();
    }
}

fn scan_messages(messages: Vec<CipherMessage>, key: &MessageKey, term: &str) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = Vec::new();
    for raw in messages {
        // Tombstones have no searchable body.
        if raw.status == MessageStatus::Deleted {
            continue;
        }
        let content = match &raw.iv {
            Some(iv) => match crypto::open(key, &raw.content, iv) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(message_id = %raw.id, %e, "skipping undecryptable message in search");
                    continue;
                }
            },
            None => raw.content.clone(),
        };
        let matches = match_spans(&content, term);
        if matches.is_empty() {
            continue;
        }
        hits.push(SearchHit {
            message: Message {
                id: raw.id,
                sender: raw.sender,
                content,
                iv: raw.iv,
                sent_at: raw.sent_at,
                status: raw.status,
                attachment: raw.attachment,
                shared: raw.shared,
                seen_by_peer: false,
            },
            matches,
        });
    }
    hits.sort_by(|a, b| {
        a.message
            .sent_at
            .cmp(&b.message.sent_at)
            .then_with(|| a.message.id.cmp(&b.message.id))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::seal;
    use crate::state::SenderKind;

    fn encrypted(key: &MessageKey, id: &str, text: &str, sent_at: i64) -> CipherMessage {
        let sealed = seal(key, text).unwrap();
        CipherMessage {
            id: id.to_string(),
            sender: SenderKind::Beneficiary,
            content: sealed.ciphertext,
            iv: Some(sealed.iv),
            sent_at,
            status: MessageStatus::Sent,
            attachment: None,
            shared: None,
        }
    }

    #[test]
    fn scan_orders_hits_by_creation_time() {
        let key = MessageKey::generate();
        let hits = scan_messages(
            vec![
                encrypted(&key, "b", "tchoupi goes swimming", 200),
                encrypted(&key, "a", "hello Tchoupi", 100),
                encrypted(&key, "c", "unrelated", 300),
            ],
            &key,
            "tchoupi",
        );
        let ids: Vec<&str> = hits.iter().map(|h| h.message.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].matches.len(), 1);
    }

    #[test]
    fn scan_skips_tombstones() {
        let key = MessageKey::generate();
        let mut deleted = encrypted(&key, "d", "tchoupi", 100);
        deleted.status = MessageStatus::Deleted;
        assert!(scan_messages(vec![deleted], &key, "tchoupi").is_empty());
    }

    #[test]
    fn scan_matches_plaintext_system_messages() {
        let key = MessageKey::generate();
        let system = CipherMessage {
            id: "s".to_string(),
            sender: SenderKind::System,
            content: "Conversation transferred to Tchoupi".to_string(),
            iv: None,
            sent_at: 50,
            status: MessageStatus::Sent,
            attachment: None,
            shared: None,
        };
        let hits = scan_messages(vec![system], &key, "tchoupi");
        assert_eq!(hits.len(), 1);
    }
}
