use chrono::{NaiveDate, TimeZone};

/// Who authored a message. The local user of this client is always the
/// counselor; `System` messages are produced by the backend itself
/// (caseload transfers, session reminders) and are never encrypted.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Counselor,
    Beneficiary,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Edited,
    /// Soft delete: the row stays in the timeline as a tombstone.
    Deleted,
}

/// Structured reference shared into the conversation alongside (or instead
/// of) plain text: a job offer, a calendar event, a job event, or a session.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SharedRef {
    JobOffer { id: String, title: String },
    Event { id: String, title: String },
    JobEvent { id: String, title: String },
    Session { id: String, title: String },
}

/// Reference to a file held by the attachment service.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub name: String,
}

/// A decrypted message as rendered by the UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub sender: SenderKind,
    pub content: String,
    /// Wire IV the content was encrypted under; `None` for system messages.
    pub iv: Option<String>,
    /// Creation time, epoch seconds.
    pub sent_at: i64,
    pub status: MessageStatus,
    pub attachment: Option<AttachmentRef>,
    pub shared: Option<SharedRef>,
    pub seen_by_peer: bool,
}

/// One calendar day of messages, ascending by creation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DayMessages {
    pub date: NaiveDate,
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No conversation mounted.
    Idle,
    /// Credentials are being resolved for the mounted conversation.
    Resolving,
    Ready,
    /// Credential resolution failed; blocking, not retried automatically.
    Failed { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditTarget {
    pub message_id: String,
    /// Plaintext at the moment editing started, kept so the backend can
    /// version the previous content.
    pub original_content: String,
}

/// Transient composer state. Fully reset whenever the conversation identity
/// changes, even mid-composition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposerState {
    pub text: String,
    pub attachment: Option<AttachmentRef>,
    pub editing: Option<EditTarget>,
    pub has_focus: bool,
    /// Last send/modify/delete failure, shown adjacent to the composer.
    pub error: Option<String>,
    /// Last upload/remove failure, shown near the attach control.
    pub attachment_error: Option<String>,
}

impl ComposerState {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            attachment: None,
            editing: None,
            has_focus: false,
            error: None,
            attachment_error: None,
        }
    }
}

/// Byte span into a message's plaintext, for highlight rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchSpan {
    pub start: u32,
    pub end: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub message: Message,
    pub matches: Vec<MatchSpan>,
}

/// Search is a separate, non-live mode; "searched, found nothing" is
/// distinct from "not yet searched" and from "search failed".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchState {
    NotSearched,
    Searching { term: String },
    NoResults { term: String },
    Results { term: String, hits: Vec<SearchHit> },
    Failed { term: String, message: String },
}

/// "In flight" flags for long-ish operations that the UI should reflect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub sending: bool,
    pub uploading: bool,
    pub loading_older: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            sending: false,
            uploading: false,
            loading_older: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationState {
    pub rev: u64,
    pub conversation_id: Option<String>,
    pub phase: Phase,
    pub timeline: Vec<DayMessages>,
    /// Set once paging has proven there is nothing older to load.
    pub no_more_history: bool,
    /// Counterpart's last-read timestamp, epoch seconds.
    pub peer_last_read_at: Option<i64>,
    pub composer: ComposerState,
    pub search: SearchState,
    pub busy: BusyState,
    pub last_error: Option<String>,
}

impl ConversationState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            conversation_id: None,
            phase: Phase::Idle,
            timeline: vec![],
            no_more_history: false,
            peer_last_read_at: None,
            composer: ComposerState::empty(),
            search: SearchState::NotSearched,
            busy: BusyState::idle(),
            last_error: None,
        }
    }
}

/// Group a flat, possibly-unordered snapshot into calendar-day buckets.
///
/// Messages are sorted ascending by creation time (ties broken by id so the
/// result is deterministic), then bucketed by the calendar day of `tz`.
/// Buckets come out ascending by date. Always builds a fresh list; callers
/// must never patch a previously returned one in place.
pub fn group_by_day<Tz: TimeZone>(mut messages: Vec<Message>, tz: &Tz) -> Vec<DayMessages> {
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));

    let mut days: Vec<DayMessages> = Vec::new();
    for message in messages {
        let Some(local) = tz.timestamp_opt(message.sent_at, 0).earliest() else {
            tracing::warn!(
                message_id = %message.id,
                sent_at = message.sent_at,
                "message timestamp out of range, skipped"
            );
            continue;
        };
        let date = local.date_naive();
        match days.last_mut() {
            Some(day) if day.date == date => day.messages.push(message),
            _ => days.push(DayMessages {
                date,
                messages: vec![message],
            }),
        }
    }
    days
}

/// True when the counterpart has read `sent_at` according to the receipt.
/// Only the counselor's own messages carry a "seen" marker.
pub fn seen_by_peer(sender: &SenderKind, sent_at: i64, peer_last_read_at: Option<i64>) -> bool {
    matches!(sender, SenderKind::Counselor)
        && peer_last_read_at.map(|read| read >= sent_at).unwrap_or(false)
}

/// Scan `content` for case-insensitive occurrences of `term` and return
/// non-overlapping byte spans into the original string.
pub fn match_spans(content: &str, term: &str) -> Vec<MatchSpan> {
    let needle = term.to_lowercase();
    if needle.is_empty() {
        return vec![];
    }

    // Lowercased haystack plus, per lowered byte, the original byte offset
    // of the character it came from. A trailing sentinel maps one-past-the-
    // end so span ends land on character boundaries of the original.
    let mut lowered = String::with_capacity(content.len());
    let mut origin: Vec<usize> = Vec::with_capacity(content.len() + 1);
    for (pos, ch) in content.char_indices() {
        for low in ch.to_lowercase() {
            let before = lowered.len();
            lowered.push(low);
            for _ in before..lowered.len() {
                origin.push(pos);
            }
        }
    }
    origin.push(content.len());

    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(found) = lowered[from..].find(&needle) {
        let start = from + found;
        let end = start + needle.len();
        spans.push(MatchSpan {
            start: origin[start] as u32,
            end: origin[end] as u32,
        });
        from = end;
    }
    spans
}

pub fn now_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: &str, sent_at: i64) -> Message {
        Message {
            id: id.to_string(),
            sender: SenderKind::Counselor,
            content: format!("content of {id}"),
            iv: Some("00".repeat(24)),
            sent_at,
            status: MessageStatus::Sent,
            attachment: None,
            shared: None,
            seen_by_peer: false,
        }
    }

    const DAY: i64 = 86_400;

    #[test]
    fn grouping_buckets_by_calendar_day_ascending() {
        // Two on day 0, one on day 2, delivered out of order.
        let days = group_by_day(
            vec![msg("c", 2 * DAY + 60), msg("b", 120), msg("a", 60)],
            &Utc,
        );

        assert_eq!(days.len(), 2);
        assert!(days[0].date < days[1].date);
        assert_eq!(
            days[0].messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(days[1].messages[0].id, "c");
    }

    #[test]
    fn grouping_orders_within_a_bucket_by_creation_time() {
        let days = group_by_day(vec![msg("b", 300), msg("a", 100), msg("m", 200)], &Utc);
        assert_eq!(days.len(), 1);
        let times: Vec<i64> = days[0].messages.iter().map(|m| m.sent_at).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn grouping_breaks_timestamp_ties_deterministically() {
        let days = group_by_day(vec![msg("b", 100), msg("a", 100)], &Utc);
        assert_eq!(days[0].messages[0].id, "a");
        assert_eq!(days[0].messages[1].id, "b");
    }

    #[test]
    fn grouping_is_idempotent() {
        let first = group_by_day(
            vec![msg("c", 2 * DAY), msg("a", 10), msg("b", DAY + 5)],
            &Utc,
        );
        let flattened: Vec<Message> = first
            .iter()
            .flat_map(|d| d.messages.iter().cloned())
            .collect();
        let second = group_by_day(flattened, &Utc);
        assert_eq!(first, second);
    }

    #[test]
    fn seen_by_peer_applies_only_to_counselor_messages() {
        assert!(seen_by_peer(&SenderKind::Counselor, 100, Some(100)));
        assert!(seen_by_peer(&SenderKind::Counselor, 100, Some(500)));
        assert!(!seen_by_peer(&SenderKind::Counselor, 100, Some(99)));
        assert!(!seen_by_peer(&SenderKind::Counselor, 100, None));
        assert!(!seen_by_peer(&SenderKind::Beneficiary, 100, Some(500)));
        assert!(!seen_by_peer(&SenderKind::System, 100, Some(500)));
    }

    #[test]
    fn match_spans_is_case_insensitive_and_non_overlapping() {
        let spans = match_spans("Tchoupi and tchoupi and TCHOUPI", "tchoupi");
        assert_eq!(
            spans,
            vec![
                MatchSpan { start: 0, end: 7 },
                MatchSpan { start: 12, end: 19 },
                MatchSpan { start: 24, end: 31 },
            ]
        );
    }

    #[test]
    fn match_spans_returns_byte_offsets_into_the_original() {
        // "é" is two bytes; the span after it must account for that.
        let content = "répondu OUI";
        let spans = match_spans(content, "oui");
        assert_eq!(spans, vec![MatchSpan { start: 9, end: 12 }]);
        assert_eq!(&content[9..12], "OUI");
    }

    #[test]
    fn match_spans_of_empty_term_is_empty() {
        assert!(match_spans("anything", "").is_empty());
        assert!(match_spans("", "needle").is_empty());
    }
}
