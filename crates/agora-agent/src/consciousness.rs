//! Consciousness: an agent's whole message history and its compaction
//!
//! Layout of a stored history:
//!
//!   [0]  system     rebuilt every cycle, never appended to
//!   [1]  [memory]   optional summary of compacted cycles
//!   ...  cycles     each opens with an `[inbox]` user turn
//!
//! Only `[inbox]` turns open a cycle. `[memory]`, `[timeline]` and `[status]`
//! notes are synthetic and never split history, which is what keeps
//! compaction idempotent.

use agora_core::{InboxEvent, InboxPayload, SpaceId};
use agora_llm::{ContentPart, Message};
use agora_store::{ConsciousnessRecord, ConsciousnessRepo};
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const INBOX_MARKER: &str = "[inbox]";
pub const MEMORY_MARKER: &str = "[memory]";
pub const TIMELINE_MARKER: &str = "[timeline]";
pub const STATUS_MARKER: &str = "[status]";

const CHARS_PER_TOKEN: f32 = 4.0;
/// Per-message framing overhead in estimated tokens.
const MESSAGE_OVERHEAD: usize = 4;
const SUMMARY_MAX_CHARS: usize = 400;

// ---------------------------------------------------------------------------
// Size estimation
// ---------------------------------------------------------------------------

pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f32 / CHARS_PER_TOKEN).ceil() as usize
}

pub fn message_tokens(message: &Message) -> usize {
    let content = match message {
        Message::System { content } | Message::User { content } => estimate_tokens(content),
        Message::Assistant { parts } | Message::Tool { parts } => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => estimate_tokens(text),
                ContentPart::ToolCall { name, input, .. } => {
                    estimate_tokens(name) + estimate_tokens(&input.to_string())
                }
                ContentPart::ToolResult { output, .. } => estimate_tokens(&output.to_string()),
            })
            .sum(),
    };
    content + MESSAGE_OVERHEAD
}

/// Cheap size heuristic for budget decisions. Not billing-accurate.
pub fn estimate_size(messages: &[Message]) -> usize {
    messages.iter().map(message_tokens).sum()
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

fn user_with_marker<'a>(message: &'a Message, marker: &str) -> Option<&'a str> {
    match message {
        Message::User { content } => content.strip_prefix(marker),
        _ => None,
    }
}

/// Whether a message opens a cycle (a genuine inbox delivery).
pub fn is_cycle_start(message: &Message) -> bool {
    user_with_marker(message, INBOX_MARKER).is_some()
}

pub fn is_memory_block(message: &Message) -> bool {
    user_with_marker(message, MEMORY_MARKER).is_some()
}

// ---------------------------------------------------------------------------
// System prompt
// ---------------------------------------------------------------------------

/// Replace the system message at index 0, or prepend one. Any stray system
/// message further down is dropped so exactly one remains.
pub fn refresh_system_prompt(messages: &mut Vec<Message>, prompt: &str) {
    let fresh = Message::system(prompt);
    match messages.first() {
        Some(m) if m.is_system() => messages[0] = fresh,
        _ => messages.insert(0, fresh),
    }
    let mut index = 0;
    messages.retain(|m| {
        index += 1;
        index == 1 || !m.is_system()
    });
}

// ---------------------------------------------------------------------------
// Synthetic turns
// ---------------------------------------------------------------------------

/// The user turn that opens a cycle: every drained event, oldest first.
pub fn inbox_turn(events: &[InboxEvent], at: DateTime<Utc>) -> Message {
    let mut out = format!(
        "{} {}",
        INBOX_MARKER,
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    for event in events {
        out.push('\n');
        out.push_str(&describe_event(event));
    }
    Message::user(out)
}

fn describe_event(event: &InboxEvent) -> String {
    match &event.payload {
        InboxPayload::SpaceMessage(m) => {
            let mut line = format!(
                "- space_message in {} from {} ({}): {}",
                m.space_id,
                m.sender_id,
                match m.sender_kind {
                    agora_core::MemberKind::Human => "human",
                    agora_core::MemberKind::Agent => "agent",
                },
                m.content
            );
            if let Some(reason) = m.mention_reason.as_deref().filter(|r| !r.is_empty()) {
                line.push_str(&format!("\n  you were mentioned: {reason}"));
            }
            if let Some(reason) = m.resume_reason.as_deref() {
                line.push_str(&format!(
                    "\n  resuming: you asked for a reply because \"{reason}\""
                ));
            }
            line
        }
        InboxPayload::Plan(p) => format!("- plan {} fired: {}", p.plan_id, p.instruction),
        InboxPayload::Service(s) => format!("- service {}: {}", s.service_name, s.payload),
        InboxPayload::ToolResult(t) => format!(
            "- tool_result for {} ({}) from run {}: {}",
            t.tool_name, t.tool_call_id, t.run_id, t.result
        ),
    }
}

/// End-of-cycle note: when, how long, which tools.
pub fn timeline_note(finished_at: DateTime<Utc>, elapsed: Duration, tools: &[String]) -> Message {
    let tools = if tools.is_empty() {
        "none".to_string()
    } else {
        tools.join(", ")
    };
    Message::user(format!(
        "{} cycle finished {} after {:.1}s; tools: {}",
        TIMELINE_MARKER,
        finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        elapsed.as_secs_f64(),
        tools
    ))
}

/// Between-step note. Sent to the model, never persisted.
pub fn status_note(elapsed: Duration, newly_pending: usize) -> Message {
    Message::user(format!(
        "{} {:.1}s into this cycle; {} new inbox event(s) waiting",
        STATUS_MARKER,
        elapsed.as_secs_f64(),
        newly_pending
    ))
}

// ---------------------------------------------------------------------------
// Compaction
// ---------------------------------------------------------------------------

/// What one `compact` call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub compacted: bool,
    /// Older cycles folded into the memory block.
    pub cycles_removed: usize,
    /// Of those, cycles that had no narration and left nothing behind.
    pub cycles_lost: usize,
}

/// Split history into (head, cycles). The head is everything before the
/// first cycle: system message, memory block, and any stray prelude.
fn split_cycles(messages: Vec<Message>) -> (Vec<Message>, Vec<Vec<Message>>) {
    let mut head = Vec::new();
    let mut cycles: Vec<Vec<Message>> = Vec::new();
    for message in messages {
        if is_cycle_start(&message) {
            cycles.push(vec![message]);
        } else if let Some(current) = cycles.last_mut() {
            current.push(message);
        } else {
            head.push(message);
        }
    }
    (head, cycles)
}

/// One-line self-summary of a cycle: its last narration, prefixed with the
/// time recorded in its inbox turn.
fn summarize_cycle(cycle: &[Message]) -> Option<String> {
    let narration = cycle.iter().rev().find_map(Message::assistant_narration)?;
    let mut line: String = narration.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() > SUMMARY_MAX_CHARS {
        line = line.chars().take(SUMMARY_MAX_CHARS).collect::<String>() + "…";
    }
    let stamp = cycle
        .first()
        .and_then(|m| user_with_marker(m, INBOX_MARKER))
        .and_then(|rest| rest.split_whitespace().next())
        .filter(|s| DateTime::parse_from_rfc3339(s).is_ok());
    Some(match stamp {
        Some(stamp) => format!("- {stamp} {line}"),
        None => format!("- {line}"),
    })
}

/// Fold older cycles into the memory block when over budget.
///
/// No-op when within `max_tokens` or when there are at most
/// `min_retained_cycles` cycles. A cycle without narration is dropped
/// without a trace.
pub fn compact(
    messages: &mut Vec<Message>,
    max_tokens: usize,
    min_retained_cycles: usize,
) -> CompactionReport {
    if estimate_size(messages) <= max_tokens {
        return CompactionReport::default();
    }
    let cycle_count = messages.iter().filter(|m| is_cycle_start(m)).count();
    if cycle_count <= min_retained_cycles {
        return CompactionReport::default();
    }

    let (head, mut cycles) = split_cycles(std::mem::take(messages));
    let retained = cycles.split_off(cycles.len() - min_retained_cycles);
    let older = cycles;

    let mut system = None;
    let mut summary_lines: Vec<String> = Vec::new();
    let mut prelude = Vec::new();
    for message in head {
        if message.is_system() && system.is_none() {
            system = Some(message);
        } else if let Some(body) = user_with_marker(&message, MEMORY_MARKER) {
            summary_lines.extend(
                body.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from),
            );
        } else {
            prelude.push(message);
        }
    }

    let mut lost = 0;
    for cycle in &older {
        match summarize_cycle(cycle) {
            Some(line) => summary_lines.push(line),
            None => lost += 1,
        }
    }

    messages.extend(system);
    if !summary_lines.is_empty() {
        messages.push(Message::user(format!(
            "{}\n{}",
            MEMORY_MARKER,
            summary_lines.join("\n")
        )));
    }
    messages.extend(prelude);
    messages.extend(retained.into_iter().flatten());

    CompactionReport {
        compacted: true,
        cycles_removed: older.len(),
        cycles_lost: lost,
    }
}

// ---------------------------------------------------------------------------
// Active space recovery
// ---------------------------------------------------------------------------

/// The space the agent last posted to or entered, per its own tool results.
pub fn last_active_space(messages: &[Message]) -> Option<SpaceId> {
    messages.iter().rev().find_map(|m| match m {
        Message::Tool { parts } => parts.iter().rev().find_map(|p| match p {
            ContentPart::ToolResult {
                tool_name,
                output,
                is_error: false,
                ..
            } if tool_name == agora_tools::SEND_MESSAGE
                || tool_name == agora_tools::ENTER_SPACE =>
            {
                output
                    .get("spaceId")
                    .and_then(|v| v.as_str())
                    .map(SpaceId::new)
            }
            _ => None,
        }),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Budgeted access to a consciousness repository.
#[derive(Clone)]
pub struct ConsciousnessStore {
    repo: Arc<dyn ConsciousnessRepo>,
    max_tokens: usize,
    min_retained_cycles: usize,
}

impl ConsciousnessStore {
    pub fn new(repo: Arc<dyn ConsciousnessRepo>, max_tokens: usize, min_retained_cycles: usize) -> Self {
        Self {
            repo,
            max_tokens,
            min_retained_cycles,
        }
    }

    pub async fn load(&self, entity_id: &agora_core::EntityId) -> agora_core::Result<ConsciousnessRecord> {
        self.repo.load(entity_id).await
    }

    pub async fn save(&self, record: &ConsciousnessRecord) -> agora_core::Result<()> {
        self.repo.save(record).await
    }

    pub fn compact(&self, record: &mut ConsciousnessRecord) -> CompactionReport {
        let report = compact(&mut record.messages, self.max_tokens, self.min_retained_cycles);
        if report.compacted {
            info!(
                entity = %record.entity_id,
                removed = report.cycles_removed,
                lost = report.cycles_lost,
                tokens = estimate_size(&record.messages),
                "consciousness compacted"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimation() {
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens("hello world"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn markers() {
        assert!(is_cycle_start(&Message::user("[inbox] 2026-01-01T00:00:00Z")));
        assert!(!is_cycle_start(&Message::user("[timeline] done")));
        assert!(!is_cycle_start(&Message::system("[inbox] nope")));
        assert!(is_memory_block(&Message::user("[memory]\n- x")));
    }

    #[test]
    fn summary_prefers_last_narration_and_stamps_it() {
        let cycle = vec![
            Message::user("[inbox] 2026-03-01T09:00:00Z\n- plan fired"),
            Message::assistant_text("first thought"),
            Message::assistant_text("final   answer\nwith newline"),
            Message::user("[timeline] cycle finished"),
        ];
        assert_eq!(
            summarize_cycle(&cycle).as_deref(),
            Some("- 2026-03-01T09:00:00Z final answer with newline")
        );
    }
}
