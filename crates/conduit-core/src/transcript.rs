//! The ordered message history of a conversation.

use conduit_types::{Message, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// A violation of the transcript ordering rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("tool result at {index} ('{id}') has no preceding assistant tool call")]
    OrphanToolResult { index: usize, id: String },

    #[error("tool result at {index} answers '{id}', which the preceding assistant did not request")]
    UnknownCorrelation { index: usize, id: String },

    #[error("tool call '{id}' is answered twice (second answer at {index})")]
    DuplicateToolResult { index: usize, id: String },

    #[error("tool call '{id}' of the assistant message at {index} has no result")]
    MissingToolResult { index: usize, id: String },

    #[error("message at {index} follows tool results without a renewed model reply")]
    MissingModelReply { index: usize },
}

/// Ordered conversation history.
///
/// Append-only while a turn runs; [`Transcript::rollback`] is how an aborted
/// turn is undone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transcript whose first entry is the given system prompt.
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: Option<String>, tool_calls: Vec<ToolCall>) {
        self.push(Message::Assistant {
            content,
            tool_calls,
        });
    }

    pub fn push_tool_result(
        &mut self,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) {
        self.push(Message::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop every message after the first `len`.
    pub fn rollback(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    /// Forget the conversation, keeping a leading system prompt if any.
    pub fn reset(&mut self) {
        let keep = usize::from(matches!(self.messages.first(), Some(Message::System { .. })));
        self.messages.truncate(keep);
    }

    /// Check the tool-result ordering rules.
    ///
    /// Every tool result must answer a call of the closest preceding
    /// assistant message, each call is answered exactly once, and answered
    /// calls are followed by another assistant reply before any new user or
    /// system message. Trailing unanswered calls are allowed (a turn may be
    /// in progress).
    pub fn validate(&self) -> Result<(), TranscriptError> {
        // (index of the assistant message, requested ids, answered ids)
        let mut open: Option<(usize, Vec<&str>, HashSet<&str>)> = None;

        for (index, message) in self.messages.iter().enumerate() {
            match message {
                Message::ToolResult { tool_call_id, .. } => {
                    let id = tool_call_id.as_str();
                    let Some((_, requested, answered)) = open.as_mut() else {
                        return Err(TranscriptError::OrphanToolResult {
                            index,
                            id: id.to_string(),
                        });
                    };
                    if !requested.contains(&id) {
                        return Err(TranscriptError::UnknownCorrelation {
                            index,
                            id: id.to_string(),
                        });
                    }
                    if !answered.insert(id) {
                        return Err(TranscriptError::DuplicateToolResult {
                            index,
                            id: id.to_string(),
                        });
                    }
                }
                Message::Assistant { tool_calls, .. } => {
                    if let Some(pending) = &open {
                        check_answered(pending)?;
                    }
                    open = if tool_calls.is_empty() {
                        None
                    } else {
                        Some((
                            index,
                            tool_calls.iter().map(|c| c.id.as_str()).collect(),
                            HashSet::new(),
                        ))
                    };
                }
                Message::User { .. } | Message::System { .. } => {
                    if let Some(pending) = &open {
                        check_answered(pending)?;
                        return Err(TranscriptError::MissingModelReply { index });
                    }
                }
            }
        }

        Ok(())
    }
}

fn check_answered(
    (index, requested, answered): &(usize, Vec<&str>, HashSet<&str>),
) -> Result<(), TranscriptError> {
    match requested.iter().find(|id| !answered.contains(*id)) {
        Some(id) => Err(TranscriptError::MissingToolResult {
            index: *index,
            id: id.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "lookup_weight".to_string(),
            arguments: json!({"breed": "Collie"}),
        }
    }

    fn completed_turn() -> Transcript {
        let mut t = Transcript::with_system("You weigh dogs.");
        t.push_user("weigh 2 dogs");
        t.push_assistant(None, vec![call("c1"), call("c2")]);
        t.push_tool_result("c1", "37 lbs", false);
        t.push_tool_result("c2", "Error: unknown breed", true);
        t.push_assistant(Some("About 37 lbs plus the second dog".into()), vec![]);
        t
    }

    #[test]
    fn completed_turn_is_valid() {
        let t = completed_turn();
        assert_eq!(t.len(), 6);
        assert_eq!(t.validate(), Ok(()));
    }

    #[test]
    fn in_progress_turn_is_valid() {
        let mut t = Transcript::new();
        t.push_user("weigh 2 dogs");
        t.push_assistant(None, vec![call("c1"), call("c2")]);
        t.push_tool_result("c1", "37 lbs", false);
        assert_eq!(t.validate(), Ok(()));
    }

    #[test]
    fn orphan_tool_result_is_rejected() {
        let mut t = Transcript::new();
        t.push_user("hi");
        t.push_tool_result("c1", "37 lbs", false);
        assert!(matches!(
            t.validate(),
            Err(TranscriptError::OrphanToolResult { index: 1, .. })
        ));
    }

    #[test]
    fn result_for_unrequested_call_is_rejected() {
        let mut t = Transcript::new();
        t.push_user("hi");
        t.push_assistant(None, vec![call("c1")]);
        t.push_tool_result("c9", "37 lbs", false);
        assert!(matches!(
            t.validate(),
            Err(TranscriptError::UnknownCorrelation { ref id, .. }) if id == "c9"
        ));
    }

    #[test]
    fn duplicate_result_is_rejected() {
        let mut t = Transcript::new();
        t.push_user("hi");
        t.push_assistant(None, vec![call("c1")]);
        t.push_tool_result("c1", "37 lbs", false);
        t.push_tool_result("c1", "37 lbs", false);
        assert!(matches!(
            t.validate(),
            Err(TranscriptError::DuplicateToolResult { index: 3, .. })
        ));
    }

    #[test]
    fn user_message_right_after_tool_results_is_rejected() {
        let mut t = Transcript::new();
        t.push_user("hi");
        t.push_assistant(None, vec![call("c1")]);
        t.push_tool_result("c1", "37 lbs", false);
        t.push_user("and now?");
        assert_eq!(
            t.validate(),
            Err(TranscriptError::MissingModelReply { index: 3 })
        );
    }

    #[test]
    fn unanswered_call_before_next_reply_is_rejected() {
        let mut t = Transcript::new();
        t.push_user("hi");
        t.push_assistant(None, vec![call("c1"), call("c2")]);
        t.push_tool_result("c1", "37 lbs", false);
        t.push_assistant(Some("done".into()), vec![]);
        assert!(matches!(
            t.validate(),
            Err(TranscriptError::MissingToolResult { index: 1, ref id }) if id == "c2"
        ));
    }

    #[test]
    fn rollback_and_reset() {
        let mut t = completed_turn();
        t.rollback(2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.last().and_then(Message::text), Some("weigh 2 dogs"));

        t.reset();
        assert_eq!(t.len(), 1);
        assert!(matches!(t.messages()[0], Message::System { .. }));

        let mut bare = Transcript::new();
        bare.push_user("hi");
        bare.reset();
        assert!(bare.is_empty());
    }

    #[test]
    fn serializes_as_message_array() {
        let mut t = Transcript::new();
        t.push_user("hi");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, json!([{"role": "user", "content": "hi"}]));
    }
}
