//! Message normalisation.
//!
//! Turns what the client sends (structured prompt data and UI chat history)
//! into the flat, ordered [`Message`] list providers consume.
//!
//! - A [`PromptData`] becomes one user turn whose parts are the prompt text,
//!   then one part per mentioned theme, then one part per image.
//! - A [`ChatMessage`] history becomes provider messages turn by turn,
//!   keeping roles and order.  Empty and tool-only turns are kept.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::types::{ContentPart, Message, ToolCall};
use crate::tools::ToolId;

// ---------------------------------------------------------------------------
// Prompt data
// ---------------------------------------------------------------------------

/// A structured prompt as composed in the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptData {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<MentionReference>,
    #[serde(default)]
    pub images: Vec<PromptImage>,
}

/// A reference to an existing theme (`@name`) embedded in a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionReference {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_data: Option<Value>,
}

/// An attached image, usually a data URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptImage {
    pub url: String,
}

/// Build the ordered content parts of a user turn from prompt data: the
/// text (when non-empty), then one part per mention, then one per image.
pub fn build_user_content_parts(data: &PromptData) -> Vec<ContentPart> {
    let mut parts = Vec::with_capacity(1 + data.mentions.len() + data.images.len());

    if !data.content.trim().is_empty() {
        parts.push(ContentPart::text(data.content.clone()));
    }

    for mention in &data.mentions {
        parts.push(ContentPart::text(format_mention(mention)));
    }

    for image in &data.images {
        parts.push(ContentPart::image(image.url.clone()));
    }

    parts
}

fn format_mention(mention: &MentionReference) -> String {
    match &mention.theme_data {
        Some(theme) => format!(
            "@{} theme (id: {}):\n```json\n{}\n```",
            mention.label, mention.id, theme
        ),
        None => format!("@{} theme (id: {})", mention.label, mention.id),
    }
}

// ---------------------------------------------------------------------------
// UI chat history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Metadata attached to a chat message by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_data: Option<PromptData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_styles: Option<Value>,
}

/// One part of a UI chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiPart {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "file", rename_all = "camelCase")]
    File {
        url: String,
        #[serde(default)]
        media_type: Option<String>,
    },

    /// A `generateTheme` tool invocation, with its output once available.
    #[serde(rename = "tool-generateTheme", rename_all = "camelCase")]
    GenerateTheme {
        tool_call_id: String,
        #[serde(default)]
        state: Option<String>,
        #[serde(default)]
        input: Option<Value>,
        #[serde(default)]
        output: Option<Value>,
    },

    /// Reasoning, step markers, data parts and anything else the provider
    /// does not need to see again.
    #[serde(other)]
    Other,
}

/// A chat message as sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    /// For tool turns, the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A user message with plain text content.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: None,
            role: ChatRole::User,
            content: Some(text.into()),
            parts: Vec::new(),
            metadata: None,
            tool_call_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Plain text of this message: `content` followed by text parts.
    fn text(&self) -> String {
        let mut text = self.content.clone().unwrap_or_default();
        for part in &self.parts {
            if let UiPart::Text { text: t } = part {
                text.push_str(t);
            }
        }
        text
    }
}

/// Convert UI chat history into provider messages.
pub fn convert_messages(messages: &[ChatMessage]) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            ChatRole::System => out.push(Message::system(msg.text())),
            ChatRole::User => out.push(convert_user(msg)),
            ChatRole::Assistant => convert_assistant(msg, &mut out),
            ChatRole::Tool => out.push(Message::tool_result(
                msg.tool_call_id.clone().unwrap_or_default(),
                msg.text(),
            )),
        }
    }

    out
}

fn convert_user(msg: &ChatMessage) -> Message {
    if let Some(prompt_data) = msg.metadata.as_ref().and_then(|m| m.prompt_data.as_ref()) {
        return Message::user_parts(build_user_content_parts(prompt_data));
    }

    let mut parts = Vec::new();
    if let Some(content) = msg.content.as_deref().filter(|c| !c.is_empty()) {
        parts.push(ContentPart::text(content));
    }
    for part in &msg.parts {
        match part {
            UiPart::Text { text } if !text.is_empty() => parts.push(ContentPart::text(text.clone())),
            UiPart::File { url, media_type }
                if media_type.as_deref().is_none_or(|m| m.starts_with("image/")) =>
            {
                parts.push(ContentPart::image(url.clone()))
            }
            _ => {}
        }
    }
    Message::user_parts(parts)
}

/// An assistant turn becomes one assistant message (text plus completed
/// tool calls) followed by one tool-result message per completed call.
fn convert_assistant(msg: &ChatMessage, out: &mut Vec<Message>) {
    let mut calls = Vec::new();
    let mut results = Vec::new();

    for part in &msg.parts {
        if let UiPart::GenerateTheme {
            tool_call_id,
            input,
            output: Some(output),
            ..
        } = part
        {
            calls.push(ToolCall {
                id: tool_call_id.clone(),
                name: ToolId::GenerateTheme.name().to_owned(),
                arguments: input.clone().unwrap_or_else(|| Value::Object(Default::default())),
            });
            results.push(Message::tool_result(tool_call_id.clone(), output.to_string()));
        }
    }

    out.push(Message::assistant_tool_calls(msg.text(), calls));
    out.extend(results);
}

/// Request and conversation ids from the most recent user turn's metadata.
pub fn extract_correlation(messages: &[ChatMessage]) -> (Option<String>, Option<String>) {
    messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .and_then(|m| m.metadata.as_ref())
        .map(|m| (m.request_id.clone(), m.conversation_id.clone()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm::types::Role;

    #[test]
    fn prompt_parts_are_ordered() {
        let data: PromptData = serde_json::from_value(json!({
            "content": "make it teal",
            "mentions": [
                {"id": "t1", "label": "ocean", "themeData": {"light": {"primary": "#0ea5e9"}}},
                {"id": "t2", "label": "forest"}
            ],
            "images": [{"url": "data:image/png;base64,AAA"}]
        }))
        .unwrap();

        let parts = build_user_content_parts(&data);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], ContentPart::text("make it teal"));
        match &parts[1] {
            ContentPart::Text { text } => {
                assert!(text.starts_with("@ocean"));
                assert!(text.contains("#0ea5e9"));
            }
            other => panic!("expected mention text, got {other:?}"),
        }
        match &parts[2] {
            ContentPart::Text { text } => assert!(text.starts_with("@forest")),
            other => panic!("expected mention text, got {other:?}"),
        }
        assert_eq!(parts[3], ContentPart::image("data:image/png;base64,AAA"));
    }

    #[test]
    fn empty_prompt_text_is_skipped() {
        let data = PromptData {
            content: "  ".into(),
            mentions: Vec::new(),
            images: vec![PromptImage {
                url: "https://x/a.png".into(),
            }],
        };
        assert_eq!(
            build_user_content_parts(&data),
            vec![ContentPart::image("https://x/a.png")]
        );
    }

    #[test]
    fn plain_content_message_converts() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "make it teal", "metadata": {"requestId": "r1", "conversationId": "c1"}}
        ]))
        .unwrap();
        let converted = convert_messages(&messages);
        assert_eq!(converted, vec![Message::user("make it teal")]);
        assert_eq!(
            extract_correlation(&messages),
            (Some("r1".into()), Some("c1".into()))
        );
    }

    #[test]
    fn prompt_data_metadata_rebuilds_user_turn() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {
                "id": "m1",
                "role": "user",
                "parts": [{"type": "text", "text": "ignored in favour of prompt data"}],
                "metadata": {"promptData": {"content": "warm", "images": [{"url": "u"}]}}
            }
        ]))
        .unwrap();
        let converted = convert_messages(&messages);
        assert_eq!(
            converted[0].content,
            vec![ContentPart::text("warm"), ContentPart::image("u")]
        );
    }

    #[test]
    fn assistant_tool_parts_become_call_and_result() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "teal"},
            {
                "role": "assistant",
                "parts": [
                    {"type": "step-start"},
                    {"type": "text", "text": "Here you go."},
                    {"type": "tool-generateTheme", "toolCallId": "call_1", "state": "output-available",
                     "input": {}, "output": {"light": {"primary": "teal"}, "dark": {}}},
                    {"type": "tool-generateTheme", "toolCallId": "call_2", "state": "input-streaming"}
                ]
            },
            {"role": "user", "content": "darker"}
        ]))
        .unwrap();

        let converted = convert_messages(&messages);
        assert_eq!(converted.len(), 4);
        assert_eq!(converted[1].role, Role::Assistant);
        assert_eq!(converted[1].text(), "Here you go.");
        assert_eq!(converted[1].tool_calls.len(), 1);
        assert_eq!(converted[1].tool_calls[0].name, "generateTheme");
        assert_eq!(converted[2].role, Role::Tool);
        assert_eq!(converted[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(converted[3], Message::user("darker"));
    }

    #[test]
    fn empty_turns_are_kept() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "user", "content": ""},
            {"role": "assistant", "parts": []},
        ]))
        .unwrap();
        let converted = convert_messages(&messages);
        assert_eq!(converted.len(), 2);
        assert!(converted[0].content.is_empty());
        assert!(converted[1].content.is_empty());
    }

    #[test]
    fn correlation_comes_from_last_user_turn() {
        let messages = vec![
            ChatMessage::user("a").with_metadata(MessageMetadata {
                request_id: Some("old".into()),
                ..Default::default()
            }),
            ChatMessage::user("b").with_metadata(MessageMetadata {
                request_id: Some("new".into()),
                conversation_id: Some("c".into()),
                ..Default::default()
            }),
        ];
        assert_eq!(
            extract_correlation(&messages),
            (Some("new".into()), Some("c".into()))
        );
    }

    #[test]
    fn correlation_absent_without_metadata() {
        assert_eq!(extract_correlation(&[ChatMessage::user("x")]), (None, None));
        assert_eq!(extract_correlation(&[]), (None, None));
    }
}
