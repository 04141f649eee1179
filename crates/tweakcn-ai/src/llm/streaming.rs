//! SSE stream parser for the OpenAI Chat Completions API.
//!
//! Every supported provider streams `data:` lines carrying JSON payloads with
//! `choices[].delta` objects, terminated by a `data: [DONE]` sentinel.  This
//! module turns those lines into text deltas, assembled tool calls, a finish
//! reason and token usage.

use serde_json::Value;

use crate::error::{AiError, Result};
use crate::llm::types::{FinishReason, ToolCall, Usage};

// ---------------------------------------------------------------------------
// Line buffer
// ---------------------------------------------------------------------------

/// Splits a byte stream into complete lines.
///
/// Chunks may end in the middle of a line, or in the middle of a multi-byte
/// UTF-8 sequence, so bytes are buffered until a newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_owned());
        }
        lines
    }

    /// Return whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let pending = std::mem::take(&mut self.pending);
        let rest = String::from_utf8_lossy(&pending).trim().to_owned();
        (!rest.is_empty()).then_some(rest)
    }
}

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates fragments from an OpenAI SSE stream into a complete response.
///
/// Text deltas are simple string concatenation.  Tool call deltas require
/// accumulating the function name and arguments across multiple chunks
/// (the name typically arrives in the first chunk, with argument fragments
/// following in subsequent chunks).
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    /// Accumulated text content from `choices[].delta.content`.
    text: String,

    /// In-progress tool calls indexed by their position in the tool_calls
    /// array.  OpenAI sends `index` to correlate chunks.
    tool_call_builders: Vec<ToolCallBuilder>,

    /// Last `finish_reason` seen on any chunk.
    finish_reason: Option<FinishReason>,

    /// Whether the `[DONE]` sentinel has been received.
    done: bool,

    /// Token usage.  OpenAI sends it in a final chunk with empty `choices`;
    /// Groq nests it under `x_groq`.
    usage: Usage,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

/// Everything left over once the stream has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl OpenAiStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the `[DONE]` sentinel has been received.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Feed a single SSE line from the stream.
    ///
    /// Returns `Ok(Some(text_delta))` when a text content delta is present,
    /// `Ok(None)` for non-text events, or an error if parsing fails.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        // `event:`, `id:` and other SSE fields carry nothing we need.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| AiError::LlmParseFailed {
            reason: format!("invalid JSON in SSE data: {e}"),
        })?;

        if let Some(message) = v["error"]["message"].as_str() {
            return Err(AiError::LlmStreamError {
                reason: message.to_owned(),
            });
        }

        // Usage chunks arrive with an empty `choices` array, so read usage
        // before looking at the delta.
        self.read_usage(&v);

        let choice = &v["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(FinishReason::from_openai(reason));
        }

        let delta = &choice["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        let mut text_delta: Option<String> = None;
        if let Some(content) = delta["content"].as_str().filter(|c| !c.is_empty()) {
            self.text.push_str(content);
            text_delta = Some(content.to_owned());
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;

                while self.tool_call_builders.len() <= index {
                    self.tool_call_builders.push(ToolCallBuilder::default());
                }

                let builder = &mut self.tool_call_builders[index];

                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_owned();
                }

                let func = &tc["function"];
                if let Some(name) = func["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = func["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        Ok(text_delta)
    }

    fn read_usage(&mut self, v: &Value) {
        let usage_obj = v
            .get("usage")
            .filter(|u| !u.is_null())
            .or_else(|| v["x_groq"].get("usage").filter(|u| !u.is_null()));

        if let Some(usage_obj) = usage_obj {
            if let Some(input) = usage_obj["prompt_tokens"].as_u64() {
                self.usage.input_tokens = input as u32;
            }
            if let Some(output) = usage_obj["completion_tokens"].as_u64() {
                self.usage.output_tokens = output as u32;
            }
        }
    }

    /// Consume the accumulator, assembling tool calls.
    pub fn finish(self) -> Result<StreamSummary> {
        let tool_calls = self
            .tool_call_builders
            .into_iter()
            .enumerate()
            .map(|(index, b)| {
                let arguments: Value = if b.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&b.arguments).map_err(|e| AiError::LlmParseFailed {
                        reason: format!("invalid JSON in tool call `{}` arguments: {e}", b.name),
                    })?
                };

                // Gemini omits call ids; synthesise stable ones.
                let id = if b.id.is_empty() {
                    format!("call_{index}")
                } else {
                    b.id
                };

                Ok(ToolCall {
                    id,
                    name: b.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let finish_reason = match self.finish_reason {
            Some(reason) => reason,
            None if !tool_calls.is_empty() => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        };

        Ok(StreamSummary {
            text: self.text,
            tool_calls,
            finish_reason,
            usage: self.usage,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
