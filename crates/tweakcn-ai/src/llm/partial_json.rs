//! Best-effort parsing of incomplete JSON.
//!
//! While an object streams in, the text received so far is usually not valid
//! JSON.  [`parse_partial`] closes whatever is open (an unterminated string
//! value, arrays, objects) after dropping any trailing token that cannot be
//! completed safely (a dangling key, a half-written literal, a trailing
//! comma).  Values only ever grow as more text arrives.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Key,
    Colon,
    Value,
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    container: Container,
    expect: Expect,
}

/// A prefix of the input that becomes valid JSON once `closers` is appended.
#[derive(Debug, Clone)]
struct Checkpoint {
    end: usize,
    closers: String,
}

fn closers(stack: &[Frame]) -> String {
    stack
        .iter()
        .rev()
        .map(|f| match f.container {
            Container::Object => '}',
            Container::Array => ']',
        })
        .collect()
}

/// Mark that a complete value just ended at the current position.
fn value_done(stack: &mut [Frame]) {
    if let Some(top) = stack.last_mut() {
        top.expect = Expect::CommaOrEnd;
    }
}

/// Parse `input` as JSON, repairing it if it was cut off mid-stream.
///
/// Returns `None` when nothing useful can be recovered yet (e.g. the input
/// is empty or only contains a partial key).
pub fn parse_partial(input: &str) -> Option<Value> {
    let input = strip_code_fence(input);
    if let Ok(v) = serde_json::from_str::<Value>(input) {
        return Some(v);
    }

    let bytes = input.as_bytes();
    let mut stack: Vec<Frame> = Vec::new();
    let mut checkpoint: Option<Checkpoint> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\n' | b'\r' | b'\t' => {
                i += 1;
            }
            b'{' | b'[' => {
                if stack.last().is_some_and(|top| top.expect != Expect::Value) {
                    return finish(input, checkpoint);
                }
                let frame = if b == b'{' {
                    Frame {
                        container: Container::Object,
                        expect: Expect::Key,
                    }
                } else {
                    Frame {
                        container: Container::Array,
                        expect: Expect::Value,
                    }
                };
                stack.push(frame);
                i += 1;
                checkpoint = Some(Checkpoint {
                    end: i,
                    closers: closers(&stack),
                });
            }
            b'}' | b']' => {
                stack.pop();
                value_done(&mut stack);
                i += 1;
                checkpoint = Some(Checkpoint {
                    end: i,
                    closers: closers(&stack),
                });
                if stack.is_empty() {
                    break;
                }
            }
            b',' => {
                if let Some(top) = stack.last_mut() {
                    top.expect = match top.container {
                        Container::Object => Expect::Key,
                        Container::Array => Expect::Value,
                    };
                }
                i += 1;
            }
            b':' => {
                if let Some(top) = stack.last_mut() {
                    top.expect = Expect::Value;
                }
                i += 1;
            }
            b'"' => {
                let is_key = stack
                    .last()
                    .is_some_and(|f| f.container == Container::Object && f.expect == Expect::Key);
                match scan_string(bytes, i + 1) {
                    Some(end) => {
                        i = end + 1;
                        if is_key {
                            if let Some(top) = stack.last_mut() {
                                top.expect = Expect::Colon;
                            }
                        } else {
                            value_done(&mut stack);
                            checkpoint = Some(Checkpoint {
                                end: i,
                                closers: closers(&stack),
                            });
                        }
                    }
                    None => {
                        if is_key {
                            return finish(input, checkpoint);
                        }
                        // Unterminated string value: keep what we have,
                        // minus any half-written escape sequence.
                        let cut = safe_string_end(bytes, i + 1);
                        let mut repaired = String::with_capacity(cut + 8);
                        repaired.push_str(&input[..cut]);
                        repaired.push('"');
                        repaired.push_str(&closers(&stack));
                        return serde_json::from_str(&repaired)
                            .ok()
                            .or_else(|| finish(input, checkpoint));
                    }
                }
            }
            _ => {
                // Number or literal: complete only when a delimiter follows.
                let start = i;
                while i < bytes.len()
                    && !matches!(bytes[i], b',' | b'}' | b']' | b' ' | b'\n' | b'\r' | b'\t')
                {
                    i += 1;
                }
                if i >= bytes.len() {
                    return finish(input, checkpoint);
                }
                if serde_json::from_str::<Value>(&input[start..i]).is_err() {
                    return finish(input, checkpoint);
                }
                value_done(&mut stack);
                checkpoint = Some(Checkpoint {
                    end: i,
                    closers: closers(&stack),
                });
            }
        }
    }

    finish(input, checkpoint)
}

fn finish(input: &str, checkpoint: Option<Checkpoint>) -> Option<Value> {
    let cp = checkpoint?;
    let mut repaired = String::with_capacity(cp.end + cp.closers.len());
    repaired.push_str(&input[..cp.end]);
    repaired.push_str(&cp.closers);
    serde_json::from_str(&repaired).ok()
}

/// Find the closing quote of a string starting at `start` (just after the
/// opening quote).
fn scan_string(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// End of the longest prefix of an unterminated string that does not stop
/// inside an escape sequence.
fn safe_string_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    let mut safe = start;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let needed = if bytes.get(i + 1) == Some(&b'u') { 6 } else { 2 };
            if i + needed > bytes.len() {
                break;
            }
            i += needed;
        } else {
            i += 1;
        }
        safe = i;
    }
    safe
}

/// Models sometimes wrap JSON in a Markdown code fence.
pub fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    rest.strip_suffix("```").unwrap_or(rest).trim_end()
}
