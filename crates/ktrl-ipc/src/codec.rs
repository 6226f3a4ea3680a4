//! Wire encoding for commands, replies and notifications.
//!
//! Commands travel as the textual tuple form the daemon deserializes:
//!
//! ```text
//! IpcDoEffect((fx: NoOp, val: Press))
//! ```
//!
//! Effect and value names are opaque to this module. They are copied into
//! the wire form verbatim and in fixed order (effect first, then value);
//! validating them is the daemon's job. Every decoder here is total: bytes
//! that do not parse are surfaced as opaque payload, never as an error.

use std::fmt;

use bytes::Bytes;

/// Request variant name understood by the daemon.
pub const DO_EFFECT: &str = "IpcDoEffect";

/// Reply body the daemon sends when an effect was performed.
pub const REPLY_OK: &[u8] = b"OK";

/// Bytes that end a topic prefix in a notification.
const TOPIC_DELIMITERS: &[u8] = b": ";

/// A decoded `(effect, value)` command tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectValue {
    pub effect: String,
    pub value: String,
}

impl EffectValue {
    pub fn new(effect: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            effect: effect.into(),
            value: value.into(),
        }
    }
}

/// A command ready to be sent. Built right before sending and consumed by
/// the send; it is intentionally not `Clone`.
#[derive(Debug)]
pub struct Command {
    payload: Bytes,
}

impl Command {
    /// Build an `IpcDoEffect` command from an effect and a key value.
    pub fn do_effect(effect: &str, value: &str) -> Self {
        Self {
            payload: encode_command(effect, value),
        }
    }

    /// Wrap an already-encoded payload (e.g. a message typed on the CLI).
    pub fn raw(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        self.payload
    }
}

/// The daemon's reply to one command, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply(Bytes);

impl CommandReply {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// The reply as UTF-8, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Whether the daemon reported success (`OK`).
    pub fn is_ok(&self) -> bool {
        self.0.as_ref() == REPLY_OK
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// A broadcast event: a topic prefix and an uninterpreted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Empty when the message carried no recognizable topic.
    pub topic: String,
    pub payload: Bytes,
}

impl Notification {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = String::from_utf8_lossy(&self.payload);
        if self.topic.is_empty() {
            f.write_str(&payload)
        } else {
            write!(f, "{}:{}", self.topic, payload)
        }
    }
}

/// Encode an `(effect, value)` pair into its wire form.
pub fn encode_command(effect: &str, value: &str) -> Bytes {
    Bytes::from(format!("{DO_EFFECT}((fx: {effect}, val: {value}))"))
}

/// Parse the wire form back into its `(effect, value)` pair.
///
/// Returns `None` for anything that is not an `IpcDoEffect` tuple. The
/// effect and value are split at the top-level comma, so nested effects
/// such as `Multi([NoOp, Meh])` or `SoundEx("a, b")` survive intact.
pub fn decode_command(bytes: &[u8]) -> Option<EffectValue> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    let args = text.strip_prefix(DO_EFFECT)?;
    let tuple = strip_parens(args)?;
    let fields = strip_parens(tuple)?;

    let mut parts = split_top_level(fields)?;
    if parts.last().is_some_and(|p| p.trim().is_empty()) {
        parts.pop();
    }
    let [fx, val] = parts.as_slice() else {
        return None;
    };

    Some(EffectValue {
        effect: named_field(fx, "fx")?.to_string(),
        value: named_field(val, "val")?.to_string(),
    })
}

/// Wrap reply bytes. Never fails: the reply has no structure the client
/// relies on.
pub fn decode_reply(bytes: Bytes) -> CommandReply {
    CommandReply(bytes)
}

/// Encode a notification as `topic:payload` (just `payload` for an empty
/// topic).
pub fn encode_notification(topic: &str, payload: &[u8]) -> Bytes {
    if topic.is_empty() {
        return Bytes::copy_from_slice(payload);
    }
    let mut buf = Vec::with_capacity(topic.len() + 1 + payload.len());
    buf.extend_from_slice(topic.as_bytes());
    buf.push(b':');
    buf.extend_from_slice(payload);
    Bytes::from(buf)
}

/// Split a notification into topic and payload without knowing the
/// subscription filter.
///
/// The topic is the leading run of identifier bytes ended by `:` or a
/// space. Without one, the topic is empty and the whole message is the
/// payload.
pub fn decode_notification(bytes: Bytes) -> Notification {
    let boundary = bytes
        .iter()
        .position(|b| !is_topic_byte(*b))
        .filter(|&i| i > 0 && TOPIC_DELIMITERS.contains(&bytes[i]));

    match boundary {
        Some(i) => Notification {
            topic: String::from_utf8_lossy(&bytes[..i]).into_owned(),
            payload: bytes.slice(i + 1..),
        },
        None => Notification {
            topic: String::new(),
            payload: bytes,
        },
    }
}

/// Split a notification at the boundary of the subscription filter.
///
/// A non-empty filter that prefixes the message becomes the topic; one
/// delimiter after it is dropped. Anything else falls back to
/// [`decode_notification`].
pub fn decode_notification_for(filter: &str, bytes: Bytes) -> Notification {
    if filter.is_empty() || !matches_filter(filter, &bytes) {
        return decode_notification(bytes);
    }

    let mut rest = bytes.slice(filter.len()..);
    if rest.first().is_some_and(|b| TOPIC_DELIMITERS.contains(b)) {
        rest = rest.slice(1..);
    }
    Notification {
        topic: filter.to_string(),
        payload: rest,
    }
}

/// Byte-for-byte prefix match. The empty filter matches everything.
pub fn matches_filter(filter: &str, bytes: &[u8]) -> bool {
    bytes.starts_with(filter.as_bytes())
}

fn is_topic_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

/// Strip one pair of enclosing parentheses, but only when the opening
/// paren closes at the very end.
fn strip_parens(s: &str) -> Option<&str> {
    let s = s.trim();
    if !s.starts_with('(') {
        return None;
    }
    let close = matching_close(s)?;
    (close == s.len() - 1).then(|| &s[1..close])
}

/// Byte index of the bracket closing the one at index 0.
fn matching_close(s: &str) -> Option<usize> {
    let mut scanner = Scanner::default();
    for (i, c) in s.char_indices() {
        scanner.step(c);
        if scanner.depth == 0 && !scanner.in_literal() {
            return (i > 0).then_some(i);
        }
    }
    None
}

/// Split on commas that are outside brackets and string literals.
fn split_top_level(s: &str) -> Option<Vec<&str>> {
    let mut scanner = Scanner::default();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if c == ',' && scanner.depth == 0 && !scanner.in_literal() {
            parts.push(&s[start..i]);
            start = i + 1;
            continue;
        }
        scanner.step(c);
        if scanner.depth < 0 {
            return None;
        }
    }
    if scanner.depth != 0 || scanner.in_literal() {
        return None;
    }
    parts.push(&s[start..]);
    Some(parts)
}

/// `name: value` → `value`, requiring a non-empty value.
fn named_field<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let value = s.trim().strip_prefix(name)?.trim_start().strip_prefix(':')?;
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Bracket depth and literal tracking over RON-like text.
#[derive(Default)]
struct Scanner {
    depth: i32,
    quote: Option<char>,
    escaped: bool,
}

impl Scanner {
    fn in_literal(&self) -> bool {
        self.quote.is_some()
    }

    fn step(&mut self, c: char) {
        if let Some(q) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == q {
                self.quote = None;
            }
            return;
        }
        match c {
            '"' | '\'' => self.quote = Some(c),
            '(' | '[' | '{' => self.depth += 1,
            ')' | ']' | '}' => self.depth -= 1,
            _ => {}
        }
    }
}
