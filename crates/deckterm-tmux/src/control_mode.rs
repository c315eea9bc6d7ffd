// tmux control mode (-C) line decoding.
//
// Turns a single `%`-prefixed control line into a `Notification`. This module
// is stateless; `parser::ControlProtocolParser` owns buffering, response
// blocks and the window/pane arena.
//
// - `Notification` enum for the recognized verbs
// - `percent_decode()` / `percent_encode()` for `%HH` escaped payloads
// - `decode_octal_escaped()` for tmux's native `\NNN` escaping
// - `parse_line()` for one control line

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use deckterm_core::{PaneId, WindowId};

/// How `%output` payloads are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// `%HH` is one byte; every other character is literal UTF-8.
    #[default]
    Percent,
    /// `\NNN` is one byte; `\\` is a backslash.
    Octal,
}

impl PayloadEncoding {
    pub fn decode(self, payload: &str) -> Vec<u8> {
        match self {
            Self::Percent => percent_decode(payload),
            Self::Octal => decode_octal_escaped(payload),
        }
    }
}

/// Parsed control line.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// `%begin <ts> <id> <flags>`
    Begin { timestamp: i64, id: u64, flags: u32 },

    /// `%end <ts> <id> <flags>` (success) or `%error ...` (failure).
    End {
        timestamp: i64,
        id: u64,
        flags: u32,
        success: bool,
    },

    /// `%output %<pane-id> <escaped-bytes>`; also produced by
    /// `%extended-output %<pane-id> <age> ... : <escaped-bytes>`.
    Output { pane_id: PaneId, data: Bytes },

    /// `%layout-change @<window-id> <layout-string> ...`
    LayoutChange { window_id: WindowId, layout: String },

    /// `%window-add @<id>`
    WindowAdd { window_id: WindowId },

    /// `%window-close @<id>` (also `%unlinked-window-close`)
    WindowClose { window_id: WindowId },

    /// `%window-renamed @<id> <name>`
    WindowRenamed { window_id: WindowId, name: String },

    /// `%session-changed $<id> <name>`
    SessionChanged { session_id: String, name: String },

    /// `%pane-mode-changed %<pane-id>`
    PaneModeChanged { pane_id: PaneId },

    /// `%exit [reason]`
    Exit { reason: Option<String> },

    /// Unrecognized or malformed `%` line. Version skew is expected, so this
    /// is never fatal.
    Unknown(String),
}

/// Decode a percent-escaped payload into raw bytes.
///
/// A malformed escape (non-hex digit or truncated at the end) stops decoding;
/// the bytes decoded so far are returned.
pub fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| hex_value(*b));
            let lo = bytes.get(i + 2).and_then(|b| hex_value(*b));
            match (hi, lo) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    tracing::warn!(offset = i, "malformed percent escape in pane output, truncating");
                    break;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    out
}

/// Encode raw bytes: printable ASCII other than `%` is literal, every other
/// byte becomes `%HH`.
pub fn percent_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
    }
    out
}

/// Decode tmux octal-escaped byte string into raw bytes.
///
/// - `\NNN` where NNN is exactly 3 octal digits maps to a single byte
/// - `\\` maps to a literal backslash
/// - All other characters pass through as their UTF-8 bytes
pub fn decode_octal_escaped(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut out = Vec::with_capacity(len);
    let mut i = 0;

    while i < len {
        if bytes[i] == b'\\' && i + 1 < len {
            if i + 3 < len
                && is_octal_digit(bytes[i + 1])
                && is_octal_digit(bytes[i + 2])
                && is_octal_digit(bytes[i + 3])
            {
                let val = (bytes[i + 1] - b'0') as u16 * 64
                    + (bytes[i + 2] - b'0') as u16 * 8
                    + (bytes[i + 3] - b'0') as u16;
                out.push(val as u8);
                i += 4;
            } else if bytes[i + 1] == b'\\' {
                out.push(b'\\');
                i += 2;
            } else {
                out.push(b'\\');
                i += 1;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    out
}

/// Parse a single control line.
///
/// Returns `None` if the line does not start with `%` (a response body line).
pub fn parse_line(line: &str, encoding: PayloadEncoding) -> Option<Notification> {
    let line = line.trim_end_matches(['\r', '\n']);
    let body = line.strip_prefix('%')?;

    let (keyword, rest) = split_first_word(body);

    let parsed = match keyword {
        "begin" => parse_guard(rest).map(|(timestamp, id, flags)| Notification::Begin {
            timestamp,
            id,
            flags,
        }),
        "end" | "error" => parse_guard(rest).map(|(timestamp, id, flags)| Notification::End {
            timestamp,
            id,
            flags,
            success: keyword == "end",
        }),
        "output" => parse_output(rest, encoding),
        "extended-output" => parse_extended_output(rest, encoding),
        "layout-change" => {
            let (window, rest) = split_first_word(rest);
            // tmux >= 2.2 appends the visible layout and window flags.
            let (layout, _) = split_first_word(rest);
            WindowId::parse_ref(window).map(|window_id| Notification::LayoutChange {
                window_id,
                layout: layout.to_string(),
            })
        }
        "window-add" => {
            let (window, _) = split_first_word(rest);
            WindowId::parse_ref(window).map(|window_id| Notification::WindowAdd { window_id })
        }
        "window-close" | "unlinked-window-close" => {
            let (window, _) = split_first_word(rest);
            WindowId::parse_ref(window).map(|window_id| Notification::WindowClose { window_id })
        }
        "window-renamed" => {
            let (window, name) = split_first_word(rest);
            WindowId::parse_ref(window).map(|window_id| Notification::WindowRenamed {
                window_id,
                name: name.to_string(),
            })
        }
        "session-changed" => {
            let (session, name) = split_first_word(rest);
            if session.is_empty() {
                None
            } else {
                Some(Notification::SessionChanged {
                    session_id: session.trim_start_matches('$').to_string(),
                    name: name.to_string(),
                })
            }
        }
        "pane-mode-changed" => {
            let (pane, _) = split_first_word(rest);
            PaneId::parse_ref(pane).map(|pane_id| Notification::PaneModeChanged { pane_id })
        }
        "exit" => Some(Notification::Exit {
            reason: if rest.is_empty() {
                None
            } else {
                Some(rest.to_string())
            },
        }),
        _ => None,
    };

    Some(parsed.unwrap_or_else(|| Notification::Unknown(line.to_string())))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

#[inline]
fn is_octal_digit(b: u8) -> bool {
    (b'0'..=b'7').contains(&b)
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Split a string into the first space-delimited word and the remainder.
/// Only the separating space is consumed, so payloads keep their own
/// leading whitespace.
fn split_first_word(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, ""),
    }
}

/// `<ts> <id> <flags>` of `%begin` / `%end` / `%error`.
fn parse_guard(rest: &str) -> Option<(i64, u64, u32)> {
    let mut parts = rest.split_whitespace();
    let timestamp = parts.next()?.parse().ok()?;
    let id = parts.next()?.parse().ok()?;
    let flags = parts.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    Some((timestamp, id, flags))
}

fn parse_output(rest: &str, encoding: PayloadEncoding) -> Option<Notification> {
    let (pane, payload) = split_first_word(rest);
    let pane_id = PaneId::parse_ref(pane)?;
    Some(Notification::Output {
        pane_id,
        data: Bytes::from(encoding.decode(payload)),
    })
}

/// `%extended-output %<pane-id> <age> [reserved ...] : <payload>`
fn parse_extended_output(rest: &str, encoding: PayloadEncoding) -> Option<Notification> {
    let (pane, rest) = split_first_word(rest);
    let pane_id = PaneId::parse_ref(pane)?;
    let (age, rest) = split_first_word(rest);
    age.parse::<u64>().ok()?;
    let (_, payload) = rest.split_once(" : ").or_else(|| {
        rest.strip_prefix(": ")
            .or_else(|| rest.strip_prefix(':'))
            .map(|p| ("", p))
    })?;
    Some(Notification::Output {
        pane_id,
        data: Bytes::from(encoding.decode(payload)),
    })
}
