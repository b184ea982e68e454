//! Protocol blocks embedded in generated replies.
//!
//! The text generator answers in prose and may interleave blocks such as
//!
//! ```text
//! [CREATE_RESERVATION]
//! action: create_reservation
//! customer_name: 王小明
//! party_size: 4
//! [/CREATE_RESERVATION]
//! ```
//!
//! Blocks are line-oriented `key: value` pairs. A `prefill` value may hold an
//! inline object literal that spans several lines, and `required_fields` holds
//! a bracketed list. A block whose `action` line does not carry the tag's
//! sentinel is ignored.

pub mod literal;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use maitre_core::domain::action::{ActionArguments, ActionTrigger};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    ReservationForm,
    CreateReservation,
    CheckReservation,
}

impl BlockTag {
    pub const ALL: [BlockTag; 3] =
        [Self::ReservationForm, Self::CreateReservation, Self::CheckReservation];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReservationForm => "RESERVATION_FORM",
            Self::CreateReservation => "CREATE_RESERVATION",
            Self::CheckReservation => "CHECK_RESERVATION",
        }
    }

    /// Value the block's `action` line must carry.
    pub fn sentinel(&self) -> &'static str {
        match self {
            Self::ReservationForm => "show_reservation_form",
            Self::CreateReservation => "create_reservation",
            Self::CheckReservation => "check_reservation",
        }
    }

    pub fn open_marker(&self) -> String {
        format!("[{}]", self.name())
    }

    pub fn close_marker(&self) -> String {
        format!("[/{}]", self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub tag: BlockTag,
    /// Plain `key: value` lines, `prefill` and `required_fields` excluded.
    pub fields: BTreeMap<String, String>,
    pub prefill: ActionArguments,
    pub required_fields: Vec<String>,
    /// The block exactly as it appeared, markers included.
    pub raw: String,
}

impl BlockPayload {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str).filter(|value| !value.is_empty())
    }
}

/// Typed view over a `[RESERVATION_FORM]` block, handed to the rendering
/// layer as a side channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReservationFormCard {
    pub title: Option<String>,
    pub prefill: ActionArguments,
    pub required_fields: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MarkupExtractor;

impl MarkupExtractor {
    pub fn new() -> Self {
        Self
    }

    /// First well-formed `tag` block in `text`. Absent or malformed blocks
    /// are `None`; extraction never fails loudly.
    pub fn extract(&self, tag: BlockTag, text: &str) -> Option<BlockPayload> {
        let open = tag.open_marker();
        let close = tag.close_marker();

        let start = text.find(&open)?;
        let body_start = start + open.len();
        let body_len = text[body_start..].find(&close)?;
        let body = &text[body_start..body_start + body_len];
        let raw = text[start..body_start + body_len + close.len()].to_string();

        let payload = parse_body(tag, body, raw);
        (payload.field("action") == Some(tag.sentinel())).then_some(payload)
    }

    pub fn extract_card(&self, text: &str) -> Option<ReservationFormCard> {
        let payload = self.extract(BlockTag::ReservationForm, text)?;
        Some(ReservationFormCard {
            title: payload.field("title").map(str::to_string),
            prefill: payload.prefill,
            required_fields: payload.required_fields,
        })
    }

    /// Converts an accepted block into a trigger for the action layer. Plain
    /// fields and prefill entries both become arguments; prefill wins on a
    /// clash.
    pub fn trigger(&self, payload: &BlockPayload) -> ActionTrigger {
        let mut arguments = payload
            .fields
            .iter()
            .filter(|(key, value)| key.as_str() != "action" && !value.is_empty())
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect::<ActionArguments>();
        arguments.extend(payload.prefill.clone());

        ActionTrigger {
            action: payload.tag.sentinel().to_string(),
            arguments,
            confidence: 1.0,
            raw_text: payload.raw.clone(),
        }
    }

    /// Removes every complete block and every dangling marker. An opening
    /// marker that never closes takes the rest of the text with it, since
    /// what follows is an unfinished block.
    pub fn strip(&self, text: &str) -> String {
        let mut stripped = text.to_string();

        for tag in BlockTag::ALL {
            let open = tag.open_marker();
            let close = tag.close_marker();

            while let Some(start) = stripped.find(&open) {
                match stripped[start..].find(&close) {
                    Some(offset) => {
                        stripped.replace_range(start..start + offset + close.len(), "");
                    }
                    None => stripped.truncate(start),
                }
            }
            stripped = stripped.replace(&close, "");
        }

        collapse_blank_lines(&stripped)
    }
}

fn parse_body(tag: BlockTag, body: &str, raw: String) -> BlockPayload {
    let mut fields = BTreeMap::new();
    let mut prefill = ActionArguments::new();
    let mut required_fields = Vec::new();
    let mut cursor = 0;

    while cursor < body.len() {
        let rest = &body[cursor..];
        let line_len = rest.find('\n').map(|index| index + 1).unwrap_or(rest.len());
        let line = &rest[..line_len];
        let mut consumed = line_len;

        if let Some((key, value)) = literal::split_on_colon(line) {
            let key = key.trim().to_ascii_lowercase();
            let value_offset = line.len() - value.len();

            match key.as_str() {
                "prefill" => {
                    let tail = &rest[value_offset..];
                    if tail.trim_start().starts_with('{') {
                        if let Some(range) = literal::balanced_object(tail) {
                            prefill = literal::parse_object(&tail[range.clone()]);
                            let after = value_offset + range.end;
                            consumed = rest[after..]
                                .find('\n')
                                .map(|index| after + index + 1)
                                .unwrap_or(rest.len());
                        } else {
                            prefill = literal::parse_object(value.trim());
                        }
                    }
                }
                "required_fields" => {
                    required_fields = value
                        .trim()
                        .trim_start_matches('[')
                        .trim_end_matches(']')
                        .split(',')
                        .map(|field| field.trim().trim_matches(|ch| ch == '"' || ch == '\''))
                        .filter(|field| !field.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ if !key.is_empty() => {
                    fields.insert(key, value.trim().to_string());
                }
                _ => {}
            }
        }

        cursor += consumed;
    }

    BlockPayload { tag, fields, prefill, required_fields, raw }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() && lines.last().map_or(true, |last| last.is_empty()) {
            continue;
        }
        lines.push(if line.trim().is_empty() { "" } else { line });
    }
    while lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
