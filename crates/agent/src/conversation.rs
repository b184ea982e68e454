use chrono::{Datelike, Duration, NaiveDate};
use regex::{Captures, Regex};
use thiserror::Error;

use maitre_core::domain::conversation::ConversationHistory;
use maitre_core::domain::reservation::ReservationDraft;
use maitre_core::reservation::{is_mobile_number, normalize_phone};

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("slot rule `{rule}` has an invalid pattern: {source}")]
    Pattern {
        rule: &'static str,
        #[source]
        source: regex::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Name,
    Phone,
    PartySize,
    Date,
    Time,
    SpecialRequest,
}

/// How a matched capture becomes a slot value. A normalizer may refuse the
/// match, in which case the next rule for the slot gets its turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Normalizer {
    Name,
    Phone,
    Count,
    IsoDate,
    MonthDay,
    RelativeDays(i64),
    Meridiem,
    Clock,
    ClockWord,
    Bucket(u32, u32),
    Request,
}

struct RuleSpec {
    slot: Slot,
    name: &'static str,
    pattern: &'static str,
    normalizer: Normalizer,
}

/// Ordered slot rules. Within a slot the first accepted match wins.
const RULES: &[RuleSpec] = &[
    RuleSpec {
        slot: Slot::Name,
        name: "name_zh",
        pattern: r"我(?:的名字是|姓名是|是|叫)\s*(\p{Han}{2,6})",
        normalizer: Normalizer::Name,
    },
    RuleSpec {
        slot: Slot::Name,
        name: "name_en",
        pattern: r"\b(?i:my name is|i am|i'm)\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)?)",
        normalizer: Normalizer::Name,
    },
    RuleSpec {
        slot: Slot::Phone,
        name: "mobile",
        pattern: r"(?:^|\D)(09\d{2}[-\s]?\d{3}[-\s]?\d{3})(?:\D|$)",
        normalizer: Normalizer::Phone,
    },
    RuleSpec {
        slot: Slot::PartySize,
        name: "party_zh",
        pattern: r"(\d{1,2}|[一二兩两三四五六七八九十]{1,3})\s*(?:個人|个人|位|人)",
        normalizer: Normalizer::Count,
    },
    RuleSpec {
        slot: Slot::PartySize,
        name: "party_label",
        pattern: r"人數\s*[:：]?\s*(\d{1,2})",
        normalizer: Normalizer::Count,
    },
    RuleSpec {
        slot: Slot::PartySize,
        name: "party_en",
        pattern: r"(?i)(?:party of|table for)\s*(\d{1,2})|(\d{1,2})\s*(?:people|persons|guests|pax)\b",
        normalizer: Normalizer::Count,
    },
    RuleSpec {
        slot: Slot::Date,
        name: "date_iso",
        pattern: r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})",
        normalizer: Normalizer::IsoDate,
    },
    RuleSpec {
        slot: Slot::Date,
        name: "date_month_day_zh",
        pattern: r"(\d{1,2})\s*月\s*(\d{1,2})\s*[日號号]",
        normalizer: Normalizer::MonthDay,
    },
    RuleSpec {
        slot: Slot::Date,
        name: "date_month_day_slash",
        pattern: r"(?:^|[^\d/])(\d{1,2})/(\d{1,2})(?:[^\d/]|$)",
        normalizer: Normalizer::MonthDay,
    },
    RuleSpec {
        slot: Slot::Date,
        name: "date_plus_three",
        pattern: r"大後天|大后天",
        normalizer: Normalizer::RelativeDays(3),
    },
    RuleSpec {
        slot: Slot::Date,
        name: "date_plus_two",
        pattern: r"(?i)後天|后天|day after tomorrow",
        normalizer: Normalizer::RelativeDays(2),
    },
    RuleSpec {
        slot: Slot::Date,
        name: "date_plus_one",
        pattern: r"(?i)明天|明日|明晚|tomorrow",
        normalizer: Normalizer::RelativeDays(1),
    },
    RuleSpec {
        slot: Slot::Date,
        name: "date_today",
        pattern: r"(?i)今天|今日|今晚|\btoday\b|\btonight\b",
        normalizer: Normalizer::RelativeDays(0),
    },
    RuleSpec {
        slot: Slot::Time,
        name: "time_meridiem",
        pattern: r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b",
        normalizer: Normalizer::Meridiem,
    },
    RuleSpec {
        slot: Slot::Time,
        name: "time_clock",
        pattern: r"(\d{1,2})[:：](\d{2})",
        normalizer: Normalizer::Clock,
    },
    RuleSpec {
        slot: Slot::Time,
        name: "time_dian",
        pattern: r"(\d{1,2}|[一二兩两三四五六七八九十]{1,3})\s*[點点](?:\s*(半)|\s*(\d{1,2}|[一二三四五六七八九十]{1,3})\s*分?)?",
        normalizer: Normalizer::ClockWord,
    },
    RuleSpec {
        slot: Slot::Time,
        name: "time_noon",
        pattern: r"(?i)中午|\bnoon\b",
        normalizer: Normalizer::Bucket(12, 0),
    },
    RuleSpec {
        slot: Slot::SpecialRequest,
        name: "request_zh",
        pattern: r"(不\s*)?(?:需要|希望|要求)\s*[:：]?\s*([^，。,.!！?？\n]{1,40})",
        normalizer: Normalizer::Request,
    },
    RuleSpec {
        slot: Slot::SpecialRequest,
        name: "request_en",
        pattern: r"(?i)\b(don't\s+|do not\s+|no\s+)?(?:need|require|hope for|would like)\s+([^,.!?\n]{1,60})",
        normalizer: Normalizer::Request,
    },
];

const NAME_STOP_CHARS: &[char] = &['想', '要', '訂', '订', '預', '预', '的', '在', '來', '来', '打', '先'];
const MAX_HAN_NAME_CHARS: usize = 4;
const NAME_STOP_WORDS: &[&str] = &["明天", "今天", "後天", "后天", "明晚", "今晚"];
const EVENING_QUALIFIERS: &[&str] =
    &["晚上", "傍晚", "下午", "今晚", "明晚", "evening", "tonight", "afternoon"];
const BOOKING_WORDS: &[&str] =
    &["訂位", "订位", "預約", "预约", "訂", "订", "reserve", "reservation", "book", "table for"];

const RESERVATION_KEYWORDS: &[&str] = &[
    "訂位", "订位", "預約", "预约", "訂桌", "订桌", "訂個位", "reservation", "reserve", "book a table",
];
const VIEW_KEYWORDS: &[&str] = &[
    "查詢訂位",
    "查询订位",
    "查訂位",
    "我的訂位",
    "查看訂位",
    "確認訂位",
    "check my reservation",
    "view my reservation",
    "view reservation",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnIntent {
    ViewReservation,
    Reservation,
    Other,
}

/// Coarse keyword intent for the local flow. Viewing wins over booking so
/// that "查詢訂位" is not read as a new booking.
pub fn detect_intent(text: &str) -> TurnIntent {
    let lowered = text.to_lowercase();
    if VIEW_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        TurnIntent::ViewReservation
    } else if RESERVATION_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
        TurnIntent::Reservation
    } else {
        TurnIntent::Other
    }
}

struct SlotRule {
    slot: Slot,
    pattern: Regex,
    normalizer: Normalizer,
}

/// Fills reservation slots from free text with an ordered rule table.
pub struct ContextExtractor {
    rules: Vec<SlotRule>,
}

impl ContextExtractor {
    pub fn new() -> Result<Self, ExtractorError> {
        let rules = RULES
            .iter()
            .map(|rule| {
                Regex::new(rule.pattern)
                    .map(|pattern| SlotRule {
                        slot: rule.slot,
                        pattern,
                        normalizer: rule.normalizer,
                    })
                    .map_err(|source| ExtractorError::Pattern { rule: rule.name, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Slots found in `utterance`, then in earlier user turns (newest first)
    /// for whatever is still empty.
    pub fn extract(
        &self,
        utterance: &str,
        history: &ConversationHistory,
        today: NaiveDate,
    ) -> ReservationDraft {
        let mut draft = self.scan(utterance, today);
        for earlier in history.user_messages_newest_first() {
            if draft.missing_fields().is_empty() {
                break;
            }
            draft.fill_missing(&self.scan(earlier, today));
        }
        draft
    }

    /// Slots found in one piece of text.
    pub fn scan(&self, text: &str, today: NaiveDate) -> ReservationDraft {
        let mut draft = ReservationDraft::default();
        let evening = has_evening_qualifier(text);

        for rule in &self.rules {
            if slot_filled(&draft, rule.slot) {
                continue;
            }
            let value = rule
                .pattern
                .captures_iter(text)
                .find_map(|captures| normalize(rule.normalizer, &captures, today, evening));
            if let Some(value) = value {
                assign(&mut draft, rule.slot, value);
            }
        }

        draft
    }
}

fn slot_filled(draft: &ReservationDraft, slot: Slot) -> bool {
    match slot {
        Slot::Name => draft.customer_name.is_some(),
        Slot::Phone => draft.customer_phone.is_some(),
        Slot::PartySize => draft.party_size.is_some(),
        Slot::Date => draft.reservation_date.is_some(),
        Slot::Time => draft.reservation_time.is_some(),
        Slot::SpecialRequest => draft.special_requests.is_some(),
    }
}

fn assign(draft: &mut ReservationDraft, slot: Slot, value: String) {
    match slot {
        Slot::Name => draft.customer_name = Some(value),
        Slot::Phone => draft.customer_phone = Some(value),
        Slot::PartySize => draft.party_size = value.parse().ok(),
        Slot::Date => draft.reservation_date = Some(value),
        Slot::Time => draft.reservation_time = Some(value),
        Slot::SpecialRequest => draft.special_requests = Some(value),
    }
}

fn normalize(
    normalizer: Normalizer,
    captures: &Captures<'_>,
    today: NaiveDate,
    evening: bool,
) -> Option<String> {
    let group = |index: usize| captures.get(index).map(|found| found.as_str());

    match normalizer {
        Normalizer::Name => {
            let raw = NAME_STOP_WORDS
                .iter()
                .fold(group(1)?, |name, word| name.split(word).next().unwrap_or_default());
            let name = raw.split(NAME_STOP_CHARS).next().unwrap_or_default().trim();
            let name: String = if name.is_ascii() {
                name.to_string()
            } else {
                name.chars().take(MAX_HAN_NAME_CHARS).collect()
            };
            (name.chars().count() >= 2).then_some(name)
        }
        Normalizer::Phone => {
            let phone = normalize_phone(group(1)?);
            is_mobile_number(&phone).then_some(phone)
        }
        Normalizer::Count => {
            let raw = group(1).or_else(|| group(2))?;
            let count = parse_number(raw)?;
            (count > 0).then(|| count.to_string())
        }
        Normalizer::IsoDate => {
            let date = NaiveDate::from_ymd_opt(
                group(1)?.parse().ok()?,
                group(2)?.parse().ok()?,
                group(3)?.parse().ok()?,
            )?;
            Some(date.format("%Y-%m-%d").to_string())
        }
        Normalizer::MonthDay => {
            let month = group(1)?.parse().ok()?;
            let day = group(2)?.parse().ok()?;
            resolve_month_day(month, day, today).map(|date| date.format("%Y-%m-%d").to_string())
        }
        Normalizer::RelativeDays(days) => {
            Some((today + Duration::days(days)).format("%Y-%m-%d").to_string())
        }
        Normalizer::Meridiem => {
            let hour: u32 = group(1)?.parse().ok()?;
            let minute = group(2).map(str::parse).transpose().ok()?.unwrap_or(0);
            if !(1..=12).contains(&hour) {
                return None;
            }
            let pm = group(3)?.eq_ignore_ascii_case("pm");
            let hour = match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (hour, true) => hour + 12,
                (hour, false) => hour,
            };
            clock(hour, minute)
        }
        Normalizer::Clock => {
            let hour = group(1)?.parse().ok()?;
            let minute = group(2)?.parse().ok()?;
            clock(shift_evening(hour, evening), minute)
        }
        Normalizer::ClockWord => {
            let hour = parse_number(group(1)?)?;
            let minute = if group(2).is_some() {
                30
            } else {
                group(3).map(parse_number).unwrap_or(Some(0))?
            };
            clock(shift_evening(hour, evening), minute)
        }
        Normalizer::Bucket(hour, minute) => clock(hour, minute),
        Normalizer::Request => {
            // A negated ask ("不需要", "don't need") is not a request.
            if group(1).is_some() {
                return None;
            }
            let request = group(2)?.trim();
            let lowered = request.to_lowercase();
            let restates_booking = BOOKING_WORDS.iter().any(|word| lowered.contains(word));
            (!request.is_empty() && !restates_booking).then(|| request.to_string())
        }
    }
}

fn has_evening_qualifier(text: &str) -> bool {
    let lowered = text.to_lowercase();
    EVENING_QUALIFIERS.iter().any(|qualifier| lowered.contains(qualifier))
}

fn shift_evening(hour: u32, evening: bool) -> u32 {
    if evening && hour < 12 {
        hour + 12
    } else {
        hour
    }
}

fn clock(hour: u32, minute: u32) -> Option<String> {
    (hour < 24 && minute < 60).then(|| format!("{hour:02}:{minute:02}"))
}

/// Month/day without a year: this year, or next year once the day has passed.
fn resolve_month_day(month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
    }
}

/// Arabic digits or Chinese numerals up to 99 (`四`, `十二`, `二十`, `兩`).
pub fn parse_number(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<u32>() {
        return Some(number);
    }

    let digit = |ch: char| -> Option<u32> {
        match ch {
            '一' => Some(1),
            '二' | '兩' | '两' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            _ => None,
        }
    };

    match raw.split_once('十') {
        Some((tens, ones)) => {
            let tens = match tens.chars().count() {
                0 => 1,
                1 => digit(tens.chars().next()?)?,
                _ => return None,
            };
            let ones = match ones.chars().count() {
                0 => 0,
                1 => digit(ones.chars().next()?)?,
                _ => return None,
            };
            Some(tens * 10 + ones)
        }
        None if raw.chars().count() == 1 => digit(raw.chars().next()?),
        None => None,
    }
}
