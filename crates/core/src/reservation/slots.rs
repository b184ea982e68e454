use chrono::{Duration, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SLOT_STEP_MINUTES: i64 = 30;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("service window `{0}` must look like `HH:MM-HH:MM`")]
    Malformed(String),
    #[error("service window `{0}` closes before it opens")]
    Inverted(String),
    #[error("service window `{0}` must start and end on a half hour")]
    OffGrid(String),
}

/// Seating window, both ends inclusive: 17:00-21:00 seats at 17:00 .. 21:00.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWindow {
    pub first_seating: NaiveTime,
    pub last_seating: NaiveTime,
}

impl ServiceWindow {
    pub fn parse(raw: &str) -> Result<Self, SlotError> {
        let (start, end) =
            raw.split_once('-').ok_or_else(|| SlotError::Malformed(raw.to_string()))?;
        let first_seating = parse_clock(start).ok_or_else(|| SlotError::Malformed(raw.to_string()))?;
        let last_seating = parse_clock(end).ok_or_else(|| SlotError::Malformed(raw.to_string()))?;

        if last_seating < first_seating {
            return Err(SlotError::Inverted(raw.to_string()));
        }
        if !on_grid(first_seating) || !on_grid(last_seating) {
            return Err(SlotError::OffGrid(raw.to_string()));
        }

        Ok(Self { first_seating, last_seating })
    }

    fn slots(&self) -> Vec<NaiveTime> {
        let mut slots = Vec::new();
        let mut current = self.first_seating;
        while current <= self.last_seating {
            slots.push(current);
            let next = current + Duration::minutes(SLOT_STEP_MINUTES);
            // NaiveTime wraps at midnight.
            if next <= current {
                break;
            }
            current = next;
        }
        slots
    }
}

/// The fixed half-hour grid guests may book on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotGrid {
    windows: Vec<ServiceWindow>,
}

impl Default for TimeSlotGrid {
    fn default() -> Self {
        Self {
            windows: vec![
                ServiceWindow { first_seating: clock(11, 0), last_seating: clock(14, 0) },
                ServiceWindow { first_seating: clock(17, 0), last_seating: clock(21, 0) },
            ],
        }
    }
}

impl TimeSlotGrid {
    pub fn new(windows: Vec<ServiceWindow>) -> Self {
        Self { windows }
    }

    pub fn parse<S>(raw_windows: &[S]) -> Result<Self, SlotError>
    where
        S: AsRef<str>,
    {
        raw_windows
            .iter()
            .map(|raw| ServiceWindow::parse(raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        on_grid(time)
            && time.second() == 0
            && self
                .windows
                .iter()
                .any(|window| time >= window.first_seating && time <= window.last_seating)
    }

    pub fn slots(&self) -> Vec<NaiveTime> {
        let mut slots = self.windows.iter().flat_map(ServiceWindow::slots).collect::<Vec<_>>();
        slots.sort();
        slots.dedup();
        slots
    }

    pub fn describe(&self) -> String {
        self.windows
            .iter()
            .map(|window| {
                format!(
                    "{}-{}",
                    window.first_seating.format("%H:%M"),
                    window.last_seating.format("%H:%M")
                )
            })
            .collect::<Vec<_>>()
            .join("、")
    }
}

pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

fn on_grid(time: NaiveTime) -> bool {
    time.minute() % 30 == 0
}

fn clock(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}
