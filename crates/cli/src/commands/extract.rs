use chrono::NaiveDate;
use maitre_agent::conversation::{detect_intent, ContextExtractor, TurnIntent};
use maitre_core::config::{AppConfig, LoadOptions};
use serde_json::json;

use crate::commands::CommandResult;

pub fn run(text: &str, today: Option<&str>) -> CommandResult {
    let today = match today {
        Some(raw) => match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            Ok(date) => date,
            Err(error) => {
                return CommandResult::failure(
                    "extract",
                    "invalid_argument",
                    format!("--today must be YYYY-MM-DD: {error}"),
                    2,
                );
            }
        },
        None => match AppConfig::load(LoadOptions::default()) {
            Ok(config) => config.reservation.today(),
            Err(error) => {
                return CommandResult::failure(
                    "extract",
                    "config_validation",
                    format!("configuration issue: {error}"),
                    2,
                );
            }
        },
    };

    extract_at(text, today)
}

pub fn extract_at(text: &str, today: NaiveDate) -> CommandResult {
    let extractor = match ContextExtractor::new() {
        Ok(extractor) => extractor,
        Err(error) => {
            return CommandResult::failure("extract", "extractor_init", error.to_string(), 3);
        }
    };

    let draft = extractor.scan(text, today);
    let missing = draft.missing_fields();
    let data = json!({
        "intent": intent_label(detect_intent(text)),
        "today": today.format("%Y-%m-%d").to_string(),
        "draft": draft,
        "missing": missing,
    });

    CommandResult::success_with_data(
        "extract",
        format!("{} required field(s) still missing", missing.len()),
        Some(data),
    )
}

fn intent_label(intent: TurnIntent) -> &'static str {
    match intent {
        TurnIntent::ViewReservation => "view_reservation",
        TurnIntent::Reservation => "reservation",
        TurnIntent::Other => "other",
    }
}
