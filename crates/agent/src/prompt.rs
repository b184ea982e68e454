use chrono::NaiveDate;
use serde_json::json;
use tera::{Context, Tera};

use maitre_core::domain::reservation::ReservationDraft;

use crate::booking::FloorSnapshot;

const INSTRUCTION_TEMPLATE: &str = "你是「{{ restaurant_name }}」的線上訂位助理，用繁體中文、親切簡潔地回覆客人。
今天是 {{ today }}。
你只負責訂位與查詢訂位，不要編造價格、菜單或店家政策。

需要建立訂位時，在回覆末尾附上：
[CREATE_RESERVATION]
action: create_reservation
customer_name: 姓名
customer_phone: 電話
party_size: 人數
reservation_date: YYYY-MM-DD
reservation_time: HH:MM
special_requests: 特殊需求（可省略）
[/CREATE_RESERVATION]

客人想查詢既有訂位時，附上：
[CHECK_RESERVATION]
action: check_reservation
customer_phone: 電話
[/CHECK_RESERVATION]

適合讓客人直接填表時，附上：
[RESERVATION_FORM]
action: show_reservation_form
title: 線上訂位
prefill: { \"party_size\": 人數 }
required_fields: [customer_name, customer_phone]
[/RESERVATION_FORM]
{% if snapshot %}
目前店內狀況（{{ snapshot.date }}）：共 {{ snapshot.total_tables }} 張桌，可用 {{ snapshot.available_tables }} 張，有效訂位 {{ snapshot.active_reservations }} 筆。
{% endif %}{% if collected | length > 0 %}
已確認的訂位資訊：
{% for item in collected %}- {{ item.label }}：{{ item.value }}
{% endfor %}{% endif %}{% if missing | length > 0 %}
還缺少：{{ missing | join(sep=\"、\") }}。請一次只詢問缺少的資訊，不要重複詢問已確認的內容。
{% endif %}";

/// Assembles the generator's system instruction.
pub struct PromptBuilder {
    tera: Tera,
    restaurant_name: String,
}

impl PromptBuilder {
    pub fn new(restaurant_name: impl Into<String>) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template("instruction.txt", INSTRUCTION_TEMPLATE)?;
        Ok(Self { tera, restaurant_name: restaurant_name.into() })
    }

    /// Persona and block protocol, plus the floor snapshot when one is
    /// available and guidance for a draft in progress.
    pub fn instruction(
        &self,
        today: NaiveDate,
        snapshot: Option<&FloorSnapshot>,
        draft: &ReservationDraft,
    ) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("restaurant_name", &self.restaurant_name);
        context.insert("today", &today.format("%Y-%m-%d").to_string());
        context.insert("snapshot", &snapshot);
        context.insert("collected", &collected(draft));

        let missing = if draft.is_empty() {
            Vec::new()
        } else {
            draft.missing_fields().iter().map(|field| field.label()).collect()
        };
        context.insert("missing", &missing);

        self.tera.render("instruction.txt", &context).map(|text| text.trim_end().to_string())
    }
}

fn collected(draft: &ReservationDraft) -> Vec<serde_json::Value> {
    [
        ("姓名", draft.customer_name.clone()),
        ("電話", draft.customer_phone.clone()),
        ("人數", draft.party_size.map(|size| size.to_string())),
        ("日期", draft.reservation_date.clone()),
        ("時間", draft.reservation_time.clone()),
        ("特殊需求", draft.special_requests.clone()),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|value| json!({ "label": label, "value": value })))
    .collect()
}
