use tera::{Context, Tera};

use maitre_core::domain::reservation::ReservationRecord;

const CONFIRMATION_TEMPLATE: &str = "訂位成功！
訂位編號：{{ id }}
姓名：{{ customer_name }}
電話：{{ customer_phone }}
人數：{{ party_size }} 位
日期：{{ date }}
時間：{{ time }}
桌位：{{ table_name }}
{% if special_requests %}特殊需求：{{ special_requests }}
{% endif %}{{ restaurant_name }}期待您的光臨！";

const SUMMARY_TEMPLATE: &str = "{% if reservations | length == 0 %}查無此電話的訂位紀錄。{% else %}以下是您的訂位：
{% for reservation in reservations %}
- {{ reservation.id }}（{{ reservation.status }}）
  {{ reservation.date }} {{ reservation.time }}，{{ reservation.party_size }} 位，{{ reservation.customer_name }}
  桌位：{{ reservation.table_name }}{% if reservation.special_requests %}，特殊需求：{{ reservation.special_requests }}{% endif %}
{% endfor %}{% endif %}";

/// Deterministic guest-facing text for bookings.
pub struct ConfirmationRenderer {
    tera: Tera,
    restaurant_name: String,
}

impl ConfirmationRenderer {
    pub fn new(restaurant_name: impl Into<String>) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template("confirmation.txt", CONFIRMATION_TEMPLATE)?;
        tera.add_raw_template("summary.txt", SUMMARY_TEMPLATE)?;
        Ok(Self { tera, restaurant_name: restaurant_name.into() })
    }

    pub fn confirmation(
        &self,
        record: &ReservationRecord,
        table_name: &str,
    ) -> Result<String, tera::Error> {
        let mut context = Context::from_value(record_view(record, table_name))?;
        context.insert("restaurant_name", &self.restaurant_name);
        self.tera.render("confirmation.txt", &context)
    }

    /// Summary of `reservations`, each paired with its table's display name.
    pub fn summary(&self, reservations: &[(ReservationRecord, String)]) -> Result<String, tera::Error> {
        let views = reservations
            .iter()
            .map(|(record, table_name)| record_view(record, table_name))
            .collect::<Vec<_>>();
        let mut context = Context::new();
        context.insert("reservations", &views);
        self.tera.render("summary.txt", &context).map(|text| text.trim_end().to_string())
    }
}

fn record_view(record: &ReservationRecord, table_name: &str) -> serde_json::Value {
    serde_json::json!({
        "id": record.id.0,
        "status": status_label(record),
        "customer_name": record.customer_name,
        "customer_phone": record.customer_phone,
        "party_size": record.party_size,
        "date": record.reservation_date.format("%Y-%m-%d").to_string(),
        "time": record.reservation_time.format("%H:%M").to_string(),
        "table_name": table_name,
        "special_requests": record.special_requests,
    })
}

fn status_label(record: &ReservationRecord) -> &'static str {
    use maitre_core::domain::reservation::ReservationStatus;

    match record.status {
        ReservationStatus::Pending => "待確認",
        ReservationStatus::Confirmed => "已確認",
        ReservationStatus::Seated => "已入座",
        ReservationStatus::Completed => "已完成",
        ReservationStatus::Cancelled => "已取消",
    }
}
