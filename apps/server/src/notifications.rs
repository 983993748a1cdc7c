//! Telegram notifications for booking and salon lifecycle events.
//!
//! Delivery is best effort: a failed send is logged and reported back to the
//! caller as a warning string, the committed change stays.

use chrono::{NaiveDate, NaiveTime};

/// Something happened that another party should hear about.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// Sent to the platform admin.
    SalonPendingApproval { salon_name: String, owner_name: String },
    /// Sent to the salon owner.
    SalonApproved { salon_name: String },
    /// Sent to the salon owner.
    NewBooking {
        salon_name: String,
        customer_name: String,
        service_name: Option<String>,
        date: NaiveDate,
        start_time: NaiveTime,
    },
    /// Sent to whichever side did not cancel.
    Cancellation {
        salon_name: String,
        date: NaiveDate,
        start_time: NaiveTime,
        by_owner: bool,
        reason: Option<String>,
    },
}

impl DomainEvent {
    /// Message text in Telegram HTML.
    pub fn render(&self) -> String {
        match self {
            DomainEvent::SalonPendingApproval { salon_name, owner_name } => format!(
                "🏪 <b>New salon awaiting approval</b>\n\n{}\nOwner: {}",
                escape(salon_name),
                escape(owner_name)
            ),
            DomainEvent::SalonApproved { salon_name } => format!(
                "✅ Your salon <b>{}</b> has been approved and is now visible to customers.",
                escape(salon_name)
            ),
            DomainEvent::NewBooking {
                salon_name,
                customer_name,
                service_name,
                date,
                start_time,
            } => format!(
                "📅 <b>New booking</b> at {}\n\n👤 {}\n💇 {}\n🕐 {} {}",
                escape(salon_name),
                escape(customer_name),
                service_name.as_deref().map(escape).unwrap_or_else(|| "-".into()),
                date.format("%d.%m.%Y"),
                start_time.format("%H:%M")
            ),
            DomainEvent::Cancellation {
                salon_name,
                date,
                start_time,
                by_owner,
                reason,
            } => {
                let who = if *by_owner { "the salon" } else { "the customer" };
                let mut text = format!(
                    "❌ <b>Appointment cancelled</b> by {who}\n\n{}\n🕐 {} {}",
                    escape(salon_name),
                    date.format("%d.%m.%Y"),
                    start_time.format("%H:%M")
                );
                if let Some(reason) = reason.as_deref().filter(|r| !r.trim().is_empty()) {
                    text.push_str(&format!("\nReason: {}", escape(reason)));
                }
                text
            }
        }
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    /// `None` disables delivery (tests, local runs without a bot).
    bot_token: Option<String>,
}

impl Notifier {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: Some(bot_token.to_owned()).filter(|t| !t.is_empty()),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: None,
        }
    }

    async fn send(&self, token: &str, chat_id: i64, text: &str) -> Result<(), reqwest::Error> {
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        self.http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML"
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Deliver `event` to `chat_id`. Returns a warning for the API response
    /// when delivery failed.
    pub async fn dispatch(&self, chat_id: i64, event: &DomainEvent) -> Option<String> {
        let token = self.bot_token.as_deref()?;
        match self.send(token, chat_id, &event.render()).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "notification not delivered");
                Some("Saved, but the notification could not be delivered.".into())
            }
        }
    }
}
