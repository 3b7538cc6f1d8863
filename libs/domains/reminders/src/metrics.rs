//! Pipeline counters

use metrics::counter;

use crate::models::{ChannelType, ReminderStatus};

pub fn promoted(count: usize) {
    counter!("reminders_promoted_total").increment(count as u64);
}

pub fn published() {
    counter!("reminders_published_total").increment(1);
}

pub fn prepared(outcome: &'static str) {
    counter!("reminders_prepared_total", "outcome" => outcome).increment(1);
}

pub fn sent(status: ReminderStatus) {
    counter!("reminders_sent_total", "status" => status.to_string()).increment(1);
}

pub fn channel_delivery(channel: ChannelType, ok: bool) {
    let result = if ok { "success" } else { "error" };
    counter!(
        "reminder_channel_deliveries_total",
        "channel" => channel.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn recurred() {
    counter!("reminders_recurred_total").increment(1);
}
