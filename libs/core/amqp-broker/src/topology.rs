//! Delayed-message exchange topology

use lapin::types::{AMQPValue, FieldTable};

/// Header read by the `rabbitmq_delayed_message_exchange` plugin.
pub const DELAY_HEADER: &str = "x-delay";

/// Exchange type registered by the delayed-message plugin.
pub(crate) const DELAYED_EXCHANGE_KIND: &str = "x-delayed-message";

/// The plugin stores the delay as a 32-bit value.
const MAX_DELAY_MS: u64 = u32::MAX as u64;

/// Message headers carrying `delay_ms`, clamped to what the plugin accepts.
pub fn delay_headers(delay_ms: u64) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        DELAY_HEADER.into(),
        AMQPValue::LongLongInt(delay_ms.min(MAX_DELAY_MS) as i64),
    );
    headers
}

/// Arguments for declaring the delayed exchange: routes like a direct exchange.
pub(crate) fn delayed_exchange_arguments() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-delayed-type".into(),
        AMQPValue::LongString("direct".into()),
    );
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[test]
    fn delay_header_is_milliseconds() {
        let headers = delay_headers(1_500);
        assert_eq!(
            headers.inner().get(&ShortString::from(DELAY_HEADER)),
            Some(&AMQPValue::LongLongInt(1_500))
        );
    }

    #[test]
    fn delay_header_is_clamped() {
        let headers = delay_headers(u64::MAX);
        assert_eq!(
            headers.inner().get(&ShortString::from(DELAY_HEADER)),
            Some(&AMQPValue::LongLongInt(u32::MAX as i64))
        );
    }

    #[test]
    fn exchange_routes_direct() {
        let args = delayed_exchange_arguments();
        assert_eq!(
            args.inner().get(&ShortString::from("x-delayed-type")),
            Some(&AMQPValue::LongString("direct".into()))
        );
    }
}
