//! Webhook ingestion: one update per request.

use {
    beacon_store::NewMessage,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use beacon_metrics::{counter, ingest as ingest_metrics, labels};

use crate::{Normalizer, types::Update};

/// Header Telegram sets when the webhook was registered with a secret.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Normalizes webhook deliveries and checks their secret token.
#[derive(Debug, Clone)]
pub struct WebhookAdapter {
    normalizer: Normalizer,
    secret_token: Option<Secret<String>>,
}

impl WebhookAdapter {
    pub fn new(normalizer: Normalizer, secret_token: Option<Secret<String>>) -> Self {
        Self {
            normalizer,
            secret_token,
        }
    }

    /// Whether the request's secret header is acceptable. Always true when no
    /// secret is configured.
    pub fn verify_secret(&self, header: Option<&str>) -> bool {
        match &self.secret_token {
            None => true,
            Some(expected) => header.is_some_and(|h| constant_time_eq(h, expected.expose_secret())),
        }
    }

    /// Normalize a delivered update. Malformed or content-less updates yield
    /// `None`; the caller still acknowledges them so Telegram stops retrying.
    pub fn handle_webhook(&self, update: serde_json::Value) -> Option<NewMessage> {
        #[cfg(feature = "metrics")]
        counter!(ingest_metrics::UPDATES_TOTAL, labels::SOURCE => "webhook").increment(1);

        let update: Update = match serde_json::from_value(update) {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "dropping malformed webhook update");
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::MALFORMED_TOTAL).increment(1);
                return None;
            },
        };

        let message = self.normalizer.normalize_update(&update);
        if message.is_none() {
            debug!(update_id = update.update_id, "webhook update carries no post content");
        }
        message
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, beacon_config::BeaconConfig, serde_json::json, std::sync::Arc};

    fn adapter(secret: Option<&str>) -> WebhookAdapter {
        WebhookAdapter::new(
            Normalizer::new(Arc::new(BeaconConfig::default())),
            secret.map(|s| Secret::new(s.to_string())),
        )
    }

    #[test]
    fn secret_checks() {
        assert!(adapter(None).verify_secret(None));
        assert!(adapter(None).verify_secret(Some("anything")));

        let a = adapter(Some("s3cret"));
        assert!(a.verify_secret(Some("s3cret")));
        assert!(!a.verify_secret(Some("s3cre")));
        assert!(!a.verify_secret(Some("wrong!")));
        assert!(!a.verify_secret(None));
    }

    #[test]
    fn normalizes_channel_post() {
        let msg = adapter(None)
            .handle_webhook(json!({
                "update_id": 1,
                "channel_post": { "message_id": 2, "date": 10, "chat": { "id": -5 }, "text": "hey" }
            }))
            .unwrap();
        assert_eq!(msg.source_message_id, "-5:2");
        assert_eq!(msg.body, "hey");
    }

    #[test]
    fn malformed_update_is_none() {
        assert!(adapter(None).handle_webhook(json!({ "hello": "world" })).is_none());
        assert!(adapter(None).handle_webhook(json!([1, 2, 3])).is_none());
    }
}
