//! Sending one encrypted push message and classifying the push service's reply.

use std::time::Duration;

use {
    async_trait::async_trait,
    beacon_store::Subscription,
    tracing::{debug, warn},
    url::Url,
    web_push::{
        ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessage,
        WebPushMessageBuilder,
    },
};

use crate::{PushPayload, Result, VapidKeys};

/// Longest response-body excerpt kept in a transient error reason.
const REASON_BODY_CHARS: usize = 200;

/// Outcome of one delivery attempt. Every attempt ends in exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// 2xx from the push service.
    Sent,
    /// 404 or 410: the browser unsubscribed or the endpoint expired.
    ExpiredEndpoint,
    /// 403: the subscription was created under a different VAPID key.
    KeyMismatch,
    /// 401: our VAPID credentials were rejected.
    AuthInvalid,
    /// Anything else, including 429, 5xx, network failures and local
    /// encryption errors.
    TransientError { status: Option<u16>, reason: String },
}

impl DeliveryResult {
    #[must_use]
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }

    /// Whether the subscription is permanently unusable and should be deleted.
    #[must_use]
    pub fn removes_subscription(&self) -> bool {
        matches!(self, Self::ExpiredEndpoint | Self::KeyMismatch)
    }

    /// Stable snake_case label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::ExpiredEndpoint => "expired_endpoint",
            Self::KeyMismatch => "key_mismatch",
            Self::AuthInvalid => "auth_invalid",
            Self::TransientError { .. } => "transient_error",
        }
    }

    fn transient(reason: impl Into<String>) -> Self {
        Self::TransientError {
            status: None,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for DeliveryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientError {
                status: Some(status),
                reason,
            } => write!(f, "transient_error ({status}): {reason}"),
            Self::TransientError { status: None, reason } => {
                write!(f, "transient_error: {reason}")
            },
            other => f.write_str(other.label()),
        }
    }
}

/// Map a push service HTTP status to a [`DeliveryResult`].
#[must_use]
pub fn classify_status(status: u16, body: &str) -> DeliveryResult {
    match status {
        200..=299 => DeliveryResult::Sent,
        404 | 410 => DeliveryResult::ExpiredEndpoint,
        403 => DeliveryResult::KeyMismatch,
        401 => DeliveryResult::AuthInvalid,
        _ => {
            let excerpt: String = body.trim().chars().take(REASON_BODY_CHARS).collect();
            let reason = if excerpt.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {excerpt}")
            };
            DeliveryResult::TransientError {
                status: Some(status),
                reason,
            }
        },
    }
}

/// Delivers one payload to one subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Never fails: every error is folded into the returned result.
    async fn send(&self, subscription: &Subscription, payload: &PushPayload) -> DeliveryResult;
}

/// Settings for [`WebPushSender`].
#[derive(Debug, Clone)]
pub struct WebPushSenderConfig {
    /// VAPID `sub` claim.
    pub subject: String,
    pub ttl_secs: u32,
    pub request_timeout: Duration,
}

impl Default for WebPushSenderConfig {
    fn default() -> Self {
        Self {
            subject: "mailto:admin@example.com".into(),
            ttl_secs: 86_400,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// [`PushSender`] that encrypts with `web-push` and sends through `reqwest`.
pub struct WebPushSender {
    http: reqwest::Client,
    keys: VapidKeys,
    config: WebPushSenderConfig,
}

impl WebPushSender {
    pub fn new(keys: VapidKeys, config: WebPushSenderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, keys, config })
    }

    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    fn build_message(&self, sub: &Subscription, payload: &[u8]) -> Result<WebPushMessage> {
        let info = SubscriptionInfo::new(&sub.endpoint, &sub.p256dh, &sub.auth);

        let mut signature = VapidSignatureBuilder::from_base64(self.keys.private_key(), &info)?;
        signature.add_claim("sub", self.config.subject.as_str());
        if let Ok(endpoint) = Url::parse(&sub.endpoint) {
            signature.add_claim("aud", endpoint.origin().ascii_serialization());
        }
        let signature = signature.build()?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        builder.set_ttl(self.config.ttl_secs);
        Ok(builder.build()?)
    }

    async fn post(&self, message: WebPushMessage) -> DeliveryResult {
        let mut request = self
            .http
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(topic) = message.topic {
            request = request.header("Topic", topic);
        }

        if let Some(push_payload) = message.payload {
            request = request
                .header("Content-Encoding", push_payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");
            for (key, value) in &push_payload.crypto_headers {
                request = request.header(*key, value.as_str());
            }
            request = request.body(push_payload.content);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return DeliveryResult::transient(format!("request failed: {e}")),
        };

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return DeliveryResult::Sent;
        }
        let body = response.text().await.unwrap_or_default();
        classify_status(status, &body)
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(&self, subscription: &Subscription, payload: &PushPayload) -> DeliveryResult {
        let bytes = match payload.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return DeliveryResult::transient(format!("payload encoding: {e}")),
        };

        let message = match self.build_message(subscription, &bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    endpoint = subscription.short_endpoint(),
                    error = %e,
                    "failed to build push message"
                );
                return DeliveryResult::transient(format!("build failed: {e}"));
            },
        };

        let result = self.post(message).await;
        debug!(
            endpoint = subscription.short_endpoint(),
            result = result.label(),
            "push attempt finished"
        );
        result
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL},
        p256::elliptic_curve::{
            rand_core::{OsRng, RngCore},
            sec1::ToEncodedPoint,
        },
        rstest::rstest,
    };

    #[rstest]
    #[case(201, DeliveryResult::Sent)]
    #[case(200, DeliveryResult::Sent)]
    #[case(404, DeliveryResult::ExpiredEndpoint)]
    #[case(410, DeliveryResult::ExpiredEndpoint)]
    #[case(403, DeliveryResult::KeyMismatch)]
    #[case(401, DeliveryResult::AuthInvalid)]
    fn classifies_known_statuses(#[case] status: u16, #[case] expected: DeliveryResult) {
        assert_eq!(classify_status(status, ""), expected);
    }

    #[rstest]
    #[case(429)]
    #[case(500)]
    #[case(503)]
    #[case(400)]
    fn other_statuses_are_transient(#[case] status: u16) {
        match classify_status(status, "  slow down  ") {
            DeliveryResult::TransientError {
                status: Some(s),
                reason,
            } => {
                assert_eq!(s, status);
                assert_eq!(reason, format!("HTTP {status}: slow down"));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn only_permanent_failures_remove() {
        assert!(DeliveryResult::ExpiredEndpoint.removes_subscription());
        assert!(DeliveryResult::KeyMismatch.removes_subscription());
        assert!(!DeliveryResult::AuthInvalid.removes_subscription());
        assert!(!classify_status(500, "").removes_subscription());
    }

    fn browser_subscription(endpoint: String) -> Subscription {
        let secret = p256::SecretKey::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        let mut auth = [0u8; 16];
        OsRng.fill_bytes(&mut auth);
        Subscription::new(
            endpoint,
            BASE64URL.encode(point.as_bytes()),
            BASE64URL.encode(auth),
        )
    }

    fn payload() -> PushPayload {
        PushPayload {
            title: "Trades".into(),
            body: "hello".into(),
            icon: None,
            badge: None,
            tag: "trades-1:1".into(),
            url: "/".into(),
            channel: "trades".into(),
            require_interaction: false,
            silent: false,
        }
    }

    fn sender() -> WebPushSender {
        WebPushSender::new(VapidKeys::generate(), WebPushSenderConfig {
            ttl_secs: 60,
            ..Default::default()
        })
        .unwrap()
    }

    #[rstest]
    #[case(201, "sent")]
    #[case(410, "expired_endpoint")]
    #[case(404, "expired_endpoint")]
    #[case(403, "key_mismatch")]
    #[case(401, "auth_invalid")]
    #[case(500, "transient_error")]
    #[case(429, "transient_error")]
    #[tokio::test]
    async fn send_classifies_push_service_reply(#[case] status: usize, #[case] label: &str) {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/push/abc")
            .match_header("content-encoding", "aes128gcm")
            .match_header("ttl", "60")
            .with_status(status)
            .create_async()
            .await;

        let sub = browser_subscription(format!("{}/push/abc", server.url()));
        let result = sender().send(&sub, &payload()).await;

        assert_eq!(result.label(), label);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn request_carries_vapid_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/push/auth")
            .match_header("authorization", mockito::Matcher::Regex("^vapid t=".into()))
            .with_status(201)
            .create_async()
            .await;

        let sub = browser_subscription(format!("{}/push/auth", server.url()));
        assert!(sender().send(&sub, &payload()).await.is_sent());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_subscription_keys_are_transient() {
        let sub = Subscription::new("https://push.example/x", "bogus", "bogus");
        let result = sender().send(&sub, &payload()).await;
        assert!(matches!(result, DeliveryResult::TransientError {
            status: None,
            ..
        }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let sub = browser_subscription("http://127.0.0.1:9/push".into());
        let result = sender().send(&sub, &payload()).await;
        assert!(matches!(result, DeliveryResult::TransientError {
            status: None,
            ..
        }));
    }
}
