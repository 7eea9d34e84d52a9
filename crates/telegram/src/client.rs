//! Minimal Bot API client: `getUpdates` and `getMe`.

use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::de::DeserializeOwned,
    tracing::debug,
};

use crate::{
    Error, Result,
    types::{ApiResponse, BotUser},
};

/// Update kinds requested from `getUpdates`.
pub const ALLOWED_UPDATES: &str = r#"["channel_post","edited_channel_post"]"#;

/// HTTP client bound to one bot token.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: Secret<String>,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TelegramClient {
    /// `request_timeout` must exceed the long-poll timeout passed to
    /// [`Self::get_updates`].
    pub fn new(api_base: &str, token: Secret<String>, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.token.expose_secret()
        )
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(self.method_url(method))
            .query(query)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        let body: ApiResponse<T> = match response.json().await {
            Ok(body) => body,
            Err(e) if !status.is_success() => {
                return Err(Error::Api {
                    code: Some(i64::from(status.as_u16())),
                    description: format!("HTTP {status}: {}", e.without_url()),
                });
            },
            Err(e) => return Err(e.without_url().into()),
        };

        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(Error::message(format!("{method}: ok response without result"))),
            (false, _) => Err(Error::Api {
                code: body.error_code,
                description: body
                    .description
                    .unwrap_or_else(|| format!("{method} failed")),
            }),
        }
    }

    /// Fetch raw updates. Items are returned as JSON so callers can drop
    /// malformed ones individually.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        limit: u8,
        timeout_secs: u32,
    ) -> Result<Vec<serde_json::Value>> {
        let mut query = vec![
            ("limit", limit.to_string()),
            ("timeout", timeout_secs.to_string()),
            ("allowed_updates", ALLOWED_UPDATES.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let updates: Vec<serde_json::Value> = self.call("getUpdates", &query).await?;
        debug!(count = updates.len(), ?offset, "telegram getUpdates");
        Ok(updates)
    }

    /// Connectivity and token check.
    pub async fn get_me(&self) -> Result<BotUser> {
        self.call("getMe", &[]).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, serde_json::json};

    fn client(server: &mockito::Server) -> TelegramClient {
        TelegramClient::new(
            &server.url(),
            Secret::new("123:ABC".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn get_updates_sends_offset_and_filters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/bot123:ABC/getUpdates")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("offset".into(), "11".into()),
                Matcher::UrlEncoded("limit".into(), "100".into()),
                Matcher::UrlEncoded("timeout".into(), "5".into()),
                Matcher::UrlEncoded("allowed_updates".into(), ALLOWED_UPDATES.into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "ok": true, "result": [{ "update_id": 11 }] }).to_string())
            .create_async()
            .await;

        let updates = client(&server).get_updates(Some(11), 100, 5).await.unwrap();
        assert_eq!(updates.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/bot123:ABC/getMe")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "ok": false, "error_code": 401, "description": "Unauthorized" })
                    .to_string(),
            )
            .create_async()
            .await;

        let err = client(&server).get_me().await.unwrap_err();
        match err {
            Error::Api { code, description } => {
                assert_eq!(code, Some(401));
                assert_eq!(description, "Unauthorized");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_page_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/bot123:ABC/getMe")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        assert!(matches!(
            client(&server).get_me().await,
            Err(Error::Api {
                code: Some(502),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn get_me_parses_bot() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/bot123:ABC/getMe")
            .with_status(200)
            .with_body(
                json!({ "ok": true, "result": { "id": 1, "is_bot": true, "first_name": "Beacon", "username": "beacon_bot" } })
                    .to_string(),
            )
            .create_async()
            .await;

        let me = client(&server).get_me().await.unwrap();
        assert_eq!(me.username.as_deref(), Some("beacon_bot"));
        assert!(me.is_bot);
    }

    #[test]
    fn debug_redacts_token() {
        let c = TelegramClient::new(
            "https://api.telegram.org/",
            Secret::new("123:SECRET".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{c:?}");
        assert!(!debug.contains("SECRET"));
        assert_eq!(c.method_url("getMe"), "https://api.telegram.org/bot123:SECRET/getMe");
    }
}
