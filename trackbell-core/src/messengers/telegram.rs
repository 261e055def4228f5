//! Telegram Bot API messenger.

use super::{DeliveryError, Messenger};
use crate::config::TelegramConfig;
use crate::entities::SubscriberId;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Delivers messages through `sendMessage`, using the subscriber id as chat id.
pub struct TelegramMessenger {
    send_url: Url,
    http_client: reqwest::Client,
}

impl TelegramMessenger {
    /// Create a new TelegramMessenger.
    pub fn new(config: &TelegramConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            send_url: send_message_url(&config.api_base, &config.bot_token)?,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        })
    }
}

/// `<api_base>/bot<token>/sendMessage`.
///
/// Built by string so the `:` inside the token is never read as a scheme.
fn send_message_url(api_base: &Url, bot_token: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/bot{}/sendMessage",
        api_base.as_str().trim_end_matches('/'),
        bot_token
    ))
}

#[derive(serde::Serialize)]
struct SendMessage<'a> {
    chat_id: SubscriberId,
    text: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send(&self, recipient: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        // The URL embeds the bot token; keep it out of errors and logs.
        let response = self
            .http_client
            .post(self.send_url.clone())
            .json(&SendMessage {
                chat_id: recipient,
                text,
            })
            .send()
            .await
            .map_err(|e| DeliveryError::Request(e.without_url()))?;

        let status = response.status();
        let reply = response.json::<TelegramReply>().await.ok();

        match reply {
            Some(reply) if status.is_success() && reply.ok => Ok(()),
            reply => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                description: reply.and_then(|r| r.description).unwrap_or_default(),
            }),
        }
    }
}
