//! Outbound messaging configuration.

use url::Url;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot API base, normally `https://api.telegram.org`.
    pub api_base: Url,
    pub bot_token: String,
}
