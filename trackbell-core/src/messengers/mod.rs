//! Outbound message delivery.

pub mod telegram;

pub use telegram::TelegramMessenger;

use crate::entities::SubscriberId;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while delivering a message to one recipient.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The messaging service refused the message
    #[error("message rejected with status {status}: {description}")]
    Rejected { status: u16, description: String },
}

/// Sends formatted text to a subscriber.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, recipient: SubscriberId, text: &str) -> Result<(), DeliveryError>;
}
