//! Carrier endpoint configuration.

use time::UtcOffset;
use url::Url;

/// Settings for the OCA tracking endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcaConfig {
    pub endpoint: Url,
    /// Offset the carrier's local times are rendered in.
    pub utc_offset: UtcOffset,
}
