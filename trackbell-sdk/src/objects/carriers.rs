use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// All carriers supported by trackbell
pub enum Carrier {
    #[serde(rename = "oca")]
    Oca,
}

impl Carrier {
    pub const ALL: [Carrier; 1] = [Carrier::Oca];

    /// Lowercase identifier used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Oca => "oca",
        }
    }
}

impl std::fmt::Display for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown carrier: {0}")]
pub struct UnknownCarrier(pub String);

impl FromStr for Carrier {
    type Err = UnknownCarrier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Carrier::ALL
            .into_iter()
            .find(|c| c.as_str() == lowered)
            .ok_or_else(|| UnknownCarrier(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("OCA".parse::<Carrier>().unwrap(), Carrier::Oca);
        assert_eq!(" oca ".parse::<Carrier>().unwrap(), Carrier::Oca);
        assert!("andreani".parse::<Carrier>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_identifier() {
        assert_eq!(serde_json::to_string(&Carrier::Oca).unwrap(), "\"oca\"");
        let parsed: Carrier = serde_json::from_str("\"oca\"").unwrap();
        assert_eq!(parsed, Carrier::Oca);
    }
}
