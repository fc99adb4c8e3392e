use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The closed set of supported bank providers.
///
/// Provider dispatch is a total match over this enum; unknown provider names
/// are rejected at the boundary by [`Provider::parse`] rather than flowing
/// through the engine as free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Dbs,
    Ocbc,
    Uob,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Dbs, Provider::Ocbc, Provider::Uob];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Dbs => "dbs",
            Provider::Ocbc => "ocbc",
            Provider::Uob => "uob",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value.to_ascii_lowercase().as_str() {
            "dbs" => Ok(Provider::Dbs),
            "ocbc" => Ok(Provider::Ocbc),
            "uob" => Ok(Provider::Uob),
            other => Err(EngineError::Validation(format!(
                "unsupported bank provider: {other}"
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
