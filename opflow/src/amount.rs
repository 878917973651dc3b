//! Asset amounts as exchanged with Open Payments resource servers.
//!
//! Amounts are integer base units qualified by an asset code and scale.
//! `{ value: "500", assetCode: "ZAR", assetScale: 2 }` is R5.00.

use std::fmt::{Display, Formatter};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An amount in integer base units of some asset.
///
/// # Serialization
///
/// The `value` field is serialized as a stringified integer to avoid loss of
/// precision in JSON, since `JavaScript`'s `Number` type cannot safely
/// represent all large integers.
///
/// ```json
/// { "value": "500", "assetCode": "ZAR", "assetScale": 2 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amount {
    /// Integer base units (scaled by `asset_scale`).
    #[serde(with = "string_value")]
    pub value: u128,
    /// ISO-4217-style asset code, e.g. `"ZAR"`.
    pub asset_code: String,
    /// Number of decimal places one base unit is shifted from the major unit.
    pub asset_scale: u8,
}

impl Amount {
    /// Creates an amount from base units and asset metadata.
    #[must_use]
    pub fn new(value: u128, asset_code: impl Into<String>, asset_scale: u8) -> Self {
        Self {
            value,
            asset_code: asset_code.into(),
            asset_scale,
        }
    }

    /// Returns the amount in major units, if it fits a [`Decimal`].
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        let value = i128::try_from(self.value).ok()?;
        Decimal::try_from_i128_with_scale(value, u32::from(self.asset_scale)).ok()
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.to_decimal() {
            Some(major) => write!(f, "{major} {}", self.asset_code),
            None => write!(f, "{} base units {}", self.value, self.asset_code),
        }
    }
}

mod string_value {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>()
            .map_err(|_| de::Error::custom("amount value must be a non-negative integer string"))
    }
}
