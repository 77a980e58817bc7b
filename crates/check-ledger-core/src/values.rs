//! Field values that tolerate what older builds wrote.
//!
//! A stored record keeps its `type` and `amount` exactly as found when they do
//! not fit the current model, so reading and re-saving a legacy row never
//! rewrites or drops it.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use crate::CheckKind;

/// The `type` field of a stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum KindValue {
    Known(CheckKind),
    /// Missing or unrecognized, kept verbatim.
    Other(Value),
}

impl KindValue {
    #[must_use]
    pub fn known(&self) -> Option<CheckKind> {
        match self {
            Self::Known(kind) => Some(*kind),
            Self::Other(_) => None,
        }
    }
}

impl Default for KindValue {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

impl From<CheckKind> for KindValue {
    fn from(kind: CheckKind) -> Self {
        Self::Known(kind)
    }
}

impl Display for KindValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(kind) => write!(f, "{}", kind.as_str()),
            Self::Other(value) => write!(f, "{value}"),
        }
    }
}

/// The `amount` field of a stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AmountValue {
    Number(f64),
    /// Missing or non-numeric, kept verbatim.
    Other(Value),
}

impl AmountValue {
    /// Numeric reading of the amount. Numeric strings such as `"50"` count.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        let amount = match self {
            Self::Number(amount) => *amount,
            Self::Other(Value::String(text)) => text.trim().parse::<f64>().ok()?,
            Self::Other(_) => return None,
        };
        amount.is_finite().then_some(amount)
    }
}

impl Default for AmountValue {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

impl From<f64> for AmountValue {
    fn from(amount: f64) -> Self {
        Self::Number(amount)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(Number),
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Text(text) => text,
            Scalar::Number(number) => number.to_string(),
        }
    }
}

/// A string, or a number read as its decimal text.
pub(crate) fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(String::from)
}

/// Like [`scalar_text`], with `null` read as an empty string.
pub(crate) fn optional_scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unrecognized_kind_and_amount_survive_a_round_trip() -> anyhow::Result<()> {
        let kind: KindValue = serde_json::from_value(json!("Cashed"))?;
        assert_eq!(kind.known(), None);
        assert_eq!(serde_json::to_value(&kind)?, json!("Cashed"));

        let amount: AmountValue = serde_json::from_value(json!({ "rial": 5 }))?;
        assert_eq!(amount.value(), None);
        assert_eq!(serde_json::to_value(&amount)?, json!({ "rial": 5 }));
        Ok(())
    }

    #[test]
    fn numeric_amount_text_reads_as_a_number() -> anyhow::Result<()> {
        let amount: AmountValue = serde_json::from_value(json!("50"))?;
        assert_eq!(amount, AmountValue::Other(json!("50")));
        assert_eq!(amount.value(), Some(50.0));

        let integer: AmountValue = serde_json::from_value(json!(120))?;
        assert_eq!(integer.value(), Some(120.0));
        Ok(())
    }

    #[test]
    fn known_kinds_parse() -> anyhow::Result<()> {
        let kind: KindValue = serde_json::from_value(json!("Taken"))?;
        assert_eq!(kind.known(), Some(CheckKind::Taken));
        assert_eq!(kind.to_string(), "Taken");
        Ok(())
    }
}
