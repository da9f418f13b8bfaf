//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SubscriptionError;

/// Comparison applied between a live rate and a stored threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    pub const ALL: [Operator; 5] = [
        Operator::Eq,
        Operator::Gt,
        Operator::Lt,
        Operator::Ge,
        Operator::Le,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }

    /// Whether `rate OP threshold` holds.
    ///
    /// `Eq` is exact float equality: a quote of `42000.0000001` does not
    /// satisfy `== 42000`.
    #[allow(clippy::float_cmp)]
    pub fn holds(&self, rate: f64, threshold: f64) -> bool {
        match self {
            Operator::Eq => rate == threshold,
            Operator::Gt => rate > threshold,
            Operator::Lt => rate < threshold,
            Operator::Ge => rate >= threshold,
            Operator::Le => rate <= threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" => Ok(Operator::Eq),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            ">=" => Ok(Operator::Ge),
            "<=" => Ok(Operator::Le),
            other => Err(SubscriptionError::UnknownOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = SubscriptionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.symbol().to_string()
    }
}

/// Where a fired condition gets delivered
///
/// Front-ends hand us either a full callback URL (HTTP API subscribers) or an
/// opaque recipient id (chat ids from the bot) that only the default callback
/// endpoint knows how to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    DirectUrl(String),
    OpaqueId(String),
}

impl Destination {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Destination::DirectUrl(raw.to_string())
        } else {
            Destination::OpaqueId(raw.to_string())
        }
    }

    /// The destination exactly as the subscriber supplied it
    pub fn as_str(&self) -> &str {
        match self {
            Destination::DirectUrl(s) | Destination::OpaqueId(s) => s,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Destination::DirectUrl(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Destination {
    fn from(raw: String) -> Self {
        Destination::parse(&raw)
    }
}

impl From<&str> for Destination {
    fn from(raw: &str) -> Self {
        Destination::parse(raw)
    }
}

impl From<Destination> for String {
    fn from(dest: Destination) -> Self {
        match dest {
            Destination::DirectUrl(s) | Destination::OpaqueId(s) => s,
        }
    }
}

/// Parse a decimal carried as text.
///
/// Upstream sources sometimes double-encode numbers, so surrounding quotes
/// and whitespace are stripped first.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_matches('"').trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
