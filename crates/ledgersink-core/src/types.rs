//! Shared types for the ingestion pipeline.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SinkError;

// ─── BlockHeader ─────────────────────────────────────────────────────────────

/// The clock of a delivered block: sequence number, content hash, timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block (slot) number.
    pub number: u64,
    /// Block hash / id as delivered by the upstream stream.
    pub hash: String,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
}

impl BlockHeader {
    pub fn new(number: u64, hash: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            number,
            hash: hash.into(),
            timestamp,
        }
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

// ─── TokenAmount ─────────────────────────────────────────────────────────────

/// An exact token-unit amount.
///
/// Backed by [`BigDecimal`]: values may exceed the 64-bit range and are
/// never rounded. Serialized as a decimal string; deserializes from a string
/// or a JSON integer, and rejects JSON floats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenAmount(BigDecimal);

impl TokenAmount {
    pub fn new(value: BigDecimal) -> Self {
        Self(value)
    }

    pub fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    pub fn into_decimal(self) -> BigDecimal {
        self.0
    }
}

impl FromStr for TokenAmount {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigDecimal::from_str(s.trim())
            .map(Self)
            .map_err(|e| SinkError::Decode(format!("invalid amount {s:?}: {e}")))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for TokenAmount {
    fn from(v: u64) -> Self {
        Self(BigDecimal::from(v))
    }
}

impl From<BigDecimal> for TokenAmount {
    fn from(v: BigDecimal) -> Self {
        Self(v)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = TokenAmount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or an integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TokenAmount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<TokenAmount, E> {
                Ok(TokenAmount(BigDecimal::from(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<TokenAmount, E> {
                Ok(TokenAmount(BigDecimal::from(v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<TokenAmount, E> {
                Err(E::custom(format!(
                    "amount {v} is a binary float; send exact amounts as strings"
                )))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

// ─── Decoded events ──────────────────────────────────────────────────────────

/// A token account initialization: `account` is derived from `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializedAccount {
    pub trx_hash: String,
    pub owner: String,
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub trx_hash: String,
    pub from: String,
    pub to: String,
    pub amount: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mint {
    pub trx_hash: String,
    pub to: String,
    pub amount: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Burn {
    pub trx_hash: String,
    pub from: String,
    pub amount: TokenAmount,
}

/// Every fact decoded from one block, grouped by kind in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOutput {
    #[serde(default)]
    pub initialized_accounts: Vec<InitializedAccount>,
    #[serde(default)]
    pub transfers: Vec<Transfer>,
    #[serde(default)]
    pub mints: Vec<Mint>,
    #[serde(default)]
    pub burns: Vec<Burn>,
}

impl BlockOutput {
    /// Total number of events across all kinds.
    pub fn event_count(&self) -> usize {
        self.initialized_accounts.len() + self.transfers.len() + self.mints.len() + self.burns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }
}

// ─── Row identities ──────────────────────────────────────────────────────────

/// Store-assigned id of a block row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub i64);

/// Store-assigned id of a ledger transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub i64);

/// Store-assigned id of a transfer, mint or burn row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId(pub i64);

// ─── Read-side records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub id: BlockId,
    pub number: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub block_id: BlockId,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: FactId,
    pub transaction_id: TransactionId,
    pub from: String,
    pub to: String,
    pub amount: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRecord {
    pub id: FactId,
    pub transaction_id: TransactionId,
    pub to: String,
    pub amount: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    pub id: FactId,
    pub transaction_id: TransactionId,
    pub from: String,
    pub amount: TokenAmount,
}

/// Row counts per ledger table (checkpoint rows excluded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub blocks: u64,
    pub transactions: u64,
    pub address_links: u64,
    pub transfers: u64,
    pub mints: u64,
    pub burns: u64,
}

impl RowCounts {
    pub fn total(&self) -> u64 {
        self.blocks + self.transactions + self.address_links + self.transfers + self.mints + self.burns
    }
}

// ─── Address resolution ──────────────────────────────────────────────────────

/// Outcome of resolving a derived address. Absence is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressResolution {
    Resolved(String),
    NotFound,
}

impl AddressResolution {
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Resolved(owner) => Some(owner),
            Self::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl From<Option<String>> for AddressResolution {
    fn from(v: Option<String>) -> Self {
        v.map_or(Self::NotFound, Self::Resolved)
    }
}

/// Result of an idempotent address link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// A new link row was written.
    Inserted,
    /// The same (owner, derived) pair was already recorded.
    AlreadyLinked,
    /// The derived address already belongs to a different owner; nothing was written.
    Conflict { existing_owner: String },
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_beyond_u64_is_exact() {
        let raw = "340282366920938463463374607431768211455";
        let amount: TokenAmount = raw.parse().unwrap();
        assert_eq!(amount.to_string(), raw);
    }

    #[test]
    fn amount_converts_to_and_from_decimal() {
        let decimal: BigDecimal = "18446744073709551616".parse().unwrap();
        let amount = TokenAmount::from(decimal.clone());
        assert_eq!(amount.as_decimal(), &decimal);
        assert_eq!(amount.into_decimal(), decimal);
    }

    #[test]
    fn amount_rejects_garbage() {
        assert!("12abc".parse::<TokenAmount>().is_err());
    }

    #[test]
    fn amount_from_json_string_and_integer() {
        let a: TokenAmount = serde_json::from_str("\"1000000000\"").unwrap();
        let b: TokenAmount = serde_json::from_str("1000000000").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"1000000000\"");
    }

    #[test]
    fn amount_rejects_json_float() {
        let err = serde_json::from_str::<TokenAmount>("1.5").unwrap_err();
        assert!(err.to_string().contains("binary float"));
    }

    #[test]
    fn block_output_defaults_missing_kinds() {
        let out: BlockOutput = serde_json::from_str(
            r#"{"transfers":[{"trx_hash":"h1","from":"D1","to":"B","amount":"5"}]}"#,
        )
        .unwrap();
        assert_eq!(out.event_count(), 1);
        assert!(out.mints.is_empty());
        assert!(!out.is_empty());
        assert!(BlockOutput::default().is_empty());
    }

    #[test]
    fn address_resolution_from_option() {
        assert_eq!(AddressResolution::from(None), AddressResolution::NotFound);
        let found = AddressResolution::from(Some("A".to_string()));
        assert_eq!(found.owner(), Some("A"));
        assert!(found.is_found());
    }
}
