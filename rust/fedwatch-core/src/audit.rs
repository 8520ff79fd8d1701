//! The audit hash chain.
//!
//! Every logged [`LedgerEntry`] gets an [`AuditBlock`] holding the SHA-256 digest of the entry and
//! the digest of the block before it. The digest is computed over the canonical JSON form of the
//! entry: object keys sorted, no insignificant whitespace.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    common::iso8601,
    crypto::{ByteObject, Sha256},
    ledger::LedgerEntry,
};

/// The previous hash of the first block of a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One link of the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditBlock {
    pub round_num: u32,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    /// Hex digest of the ledger entry this block seals.
    pub data_hash: String,
    /// Hex digest of the previous block, or [`GENESIS_HASH`].
    pub previous_hash: String,
}

impl AuditBlock {
    /// Seals `entry` into a block chained to `previous`.
    ///
    /// # Errors
    /// Fails if the entry cannot be represented as JSON (non-finite metrics).
    pub fn seal(
        entry: &LedgerEntry,
        previous: Option<&AuditBlock>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let previous_hash = previous
            .map(|block| block.data_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        Ok(Self {
            round_num: entry.round_num,
            timestamp,
            data_hash: hash_entry(entry)?.to_hex(),
            previous_hash,
        })
    }

    /// Whether this block opens a chain.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }
}

/// Computes the digest sealed in an [`AuditBlock`].
pub fn hash_entry(entry: &LedgerEntry) -> Result<Sha256, serde_json::Error> {
    let canonical = canonicalize(serde_json::to_value(entry)?);
    Ok(Sha256::hash(serde_json::to_string(&canonical)?.as_bytes()))
}

// rebuilds objects in sorted key order, whatever map type serde_json was built with
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// A broken audit chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("block {index} does not start from the genesis hash")]
    MissingGenesis { index: usize },
    #[error("block {index} points to {found} instead of {expected}")]
    BrokenLink {
        index: usize,
        expected: String,
        found: String,
    },
}

/// Checks that the blocks form an unbroken chain starting at the genesis sentinel.
pub fn verify_chain(blocks: &[AuditBlock]) -> Result<(), ChainError> {
    let mut expected = GENESIS_HASH;
    for (index, block) in blocks.iter().enumerate() {
        if block.previous_hash != expected {
            if index == 0 {
                return Err(ChainError::MissingGenesis { index });
            }
            return Err(ChainError::BrokenLink {
                index,
                expected: expected.to_string(),
                found: block.previous_hash.clone(),
            });
        }
        expected = &block.data_hash;
    }
    Ok(())
}
