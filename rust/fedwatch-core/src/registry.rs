//! Metadata registry records and the signed transactions that modify them.
//!
//! A record describes a training artifact (a model checkpoint, a dataset split, ...). It is owned
//! by the identity that created it, and only that identity may change its file hash or add custom
//! fields to it. Records are never deleted and their identifiers are never reused.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use derive_more::{Display, From, Into};
use thiserror::Error;

use crate::crypto::{PublicSigningKey, Signature, SigningKeyPair};

/// The identity of a registry caller: an `Ed25519` public key.
pub type Identity = PublicSigningKey;

/// The sequential identifier of a record.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(pub u64);

/// A full registry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub id: RecordId,
    pub title: String,
    pub description: String,
    pub owner: Identity,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub file_hash: String,
    pub custom_fields: BTreeMap<String, String>,
}

/// The part of a record returned by a metadata read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub title: String,
    pub description: String,
    pub owner: Identity,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub file_hash: String,
}

impl From<&MetadataRecord> for MetadataSnapshot {
    fn from(record: &MetadataRecord) -> Self {
        Self {
            title: record.title.clone(),
            description: record.description.clone(),
            owner: record.owner,
            timestamp: record.timestamp,
            tags: record.tags.clone(),
            file_hash: record.file_hash.clone(),
        }
    }
}

/// The caller supplied fields of a new record. Any content is accepted, empty strings included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMetadata {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub file_hash: String,
}

/// A state changing registry call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    CreateMetadata(NewMetadata),
    UpdateFileHash { id: RecordId, file_hash: String },
    AddCustomField { id: RecordId, key: String, value: String },
}

impl Call {
    /// The bytes covered by a transaction signature.
    pub fn signing_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// A [`Call`] signed by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub signer: Identity,
    pub signature: Signature,
    pub call: Call,
}

/// A transaction that failed signature verification.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("the signature does not match the signer and the call")]
    InvalidSignature,
    #[error("the call cannot be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl SignedTransaction {
    /// Signs `call` with the given keys.
    pub fn sign(call: Call, keys: &SigningKeyPair) -> Result<Self, TransactionError> {
        let signature = keys.secret.sign_detached(&call.signing_payload()?);
        Ok(Self {
            signer: keys.public,
            signature,
            call,
        })
    }

    /// Verifies the signature and yields the authenticated caller and call.
    pub fn verify(self) -> Result<(Identity, Call), TransactionError> {
        let payload = self.call.signing_payload()?;
        if self.signer.verify_detached(&self.signature, &payload) {
            Ok((self.signer, self.call))
        } else {
            Err(TransactionError::InvalidSignature)
        }
    }
}

/// The outcome of an applied transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// The record the transaction created or modified.
    pub id: RecordId,
}
