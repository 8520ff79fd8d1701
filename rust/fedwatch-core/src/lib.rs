#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fedwatch: watch federated learning runs
//!
//! This crate holds the data model shared by the fedwatch server and the
//! fedwatch dashboard:
//!
//! - the **training ledger**: one [`LedgerEntry`] per finished round of
//!   federated learning, carrying the participating clients and the
//!   evaluation metrics of the global model.
//! - the **audit chain**: one [`AuditBlock`] per ledger entry. Each block
//!   stores the SHA-256 digest of its ledger entry and the digest of the
//!   previous block, so that rewriting history breaks the chain. The first
//!   block points to the [`GENESIS_HASH`] sentinel.
//! - the **training status** reported by the server while a run is
//!   supervised, see [`TrainingStatus`].
//! - the **metadata registry** records: owner-gated key-value records
//!   describing training artifacts, see [`registry`].
//!
//! The [`crypto`] module wraps the [sodiumoxide] primitives used to hash
//! ledger entries and to sign registry transactions.
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/

#[macro_use]
extern crate serde;

pub mod audit;
pub mod common;
pub mod crypto;
pub mod ledger;
pub mod registry;
pub mod status;

pub use self::{
    audit::{verify_chain, AuditBlock, ChainError, GENESIS_HASH},
    ledger::{LedgerEntry, RoundReport},
    registry::{Identity, MetadataRecord, MetadataSnapshot, RecordId},
    status::{Ack, TrainingConfig, TrainingStatus},
};
