#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fedwatch server
//!
//! The server side of fedwatch. It supervises a federated learning run made of an external
//! [Flower] server and its clients, records every finished round in an audit log, keeps a
//! registry of training artifacts and serves all of it over HTTP.
//!
//! ## Components
//!
//! - [`storage`]: the audit log. Every logged round is appended to the training ledger and sealed
//!   into a SHA-256 hash chain, see [`AuditStore`].
//! - [`training`]: the [`TrainingSupervisor`] launching, monitoring and stopping the Flower
//!   processes, and reporting the training status.
//! - [`registry`]: the metadata registry. Records are created and modified through signed
//!   transactions; only the creator of a record may modify it. All requests are served one at a
//!   time by the [`RegistryService`].
//! - [`rest`]: the HTTP API.
//! - [`settings`]: loading and validation of the configuration.
//!
//! ## Running
//!
//! ```text
//! fedwatch-server -c configs/config.toml
//! ```
//!
//! [Flower]: https://flower.dev/
//! [`AuditStore`]: storage::AuditStore
//! [`TrainingSupervisor`]: training::TrainingSupervisor
//! [`RegistryService`]: registry::RegistryService

pub mod registry;
pub mod rest;
pub mod settings;
pub mod storage;
pub mod training;
