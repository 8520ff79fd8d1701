#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fedwatch dashboard
//!
//! A terminal dashboard following a federated learning run supervised by the fedwatch server.
//!
//! Three pieces are wired together:
//!
//! - the [`Poller`] ticks at a fixed period. Each tick starts a poll cycle that fetches the
//!   training ledger and the audit chain together, and the live training status on its own. The
//!   results come back as [`Update`]s over a channel. A failing fetch never stops the ticks.
//! - the [`ViewState`] is the single owner of what is shown. It merges the updates, keeps the
//!   last good data when a fetch fails, raises the error banner and tracks the training
//!   [`Phase`]. Updates of a poll cycle older than the one already shown are dropped.
//! - the [`render`] functions turn the view into tables, the progress percentage, the connection
//!   label and the chart series. [`Dashboard`] puts them together as plain text.
//!
//! The server is reached through the [`TrainingApi`] trait. [`Client`] implements it over any
//! [`HttpClient`]; with the `reqwest-client` feature `reqwest::Client` is one.
//!
//! ```text
//! fedwatch-dashboard -c configs/dashboard.toml watch
//! fedwatch-dashboard -c configs/dashboard.toml train --rounds 5 --clients 2
//! fedwatch-dashboard -c configs/dashboard.toml stop
//! ```
//!
//! [`Dashboard`]: render::Dashboard

pub mod client;
pub mod poller;
pub mod render;
pub mod settings;
mod traits;
pub mod view;

pub use self::{
    client::{Client, ClientError, HttpClient, InvalidBaseUrl},
    poller::{CycleReport, FetchError, Poller, Update},
    traits::TrainingApi,
    view::{Phase, ViewState},
};
