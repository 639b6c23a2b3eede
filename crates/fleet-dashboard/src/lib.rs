//! Dashboard API client for fleet provisioning.
//!
//! This crate wraps the controller's action batch protocol and the handful
//! of organization/network endpoints used around it:
//!
//! - [`Action`] / [`ActionBatch`] / [`BatchStatus`]: the batch wire model
//! - [`split_actions`]: order-preserving split under the per-batch cap
//! - [`ActionBatchApi`] / [`NetworkApi`]: client seams, implemented over
//!   HTTPS by [`HttpDashboardClient`]
//! - [`BatchPoller`]: drives asynchronous batches to a terminal state
//!
//! # Batch lifecycle
//!
//! ```text
//! submit ──► SUBMITTED ──(synchronous)──► COMPLETED | FAILED
//!                │
//!                └─(asynchronous)─► PENDING ──poll──► COMPLETED | FAILED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fleet_dashboard::{
//!     ActionBatchApi, BatchPoller, ClientConfig, HttpDashboardClient, NewActionBatch,
//!     PollConfig, TokioTicker,
//! };
//!
//! let client = HttpDashboardClient::new(ClientConfig::new(api_key))?;
//! let submitted = client
//!     .submit_batch(org, &NewActionBatch::asynchronous(actions))
//!     .await?;
//! let poller = BatchPoller::new(&client, &TokioTicker, PollConfig::default());
//! let outcome = poller.resolve(org, submitted, &cancel).await?;
//! ```

pub mod action;
pub mod batch;
pub mod client;
pub mod error;
pub mod network;
pub mod poller;

pub use action::{split_actions, Action, Operation, MAX_ACTIONS_PER_BATCH};
pub use batch::{ActionBatch, BatchState, BatchStatus, CreatedResource, NewActionBatch};
pub use client::{
    ActionBatchApi, AuthStyle, ClientConfig, DashboardApi, HttpDashboardClient, NetworkApi,
    API_KEY_HEADER, DEFAULT_BASE_URL,
};
pub use error::{DashboardError, DashboardResult};
pub use network::{BlinkRequest, Network, NewNetwork, Organization};
pub use poller::{BatchPoller, PollConfig, PollOutcome, Ticker, TokioTicker};

// Token type accepted by `BatchPoller::poll`.
pub use tokio_util::sync::CancellationToken;
