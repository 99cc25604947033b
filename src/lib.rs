//! Proposer node for an off-chain intention-settlement protocol.
//!
//! A proposer accepts signed intentions from vault controllers, admits them
//! against current vault balances, and periodically batches admitted
//! executions into signed bundles: anchored on an L2 tracker contract and
//! pinned to a content-addressed store.
//!
//! # Modules
//!
//! - [`model`] — wire and domain types: intentions, executions, bundles, vaults.
//! - [`validator`] — structural and semantic validation of an intention.
//! - [`name_resolver`] — TTL-cached resolution of external payout names.
//! - [`queue`] — the pending-execution queue shared by the handler and proposer.
//! - [`intention_handler`] — the submission pipeline (verify, resolve, admit, prove).
//! - [`bundle_codec`] — the bundle wire format (canonical JSON, gzip, base64).
//! - [`bundle_proposer`] — the periodic tick that signs, anchors, and commits bundles.
//! - [`deposit_watcher`] — background scan for on-chain deposits into vaults.
//! - [`chain_gateway`] — the one doorway onto the L2 tracker contracts and content store.
//! - [`store`] — the persistence trait and its Postgres/in-memory implementations.
//! - [`webhook`] — fire-and-forget notification of published bundles.
//! - [`pinner`] — fire-and-forget long-term pinning of published bundles.
//! - [`service`] — wires the above into a running [`service::ProposerService`].
//! - [`config`] — process configuration.
//! - [`handlers`] — HTTP endpoint handlers (submission and read-only query surface).
//! - [`error`] — the closed, user-visible error enum.
//! - [`timestamp`] — Unix timestamp type for intention expiry.
//! - [`util`] — base64, decimal amounts, telemetry, and signal handling.

pub mod bundle_codec;
pub mod bundle_proposer;
pub mod chain_gateway;
pub mod config;
pub mod deposit_watcher;
pub mod error;
pub mod handlers;
pub mod intention_handler;
pub mod model;
pub mod name_resolver;
pub mod pinner;
pub mod queue;
pub mod service;
pub mod store;
pub mod timestamp;
pub mod util;
pub mod validator;
pub mod webhook;
