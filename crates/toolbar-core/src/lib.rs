//! Flag Toolbar Core Library
//!
//! This crate keeps a developer toolbar in sync with a local feature-flag
//! dev server. It polls the server, merges flag values, variations and
//! overrides into display-ready flags, and lets the toolbar set and clear
//! overrides with immediate feedback.
//!
//! # Architecture
//!
//! - **Dev server**: Source of truth for flags and overrides
//! - **SyncEngine**: Sole writer of the state store; owns the poll loop
//! - **SyncStateStore**: Observable state read by the toolbar
//!
//! # Quick Start
//!
//! ```text
//! let client = RemoteStateClient::new("http://localhost:8765")?;
//! let engine = SyncEngine::new(client);
//!
//! let _sub = engine.store().subscribe(|state| {
//!     println!("{}: {} flags", state.connection_status, state.flags.len());
//! });
//!
//! engine.start(EngineOptions::new("http://localhost:8765")).await?;
//! engine.set_override("dark-mode", json!(true)).await?;
//! ```
//!
//! # Modules
//!
//! - `engine`: Poll loop, project switching and override writes (main entry point)
//! - `store`: Observable sync state
//! - `client`: Dev server HTTP transport
//! - `merge`: Snapshot to `EnhancedFlag` merging
//! - `models`: Wire types and toolbar state
//! - `error`: Error taxonomy
//! - `config`: Toolbar configuration

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod models;
pub mod store;

pub use client::{DevServerApi, RemoteStateClient};
pub use config::Config;
pub use engine::{EngineOptions, EnginePhase, PollOutcome, SyncEngine};
pub use error::{ClearAllError, ClientError, EngineError, WriteError, WriteOp};
pub use merge::{build_enhanced_flags, format_flag_name};
pub use models::{
    ConnectionStatus, EnhancedFlag, FlagType, FlagValue, ProjectSnapshot, ToolbarSyncState,
};
pub use store::{Subscription, SyncStateStore};
