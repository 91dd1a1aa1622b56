//! Infrastructure implementations for the Maestro engine.
//!
//! Everything here sits behind a trait defined in `maestro-core`: the
//! declarative HTTP connector executor, the persisted token-bucket rate
//! limiter, the builtin connectors (file, shell, transform, utility), the
//! file-backed checkpoint store, the JSON run store (also the replay
//! history source), the dry-run reachability probe, and the TOML config
//! loader.

pub mod auth;
pub mod builtin;
pub mod checkpoint_store;
pub mod config;
pub mod env;
pub mod http;
pub mod probe;
pub mod ratelimit;
pub mod run_store;
