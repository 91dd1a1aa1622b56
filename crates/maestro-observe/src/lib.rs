//! Observability bootstrap and span vocabulary for the Maestro engine.
//!
//! Engine crates only emit `tracing` events and `metrics` samples; this
//! crate owns the other half: building and installing the subscriber stack
//! ([`tracing_setup`]) and the canonical span shapes the engine's domain is
//! reported under ([`fields`]). Embedding binaries call
//! [`tracing_setup::init_tracing`] once at startup and hold the returned
//! guard for the process lifetime.

pub mod fields;
pub mod tracing_setup;
