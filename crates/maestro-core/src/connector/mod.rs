//! The connector capability.
//!
//! A connector is a named external integration. Declarative HTTP connectors
//! and the builtins (file, shell, transform, utility) all implement the same
//! [`Connector`] trait; callers dispatch through the registry and never see
//! the concrete type.

pub mod registry;

use futures_util::future::BoxFuture;
use maestro_types::connector::OperationResult;
use maestro_types::error::EngineError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use registry::{ConnectorRegistry, PackageLoader};

/// A named external integration executing operations deterministically.
///
/// Implementations clone borrowed arguments before awaiting, so returned
/// futures only borrow `self`. `cancel` is the run's scope token; every
/// suspension point must observe it.
pub trait Connector: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Execute one named operation with the given inputs.
    fn execute(
        &self,
        operation: &str,
        inputs: &serde_json::Map<String, Value>,
        cancel: &CancellationToken,
    ) -> BoxFuture<'_, Result<OperationResult, EngineError>>;
}

impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").field("name", &self.name()).finish()
    }
}
