use printfleet_api::ApiError;

use crate::model::DeviceId;

/// Errors from the registry, the durable store, and fleet operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The device is not present in the registry.
    #[error("device {id} is not registered")]
    NotFound { id: DeviceId },

    /// The device was removed from the fleet while an operation targeted it.
    #[error("device {id} was deleted")]
    Deleted { id: DeviceId },

    /// Durable store failure.
    #[error("device store error: {message}")]
    Store { message: String },

    /// Control API or push-socket failure.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl CoreError {
    pub fn not_found(id: &DeviceId) -> Self {
        Self::NotFound { id: id.clone() }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}
