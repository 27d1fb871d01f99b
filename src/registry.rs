use thiserror::Error;

/// Raised at startup when a configured implementation identifier is not
/// registered. Always reported before any network activity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown parser \"{id}\" (available: {})", available.join(", "))]
    UnknownParser { id: String, available: Vec<String> },

    #[error("Unknown output class \"{id}\" for handler \"{handler}\" (available: {})", available.join(", "))]
    UnknownOutput {
        handler: String,
        id: String,
        available: Vec<String>,
    },
}
