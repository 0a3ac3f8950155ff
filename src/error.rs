use crate::{config, nag, template};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),

    #[error("visibilityTimeout must be greater than {minimum}")]
    VisibilityTimeout { minimum: u32, actual: u32 },

    #[error("Template error: {0}")]
    Template(#[from] template::Error),

    #[error("Compliance error: {0}")]
    Suppression(#[from] nag::Error),

    #[error("Unable to write the cloud assembly: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
