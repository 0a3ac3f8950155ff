//! Compliance rule suppressions. Each one is an audited exception to a
//! finding raised by the compliance linter and must say why it is accepted.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::template::Stack;

/// Queue without a dead-letter queue.
pub const SQS_DEAD_LETTER_QUEUE: &str = "AwsSolutions-SQS4";
/// Bucket without server access logging.
pub const S3_ACCESS_LOGGING: &str = "AwsSolutions-S1";
/// Wildcard permissions in an IAM policy.
pub const IAM_WILDCARD_PERMISSIONS: &str = "AwsSolutions-IAM5";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Suppression for rule `{id}` is invalid: {message}")]
    InvalidSuppression { id: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Suppression {
    #[validate(length(min = 1))]
    pub id: String,

    #[validate(custom = "validate_reason")]
    pub reason: String,
}

impl Suppression {
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

fn validate_reason(reason: &str) -> Result<(), ValidationError> {
    if reason.trim().is_empty() {
        return Err(ValidationError::new(
            "A suppression has to carry a non-empty reason",
        ));
    }

    return Ok(());
}

/// Registers stack-wide suppressions. Nothing is added unless every entry
/// is valid.
pub fn add_stack_suppressions(
    stack: &mut Stack,
    suppressions: impl IntoIterator<Item = Suppression>,
) -> Result<(), Error> {
    let suppressions: Vec<Suppression> = suppressions.into_iter().collect();

    for suppression in &suppressions {
        if let Err(error) = suppression.validate() {
            return Err(Error::InvalidSuppression {
                id: suppression.id.clone(),
                message: error.to_string(),
            });
        }
    }

    for suppression in suppressions {
        stack.add_suppression(suppression);
    }

    return Ok(());
}
