use tracing::info;

use crate::config::Environment;
use crate::error::{Error, Result};
use crate::nag::{self, Suppression};
use crate::pubsub::{PubSub, PubSubProps};
use crate::template::Stack;

/// Lowest visibility timeout, in seconds, a stage queue may be given.
pub const MIN_VISIBILITY_TIMEOUT: u32 = 300;

pub struct EnvironmentStackProps {
    pub env: Environment,
    pub stage: String,
    pub visibility_timeout: Option<u32>,
}

/// The stage's queue and its consumers.
#[derive(Debug)]
pub struct EnvironmentStack {
    pub stack: Stack,
    pub pubsub: PubSub,
}

impl EnvironmentStack {
    pub fn new(stack_name: &str, props: EnvironmentStackProps) -> Result<Self> {
        if let Some(visibility_timeout) = props.visibility_timeout {
            if visibility_timeout < MIN_VISIBILITY_TIMEOUT {
                return Err(Error::VisibilityTimeout {
                    minimum: MIN_VISIBILITY_TIMEOUT,
                    actual: visibility_timeout,
                });
            }
        }

        let mut stack = Stack::new(stack_name, props.env);
        nag::add_stack_suppressions(
            &mut stack,
            [Suppression::new(nag::SQS_DEAD_LETTER_QUEUE, "suppress for hands-on.")],
        )?;

        let pubsub = PubSub::new(
            &mut stack,
            "PubSub",
            PubSubProps {
                stage: &props.stage,
                visibility_timeout: props.visibility_timeout,
            },
        )?;
        info!(stack = stack_name, stage = %props.stage, "declared environment stack");

        return Ok(Self { stack, pubsub });
    }
}

#[cfg(test)]
mod tests {
    use super::{EnvironmentStack, EnvironmentStackProps};
    use crate::config::Environment;
    use crate::error::Error;
    use crate::nag::SQS_DEAD_LETTER_QUEUE;

    fn build(visibility_timeout: Option<u32>) -> crate::error::Result<EnvironmentStack> {
        EnvironmentStack::new(
            "AppDevStage-HandsonStack",
            EnvironmentStackProps {
                env: Environment::new("111", "ap-northeast-1"),
                stage: "dev".to_string(),
                visibility_timeout,
            },
        )
    }

    #[test]
    fn rejects_visibility_timeout_below_minimum() {
        for visibility_timeout in [0, 1, 120, 299] {
            let result = build(Some(visibility_timeout));
            match result.err().unwrap() {
                Error::VisibilityTimeout { minimum, actual } => {
                    assert_eq!(300, minimum);
                    assert_eq!(visibility_timeout, actual);
                }
                _ => panic!("Expected `VisibilityTimeout` error"),
            }
        }
    }

    #[test]
    fn error_message_names_the_bound() {
        let error = build(Some(299)).err().unwrap();
        assert_eq!("visibilityTimeout must be greater than 300", error.to_string());
    }

    #[test]
    fn accepts_minimum_and_above() {
        for visibility_timeout in [300, 301, 900, u32::MAX] {
            assert_eq!(true, build(Some(visibility_timeout)).is_ok());
        }
    }

    #[test]
    fn accepts_missing_visibility_timeout() {
        let environment = build(None).unwrap();
        assert_eq!(false, environment.stack.resources().is_empty());
    }

    #[test]
    fn registers_dead_letter_queue_suppression() {
        let environment = build(Some(300)).unwrap();

        let suppressions = environment.stack.suppressions();
        assert_eq!(1, suppressions.len());
        assert_eq!(SQS_DEAD_LETTER_QUEUE, suppressions[0].id);
        assert_eq!(false, suppressions[0].reason.is_empty());
    }
}
