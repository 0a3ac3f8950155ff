//! Queue plus the function consuming it.

use serde_json::json;

use crate::lambda;
use crate::template::{get_att, reference, Error, Resource, Stack};

pub struct PubSubProps<'a> {
    pub stage: &'a str,
    pub visibility_timeout: Option<u32>,
}

/// Logical ids of what [`PubSub::new`] declared.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSub {
    pub queue: String,
    pub subscriber_function: String,
}

impl PubSub {
    pub fn new(stack: &mut Stack, id: &str, props: PubSubProps<'_>) -> Result<Self, Error> {
        let queue_id = format!("{}Queue", id);
        let role_id = format!("{}SubscriberRole", id);
        let function_id = format!("{}SubscriberFunction", id);

        let mut queue = Resource::new("AWS::SQS::Queue").property("SqsManagedSseEnabled", json!(true));
        if let Some(visibility_timeout) = props.visibility_timeout {
            queue = queue.property("VisibilityTimeout", json!(visibility_timeout));
        }
        stack.add_resource(&queue_id, queue)?;

        stack.add_resource(
            &role_id,
            lambda::execution_role(vec![json!({
                "Effect": "Allow",
                "Action": [
                    "sqs:ReceiveMessage",
                    "sqs:DeleteMessage",
                    "sqs:GetQueueAttributes",
                    "sqs:ChangeMessageVisibility"
                ],
                "Resource": get_att(&queue_id, "Arn")
            })]),
        )?;

        stack.add_resource(
            &function_id,
            lambda::function(
                &role_id,
                "subscriber.zip",
                json!({ "STAGE": props.stage, "QUEUE_URL": reference(&queue_id) }),
            ),
        )?;

        stack.add_resource(
            &format!("{}SubscriberEventSource", id),
            Resource::new("AWS::Lambda::EventSourceMapping")
                .property("EventSourceArn", get_att(&queue_id, "Arn"))
                .property("FunctionName", reference(&function_id))
                .property("BatchSize", json!(10)),
        )?;

        return Ok(Self {
            queue: queue_id,
            subscriber_function: function_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{PubSub, PubSubProps};
    use crate::config::Environment;
    use crate::template::Stack;
    use serde_json::json;

    fn stack() -> Stack {
        Stack::new("Stack", Environment::new("111", "ap-northeast-1"))
    }

    #[test]
    fn declares_queue_with_visibility_timeout() {
        let mut stack = stack();

        let pubsub = PubSub::new(
            &mut stack,
            "PubSub",
            PubSubProps {
                stage: "dev",
                visibility_timeout: Some(300),
            },
        )
        .unwrap();

        let queue = &stack.resources()[&pubsub.queue];
        assert_eq!(Some(&json!(300)), queue.properties.get("VisibilityTimeout"));
        assert_eq!(4, stack.resources().len());
    }

    #[test]
    fn leaves_default_visibility_timeout_alone() {
        let mut stack = stack();

        let pubsub = PubSub::new(
            &mut stack,
            "PubSub",
            PubSubProps {
                stage: "dev",
                visibility_timeout: None,
            },
        )
        .unwrap();

        let queue = &stack.resources()[&pubsub.queue];
        assert_eq!(false, queue.properties.contains_key("VisibilityTimeout"));
    }

    #[test]
    fn declaring_twice_under_the_same_id_fails() {
        let mut stack = stack();
        let props = || PubSubProps {
            stage: "dev",
            visibility_timeout: None,
        };

        PubSub::new(&mut stack, "PubSub", props()).unwrap();
        assert_eq!(true, PubSub::new(&mut stack, "PubSub", props()).is_err());
    }
}
