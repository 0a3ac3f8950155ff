use serde_json::json;
use tracing::info;

use crate::config::Environment;
use crate::error::Result;
use crate::lambda;
use crate::template::{reference, Output, OutputRef, Stack};

pub const PUBLISH_FUNCTION_NAME_OUTPUT: &str = "PublishLambdaFunctionName";

pub struct PublishStackProps {
    pub env: Environment,
    pub stage: String,
}

#[derive(Debug)]
pub struct PublishStack {
    pub stack: Stack,
    pub publish_lambda_function_name: OutputRef,
}

impl PublishStack {
    pub fn new(stack_name: &str, props: PublishStackProps) -> Result<Self> {
        let mut stack = Stack::new(stack_name, props.env);

        stack.add_resource("PublishFunctionRole", lambda::execution_role(Vec::new()))?;
        stack.add_resource(
            "PublishFunction",
            lambda::function(
                "PublishFunctionRole",
                "publish.zip",
                json!({ "STAGE": props.stage }),
            ),
        )?;

        let publish_lambda_function_name = stack.add_output(
            PUBLISH_FUNCTION_NAME_OUTPUT,
            Output {
                value: reference("PublishFunction"),
                description: Some(format!("Publish function for the {} stage", props.stage)),
            },
        )?;
        info!(stack = stack_name, stage = %props.stage, "declared publish stack");

        return Ok(Self {
            stack,
            publish_lambda_function_name,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{PublishStack, PublishStackProps, PUBLISH_FUNCTION_NAME_OUTPUT};
    use crate::config::Environment;
    use crate::template::reference;

    #[test]
    fn exposes_function_name_output() {
        let publish = PublishStack::new(
            "AppDevStage-PublishStack",
            PublishStackProps {
                env: Environment::new("111", "ap-northeast-1"),
                stage: "dev".to_string(),
            },
        )
        .unwrap();

        assert_eq!("AppDevStage-PublishStack", publish.publish_lambda_function_name.stack_name);
        assert_eq!(PUBLISH_FUNCTION_NAME_OUTPUT, publish.publish_lambda_function_name.output_key);

        let output = &publish.stack.outputs()[PUBLISH_FUNCTION_NAME_OUTPUT];
        assert_eq!(reference("PublishFunction"), output.value);
        assert_eq!(true, publish.stack.resources().contains_key("PublishFunction"));
    }
}
