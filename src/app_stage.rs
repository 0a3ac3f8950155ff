use tracing::info;

use crate::app::App;
use crate::config::Stage;
use crate::environment_stack::{EnvironmentStack, EnvironmentStackProps};
use crate::error::Result;
use crate::publish_stack::{PublishStack, PublishStackProps};
use crate::template::{OutputRef, Stack};

pub struct AppStageProps {
    pub stage: String,
}

/// Everything one environment deploys, as a single promotable unit.
#[derive(Debug)]
pub struct AppStage {
    id: String,
    stage: Stage,
    stacks: Vec<Stack>,
    pub publish_lambda_function_name: OutputRef,
}

impl AppStage {
    pub fn new(app: &App, id: &str, props: AppStageProps) -> Result<Self> {
        let config = app.resolve(&props.stage)?;
        info!(stage_id = id, stage = %config.stage_name, env = %config.env, "building application stage");

        let environment = EnvironmentStack::new(
            &format!("{}-HandsonStack", id),
            EnvironmentStackProps {
                env: config.env.clone(),
                stage: props.stage.clone(),
                visibility_timeout: config.queue.visibility_timeout,
            },
        )?;

        let mut publish = PublishStack::new(
            &format!("{}-PublishStack", id),
            PublishStackProps {
                env: config.env,
                stage: props.stage,
            },
        )?;
        publish.stack.add_dependency(&environment.stack);

        return Ok(Self {
            id: id.to_string(),
            stage: config.stage_name,
            stacks: vec![environment.stack, publish.stack],
            publish_lambda_function_name: publish.publish_lambda_function_name,
        });
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Child stacks, every stack listed after the stacks it depends on.
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    /// Directory the stage's templates are written to inside the assembly.
    pub fn assembly_directory(&self) -> String {
        format!("assembly-{}", self.id)
    }

    /// 1-based deploy wave for each stack. Stacks sharing a wave have no
    /// ordering between them.
    pub fn run_orders(&self) -> Vec<(&Stack, u32)> {
        let mut run_orders: Vec<(&Stack, u32)> = Vec::with_capacity(self.stacks.len());

        for stack in &self.stacks {
            let run_order = run_orders
                .iter()
                .filter(|(deployed, _)| {
                    stack
                        .dependencies()
                        .iter()
                        .any(|name| name == deployed.stack_name())
                })
                .map(|(_, order)| order + 1)
                .max()
                .unwrap_or(1);
            run_orders.push((stack, run_order));
        }

        return run_orders;
    }
}

#[cfg(test)]
mod tests {
    use super::{AppStage, AppStageProps};
    use crate::app::App;
    use crate::config::tests::{settings, table};
    use crate::config::{self, Stage};
    use crate::error::Error;
    use crate::publish_stack::PUBLISH_FUNCTION_NAME_OUTPUT;

    fn build(app: &App, stage: &str) -> crate::error::Result<AppStage> {
        AppStage::new(
            app,
            "AppDevStage",
            AppStageProps {
                stage: stage.to_string(),
            },
        )
    }

    #[test]
    fn dev_stage_has_environment_and_publish_stacks() {
        let app = App::new(table());

        let stage = build(&app, "dev").unwrap();
        assert_eq!(Stage::Dev, stage.stage());

        let names: Vec<&str> = stage.stacks().iter().map(|stack| stack.stack_name()).collect();
        assert_eq!(vec!["AppDevStage-HandsonStack", "AppDevStage-PublishStack"], names);

        let environment = &stage.stacks()[0];
        let publish = &stage.stacks()[1];
        assert_eq!(true, environment.dependencies().is_empty());
        assert_eq!(vec![environment.stack_name().to_string()], publish.dependencies().to_vec());
    }

    #[test]
    fn stacks_target_the_resolved_environment() {
        let app = App::new(table());

        let stage = build(&app, "dev").unwrap();
        for stack in stage.stacks() {
            assert_eq!(&table().dev.env, stack.env());
        }
    }

    #[test]
    fn exposes_publish_function_name() {
        let app = App::new(table());

        let stage = build(&app, "dev").unwrap();
        assert_eq!("AppDevStage-PublishStack", stage.publish_lambda_function_name.stack_name);
        assert_eq!(PUBLISH_FUNCTION_NAME_OUTPUT, stage.publish_lambda_function_name.output_key);
    }

    #[test]
    fn publish_stack_deploys_in_a_later_wave() {
        let app = App::new(table());

        let stage = build(&app, "dev").unwrap();
        let run_orders: Vec<u32> = stage.run_orders().iter().map(|(_, order)| *order).collect();
        assert_eq!(vec![1, 2], run_orders);
    }

    #[test]
    fn unknown_stage_fails() {
        let app = App::new(table());

        match build(&app, "qa").err().unwrap() {
            Error::Config(config::Error::UnknownStage(name)) => assert_eq!("qa", name),
            _ => panic!("Expected `UnknownStage` error"),
        }
    }

    #[test]
    fn short_visibility_timeout_in_table_fails() {
        let mut table = table();
        table.dev = settings("111", Some(299));
        let app = App::new(table);

        match build(&app, "dev").err().unwrap() {
            Error::VisibilityTimeout { actual, .. } => assert_eq!(299, actual),
            _ => panic!("Expected `VisibilityTimeout` error"),
        }
    }
}
