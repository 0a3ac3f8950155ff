use std::{
    env,
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod app;
pub mod app_stage;
pub mod config;
pub mod environment_stack;
pub mod error;
pub mod lambda;
pub mod nag;
pub mod pipeline;
pub mod publish_stack;
pub mod pubsub;
pub mod template;
pub mod writer;

use app::App;
use config::{Stage, StageTable};
use pipeline::{PipelineStack, PipelineStackProps};

const OUTDIR_VARIABLE: &str = "CDK_OUTDIR";
const DEFAULT_OUTDIR: &str = "cdk.out";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "synthesis failed");
            ExitCode::FAILURE
        }
    }
}

fn run() -> error::Result<()> {
    let stage_table = config::load()?;
    let out_dir = env::var_os(OUTDIR_VARIABLE)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTDIR));

    synth(stage_table, &out_dir)
}

/// Builds the pipeline from `stage_table` and writes the assembly. Nothing is
/// written unless every stack builds.
fn synth(stage_table: StageTable, out_dir: &Path) -> error::Result<()> {
    let mut app = App::new(stage_table);
    app.add_tag("Name", "handson CI/CD Pipeline");

    let stage_variables = app.resolve(Stage::Cicd.as_str())?;
    let mut pipeline = PipelineStack::new(
        &app,
        "HandsonPipelineStack",
        PipelineStackProps {
            env: stage_variables.env,
        },
    )?;
    pipeline.stack.add_tag("Name", "HandsonPipeline");

    let assembly = app.synth(&pipeline);
    writer::write(out_dir, &assembly)?;
    info!(out_dir = %out_dir.display(), "wrote cloud assembly");

    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::synth;
    use crate::config::tests::{settings, table};
    use crate::error::Error;
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn writes_pipeline_and_stage_assemblies() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("cdk.out");

        let result = synth(table(), &out_dir);
        assert_eq!(true, result.is_ok());

        let plan: Value =
            serde_json::from_str(&fs::read_to_string(out_dir.join("pipeline.json")).unwrap()).unwrap();
        let stages: Vec<&Value> = plan["stages"].as_array().unwrap().iter().map(|stage| &stage["name"]).collect();
        assert_eq!(vec![&json!("dev"), &json!("stg"), &json!("prd")], stages);

        assert_eq!(true, out_dir.join("manifest.json").is_file());
        assert_eq!(true, out_dir.join("HandsonPipelineStack.template.json").is_file());
        for stage in ["AppDevStage", "AppStgStage", "AppPrdStage"] {
            let directory = out_dir.join(format!("assembly-{}", stage));
            assert_eq!(true, directory.join(format!("{}-HandsonStack.template.json", stage)).is_file());
            assert_eq!(true, directory.join(format!("{}-PublishStack.template.json", stage)).is_file());
        }
    }

    #[test]
    fn invalid_table_writes_nothing() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("cdk.out");
        let mut table = table();
        table.stg = settings("222", Some(299));

        match synth(table, &out_dir).err().unwrap() {
            Error::VisibilityTimeout { actual, .. } => assert_eq!(299, actual),
            _ => panic!("Expected `VisibilityTimeout` error"),
        }
        assert_eq!(false, out_dir.exists());
    }
}
