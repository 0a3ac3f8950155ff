//! Root scope of a synthesis run and the cloud assembly it produces.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

use crate::app_stage::AppStage;
use crate::config::{self, StageConfig, StageTable};
use crate::pipeline::PipelineStack;
use crate::template::Stack;

pub const MANIFEST_VERSION: &str = "36.0.0";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const PLAN_FILE: &str = "pipeline.json";

/// Holds what every construct may read while building: the stage table and
/// the tags applied to every stack. Nothing here changes once construction
/// starts.
#[derive(Debug, Clone)]
pub struct App {
    stage_table: StageTable,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub file_name: String,
    pub contents: Value,
}

/// Files of one assembly directory. Nested assemblies become
/// subdirectories named after `directory`.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudAssembly {
    pub directory: Option<String>,
    pub files: Vec<Artifact>,
    pub nested: Vec<CloudAssembly>,
}

impl App {
    pub fn new(stage_table: StageTable) -> Self {
        Self {
            stage_table,
            tags: BTreeMap::new(),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<StageConfig, config::Error> {
        self.stage_table.resolve(name)
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn synth(&self, pipeline: &PipelineStack) -> CloudAssembly {
        let mut artifacts = Map::new();
        let mut files = Vec::new();
        let mut nested = Vec::new();

        let (entry, template) = self.stack_artifact(&pipeline.stack);
        artifacts.insert(pipeline.stack.stack_name().to_string(), entry);
        files.push(template);

        for deployment in pipeline.pipeline.stages() {
            let stage_assembly = self.stage_assembly(&deployment.stage);
            artifacts.insert(
                deployment.stage.assembly_directory(),
                json!({
                    "type": "cdk:cloud-assembly",
                    "properties": {
                        "directoryName": deployment.stage.assembly_directory(),
                        "displayName": deployment.stage.id()
                    }
                }),
            );
            nested.push(stage_assembly);
        }

        files.push(Artifact {
            file_name: MANIFEST_FILE.to_string(),
            contents: manifest(artifacts),
        });
        files.push(Artifact {
            file_name: PLAN_FILE.to_string(),
            contents: pipeline.pipeline.plan(),
        });
        info!(stacks = artifacts_count(&nested) + 1, "synthesized cloud assembly");

        return CloudAssembly {
            directory: None,
            files,
            nested,
        };
    }

    fn stage_assembly(&self, stage: &AppStage) -> CloudAssembly {
        let mut artifacts = Map::new();
        let mut files = Vec::new();

        for stack in stage.stacks() {
            let (entry, template) = self.stack_artifact(stack);
            artifacts.insert(stack.stack_name().to_string(), entry);
            files.push(template);
        }
        files.push(Artifact {
            file_name: MANIFEST_FILE.to_string(),
            contents: manifest(artifacts),
        });

        return CloudAssembly {
            directory: Some(stage.assembly_directory()),
            files,
            nested: Vec::new(),
        };
    }

    fn stack_artifact(&self, stack: &Stack) -> (Value, Artifact) {
        let template_file = format!("{}.template.json", stack.stack_name());

        // Stack tags override app tags with the same key.
        let mut tags = self.tags.clone();
        tags.extend(stack.tags().iter().map(|(key, value)| (key.clone(), value.clone())));

        let entry = json!({
            "type": "aws:cloudformation:stack",
            "environment": stack.env().to_string(),
            "properties": {
                "templateFile": template_file,
                "stackName": stack.stack_name(),
                "tags": tags
            },
            "dependencies": stack.dependencies()
        });

        return (
            entry,
            Artifact {
                file_name: template_file,
                contents: stack.template(),
            },
        );
    }
}

fn manifest(artifacts: Map<String, Value>) -> Value {
    json!({ "version": MANIFEST_VERSION, "artifacts": artifacts })
}

fn artifacts_count(nested: &[CloudAssembly]) -> usize {
    nested
        .iter()
        .map(|assembly| {
            assembly
                .files
                .iter()
                .filter(|file| file.file_name != MANIFEST_FILE)
                .count()
        })
        .sum()
}
