use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::Environment;
use crate::nag::Suppression;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Construct `{id}` is already declared in stack `{stack_name}`")]
    DuplicateConstruct { stack_name: String, id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Points at an output of another stack. Downstream steps resolve it at
/// deploy time instead of hard-coding the physical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRef {
    pub stack_name: String,
    pub output_key: String,
}

impl OutputRef {
    /// Variable syntax understood by the pipeline's deploy actions.
    pub fn variable(&self) -> String {
        format!("#{{{}.{}}}", self.stack_name, self.output_key)
    }
}

/// An independently deployable group of resources.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    stack_name: String,
    env: Environment,
    resources: BTreeMap<String, Resource>,
    outputs: BTreeMap<String, Output>,
    suppressions: Vec<Suppression>,
    tags: BTreeMap<String, String>,
    dependencies: Vec<String>,
}

impl Stack {
    pub fn new(stack_name: impl Into<String>, env: Environment) -> Self {
        Self {
            stack_name: stack_name.into(),
            env,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            suppressions: Vec::new(),
            tags: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn resources(&self) -> &BTreeMap<String, Resource> {
        &self.resources
    }

    pub fn outputs(&self) -> &BTreeMap<String, Output> {
        &self.outputs
    }

    pub fn suppressions(&self) -> &[Suppression] {
        &self.suppressions
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Names of the stacks that have to finish deploying before this one.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn add_resource(&mut self, logical_id: &str, resource: Resource) -> Result<(), Error> {
        if self.resources.contains_key(logical_id) {
            return Err(self.duplicate(logical_id));
        }

        debug!(
            stack = %self.stack_name,
            logical_id,
            resource_type = %resource.resource_type,
            "declared resource"
        );
        self.resources.insert(logical_id.to_string(), resource);
        return Ok(());
    }

    pub fn add_output(&mut self, key: &str, output: Output) -> Result<OutputRef, Error> {
        if self.outputs.contains_key(key) {
            return Err(self.duplicate(key));
        }

        self.outputs.insert(key.to_string(), output);
        return Ok(OutputRef {
            stack_name: self.stack_name.clone(),
            output_key: key.to_string(),
        });
    }

    pub(crate) fn add_suppression(&mut self, suppression: Suppression) {
        self.suppressions.push(suppression);
    }

    /// Later calls win for the same key.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Ordering-only edge: `self` deploys after `other` completes.
    pub fn add_dependency(&mut self, other: &Stack) {
        if !self.dependencies.iter().any(|name| name == &other.stack_name) {
            self.dependencies.push(other.stack_name.clone());
        }
    }

    pub fn template(&self) -> Value {
        let mut template = Map::new();

        if !self.suppressions.is_empty() {
            template.insert(
                "Metadata".to_string(),
                json!({ "cdk_nag": { "rules_to_suppress": self.suppressions } }),
            );
        }
        template.insert("Resources".to_string(), json!(self.resources));
        if !self.outputs.is_empty() {
            template.insert("Outputs".to_string(), json!(self.outputs));
        }

        return Value::Object(template);
    }

    fn duplicate(&self, id: &str) -> Error {
        Error::DuplicateConstruct {
            stack_name: self.stack_name.clone(),
            id: id.to_string(),
        }
    }
}

/// `{ "Ref": logical_id }`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{ "Fn::GetAtt": [logical_id, attribute] }`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// Tag list in the shape resource properties expect.
pub fn tags(tags: &BTreeMap<String, String>) -> Value {
    Value::Array(
        tags.iter()
            .map(|(key, value)| json!({ "Key": key, "Value": value }))
            .collect(),
    )
}
