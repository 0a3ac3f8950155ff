use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};
use validator::Validate;

/// Environment variable pointing at a YAML stage table that replaces the
/// embedded one.
pub const STAGE_CONFIG_PATH: &str = "STAGE_CONFIG_PATH";

const EMBEDDED_STAGE_CONFIG: &str = include_str!("../stage-config.yaml");

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown stage `{0}`, expected one of: cicd, dev, stg, prd")]
    UnknownStage(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

/// Deployment targets known to the pipeline. `Cicd` is where the pipeline
/// itself lives, the rest are application environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Cicd,
    Dev,
    Stg,
    Prd,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Cicd => "cicd",
            Stage::Dev => "dev",
            Stage::Stg => "stg",
            Stage::Prd => "prd",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "cicd" => Ok(Stage::Cicd),
            "dev" => Ok(Stage::Dev),
            "stg" => Ok(Stage::Stg),
            "prd" => Ok(Stage::Prd),
            unknown => Err(Error::UnknownStage(unknown.to_string())),
        }
    }
}

/// Account and region pair a stack is deployed into. Passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Environment {
    #[validate(length(min = 1))]
    pub account: String,

    #[validate(length(min = 1))]
    pub region: String,
}

impl Environment {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aws://{}/{}", self.account, self.region)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Seconds. `None` leaves the queue at its service default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_timeout: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StageSettings {
    #[validate]
    pub env: Environment,

    #[serde(default)]
    pub queue: QueueSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageConfig {
    pub stage_name: Stage,
    pub env: Environment,
    pub queue: QueueSettings,
}

/// One entry per [`Stage`]. Unknown keys are rejected while parsing so a
/// misspelled stage never silently falls back to anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StageTable {
    #[validate]
    pub cicd: StageSettings,

    #[validate]
    pub dev: StageSettings,

    #[validate]
    pub stg: StageSettings,

    #[validate]
    pub prd: StageSettings,
}

impl StageTable {
    pub const fn get(&self, stage: Stage) -> &StageSettings {
        match stage {
            Stage::Cicd => &self.cicd,
            Stage::Dev => &self.dev,
            Stage::Stg => &self.stg,
            Stage::Prd => &self.prd,
        }
    }

    pub fn resolve(&self, name: &str) -> Result<StageConfig, Error> {
        let stage: Stage = name.parse()?;
        let settings = self.get(stage);
        debug!(%stage, env = %settings.env, "resolved stage configuration");

        return Ok(StageConfig {
            stage_name: stage,
            env: settings.env.clone(),
            queue: settings.queue.clone(),
        });
    }
}

/// Loads the stage table, preferring the file named by `STAGE_CONFIG_PATH`
/// over the copy embedded in the binary. A set variable is always honored,
/// whatever bytes it holds.
pub fn load() -> Result<StageTable, Error> {
    match env::var_os(STAGE_CONFIG_PATH) {
        Some(path) => {
            let path = PathBuf::from(path);
            info!(path = %path.display(), "loading stage configuration from file");
            parse(&path)
        }
        None => from_yaml(EMBEDDED_STAGE_CONFIG),
    }
}

pub fn parse(path: &Path) -> Result<StageTable, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    return from_yaml(&contents);
}

fn from_yaml(contents: &str) -> Result<StageTable, Error> {
    let table: StageTable = match serde_yaml::from_str(contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match table.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    return Ok(table);
}
