//! The delivery pipeline: source repository, synth step, then the
//! application stages promoted one after another, dev to stg to prd.
//!
//! The pipeline only declares the plan. Running it, including waiting on
//! approvals and rolling back failed deployments, is up to the pipeline
//! service.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::app::App;
use crate::app_stage::{AppStage, AppStageProps};
use crate::config::{Environment, Stage};
use crate::error::Result;
use crate::lambda::assume_role_policy;
use crate::nag::{self, Suppression};
use crate::template::{self, get_att, reference, Output, OutputRef, Resource, Stack};

pub const REPOSITORY_NAME: &str = "HandsonPipelineRepository";
pub const SOURCE_BRANCH: &str = "master";
pub const PUBLISH_FUNCTION_NAME_VARIABLE: &str = "PUBLISH_LAMBDA_FUNCTION_NAME";

const SOURCE_ARTIFACT: &str = "Source";
const SYNTH_ARTIFACT: &str = "Synth_Output";
const PIPELINE_ID: &str = "HandsonPipeline";
const ARTIFACTS_KEY_ID: &str = "ArtifactsBucketEncryptionKey";
const ARTIFACTS_BUCKET_ID: &str = "ArtifactsBucket";
const PIPELINE_ROLE_ID: &str = "PipelineRole";
const CODE_BUILD_ROLE_ID: &str = "CodeBuildRole";
const INVOKE_POLICY_ID: &str = "InvokeLambdaPolicyForStage";
const INVOKE_ROLE_ID: &str = "InvokeLambdaRoleForStage";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeCommitSource {
    pub repository: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBuildStep {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<CodeCommitSource>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub install_commands: Vec<String>,

    pub commands: Vec<String>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env_from_cfn_outputs: BTreeMap<String, OutputRef>,

    /// Logical id of the role the build runs as. The shared build role is
    /// used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl CodeBuildStep {
    pub fn new(id: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            id: id.into(),
            project_name: None,
            input: None,
            install_commands: Vec::new(),
            commands,
            env_from_cfn_outputs: BTreeMap::new(),
            role: None,
        }
    }

    fn project_id(&self) -> String {
        format!("{}Project", self.id)
    }

    fn build_spec(&self) -> Value {
        let mut phases = serde_json::Map::new();
        if !self.install_commands.is_empty() {
            phases.insert("install".to_string(), json!({ "commands": self.install_commands }));
        }
        phases.insert("build".to_string(), json!({ "commands": self.commands }));

        json!({ "version": "0.2", "phases": phases })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualApprovalStep {
    pub id: String,
}

impl ManualApprovalStep {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    CodeBuild(CodeBuildStep),
    ManualApproval(ManualApprovalStep),
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Step::CodeBuild(step) => &step.id,
            Step::ManualApproval(step) => &step.id,
        }
    }
}

/// An application stage as placed in the pipeline, with the steps gating it.
#[derive(Debug)]
pub struct StageDeployment {
    pub stage: AppStage,
    pub pre: Vec<Step>,
    pub post: Vec<Step>,
}

impl StageDeployment {
    pub fn add_pre(&mut self, step: Step) {
        self.pre.push(step);
    }

    pub fn add_post(&mut self, step: Step) {
        self.post.push(step);
    }
}

#[derive(Debug)]
pub struct Pipeline {
    pub synth: CodeBuildStep,
    pub cross_account_keys: bool,
    pub enable_key_rotation: bool,
    stages: Vec<StageDeployment>,
}

impl Pipeline {
    pub fn new(synth: CodeBuildStep) -> Self {
        Self {
            synth,
            cross_account_keys: true,
            enable_key_rotation: true,
            stages: Vec::new(),
        }
    }

    /// Appends a stage. Stages deploy in the order they are added.
    pub fn add_stage(&mut self, stage: AppStage) -> &mut StageDeployment {
        self.stages.push(StageDeployment {
            stage,
            pre: Vec::new(),
            post: Vec::new(),
        });
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }

    pub fn stages(&self) -> &[StageDeployment] {
        &self.stages
    }

    /// The ordered deployment plan handed to the pipeline service.
    pub fn plan(&self) -> Value {
        let stages: Vec<Value> = self
            .stages
            .iter()
            .map(|deployment| {
                let stacks: Vec<Value> = deployment
                    .stage
                    .run_orders()
                    .iter()
                    .map(|(stack, run_order)| {
                        json!({
                            "stackName": stack.stack_name(),
                            "environment": stack.env().to_string(),
                            "runOrder": run_order,
                            "dependencies": stack.dependencies(),
                        })
                    })
                    .collect();

                json!({
                    "name": deployment.stage.stage(),
                    "stageId": deployment.stage.id(),
                    "pre": deployment.pre,
                    "stacks": stacks,
                    "post": deployment.post,
                })
            })
            .collect();

        json!({
            "pipeline": PIPELINE_ID,
            "crossAccountKeys": self.cross_account_keys,
            "enableKeyRotation": self.enable_key_rotation,
            "synth": self.synth,
            "stages": stages,
        })
    }
}

pub struct PipelineStackProps {
    pub env: Environment,
}

#[derive(Debug)]
pub struct PipelineStack {
    pub stack: Stack,
    pub pipeline: Pipeline,
    pub repository_clone_url: OutputRef,
}

impl PipelineStack {
    pub fn new(app: &App, id: &str, props: PipelineStackProps) -> Result<Self> {
        let mut stack = Stack::new(id, props.env);

        // Source
        let mut repository_tags = BTreeMap::new();
        repository_tags.insert("Name".to_string(), REPOSITORY_NAME.to_string());
        stack.add_resource(
            REPOSITORY_NAME,
            Resource::new("AWS::CodeCommit::Repository")
                .property("RepositoryName", json!(REPOSITORY_NAME))
                .property("Tags", template::tags(&repository_tags)),
        )?;
        let repository_clone_url = stack.add_output(
            "HandsonRepository",
            Output {
                value: get_att(REPOSITORY_NAME, "CloneUrlHttp"),
                description: None,
            },
        )?;

        // Synth
        let mut synth = CodeBuildStep::new(
            "SynthStep",
            vec![
                "npm ci".to_string(),
                "npm run build".to_string(),
                "npx cdk synth".to_string(),
            ],
        );
        synth.input = Some(CodeCommitSource {
            repository: REPOSITORY_NAME.to_string(),
            branch: SOURCE_BRANCH.to_string(),
        });
        synth.install_commands = vec!["npm install -g aws-cdk".to_string()];
        let mut pipeline = Pipeline::new(synth);

        // Dev: deploy, then smoke test the publish function
        let dev = AppStage::new(app, "AppDevStage", stage_props(Stage::Dev))?;
        let mut test_publish = CodeBuildStep::new(
            "TestPublishLambda",
            vec![format!(
                "aws lambda invoke --function-name ${} out --output text",
                PUBLISH_FUNCTION_NAME_VARIABLE
            )],
        );
        test_publish.project_name = Some("TestPublishLambda".to_string());
        test_publish.env_from_cfn_outputs.insert(
            PUBLISH_FUNCTION_NAME_VARIABLE.to_string(),
            dev.publish_lambda_function_name.clone(),
        );
        test_publish.role = Some(role_for_stage(&mut stack)?);
        pipeline.add_stage(dev).add_post(Step::CodeBuild(test_publish));

        // Stg: manual approval first
        let stg = AppStage::new(app, "AppStgStage", stage_props(Stage::Stg))?;
        pipeline
            .add_stage(stg)
            .add_pre(Step::ManualApproval(ManualApprovalStep::new("PromptToStg")));

        // Prd: manual approval first
        let prd = AppStage::new(app, "AppPrdStage", stage_props(Stage::Prd))?;
        pipeline
            .add_stage(prd)
            .add_pre(Step::ManualApproval(ManualApprovalStep::new("PromptToPrd")));

        declare_pipeline(&mut stack, &pipeline)?;
        add_pipeline_stack_nag_suppressions(&mut stack)?;
        info!(stack = id, stages = pipeline.stages().len(), "declared pipeline stack");

        return Ok(Self {
            stack,
            pipeline,
            repository_clone_url,
        });
    }
}

fn stage_props(stage: Stage) -> AppStageProps {
    AppStageProps {
        stage: stage.as_str().to_string(),
    }
}

/// Role for the post-deploy test, limited to invoking and listing functions.
fn role_for_stage(stack: &mut Stack) -> Result<String> {
    stack.add_resource(
        INVOKE_POLICY_ID,
        Resource::new("AWS::IAM::ManagedPolicy")
            .property("ManagedPolicyName", json!(INVOKE_POLICY_ID))
            .property(
                "PolicyDocument",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": ["lambda:InvokeFunction", "lambda:ListFunctions"],
                        "Resource": "*"
                    }]
                }),
            ),
    )?;
    stack.add_resource(
        INVOKE_ROLE_ID,
        Resource::new("AWS::IAM::Role")
            .property("RoleName", json!(INVOKE_ROLE_ID))
            .property("Description", json!("Invoke Lambda role for Stage"))
            .property("AssumeRolePolicyDocument", assume_role_policy("codebuild.amazonaws.com"))
            .property("ManagedPolicyArns", json!([reference(INVOKE_POLICY_ID)])),
    )?;

    return Ok(INVOKE_ROLE_ID.to_string());
}

fn add_pipeline_stack_nag_suppressions(stack: &mut Stack) -> Result<()> {
    nag::add_stack_suppressions(
        stack,
        [
            Suppression::new(nag::S3_ACCESS_LOGGING, "Server Access Logging not required."),
            Suppression::new(
                nag::IAM_WILDCARD_PERMISSIONS,
                "Wildcard permissions for CDK Pipelines resources are allowed.",
            ),
        ],
    )?;

    return Ok(());
}

fn declare_pipeline(stack: &mut Stack, pipeline: &Pipeline) -> Result<()> {
    let mut artifact_store = json!({ "Type": "S3", "Location": reference(ARTIFACTS_BUCKET_ID) });
    let mut bucket = Resource::new("AWS::S3::Bucket").property(
        "PublicAccessBlockConfiguration",
        json!({
            "BlockPublicAcls": true,
            "BlockPublicPolicy": true,
            "IgnorePublicAcls": true,
            "RestrictPublicBuckets": true
        }),
    );

    if pipeline.cross_account_keys {
        let policy = key_policy(&target_accounts(stack, pipeline));
        stack.add_resource(
            ARTIFACTS_KEY_ID,
            Resource::new("AWS::KMS::Key")
                .property("EnableKeyRotation", json!(pipeline.enable_key_rotation))
                .property("KeyPolicy", policy),
        )?;
        bucket = bucket.property(
            "BucketEncryption",
            json!({
                "ServerSideEncryptionConfiguration": [{
                    "ServerSideEncryptionByDefault": {
                        "SSEAlgorithm": "aws:kms",
                        "KMSMasterKeyID": get_att(ARTIFACTS_KEY_ID, "Arn")
                    }
                }]
            }),
        );
        artifact_store["EncryptionKey"] = json!({ "Id": get_att(ARTIFACTS_KEY_ID, "Arn"), "Type": "KMS" });
    }
    stack.add_resource(ARTIFACTS_BUCKET_ID, bucket)?;

    stack.add_resource(PIPELINE_ROLE_ID, service_role("codepipeline.amazonaws.com"))?;
    stack.add_resource(CODE_BUILD_ROLE_ID, service_role("codebuild.amazonaws.com"))?;

    declare_project(stack, &pipeline.synth, true)?;
    let mut stages = vec![
        json!({
            "Name": "Source",
            "Actions": [{
                "Name": REPOSITORY_NAME,
                "ActionTypeId": action_type("Source", "CodeCommit"),
                "Configuration": {
                    "RepositoryName": get_att(REPOSITORY_NAME, "Name"),
                    "BranchName": SOURCE_BRANCH,
                    "PollForSourceChanges": false
                },
                "OutputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                "RunOrder": 1
            }]
        }),
        json!({
            "Name": "Build",
            "Actions": [{
                "Name": pipeline.synth.id,
                "ActionTypeId": action_type("Build", "CodeBuild"),
                "Configuration": { "ProjectName": reference(&pipeline.synth.project_id()) },
                "InputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                "OutputArtifacts": [{ "Name": SYNTH_ARTIFACT }],
                "RunOrder": 1
            }]
        }),
    ];

    for deployment in pipeline.stages() {
        let mut actions = Vec::new();
        let mut run_order = 0;

        for step in &deployment.pre {
            run_order += 1;
            actions.push(step_action(stack, step, run_order)?);
        }

        let offset = run_order;
        for (stack_to_deploy, wave) in deployment.stage.run_orders() {
            run_order = run_order.max(offset + wave);
            let mut action = json!({
                "Name": format!("{}.Deploy", stack_to_deploy.stack_name()),
                "Namespace": stack_to_deploy.stack_name(),
                "ActionTypeId": action_type("Deploy", "CloudFormation"),
                "Configuration": {
                    "StackName": stack_to_deploy.stack_name(),
                    "ActionMode": "CREATE_UPDATE",
                    "TemplatePath": format!(
                        "{}::{}/{}.template.json",
                        SYNTH_ARTIFACT,
                        deployment.stage.assembly_directory(),
                        stack_to_deploy.stack_name()
                    ),
                    "Capabilities": "CAPABILITY_NAMED_IAM,CAPABILITY_AUTO_EXPAND"
                },
                "InputArtifacts": [{ "Name": SYNTH_ARTIFACT }],
                "Region": stack_to_deploy.env().region,
                "RunOrder": offset + wave
            });
            let target = stack_to_deploy.env();
            if target.account != stack.env().account {
                action["RoleArn"] = json!(bootstrap_role_arn(target, "deploy-role"));
                action["Configuration"]["RoleArn"] = json!(bootstrap_role_arn(target, "cfn-exec-role"));
            }
            actions.push(action);
        }

        for step in &deployment.post {
            run_order += 1;
            actions.push(step_action(stack, step, run_order)?);
        }

        stages.push(json!({ "Name": deployment.stage.id(), "Actions": actions }));
    }

    let mut pipeline_tags = BTreeMap::new();
    pipeline_tags.insert("Name".to_string(), PIPELINE_ID.to_string());
    stack.add_resource(
        PIPELINE_ID,
        Resource::new("AWS::CodePipeline::Pipeline")
            .property("RoleArn", get_att(PIPELINE_ROLE_ID, "Arn"))
            .property("ArtifactStore", artifact_store)
            .property("RestartExecutionOnUpdate", json!(true))
            .property("Stages", Value::Array(stages))
            .property("Tags", template::tags(&pipeline_tags))
            .depends_on(PIPELINE_ROLE_ID),
    )?;

    return Ok(());
}

/// Accounts other than the pipeline's own that stage stacks deploy into.
fn target_accounts(stack: &Stack, pipeline: &Pipeline) -> Vec<String> {
    let mut accounts: Vec<String> = Vec::new();
    for deployment in pipeline.stages() {
        for stage_stack in deployment.stage.stacks() {
            let account = &stage_stack.env().account;
            if account != &stack.env().account && !accounts.contains(account) {
                accounts.push(account.clone());
            }
        }
    }

    return accounts;
}

/// The pipeline account administers the key; target accounts may only
/// read artifacts encrypted with it.
fn key_policy(target_accounts: &[String]) -> Value {
    let mut statements = vec![json!({
        "Effect": "Allow",
        "Principal": { "AWS": { "Fn::Sub": "arn:aws:iam::${AWS::AccountId}:root" } },
        "Action": "kms:*",
        "Resource": "*"
    })];
    if !target_accounts.is_empty() {
        let principals: Vec<String> = target_accounts
            .iter()
            .map(|account| format!("arn:aws:iam::{}:root", account))
            .collect();
        statements.push(json!({
            "Effect": "Allow",
            "Principal": { "AWS": principals },
            "Action": ["kms:Decrypt", "kms:DescribeKey"],
            "Resource": "*"
        }));
    }

    json!({ "Version": "2012-10-17", "Statement": statements })
}

/// Role provisioned in the target account by the toolkit bootstrap.
fn bootstrap_role_arn(target: &Environment, role: &str) -> String {
    format!(
        "arn:aws:iam::{}:role/cdk-hnb659fds-{}-{}-{}",
        target.account, role, target.account, target.region
    )
}

fn step_action(stack: &mut Stack, step: &Step, run_order: u32) -> Result<Value> {
    debug!(step = step.id(), run_order, "placed gating step");
    let action = match step {
        Step::CodeBuild(build) => {
            declare_project(stack, build, false)?;

            let variables: Vec<Value> = build
                .env_from_cfn_outputs
                .iter()
                .map(|(name, output)| {
                    json!({ "name": name, "type": "PLAINTEXT", "value": output.variable() })
                })
                .collect();
            let mut configuration = json!({ "ProjectName": reference(&build.project_id()) });
            if !variables.is_empty() {
                configuration["EnvironmentVariables"] = Value::String(serde_json::to_string(&variables)?);
            }

            json!({
                "Name": build.id,
                "ActionTypeId": action_type("Build", "CodeBuild"),
                "Configuration": configuration,
                "InputArtifacts": [{ "Name": SYNTH_ARTIFACT }],
                "RunOrder": run_order
            })
        }
        Step::ManualApproval(approval) => json!({
            "Name": approval.id,
            "ActionTypeId": action_type("Approval", "Manual"),
            "RunOrder": run_order
        }),
    };

    return Ok(action);
}

fn declare_project(stack: &mut Stack, step: &CodeBuildStep, synth: bool) -> Result<()> {
    let mut build_spec = step.build_spec();
    if synth {
        build_spec["artifacts"] = json!({ "base-directory": "cdk.out", "files": "**/*" });
    }

    let build_spec = serde_json::to_string_pretty(&build_spec)?;
    let role = step.role.as_deref().unwrap_or(CODE_BUILD_ROLE_ID);
    let mut project = Resource::new("AWS::CodeBuild::Project")
        .property(
            "Environment",
            json!({
                "ComputeType": "BUILD_GENERAL1_SMALL",
                "Image": "aws/codebuild/standard:7.0",
                "Type": "LINUX_CONTAINER"
            }),
        )
        .property("ServiceRole", get_att(role, "Arn"))
        .property(
            "Source",
            json!({ "Type": "CODEPIPELINE", "BuildSpec": build_spec }),
        )
        .property("Artifacts", json!({ "Type": "CODEPIPELINE" }))
        .depends_on(role);
    if let Some(project_name) = &step.project_name {
        project = project.property("Name", json!(project_name));
    }

    stack.add_resource(&step.project_id(), project)?;
    return Ok(());
}

/// Role for the pipeline's own service. Pipelines need broad access to the
/// artifact store and deploy targets, hence the wildcard suppression.
fn service_role(service: &str) -> Resource {
    Resource::new("AWS::IAM::Role")
        .property("AssumeRolePolicyDocument", assume_role_policy(service))
        .property(
            "Policies",
            json!([{
                "PolicyName": "pipeline",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": [
                            "s3:GetObject*",
                            "s3:PutObject*",
                            "kms:Decrypt",
                            "kms:Encrypt",
                            "kms:GenerateDataKey*",
                            "codecommit:GetBranch",
                            "codecommit:GetCommit",
                            "codecommit:GitPull",
                            "codecommit:UploadArchive",
                            "codecommit:GetUploadArchiveStatus",
                            "codebuild:StartBuild",
                            "codebuild:BatchGetBuilds",
                            "cloudformation:*",
                            "iam:PassRole",
                            "logs:CreateLogGroup",
                            "logs:CreateLogStream",
                            "logs:PutLogEvents"
                        ],
                        "Resource": "*"
                    }]
                }
            }]),
        )
}

fn action_type(category: &str, provider: &str) -> Value {
    json!({ "Category": category, "Owner": "AWS", "Provider": provider, "Version": "1" })
}
