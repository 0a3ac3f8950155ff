use serde_json::{json, Value};

use crate::template::{get_att, Resource};

pub const RUNTIME: &str = "nodejs18.x";

const BASIC_EXECUTION_POLICY: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Role a function runs as. `statements` are added as one inline policy.
pub fn execution_role(statements: Vec<Value>) -> Resource {
    let role = Resource::new("AWS::IAM::Role")
        .property("AssumeRolePolicyDocument", assume_role_policy("lambda.amazonaws.com"))
        .property("ManagedPolicyArns", json!([BASIC_EXECUTION_POLICY]));

    if statements.is_empty() {
        return role;
    }

    role.property(
        "Policies",
        json!([{
            "PolicyName": "inline",
            "PolicyDocument": { "Version": "2012-10-17", "Statement": statements }
        }]),
    )
}

/// Function declared from a prebuilt asset. The handler code itself ships
/// separately.
pub fn function(role_logical_id: &str, asset: &str, environment: Value) -> Resource {
    Resource::new("AWS::Lambda::Function")
        .property("Runtime", json!(RUNTIME))
        .property("Handler", json!("index.handler"))
        .property("Code", json!({ "S3Key": asset }))
        .property("Role", get_att(role_logical_id, "Arn"))
        .property("Environment", json!({ "Variables": environment }))
        .depends_on(role_logical_id)
}

pub fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::{execution_role, function};
    use serde_json::json;

    #[test]
    fn role_without_statements_has_no_inline_policy() {
        let role = execution_role(Vec::new());
        assert_eq!(false, role.properties.contains_key("Policies"));
    }

    #[test]
    fn function_depends_on_its_role() {
        let function = function("Role", "asset.zip", json!({ "STAGE": "dev" }));
        assert_eq!(vec!["Role".to_string()], function.depends_on);
        assert_eq!(
            Some(&json!({ "Variables": { "STAGE": "dev" } })),
            function.properties.get("Environment")
        );
    }
}
