//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;

use serde_json::{json, Value};

use stackpilot::core::stack::{Asset, AssetKind, Stack};
use stackpilot::core::template::{Resource, Template};
use stackpilot::core::types::{AssetId, Environment, StackId};

pub const ACCOUNT: &str = "111111111111";
pub const REGION: &str = "us-east-1";

pub fn env() -> Environment {
    Environment::new(ACCOUNT, REGION).unwrap()
}

pub fn id(name: &str) -> StackId {
    StackId::new(name).unwrap()
}

/// Template with a single queue and an output.
pub fn queue_template(output: &str) -> Template {
    let mut template =
        Template::empty().with_resource("Queue", Resource::new("AWS::SQS::Queue", json!({})));
    template
        .outputs
        .insert("QueueUrl".into(), json!({ "Value": output }));
    template
}

/// Template granting a new IAM permission (a broadening change).
pub fn policy_template() -> Template {
    Template::empty().with_resource(
        "Policy",
        Resource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyDocument": {
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": "s3:GetObject",
                        "Resource": "*"
                    }]
                }
            }),
        ),
    )
}

pub fn stack(name: &str, template: Template) -> Stack {
    Stack::new(id(name), env(), template)
}

pub fn queue_stack(name: &str) -> Stack {
    stack(name, queue_template(&format!("https://{}", name.to_lowercase())))
}

pub fn file_asset(asset_id: &str) -> Asset {
    Asset {
        id: AssetId::new(asset_id).unwrap(),
        kind: AssetKind::File,
        source: format!("asset.{}", asset_id).into(),
        build_command: None,
    }
}

/// Write an assembly directory with the given manifest stacks.
///
/// Each entry is `(id, dependencies, template)`.
pub fn write_assembly(dir: &Path, stacks: &[(&str, &[&str], &Template)]) {
    std::fs::create_dir_all(dir).unwrap();
    let mut entries: Vec<Value> = Vec::new();
    for (name, deps, template) in stacks {
        let file = format!("{}.template.json", name);
        std::fs::write(dir.join(&file), template.to_json_pretty()).unwrap();
        entries.push(json!({
            "id": name,
            "templateFile": file,
            "environment": { "account": ACCOUNT, "region": REGION },
            "dependencies": deps,
        }));
    }
    let manifest = json!({ "version": 1, "stacks": entries });
    std::fs::write(
        dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}
