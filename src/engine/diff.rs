//! engine::diff
//!
//! Structural comparison of deployed and desired templates.
//!
//! # Architecture
//!
//! [`diff_templates`] is a pure comparison of two templates, optionally
//! informed by a changeset (which marks replacements). [`security_changes`]
//! extracts only policy statements, managed policy attachments and network
//! rules, and is shared with the approval gate.
//!
//! [`DiffEngine`] runs either comparison for a set of stacks against the
//! provisioning service and reports how many stacks differ. A difference
//! combined with `fail` yields exit code 1; it is not an error.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::Value;
use similar::TextDiff;

use super::gate::{self, SecurityChange, SecurityEntryKind};
use super::DeployError;
use crate::core::stack::Stack;
use crate::core::template::{Resource, Template};
use crate::provision::{
    ChangeSet, DeployMethod, DeployStackRequest, Provisioner, StackRef,
};
use crate::ui::output::OutputSink;

/// How a single entry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl ChangeKind {
    fn marker(self) -> &'static str {
        match self {
            ChangeKind::Added => "[+]",
            ChangeKind::Removed => "[-]",
            ChangeKind::Modified => "[~]",
        }
    }
}

/// One differing resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    pub logical_id: String,
    pub resource_type: String,
    pub kind: ChangeKind,
    /// The changeset says the update replaces the resource
    pub replacement: bool,
    pub old: Option<Resource>,
    pub new: Option<Resource>,
}

/// Differences between two templates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemplateDiff {
    pub resources: Vec<ResourceDiff>,
    pub parameters: Vec<(String, ChangeKind)>,
    pub outputs: Vec<(String, ChangeKind)>,
}

impl TemplateDiff {
    /// Whether the templates are equivalent.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.parameters.is_empty() && self.outputs.is_empty()
    }
}

fn diff_maps<T: PartialEq>(old: &BTreeMap<String, T>, new: &BTreeMap<String, T>) -> Vec<(String, ChangeKind)> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter_map(|key| match (old.get(key), new.get(key)) {
            (None, Some(_)) => Some((key.clone(), ChangeKind::Added)),
            (Some(_), None) => Some((key.clone(), ChangeKind::Removed)),
            (Some(a), Some(b)) if a != b => Some((key.clone(), ChangeKind::Modified)),
            _ => None,
        })
        .collect()
}

/// Compare two templates.
pub fn diff_templates(old: &Template, new: &Template, change_set: Option<&ChangeSet>) -> TemplateDiff {
    let resources = diff_maps(&old.resources, &new.resources)
        .into_iter()
        .map(|(logical_id, kind)| {
            let old_resource = old.resources.get(&logical_id).cloned();
            let new_resource = new.resources.get(&logical_id).cloned();
            let resource_type = new_resource
                .as_ref()
                .or(old_resource.as_ref())
                .map(|r| r.resource_type.clone())
                .unwrap_or_default();
            let replacement = kind == ChangeKind::Modified
                && change_set.is_some_and(|cs| cs.replaces(&logical_id));
            ResourceDiff {
                logical_id,
                resource_type,
                kind,
                replacement,
                old: old_resource,
                new: new_resource,
            }
        })
        .collect();

    TemplateDiff {
        resources,
        parameters: diff_maps(&old.parameters, &new.parameters),
        outputs: diff_maps(&old.outputs, &new.outputs),
    }
}

/// Render a template diff.
pub fn format_template_diff(diff: &TemplateDiff, context_lines: usize) -> String {
    let mut out = String::new();

    if !diff.parameters.is_empty() {
        out.push_str("Parameters\n");
        for (name, kind) in &diff.parameters {
            out.push_str(&format!("{} {}\n", kind.marker(), name));
        }
        out.push('\n');
    }

    if !diff.resources.is_empty() {
        out.push_str("Resources\n");
        for r in &diff.resources {
            out.push_str(&format!(
                "{} {} {}{}\n",
                r.kind.marker(),
                r.resource_type,
                r.logical_id,
                if r.replacement { " (replace)" } else { "" }
            ));
            if let (Some(old), Some(new)) = (&r.old, &r.new) {
                let old_text = pretty(old);
                let new_text = pretty(new);
                let unified = TextDiff::from_lines(&old_text, &new_text)
                    .unified_diff()
                    .context_radius(context_lines)
                    .to_string();
                for line in unified.lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        out.push('\n');
    }

    if !diff.outputs.is_empty() {
        out.push_str("Outputs\n");
        for (name, kind) in &diff.outputs {
            out.push_str(&format!("{} {}\n", kind.marker(), name));
        }
        out.push('\n');
    }

    out
}

fn pretty(resource: &Resource) -> String {
    let mut text = serde_json::to_string_pretty(resource).unwrap_or_default();
    text.push('\n');
    text
}

// =============================================================================
// Security extraction
// =============================================================================

/// A single extracted entry, used as a set key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    resource: String,
    kind: SecurityEntryKind,
    body: String,
    grants: bool,
}

fn statements(document: Option<&Value>) -> Vec<&Value> {
    match document.and_then(|d| d.get("Statement")) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    }
}

fn is_allow(statement: &Value) -> bool {
    statement
        .get("Effect")
        .and_then(Value::as_str)
        .map(|e| e.eq_ignore_ascii_case("allow"))
        .unwrap_or(false)
}

fn push_statements(entries: &mut BTreeSet<Entry>, resource: &str, document: Option<&Value>) {
    for statement in statements(document) {
        entries.insert(Entry {
            resource: resource.to_string(),
            kind: SecurityEntryKind::Statement,
            body: statement.to_string(),
            grants: is_allow(statement),
        });
    }
}

fn push_rules(entries: &mut BTreeSet<Entry>, resource: &str, kind: SecurityEntryKind, rules: Option<&Value>) {
    let rules: Vec<&Value> = match rules {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };
    for rule in rules {
        entries.insert(Entry {
            resource: resource.to_string(),
            kind,
            body: rule.to_string(),
            grants: true,
        });
    }
}

fn extract(template: &Template) -> BTreeSet<Entry> {
    let mut entries = BTreeSet::new();

    for (id, resource) in &template.resources {
        match resource.resource_type.as_str() {
            "AWS::IAM::Policy"
            | "AWS::IAM::ManagedPolicy"
            | "AWS::S3::BucketPolicy"
            | "AWS::SQS::QueuePolicy"
            | "AWS::SNS::TopicPolicy" => {
                push_statements(&mut entries, id, resource.property("PolicyDocument"));
            }
            "AWS::KMS::Key" => {
                push_statements(&mut entries, id, resource.property("KeyPolicy"));
            }
            "AWS::IAM::Role" => {
                push_statements(&mut entries, id, resource.property("AssumeRolePolicyDocument"));
                if let Some(Value::Array(policies)) = resource.property("Policies") {
                    for policy in policies {
                        push_statements(&mut entries, id, policy.get("PolicyDocument"));
                    }
                }
                if let Some(Value::Array(arns)) = resource.property("ManagedPolicyArns") {
                    for arn in arns {
                        entries.insert(Entry {
                            resource: id.clone(),
                            kind: SecurityEntryKind::ManagedPolicy,
                            body: arn.to_string(),
                            grants: true,
                        });
                    }
                }
            }
            "AWS::Lambda::Permission" => {
                let statement = serde_json::json!({
                    "Effect": "Allow",
                    "Action": resource.property("Action"),
                    "Principal": resource.property("Principal"),
                    "Resource": resource.property("FunctionName"),
                });
                entries.insert(Entry {
                    resource: id.clone(),
                    kind: SecurityEntryKind::Statement,
                    body: statement.to_string(),
                    grants: true,
                });
            }
            "AWS::EC2::SecurityGroup" => {
                push_rules(
                    &mut entries,
                    id,
                    SecurityEntryKind::IngressRule,
                    resource.property("SecurityGroupIngress"),
                );
                push_rules(
                    &mut entries,
                    id,
                    SecurityEntryKind::EgressRule,
                    resource.property("SecurityGroupEgress"),
                );
            }
            "AWS::EC2::SecurityGroupIngress" => {
                push_rules(&mut entries, id, SecurityEntryKind::IngressRule, Some(&resource.properties));
            }
            "AWS::EC2::SecurityGroupEgress" => {
                push_rules(&mut entries, id, SecurityEntryKind::EgressRule, Some(&resource.properties));
            }
            _ => {}
        }
    }

    entries
}

/// Security-relevant entries added to or removed from `old` by `new`.
///
/// Removals come first, then additions, each in resource order.
pub fn security_changes(old: &Template, new: &Template) -> Vec<SecurityChange> {
    let before = extract(old);
    let after = extract(new);

    let removed = before.difference(&after).map(|e| (e, false));
    let added = after.difference(&before).map(|e| (e, true));

    removed
        .chain(added)
        .map(|(e, added)| SecurityChange {
            resource: e.resource.clone(),
            kind: e.kind,
            body: e.body.clone(),
            grants: e.grants,
            added,
        })
        .collect()
}

// =============================================================================
// Diff command
// =============================================================================

/// Options for a diff run.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Exit with status 1 when differences are found
    pub fail: bool,
    /// Only show security-relevant changes
    pub security_only: bool,
    /// Lines of context in property diffs
    pub context_lines: usize,
    /// Suppress "There were no differences"
    pub quiet: bool,
    /// Compare against this template instead of the deployed one
    pub template_path: Option<PathBuf>,
    /// Logical id renames (old -> new) applied to the deployed template
    pub mappings: BTreeMap<String, String>,
    /// Ask the service for a changeset to detect replacements
    pub change_set: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            fail: false,
            security_only: false,
            context_lines: 3,
            quiet: false,
            template_path: None,
            mappings: BTreeMap::new(),
            change_set: true,
        }
    }
}

/// Result of a diff run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOutcome {
    /// Number of stacks with differences
    pub stacks_with_differences: usize,
    /// Process exit status to use
    pub exit_code: i32,
}

impl DiffOutcome {
    fn new(stacks_with_differences: usize, fail: bool) -> Self {
        Self {
            stacks_with_differences,
            exit_code: if fail && stacks_with_differences > 0 { 1 } else { 0 },
        }
    }
}

/// Compares selected stacks with what is deployed.
pub struct DiffEngine<'a> {
    provisioner: &'a dyn Provisioner,
    sink: &'a dyn OutputSink,
}

impl<'a> DiffEngine<'a> {
    pub fn new(provisioner: &'a dyn Provisioner, sink: &'a dyn OutputSink) -> Self {
        Self { provisioner, sink }
    }

    /// Diff every stack and print the results.
    ///
    /// # Errors
    ///
    /// - `DeployError::Validation` if a fixed template is given for more
    ///   than one stack, or cannot be read
    /// - Provisioning errors, wrapped with the stack name
    pub async fn diff(&self, stacks: &[&Stack], options: &DiffOptions) -> Result<DiffOutcome, DeployError> {
        let fixed = match &options.template_path {
            Some(path) => {
                if stacks.len() != 1 {
                    return Err(DeployError::Validation(
                        "Can only select one stack when comparing to fixed template. \
                         Use --exclusively to avoid selecting multiple stacks."
                            .into(),
                    ));
                }
                let text = std::fs::read_to_string(path).map_err(|e| {
                    DeployError::Validation(format!(
                        "There is no file at {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Some(Template::from_json(&text).map_err(|e| {
                    DeployError::Validation(format!("{}: {}", path.display(), e))
                })?)
            }
            None => None,
        };

        let mut differing = 0;
        for stack in stacks {
            let changed = self
                .diff_stack(stack, fixed.as_ref(), options)
                .await
                .map_err(|e| e.for_stack(&stack.display_name))?;
            if changed {
                differing += 1;
            }
        }

        self.sink
            .info(&format!("Number of stacks with differences: {}", differing));
        Ok(DiffOutcome::new(differing, options.fail))
    }

    async fn diff_stack(
        &self,
        stack: &Stack,
        fixed: Option<&Template>,
        options: &DiffOptions,
    ) -> Result<bool, DeployError> {
        let stack_ref = StackRef::for_stack(stack);
        let deployed = match fixed {
            Some(template) => template.clone(),
            None => self.provisioner.read_current_template(&stack_ref).await?,
        };
        let deployed = if options.mappings.is_empty() {
            deployed
        } else {
            deployed.with_renamed_resources(&options.mappings)
        };

        let change_set = if options.change_set && fixed.is_none() && !deployed.has_no_resources() {
            Some(
                self.provisioner
                    .create_change_set(&diff_request(stack))
                    .await?,
            )
        } else {
            None
        };

        self.sink.result(&format!("Stack {}", stack.display_name));

        let changed = if options.security_only {
            let security = gate::compute_gate(&deployed, &stack.template, change_set.as_ref());
            if !security.is_empty() {
                self.sink.result(security.formatted_diff.trim_end());
            }
            !security.is_empty()
        } else {
            let diff = diff_templates(&deployed, &stack.template, change_set.as_ref());
            if !diff.is_empty() {
                self.sink
                    .result(format_template_diff(&diff, options.context_lines).trim_end());
            }
            !diff.is_empty()
        };

        if !changed && !options.quiet {
            self.sink.info("There were no differences");
        }
        Ok(changed)
    }
}

/// Changeset request used only to preview a stack.
fn diff_request(stack: &Stack) -> DeployStackRequest {
    DeployStackRequest {
        stack: StackRef::for_stack(stack),
        template: stack.template.clone(),
        parameters: BTreeMap::new(),
        use_previous_parameters: true,
        tags: stack.tags.clone(),
        notification_arns: None,
        rollback: true,
        method: DeployMethod::ChangeSet,
        change_set_name: Some("stackpilot-diff".to_string()),
        force: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(visibility: u64) -> Resource {
        Resource::new("AWS::SQS::Queue", json!({ "VisibilityTimeout": visibility }))
    }

    mod template_diff {
        use super::*;

        #[test]
        fn detects_added_removed_modified() {
            let old = Template::empty()
                .with_resource("Keep", queue(30))
                .with_resource("Gone", queue(30))
                .with_resource("Changed", queue(30));
            let new = Template::empty()
                .with_resource("Keep", queue(30))
                .with_resource("Changed", queue(60))
                .with_resource("Fresh", queue(30));

            let diff = diff_templates(&old, &new, None);
            let kinds: Vec<_> = diff
                .resources
                .iter()
                .map(|r| (r.logical_id.as_str(), r.kind))
                .collect();
            assert_eq!(
                kinds,
                vec![
                    ("Changed", ChangeKind::Modified),
                    ("Fresh", ChangeKind::Added),
                    ("Gone", ChangeKind::Removed),
                ]
            );
        }

        #[test]
        fn change_set_marks_replacement() {
            let old = Template::empty().with_resource("Q", queue(30));
            let new = Template::empty().with_resource("Q", queue(60));
            let cs = ChangeSet {
                name: "cs".into(),
                changes: vec![crate::provision::ResourceChange {
                    logical_id: "Q".into(),
                    action: crate::provision::ChangeAction::Modify,
                    replacement: true,
                }],
            };
            let diff = diff_templates(&old, &new, Some(&cs));
            assert!(diff.resources[0].replacement);
            assert!(format_template_diff(&diff, 3).contains("[~] AWS::SQS::Queue Q (replace)"));
        }

        #[test]
        fn renders_property_diff() {
            let old = Template::empty().with_resource("Q", queue(30));
            let new = Template::empty().with_resource("Q", queue(60));
            let text = format_template_diff(&diff_templates(&old, &new, None), 1);
            assert!(text.contains("-    \"VisibilityTimeout\": 30"));
            assert!(text.contains("+    \"VisibilityTimeout\": 60"));
        }

        #[test]
        fn renamed_resources_compare_equal() {
            let old = Template::empty().with_resource("OldName", queue(30));
            let new = Template::empty().with_resource("NewName", queue(30));
            let mappings = BTreeMap::from([("OldName".to_string(), "NewName".to_string())]);
            assert!(diff_templates(&old.with_renamed_resources(&mappings), &new, None).is_empty());
        }
    }

    mod security {
        use super::*;

        fn sg(rules: Value) -> Template {
            Template::empty().with_resource(
                "Sg",
                Resource::new("AWS::EC2::SecurityGroup", json!({ "SecurityGroupIngress": rules })),
            )
        }

        #[test]
        fn ingress_rule_added_grants() {
            let changes = security_changes(
                &sg(json!([])),
                &sg(json!([{ "CidrIp": "0.0.0.0/0", "FromPort": 22, "ToPort": 22 }])),
            );
            assert_eq!(changes.len(), 1);
            assert!(changes[0].added && changes[0].grants);
            assert_eq!(changes[0].kind, SecurityEntryKind::IngressRule);
        }

        #[test]
        fn managed_policy_attachment_counts() {
            let role = |arns: Value| {
                Template::empty().with_resource(
                    "Role",
                    Resource::new("AWS::IAM::Role", json!({ "ManagedPolicyArns": arns })),
                )
            };
            let changes = security_changes(
                &role(json!([])),
                &role(json!(["arn:aws:iam::aws:policy/AdministratorAccess"])),
            );
            assert_eq!(changes[0].kind, SecurityEntryKind::ManagedPolicy);
            assert_eq!(gate::classify(&changes), gate::PermissionChangeType::Broadening);
        }

        #[test]
        fn added_deny_only_narrows() {
            let policy = |effects: &[&str]| {
                Template::empty().with_resource(
                    "P",
                    Resource::new(
                        "AWS::IAM::Policy",
                        json!({ "PolicyDocument": { "Statement": effects.iter().map(|e| json!({
                            "Effect": e, "Action": "s3:*", "Resource": "*"
                        })).collect::<Vec<_>>() } }),
                    ),
                )
            };
            let changes = security_changes(&policy(&[]), &policy(&["Deny"]));
            assert!(!changes[0].grants);
            assert_eq!(gate::classify(&changes), gate::PermissionChangeType::Narrowing);
        }

        #[test]
        fn non_security_resources_ignored() {
            let old = Template::empty().with_resource("Q", queue(30));
            let new = Template::empty().with_resource("Q", queue(60));
            assert!(security_changes(&old, &new).is_empty());
        }
    }

    mod outcome {
        use super::*;

        #[test]
        fn exit_code_only_when_failing_and_different() {
            assert_eq!(DiffOutcome::new(1, true).exit_code, 1);
            assert_eq!(DiffOutcome::new(1, false).exit_code, 0);
            assert_eq!(DiffOutcome::new(0, true).exit_code, 0);
        }
    }
}
