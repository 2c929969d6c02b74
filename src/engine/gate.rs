//! engine::gate
//!
//! Security approval gating for deploys.
//!
//! # Architecture
//!
//! Before a stack is scheduled, its desired template is compared with the
//! last-deployed one. The security-relevant part of that comparison is
//! classified as broadening, narrowing or neither, and the approval
//! policy decides whether the user must confirm.
//!
//! # Invariants
//!
//! - `Never` never asks
//! - `AnyChange` always asks
//! - `Broadening` asks only for permission-broadening changes
//! - The formatted diff is shown before the question is asked
//! - A refusal is a [`DeployError::Declined`], never a generic error
//!
//! # Example
//!
//! ```
//! use stackpilot::engine::gate::{requires_approval, ApprovalPolicy, PermissionChangeType};
//!
//! assert!(requires_approval(ApprovalPolicy::Broadening, PermissionChangeType::Broadening));
//! assert!(!requires_approval(ApprovalPolicy::Broadening, PermissionChangeType::Narrowing));
//! assert!(requires_approval(ApprovalPolicy::AnyChange, PermissionChangeType::None));
//! ```

use serde::{Deserialize, Serialize};

use super::diff::security_changes;
use super::DeployError;
use crate::core::template::Template;
use crate::provision::ChangeSet;
use crate::ui::output::OutputSink;

/// When to ask before deploying.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Never ask
    Never,
    /// Ask for any security-relevant change
    AnyChange,
    /// Ask only when permissions are broadened
    #[default]
    Broadening,
}

/// Direction of a security change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionChangeType {
    /// Nothing security-relevant got wider or narrower
    #[default]
    None,
    /// Access or trust is widened
    Broadening,
    /// Access or trust is only reduced
    Narrowing,
}

/// What a security entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityEntryKind {
    /// A policy statement
    Statement,
    /// A managed policy attached to a role
    ManagedPolicy,
    /// A network ingress rule
    IngressRule,
    /// A network egress rule
    EgressRule,
}

impl SecurityEntryKind {
    fn label(self) -> &'static str {
        match self {
            SecurityEntryKind::Statement => "statement",
            SecurityEntryKind::ManagedPolicy => "managed policy",
            SecurityEntryKind::IngressRule => "ingress rule",
            SecurityEntryKind::EgressRule => "egress rule",
        }
    }
}

/// One security-relevant entry that was added or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityChange {
    /// Logical id of the declaring resource
    pub resource: String,
    /// Entry kind
    pub kind: SecurityEntryKind,
    /// Canonical JSON of the entry
    pub body: String,
    /// Whether the entry grants (statements with `Effect: Allow`, rules, attachments)
    pub grants: bool,
    /// `true` if added, `false` if removed
    pub added: bool,
}

/// Result of comparing two templates for security changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityDiff {
    /// Classification
    pub permission_change_type: PermissionChangeType,
    /// Human-readable diff
    pub formatted_diff: String,
    /// Structured entries
    pub changes: Vec<SecurityChange>,
}

impl SecurityDiff {
    /// Whether there are no security-relevant changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Classify a list of security changes.
///
/// Adding a grant or removing a `Deny` statement widens access. Any other
/// change (a removed grant, an added `Deny`) only narrows it.
pub fn classify(changes: &[SecurityChange]) -> PermissionChangeType {
    if changes.iter().any(|c| c.added == c.grants) {
        PermissionChangeType::Broadening
    } else if changes.is_empty() {
        PermissionChangeType::None
    } else {
        PermissionChangeType::Narrowing
    }
}

/// Render security changes, one `+`/`-` line per entry.
pub fn format_changes(changes: &[SecurityChange], change_set: Option<&ChangeSet>) -> String {
    let mut out = String::new();
    for change in changes {
        let sign = if change.added { '+' } else { '-' };
        let replaced = change_set
            .map(|cs| cs.replaces(&change.resource))
            .unwrap_or(false);
        out.push_str(&format!(
            "{} [{}] {}: {}{}\n",
            sign,
            change.resource,
            change.kind.label(),
            change.body,
            if replaced { " (replace)" } else { "" }
        ));
    }
    out
}

/// Compare the deployed and desired templates for security changes.
pub fn compute_gate(old: &Template, new: &Template, change_set: Option<&ChangeSet>) -> SecurityDiff {
    let changes = security_changes(old, new);
    SecurityDiff {
        permission_change_type: classify(&changes),
        formatted_diff: format_changes(&changes, change_set),
        changes,
    }
}

/// Whether a change of `change_type` needs confirmation under `policy`.
pub fn requires_approval(policy: ApprovalPolicy, change_type: PermissionChangeType) -> bool {
    match policy {
        ApprovalPolicy::Never => false,
        ApprovalPolicy::AnyChange => true,
        ApprovalPolicy::Broadening => change_type == PermissionChangeType::Broadening,
    }
}

/// Ask for approval when `policy` requires it.
///
/// # Errors
///
/// - `DeployError::Declined` if the user refuses
/// - `DeployError::Validation` if approval is needed but no terminal is attached
pub fn approve(
    sink: &dyn OutputSink,
    stack: &str,
    policy: ApprovalPolicy,
    diff: &SecurityDiff,
) -> Result<(), DeployError> {
    if !requires_approval(policy, diff.permission_change_type) {
        return Ok(());
    }

    sink.info(&format!(
        "{}: this deployment will make potentially sensitive changes according to your current security approval level (--require-approval {}).",
        stack,
        policy_flag(policy)
    ));
    if !diff.is_empty() {
        sink.result(diff.formatted_diff.trim_end());
    }

    match sink.request_response("Do you wish to deploy these changes (y/n)?") {
        Ok(()) => Ok(()),
        Err(crate::ui::prompts::PromptError::NotInteractive) => Err(DeployError::Validation(format!(
            "{}: \"--require-approval\" is enabled and stack includes security-sensitive updates, \
             but terminal (TTY) is not attached so we are unable to get a confirmation from the user",
            stack
        ))),
        Err(e) => Err(DeployError::from_prompt(stack, e)),
    }
}

fn policy_flag(policy: ApprovalPolicy) -> &'static str {
    match policy {
        ApprovalPolicy::Never => "never",
        ApprovalPolicy::AnyChange => "any-change",
        ApprovalPolicy::Broadening => "broadening",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::Resource;
    use crate::ui::recording::{Level, RecordingSink};
    use serde_json::json;

    fn allow(action: &str) -> serde_json::Value {
        json!({ "Effect": "Allow", "Action": action, "Resource": "*" })
    }

    fn deny(action: &str) -> serde_json::Value {
        json!({ "Effect": "Deny", "Action": action, "Resource": "*" })
    }

    fn policy_with_statements(statements: &[serde_json::Value]) -> Template {
        Template::empty().with_resource(
            "Policy",
            Resource::new(
                "AWS::IAM::Policy",
                json!({ "PolicyDocument": { "Statement": statements } }),
            ),
        )
    }

    fn role_with_policy(actions: &[&str]) -> Template {
        let statements: Vec<_> = actions.iter().map(|a| allow(a)).collect();
        policy_with_statements(&statements)
    }

    mod requires_approval_tests {
        use super::*;

        #[test]
        fn never_policy() {
            for t in [
                PermissionChangeType::None,
                PermissionChangeType::Broadening,
                PermissionChangeType::Narrowing,
            ] {
                assert!(!requires_approval(ApprovalPolicy::Never, t));
            }
        }

        #[test]
        fn any_change_policy() {
            assert!(requires_approval(ApprovalPolicy::AnyChange, PermissionChangeType::None));
            assert!(requires_approval(
                ApprovalPolicy::AnyChange,
                PermissionChangeType::Narrowing
            ));
        }

        #[test]
        fn broadening_policy() {
            assert!(requires_approval(
                ApprovalPolicy::Broadening,
                PermissionChangeType::Broadening
            ));
            assert!(!requires_approval(
                ApprovalPolicy::Broadening,
                PermissionChangeType::Narrowing
            ));
            assert!(!requires_approval(ApprovalPolicy::Broadening, PermissionChangeType::None));
        }
    }

    mod compute_gate_tests {
        use super::*;

        #[test]
        fn added_allow_is_broadening() {
            let diff = compute_gate(
                &role_with_policy(&["s3:GetObject"]),
                &role_with_policy(&["s3:GetObject", "s3:PutObject"]),
                None,
            );
            assert_eq!(diff.permission_change_type, PermissionChangeType::Broadening);
            assert!(diff.formatted_diff.contains("+ [Policy] statement"));
            assert!(diff.formatted_diff.contains("s3:PutObject"));
        }

        #[test]
        fn removed_statement_is_narrowing() {
            let diff = compute_gate(
                &role_with_policy(&["s3:GetObject", "s3:PutObject"]),
                &role_with_policy(&["s3:GetObject"]),
                None,
            );
            assert_eq!(diff.permission_change_type, PermissionChangeType::Narrowing);
            assert!(diff.formatted_diff.starts_with("- [Policy]"));
        }

        #[test]
        fn removed_deny_is_broadening() {
            let diff = compute_gate(
                &policy_with_statements(&[allow("s3:GetObject"), deny("s3:DeleteObject")]),
                &policy_with_statements(&[allow("s3:GetObject")]),
                None,
            );
            assert_eq!(diff.permission_change_type, PermissionChangeType::Broadening);
            assert!(diff.formatted_diff.contains("- [Policy] statement"));
        }

        #[test]
        fn added_deny_is_narrowing() {
            let diff = compute_gate(
                &policy_with_statements(&[allow("s3:GetObject")]),
                &policy_with_statements(&[allow("s3:GetObject"), deny("s3:DeleteObject")]),
                None,
            );
            assert_eq!(diff.permission_change_type, PermissionChangeType::Narrowing);
        }

        #[test]
        fn identical_templates_are_none() {
            let t = role_with_policy(&["s3:GetObject"]);
            let diff = compute_gate(&t, &t, None);
            assert_eq!(diff.permission_change_type, PermissionChangeType::None);
            assert!(diff.is_empty());
        }

        #[test]
        fn new_stack_with_policy_is_broadening() {
            let diff = compute_gate(&Template::empty(), &role_with_policy(&["sqs:*"]), None);
            assert_eq!(diff.permission_change_type, PermissionChangeType::Broadening);
        }
    }

    mod approve_tests {
        use super::*;

        fn broadening() -> SecurityDiff {
            compute_gate(&Template::empty(), &role_with_policy(&["sqs:*"]), None)
        }

        #[test]
        fn shows_diff_before_asking() {
            let sink = RecordingSink::answering(true);
            approve(&sink, "App", ApprovalPolicy::Broadening, &broadening()).unwrap();

            let messages = sink.messages();
            let diff_at = messages
                .iter()
                .position(|m| m.level == Level::Result && m.text.contains("sqs:*"))
                .unwrap();
            let prompt_at = messages
                .iter()
                .position(|m| m.level == Level::Prompt)
                .unwrap();
            assert!(diff_at < prompt_at);
        }

        #[test]
        fn decline_is_distinguishable() {
            let sink = RecordingSink::answering(false);
            let err = approve(&sink, "App", ApprovalPolicy::Broadening, &broadening()).unwrap_err();
            assert!(err.is_user_cancelled());
        }

        #[test]
        fn any_change_asks_without_security_changes() {
            let sink = RecordingSink::answering(true);
            let unchanged = compute_gate(&Template::empty(), &Template::empty(), None);
            approve(&sink, "App", ApprovalPolicy::AnyChange, &unchanged).unwrap();
            assert_eq!(sink.prompts().len(), 1);
        }

        #[test]
        fn never_policy_does_not_ask() {
            let sink = RecordingSink::new();
            approve(&sink, "App", ApprovalPolicy::Never, &broadening()).unwrap();
            assert!(sink.prompts().is_empty());
        }

        #[test]
        fn non_interactive_is_validation_error() {
            let sink = RecordingSink::new();
            let err = approve(&sink, "App", ApprovalPolicy::Broadening, &broadening()).unwrap_err();
            assert_eq!(err.kind(), "ValidationError");
            assert!(err.to_string().contains("--require-approval"));
        }
    }
}
