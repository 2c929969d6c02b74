//! engine::destroy
//!
//! Delete deployed stacks, dependents first.

use tracing::debug;

use super::DeployError;
use crate::core::stack::Stack;
use crate::provision::{Provisioner, StackRef};
use crate::ui::output::OutputSink;

/// Destroy `stacks` (given in dependency order) in reverse order.
///
/// Without `force` the whole set is confirmed once up front. Returns the
/// display names of the destroyed stacks.
///
/// # Errors
///
/// - `DeployError::Declined` if the user refuses
/// - `DeployError::StackFailed` for the first stack that could not be
///   deleted; stacks after it are left alone
pub async fn destroy_stacks(
    provisioner: &dyn Provisioner,
    sink: &dyn OutputSink,
    stacks: &[&Stack],
    force: bool,
) -> Result<Vec<String>, DeployError> {
    if stacks.is_empty() {
        return Ok(Vec::new());
    }

    if !force {
        let names: Vec<&str> = stacks.iter().map(|s| s.display_name.as_str()).collect();
        sink.request_response(&format!(
            "Are you sure you want to delete: {} (y/n)?",
            names.join(", ")
        ))
        .map_err(|e| DeployError::from_prompt(names[0], e))?;
    }

    let mut destroyed = Vec::with_capacity(stacks.len());
    for stack in stacks.iter().rev() {
        let name = &stack.display_name;
        sink.info(&format!("{}: destroying...", name));
        debug!(stack = %stack.id, "destroy");

        match provisioner.destroy_stack(&StackRef::for_stack(stack)).await {
            Ok(()) => {
                sink.info(&format!("{}: destroyed", name));
                destroyed.push(name.clone());
            }
            Err(e) => {
                sink.error(&format!("{}: destroy failed {}", name, e));
                return Err(DeployError::from(e).for_stack(name));
            }
        }
    }
    Ok(destroyed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::template::{Resource, Template};
    use crate::core::types::{Environment, StackId};
    use crate::provision::mock::{FailOn, MockOperation, MockProvisioner};
    use crate::provision::ProvisionError;
    use crate::ui::recording::RecordingSink;
    use serde_json::json;

    fn stack(id: &str) -> Stack {
        Stack::new(
            StackId::new(id).unwrap(),
            Environment::new("111111111111", "us-east-1").unwrap(),
            Template::empty().with_resource("Q", Resource::new("AWS::SQS::Queue", json!({}))),
        )
    }

    #[tokio::test]
    async fn destroys_in_reverse_order() {
        let (a, b) = (stack("A"), stack("B").depends_on(StackId::new("A").unwrap()));
        let mock = MockProvisioner::new()
            .with_stack("A", a.template.clone())
            .with_stack("B", b.template.clone());
        let sink = RecordingSink::answering(true);

        let destroyed = destroy_stacks(&mock, &sink, &[&a, &b], false).await.unwrap();

        assert_eq!(destroyed, vec!["B".to_string(), "A".to_string()]);
        assert_eq!(sink.prompts(), vec!["Are you sure you want to delete: A, B (y/n)?".to_string()]);
        let b_pos = mock.position(&MockOperation::Destroy { stack_name: "B".into() });
        let a_pos = mock.position(&MockOperation::Destroy { stack_name: "A".into() });
        assert!(b_pos < a_pos);
        assert!(mock.stack("A").is_none());
    }

    #[tokio::test]
    async fn declining_destroys_nothing() {
        let a = stack("A");
        let mock = MockProvisioner::new().with_stack("A", a.template.clone());
        let sink = RecordingSink::answering(false);

        let err = destroy_stacks(&mock, &sink, &[&a], false).await.unwrap_err();
        assert!(err.is_user_cancelled());
        assert!(mock.stack("A").is_some());
    }

    #[tokio::test]
    async fn failure_is_wrapped_and_stops() {
        let (a, b) = (stack("A"), stack("B"));
        let mock = MockProvisioner::new()
            .fail_on(FailOn::Destroy("B".into(), ProvisionError::RateLimited));
        let sink = RecordingSink::new();

        let err = destroy_stacks(&mock, &sink, &[&a, &b], true).await.unwrap_err();
        assert!(err.to_string().starts_with("B failed:"));
        assert!(sink.contains("B: destroy failed"));
        assert!(mock.position(&MockOperation::Destroy { stack_name: "A".into() }).is_none());
    }
}
