//! Property-based tests for parameter resolution and deploy ordering.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;

use common::*;
use stackpilot::core::params::{resolve_parameters, split_key, WILDCARD};
use stackpilot::engine::{ApprovalPolicy, DeployOptions, Deployer};
use stackpilot::provision::mock::{MockOperation, MockProvisioner};
use stackpilot::ui::recording::RecordingSink;

/// Strategy for stack names used as override prefixes.
fn stack_name() -> impl Strategy<Value = String> {
    prop_oneof![Just("A".to_string()), Just("B".to_string()), Just(WILDCARD.to_string())]
}

/// Strategy for `stack:param -> value` override maps.
fn overrides() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        (stack_name(), "[a-z]{1,3}").prop_map(|(stack, param)| format!("{}:{}", stack, param)),
        "[a-z0-9]{0,4}",
        0..12,
    )
}

/// Strategy for a dependency DAG: stack `i` may depend on any `j < i`.
fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..7).prop_flat_map(|n| {
        (0..n)
            .map(|i| prop::collection::vec(0..i.max(1), 0..=i.min(3)).prop_map(move |deps| {
                let mut deps: Vec<usize> = deps.into_iter().filter(|&d| d < i).collect();
                deps.sort_unstable();
                deps.dedup();
                deps
            }))
            .collect::<Vec<_>>()
    })
}

proptest! {
    /// A stack-specific override always beats the wildcard for the same key.
    #[test]
    fn specific_beats_wildcard(map in overrides()) {
        let resolved = resolve_parameters(&map, "A");
        for (key, value) in &map {
            let (stack, param) = split_key(key);
            if stack == "A" {
                prop_assert_eq!(&resolved[param], value);
            } else if stack == WILDCARD && !map.contains_key(&format!("A:{}", param)) {
                prop_assert_eq!(&resolved[param], value);
            }
        }
    }

    /// Overrides for other stacks never leak into the result.
    #[test]
    fn other_stacks_never_leak(map in overrides()) {
        let resolved = resolve_parameters(&map, "A");
        for param in resolved.keys() {
            let addressed = map.contains_key(&format!("A:{}", param))
                || map.contains_key(&format!("{}:{}", WILDCARD, param));
            prop_assert!(addressed);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every stack starts only after all its dependencies finished.
    #[test]
    fn deploys_respect_dependencies(deps in dag(), concurrency in 1usize..4) {
        let stacks: Vec<_> = deps
            .iter()
            .enumerate()
            .map(|(i, ds)| {
                ds.iter().fold(queue_stack(&format!("S{}", i)), |s, d| {
                    s.depends_on(id(&format!("S{}", d)))
                })
            })
            .collect();
        let refs: Vec<_> = stacks.iter().collect();

        let mock = MockProvisioner::new();
        let sink = RecordingSink::new();
        let options = DeployOptions {
            approval: ApprovalPolicy::Never,
            concurrency,
            ..DeployOptions::default()
        };

        let rt = tokio::runtime::Runtime::new().unwrap();
        let report = rt
            .block_on(Deployer::new(&mock, &mock, &sink).deploy(&refs, &options))
            .unwrap();
        prop_assert_eq!(report.deployed.len(), stacks.len());
        prop_assert!(mock.max_concurrent_deploys() <= concurrency);

        for (i, ds) in deps.iter().enumerate() {
            let started = mock.position(&MockOperation::DeployStarted {
                stack_name: format!("S{}", i),
                rollback: true,
            });
            for d in ds {
                let finished = mock.position(&MockOperation::DeployFinished {
                    stack_name: format!("S{}", d),
                });
                prop_assert!(finished < started);
            }
        }
    }
}
