//! core::params
//!
//! Resolution of parameter overrides for a single stack.
//!
//! Overrides are given as a flat map keyed by `"Stack:Param"` or
//! `"*:Param"`. A key without a colon is shorthand for the wildcard form.
//! The resolved map for a stack is every wildcard entry, overridden by the
//! entries addressed to that stack by name.
//!
//! Resolution is pure and total: unknown stacks simply get the wildcard
//! entries, and nothing here can fail.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use stackpilot::core::params::resolve_parameters;
//!
//! let mut overrides = BTreeMap::new();
//! overrides.insert("*:Stage".to_string(), "prod".to_string());
//! overrides.insert("App:Stage".to_string(), "canary".to_string());
//! overrides.insert("Db:Size".to_string(), "large".to_string());
//!
//! let app = resolve_parameters(&overrides, "App");
//! assert_eq!(app["Stage"], "canary");
//! assert!(!app.contains_key("Size"));
//! ```

use std::collections::BTreeMap;

/// Stack selector used for overrides that apply to every stack.
pub const WILDCARD: &str = "*";

/// Split an override key into `(stack, parameter)`.
///
/// Keys without a colon address every stack.
pub fn split_key(key: &str) -> (&str, &str) {
    match key.split_once(':') {
        Some((stack, param)) => (stack, param),
        None => (WILDCARD, key),
    }
}

/// Resolve the overrides that apply to `stack_name`.
pub fn resolve_parameters(
    overrides: &BTreeMap<String, String>,
    stack_name: &str,
) -> BTreeMap<String, String> {
    let mut wildcard = BTreeMap::new();
    let mut specific = BTreeMap::new();

    for (key, value) in overrides {
        let (stack, param) = split_key(key);
        if stack == WILDCARD {
            wildcard.insert(param.to_string(), value.clone());
        } else if stack == stack_name {
            specific.insert(param.to_string(), value.clone());
        }
    }

    wildcard.extend(specific);
    wildcard
}

/// Parse `KEY=VALUE` arguments into an override map.
///
/// Returns the offending argument when it has no `=`.
pub fn parse_assignments<I, S>(args: I) -> Result<BTreeMap<String, String>, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut map = BTreeMap::new();
    for arg in args {
        let arg = arg.as_ref();
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => return Err(arg.to_string()),
        }
    }
    Ok(map)
}
