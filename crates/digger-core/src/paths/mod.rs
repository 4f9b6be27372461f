//! Path-group evaluation over decoded JSON records.
//!
//! A paths expression is a sequence of groups (separated by `;`), each group
//! an ordered list of dotted paths (separated by `,`). With a single group,
//! every matching value is emitted; with multiple groups, exactly one
//! composite key per record is formed by joining one representative per
//! group with the dimension separator.

pub mod modifiers;

use serde_json::Value;
use tracing::debug;

use digger_stats::{ALL_VALUE, DIM_SEPARATOR, MISSING_VALUE};

/// Split a paths expression into groups: `;` separates groups, `,` separates
/// paths within a group. An empty expression maps to a single group holding
/// the empty path.
pub fn parse_path_groups(paths_str: &str) -> Vec<Vec<String>> {
    if paths_str.is_empty() {
        return vec![vec![String::new()]];
    }

    paths_str
        .split(';')
        .map(|group| group.split(',').map(str::to_string).collect())
        .collect()
}

/// Return the values associated with the argument path groups in the JSON
/// blob. A zero-length result means no values matched.
pub fn path_values(contents: &[u8], path_groups: &[Vec<String>]) -> Vec<String> {
    let root: Value = serde_json::from_slice(contents).unwrap_or(Value::Null);

    let mut value_groups: Vec<Vec<String>> = Vec::with_capacity(path_groups.len());

    for path_group in path_groups {
        let mut value_group = Vec::new();

        for path in path_group {
            if path.is_empty() {
                value_group.push(ALL_VALUE.to_string());
                continue;
            }

            match eval_path(&root, path) {
                Some(Value::Array(items)) => {
                    for item in &items {
                        value_group.push(value_to_string(item));
                    }
                }
                Some(value) => value_group.push(value_to_string(&value)),
                None => {}
            }
        }

        value_groups.push(value_group);
    }

    if value_groups.is_empty() {
        return Vec::new();
    }
    if value_groups.len() == 1 {
        return value_groups.remove(0);
    }

    let mut values = Vec::with_capacity(value_groups.len());

    for value_group in &value_groups {
        match value_group.as_slice() {
            [] => values.push(MISSING_VALUE.to_string()),
            [value] => values.push(value.clone()),
            [value, ..] => {
                debug!("found more than one value for multi-dimensional path query; dropping extra values");
                values.push(value.clone());
            }
        }
    }

    vec![values.join(DIM_SEPARATOR)]
}

/// Evaluate one path, applying any `|name(arg)` modifier suffixes to the
/// matched JSON fragment.
fn eval_path(root: &Value, path: &str) -> Option<Value> {
    let mut parts = path.split('|');
    let base = parts.next().unwrap_or_default();

    let mut current = navigate(root, base)?.clone();

    for modifier_expr in parts {
        let fragment = serde_json::to_string(&current).ok()?;
        let output = modifiers::apply(modifier_expr.trim(), &fragment);
        current = serde_json::from_str(&output).unwrap_or(Value::String(output));
    }

    Some(current)
}

/// Walk a dotted path: object fields by name, array elements by numeric
/// segment.
pub(crate) fn navigate<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;

    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Render a leaf value the way it should appear in a bucket key: strings
/// unquoted, scalars via their JSON form, containers as JSON text.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
