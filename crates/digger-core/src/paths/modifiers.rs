//! Path modifier registry.
//!
//! Modifiers are suffixes on extraction paths (`|name(arg)`) that transform
//! the matched JSON fragment before it is recorded. The registry is
//! process-lifetime state: it is seeded with the built-ins, may be extended
//! during startup, and must not be modified once consumers are running.
//!
//! A modifier receives the raw fragment as JSON text (strings arrive quoted)
//! and must return JSON text. On malformed input the fragment is returned
//! unchanged; modifier failures are never fatal.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

use digger_stats::MISSING_VALUE;

use super::{navigate, value_to_string};

/// A path modifier: `fn(fragment, arg) -> transformed fragment`.
pub type Modifier = fn(&str, &str) -> String;

fn registry() -> &'static RwLock<HashMap<String, Modifier>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Modifier>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<String, Modifier> = HashMap::new();
        map.insert("base64d".to_string(), base64_decode);
        map.insert("trim".to_string(), trim_string);
        RwLock::new(map)
    })
}

/// Register a modifier under the argument name. Startup-time use only.
pub fn register_modifier(name: &str, modifier: Modifier) {
    let mut map = match registry().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.insert(name.to_string(), modifier);
}

/// Apply a `name` or `name(arg)` modifier expression to a JSON fragment.
/// Unknown modifier names leave the fragment unchanged.
pub(crate) fn apply(expr: &str, fragment: &str) -> String {
    let (name, arg) = match expr.find('(') {
        Some(open) if expr.ends_with(')') => (&expr[..open], &expr[open + 1..expr.len() - 1]),
        _ => (expr, ""),
    };

    let modifier = {
        let map = match registry().read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(name).copied()
    };

    match modifier {
        Some(modifier) => modifier(fragment, arg),
        None => {
            debug!(name, "unknown path modifier");
            fragment.to_string()
        }
    }
}

/// Base64-decode a JSON string fragment. With an argument, the decoded bytes
/// are parsed as JSON and the argument is evaluated as a path within them;
/// a missing path yields the missing-value sentinel.
fn base64_decode(json: &str, arg: &str) -> String {
    if json.len() < 3 {
        return json.to_string();
    }

    let str_value: String = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(err) => {
            debug!(%err, "error unmarshalling string");
            return json.to_string();
        }
    };

    let decoded = match BASE64_STANDARD.decode(str_value.as_bytes()) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(%err, "error base64 decoding string");
            return json.to_string();
        }
    };

    if arg.is_empty() {
        // Just return the entire result as a JSON string
        let text = String::from_utf8_lossy(&decoded);
        return match serde_json::to_string(text.trim()) {
            Ok(result) => result,
            Err(_) => json.to_string(),
        };
    }

    let root: Value = match serde_json::from_slice(&decoded) {
        Ok(root) => root,
        Err(_) => return format!("\"{MISSING_VALUE}\""),
    };

    match navigate(&root, arg) {
        None => format!("\"{MISSING_VALUE}\""),
        Some(value) => {
            serde_json::to_string(&value_to_string(value)).unwrap_or_else(|_| json.to_string())
        }
    }
}

/// Truncate a JSON string fragment to at most `arg` characters.
fn trim_string(json: &str, arg: &str) -> String {
    let max_len: usize = match arg.parse() {
        Ok(max_len) => max_len,
        Err(_) => {
            debug!(arg, "could not convert trim argument to int");
            return json.to_string();
        }
    };

    if json.len() <= max_len + 2 {
        return json.to_string();
    }

    let str_value: String = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(err) => {
            debug!(%err, "error unmarshalling string");
            return json.to_string();
        }
    };

    let mut end = max_len.min(str_value.len());
    while !str_value.is_char_boundary(end) {
        end -= 1;
    }

    format!("\"{}\"", &str_value[..end])
}
