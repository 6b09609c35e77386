// src/versioning/diff.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path, e.g. `propertyTaxRates.CA`.
    pub path: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub change: ChangeKind,
}

/// Recursive key-set diff. Objects are walked key by key; arrays and scalars
/// are compared as whole values.
pub fn diff_values(old: &Value, new: &Value) -> Vec<FieldChange> {
    let mut out = Vec::new();
    walk("", old, new, &mut out);
    out
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn walk(path: &str, old: &Value, new: &Value, out: &mut Vec<FieldChange>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for k in keys {
                let p = join(path, k);
                match (a.get(k), b.get(k)) {
                    (Some(x), Some(y)) => walk(&p, x, y, out),
                    (Some(x), None) => out.push(FieldChange {
                        path: p,
                        old_value: Some(x.clone()),
                        new_value: None,
                        change: ChangeKind::Removed,
                    }),
                    (None, Some(y)) => out.push(FieldChange {
                        path: p,
                        old_value: None,
                        new_value: Some(y.clone()),
                        change: ChangeKind::Added,
                    }),
                    (None, None) => {}
                }
            }
        }
        (x, y) if x != y => out.push(FieldChange {
            path: path.to_string(),
            old_value: Some(x.clone()),
            new_value: Some(y.clone()),
            change: ChangeKind::Modified,
        }),
        _ => {}
    }
}
