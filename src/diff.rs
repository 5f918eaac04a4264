use serde::Serialize;
use serde_json::Value;

/// One leaf that differs between two status documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Change {
    pub path: String,
    pub old: Value,
    pub new: Value,
}

/// Leaf-level differences between two documents, addressed the way the
/// vendor addresses them in commands: `MasterInfo.LiveTemp_oC`,
/// `RemoteZoneInfo[1].LiveTemp_oC`, `UserAirconSettings.EnabledZones[3]`.
/// Removed leaves are reported with `new: null`.
pub(crate) fn changed_paths(previous: &Value, current: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    walk(previous, current, String::new(), &mut changes);
    changes
}

fn walk(previous: &Value, current: &Value, path: String, changes: &mut Vec<Change>) {
    match (previous, current) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, new_value) in new {
                let child = join_key(&path, key);
                walk(old.get(key).unwrap_or(&Value::Null), new_value, child, changes);
            }
            for (key, old_value) in old {
                if !new.contains_key(key) {
                    walk(old_value, &Value::Null, join_key(&path, key), changes);
                }
            }
        }
        (Value::Array(old), Value::Array(new)) => {
            for index in 0..old.len().max(new.len()) {
                walk(
                    old.get(index).unwrap_or(&Value::Null),
                    new.get(index).unwrap_or(&Value::Null),
                    format!("{path}[{index}]"),
                    changes,
                );
            }
        }
        (Value::Null, Value::Object(_) | Value::Array(_)) => {
            walk(&empty_like(current), current, path, changes);
        }
        (Value::Object(_) | Value::Array(_), Value::Null) => {
            walk(previous, &empty_like(previous), path, changes);
        }
        (old, new) if old != new => changes.push(Change {
            path,
            old: old.clone(),
            new: new.clone(),
        }),
        _ => {}
    }
}

/// Containers are expanded against an empty counterpart so that only
/// leaves are ever reported.
fn empty_like(value: &Value) -> Value {
    match value {
        Value::Array(_) => Value::Array(Vec::new()),
        _ => Value::Object(serde_json::Map::new()),
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
