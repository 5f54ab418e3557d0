//! Dotted-path access into nested JSON records.
//!
//! `a.b.c` walks objects by key. When an intermediate node is an array,
//! its first element is used, which is how multi-entity links
//! (`sg_footage_formats.sg_resolution`) are addressed.

use serde_json::Value;

/// Look up a dotted path. Returns `None` when any segment is missing.
pub fn get_nested<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;

    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => match items.first() {
                Some(Value::Object(first)) => first.get(key)?,
                _ => return None,
            },
            _ => return None,
        };
    }

    Some(current)
}

/// Set a dotted path, creating intermediate objects where the path does
/// not exist or does not point at an object.
pub fn set_nested(data: &mut Value, path: &str, value: Value) {
    let keys: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = keys.split_last() else {
        return;
    };

    if !data.is_object() {
        *data = Value::Object(Default::default());
    }

    let mut current = data;
    for key in parents {
        let Value::Object(map) = current else {
            return;
        };
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if !entry.is_object() {
            *entry = Value::Object(Default::default());
        }
        current = entry;
    }

    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

/// Render a resolved value the way it is substituted into templates:
/// strings verbatim, `null` as empty, everything else as JSON text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn nested_object_lookup() {
        let data = json!({"sg_sequence": {"name": "SQ010"}});
        assert_eq!(get_nested(&data, "sg_sequence.name"), Some(&json!("SQ010")));
    }

    #[test]
    fn list_nodes_resolve_via_first_element() {
        let data = json!({"formats": [{"res": "1920x1080"}, {"res": "4096x2160"}]});
        assert_eq!(get_nested(&data, "formats.res"), Some(&json!("1920x1080")));
    }

    #[test]
    fn missing_path_is_none() {
        let data = json!({"code": "sh010"});
        assert!(get_nested(&data, "code.name").is_none());
        assert!(get_nested(&data, "description").is_none());
        assert!(get_nested(&json!({"items": []}), "items.name").is_none());
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut data = json!({"code": "v001"});
        set_nested(&mut data, "sg_task.name", json!("comp"));
        assert_eq!(data["sg_task"]["name"], "comp");
        assert_eq!(data["code"], "v001");
    }

    #[test]
    fn set_replaces_non_object_parent() {
        let mut data = json!({"sg_task": "comp"});
        set_nested(&mut data, "sg_task.name", json!("light"));
        assert_eq!(data["sg_task"], json!({"name": "light"}));
    }

    #[test]
    fn display_matches_template_substitution() {
        assert_eq!(display_value(&json!("abc")), "abc");
        assert_eq!(display_value(&json!(24)), "24");
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!(true)), "True");
    }
}
