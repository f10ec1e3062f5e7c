use crate::engine::types::NodeInputs;

/// Interpolate `${trigger.folder_id}`, `${trigger.file_id}` and
/// `${deps.<node>.<key>[.<nested>...]}` patterns in a string.
///
/// Unknown references render as the empty string.
pub fn interpolate(template: &str, inputs: &NodeInputs) -> String {
    let mut result = template.to_string();
    let mut start = 0;

    loop {
        let open = match result[start..].find("${") {
            Some(pos) => start + pos,
            None => break,
        };

        let close = match result[open..].find('}') {
            Some(pos) => open + pos,
            None => break,
        };

        let path = &result[open + 2..close];
        let value = resolve_path(path, inputs);

        result.replace_range(open..=close, &value);
        start = open + value.len();
    }

    result
}

fn resolve_path(path: &str, inputs: &NodeInputs) -> String {
    let parts: Vec<&str> = path.split('.').collect();

    match parts.as_slice() {
        ["trigger", "folder_id"] => inputs.trigger.folder_id.clone(),
        ["trigger", "file_id"] => inputs.trigger.file_id.clone().unwrap_or_default(),
        ["deps", node, key, rest @ ..] => {
            let Some(first) = inputs.dependency(node).and_then(|r| r.get(key)) else {
                return String::new();
            };
            let mut current = first;
            for part in rest {
                current = match current.get(part) {
                    Some(v) => v,
                    None => return String::new(),
                };
            }
            match current {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            }
        }
        _ => String::new(),
    }
}
