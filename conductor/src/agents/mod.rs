//! Model-backed collaborators, one module per role.
//!
//! Every agent is a thin wrapper over the model client: render a prompt,
//! run the governed tool loop where tools are needed, and parse the reply
//! leniently. Agents never touch the task queue; orchestration owns that.

use serde_json::Value;

pub mod analyst;
pub mod coder;
pub mod planner;
pub mod prompts;
pub mod reflector;
pub mod reviewer;
pub mod supervisor;

/// Extract the outermost JSON object from free-form model text.
pub(crate) fn extract_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Extract the outermost JSON array from free-form model text.
pub(crate) fn extract_array(text: &str) -> Option<Value> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Format completed tasks for prompt injection.
pub(crate) fn completed_tasks_block(
    completed: &std::collections::BTreeMap<String, crate::core::task::Task>,
) -> String {
    if completed.is_empty() {
        return "none yet".to_string();
    }
    completed
        .values()
        .map(|t| {
            let desc: String = t.description.chars().take(80).collect();
            format!("- [{}] {}: {}", t.id, t.title, desc)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_object_ignores_surrounding_prose() {
        let value = extract_object("sure: {\"a\": 1} there you go").expect("object");
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extract_array_handles_nested_brackets() {
        let value = extract_array("here [1, [2, 3]] done").expect("array");
        assert_eq!(value[1][0], 2);
    }

    #[test]
    fn extract_object_rejects_garbage() {
        assert!(extract_object("no braces").is_none());
        assert!(extract_object("} {").is_none());
    }
}
