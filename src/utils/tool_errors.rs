use crate::errors::ToolError;
use crate::utils::suggest::suggest;

pub fn unknown_action_error(tool: &str, action: &str, known_actions: &[&str]) -> ToolError {
    let known: Vec<String> = known_actions.iter().map(|s| s.to_string()).collect();
    let suggestions = suggest(action, &known, 3);

    let mut hint = format!("Use one of: {}.", known.join(", "));
    if !suggestions.is_empty() {
        hint = format!("Did you mean: {}? {}", suggestions.join(", "), hint);
    }

    ToolError::invalid_params(format!("Unknown {} action: {}", tool, action))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "known_actions": known,
            "did_you_mean": suggestions,
        }))
}
