/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````), if any.
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    // Skip the opening line (```json) and the closing fence if present
    lines.remove(0);
    if lines.last().is_some_and(|l| l.trim_start().starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// Pull the first JSON object or array out of free-form model output.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let cleaned = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Some(value);
    }

    for (start, _) in cleaned.match_indices(['{', '[']) {
        let mut stream =
            serde_json::Deserializer::from_str(&cleaned[start..]).into_iter::<serde_json::Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }
    None
}
