use serde::de::DeserializeOwned;

/// Decodes a JSON object out of model output, tolerating markdown fences and
/// prose around the object.
pub fn extract_json<T: DeserializeOwned>(response: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str::<T>(response) {
        return Some(value);
    }

    let trimmed = response.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    if let Ok(value) = serde_json::from_str::<T>(cleaned) {
        return Some(value);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<T>(&cleaned[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Label {
        intent: String,
    }

    #[test]
    fn test_plain_json() {
        let parsed: Option<Label> = extract_json(r#"{"intent":"question"}"#);
        assert_eq!(parsed.unwrap().intent, "question");
    }

    #[test]
    fn test_markdown_fenced_json() {
        let parsed: Option<Label> = extract_json("```json\n{\"intent\":\"objection\"}\n```");
        assert_eq!(parsed.unwrap().intent, "objection");
    }

    #[test]
    fn test_json_inside_prose() {
        let parsed: Option<Label> =
            extract_json("Sure! Here is the result: {\"intent\":\"thanks\"} Hope that helps.");
        assert_eq!(parsed.unwrap().intent, "thanks");
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(extract_json::<Label>("I don't understand the format you want").is_none());
        assert!(extract_json::<Label>("} backwards {").is_none());
    }
}
