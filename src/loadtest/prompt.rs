//! Prompt records replayed against the endpoint.

use serde::{Deserialize, Deserializer, Serialize};

/// One dataset record: the question sent on the wire and the expectations
/// the quality metrics score the reply against.
///
/// Serialized with the dataset's own key names (`Question`, `Intent`,
/// `RefCount`) so reports echo the input exactly as it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Intent", default)]
    pub expected_intent: String,
    #[serde(rename = "RefCount", default, deserialize_with = "ref_count")]
    pub expected_ref_count: u32,
}

impl Prompt {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            expected_intent: String::new(),
            expected_ref_count: 0,
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.expected_intent = intent.into();
        self
    }

    pub fn with_ref_count(mut self, count: u32) -> Self {
        self.expected_ref_count = count;
        self
    }
}

/// `RefCount` appears both as a JSON number and as a numeric string.
fn ref_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("RefCount '{s}' is not a count"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_record() {
        let prompt: Prompt =
            serde_json::from_str(r#"{"Question": "Hi?", "Intent": "greeting", "RefCount": 2}"#)
                .unwrap();
        assert_eq!(prompt.question, "Hi?");
        assert_eq!(prompt.expected_intent, "greeting");
        assert_eq!(prompt.expected_ref_count, 2);
    }

    #[test]
    fn test_parse_string_ref_count() {
        let prompt: Prompt =
            serde_json::from_str(r#"{"Question": "Hi?", "RefCount": " 3 "}"#).unwrap();
        assert_eq!(prompt.expected_ref_count, 3);
        assert_eq!(prompt.expected_intent, "");
    }

    #[test]
    fn test_parse_missing_question_fails() {
        let result: Result<Prompt, _> = serde_json::from_str(r#"{"Intent": "greeting"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_bad_ref_count_fails() {
        let result: Result<Prompt, _> =
            serde_json::from_str(r#"{"Question": "Hi?", "RefCount": "many"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_uses_dataset_keys() {
        let prompt = Prompt::new("Where?").with_intent("faq").with_ref_count(1);
        let value = serde_json::to_value(&prompt).unwrap();
        assert_eq!(value["Question"], "Where?");
        assert_eq!(value["Intent"], "faq");
        assert_eq!(value["RefCount"], 1);
    }
}
