use serde::Deserialize;

/// One JSON object from a line of the backend's streamed `/api/generate` body.
///
/// Only the three fields the relay acts on are modelled. Anything else Ollama
/// sends (`model`, `created_at`, timing counters, `context`) is ignored, and a
/// missing field is simply absent.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRecord {
    /// Incremental text produced since the previous record.
    #[serde(default)]
    pub response: Option<String>,
    /// Set on the final record of a generation.
    #[serde(default)]
    pub done: bool,
    /// Error reported by the backend in place of further output.
    #[serde(default)]
    pub error: Option<String>,
}

impl StreamRecord {
    /// Returns the text fragment, skipping empty strings.
    pub fn fragment(&self) -> Option<&str> {
        self.response.as_deref().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_are_ignored() {
        let line = r#"{"model":"llama3.2","created_at":"2024-05-01T10:00:00Z","response":"Hi","done":false}"#;
        let record: StreamRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.fragment(), Some("Hi"));
        assert!(!record.done);
        assert_eq!(record.error, None);
    }

    #[test]
    fn test_missing_fields_are_absent() {
        let record: StreamRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record, StreamRecord::default());
    }

    #[test]
    fn test_final_record_with_empty_response() {
        let line = r#"{"response":"","done":true,"total_duration":123}"#;
        let record: StreamRecord = serde_json::from_str(line).unwrap();
        assert!(record.done);
        assert_eq!(record.fragment(), None);
    }

    #[test]
    fn test_error_record() {
        let record: StreamRecord =
            serde_json::from_str(r#"{"error":"model 'x' not found"}"#).unwrap();
        assert_eq!(record.error.as_deref(), Some("model 'x' not found"));
    }
}
