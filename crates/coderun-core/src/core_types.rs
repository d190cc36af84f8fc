//! Request and result types shared by every stage of the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::errors::{ErrorKind, ExecutionError};

/// Output reported when a run succeeds without printing anything.
pub const NO_OUTPUT_SENTINEL: &str = "Code executed successfully (no output)";

/// Language identifiers accepted on the wire, in the order they are advertised.
pub const SUPPORTED_LANGUAGES: &str = "javascript, python, java, cpp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
    Java,
    Cpp,
}

/// How a language is executed by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFamily {
    /// Evaluated by an embedded, restricted engine.
    Interpreted,
    /// Compiled to an artifact that is then run as a separate process.
    Compiled,
    /// Handed to a separate, specialized runtime service.
    Delegated,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::JavaScript,
        Language::Python,
        Language::Java,
        Language::Cpp,
    ];

    /// Wire identifier.
    pub fn id(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::JavaScript => "JavaScript",
            Language::Python => "Python",
            Language::Java => "Java",
            Language::Cpp => "C++",
        }
    }

    pub fn family(&self) -> LanguageFamily {
        match self {
            Language::JavaScript => LanguageFamily::Interpreted,
            Language::Java | Language::Cpp => LanguageFamily::Compiled,
            Language::Python => LanguageFamily::Delegated,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Language {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|language| language.id() == s)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(s.to_string()))
    }
}

/// Inbound body exactly as received. Both fields are kept untyped so that
/// shape errors become validation failures instead of deserialization ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionPayload {
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub language: Value,
}

impl ExecutionPayload {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: Value::String(code.into()),
            language: Value::String(language.into()),
        }
    }
}

/// A validated submission. Constructed once per inbound call and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    code: String,
    language: Language,
}

impl ExecutionRequest {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn language(&self) -> Language {
        self.language
    }
}

impl TryFrom<ExecutionPayload> for ExecutionRequest {
    type Error = ExecutionError;

    fn try_from(payload: ExecutionPayload) -> Result<Self, Self::Error> {
        let code = match payload.code {
            Value::String(code) if !code.is_empty() => code,
            _ => return Err(ExecutionError::InvalidCode),
        };
        let language = match payload.language {
            Value::String(language) => language.parse()?,
            Value::Null => return Err(ExecutionError::UnsupportedLanguage("undefined".to_string())),
            other => return Err(ExecutionError::UnsupportedLanguage(other.to_string())),
        };
        Ok(Self { code, language })
    }
}

/// Uniform outcome of an execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Classification of `error`, if any. Only used to pick a status code.
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    /// Successful run. Empty output is replaced by the no-output sentinel.
    pub fn success(output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            output: Some(if output.is_empty() {
                NO_OUTPUT_SENTINEL.to_string()
            } else {
                output
            }),
            ..Default::default()
        }
    }

    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_kind: Some(kind),
            ..Default::default()
        }
    }

    /// Attach diagnostics written by a run that still completed. The run keeps
    /// its classification, so a successful run stays successful.
    pub fn with_stderr(mut self, stderr: &str) -> Self {
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            self.error = Some(stderr.to_string());
        }
        self
    }

    /// Keep whatever a failed run managed to print before it stopped.
    pub fn with_partial_output(mut self, output: &str) -> Self {
        if !output.is_empty() {
            self.output = Some(output.to_string());
        }
        self
    }

    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = Some(millis);
        self
    }

    /// True unless the run failed. Diagnostics from a completed run do not count.
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}

impl From<ExecutionError> for ExecutionResult {
    fn from(err: ExecutionError) -> Self {
        ExecutionResult::failure(err.kind(), err.client_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_language_parsing() {
        assert_eq!("cpp".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("javascript".parse::<Language>().unwrap(), Language::JavaScript);
        assert!("JavaScript".parse::<Language>().is_err());
        assert!("ruby".parse::<Language>().is_err());
    }

    #[test]
    fn test_payload_validation() {
        let payload: ExecutionPayload =
            serde_json::from_value(json!({"code": "", "language": "javascript"})).unwrap();
        let err = ExecutionRequest::try_from(payload).unwrap_err();
        assert_eq!(err.to_string(), "Invalid code provided");

        let payload: ExecutionPayload =
            serde_json::from_value(json!({"code": 42, "language": "javascript"})).unwrap();
        assert!(matches!(
            ExecutionRequest::try_from(payload),
            Err(ExecutionError::InvalidCode)
        ));

        let payload: ExecutionPayload = serde_json::from_value(json!({"code": "x"})).unwrap();
        assert!(matches!(
            ExecutionRequest::try_from(payload),
            Err(ExecutionError::UnsupportedLanguage(_))
        ));

        let request = ExecutionRequest::try_from(ExecutionPayload::new("1", "java")).unwrap();
        assert_eq!(request.language(), Language::Java);
        assert_eq!(request.code(), "1");
    }

    #[test]
    fn test_result_serialization_shape() {
        let result = ExecutionResult::success("2").with_execution_time(7);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"output": "2", "executionTimeMs": 7}));

        let result = ExecutionResult::failure(ErrorKind::Compile, "boom");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"error": "boom"}));
    }

    #[test]
    fn test_empty_output_uses_sentinel() {
        let result = ExecutionResult::success("");
        assert_eq!(result.output.as_deref(), Some(NO_OUTPUT_SENTINEL));
        assert!(result.is_success());
    }

    #[test]
    fn test_stderr_does_not_fail_completed_run() {
        let result = ExecutionResult::success("done").with_stderr("warning: unused\n");
        assert_eq!(result.error.as_deref(), Some("warning: unused"));
        assert_eq!(result.error_kind, None);
        assert!(result.is_success());

        let result = ExecutionResult::failure(ErrorKind::Runtime, "Segmentation fault")
            .with_partial_output("half");
        assert!(!result.is_success());
    }
}
