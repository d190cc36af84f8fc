//! Pre-execution screening of submitted source
//!
//! A fixed denylist of expressions that catch the most common attempts to
//! reach host facilities (filesystem and network modules, the process object,
//! dynamic code construction). This is a coarse first filter only: the
//! interpreter's restricted binding set is what actually bounds JavaScript.

use regex::Regex;

use crate::errors::ExecutionError;

/// Built-in rules as `(name, expression)` pairs.
const BUILTIN_RULES: &[(&str, &str)] = &[
    (
        "host-module-require",
        r#"require\s*\(\s*['"`](fs|child_process|os|path|http|https|net)['"`]\s*\)"#,
    ),
    ("process-access", r"process\."),
    ("global-access", r"global\."),
    ("dirname-access", r"__dirname"),
    ("filename-access", r"__filename"),
    ("eval-call", r"eval\s*\("),
    ("function-constructor", r"Function\s*\("),
];

/// One compiled denylist entry.
#[derive(Debug, Clone)]
pub struct DenyRule {
    pub name: String,
    pattern: Regex,
}

impl DenyRule {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, ExecutionError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|e| {
            ExecutionError::ConfigError(format!("Invalid security rule '{}': {}", name, e))
        })?;
        Ok(Self { name, pattern })
    }

    pub fn matches(&self, code: &str) -> bool {
        self.pattern.is_match(code)
    }
}

/// Outcome of screening one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenVerdict {
    Pass,
    Reject { rule: String },
}

#[derive(Debug, Clone)]
pub struct SecurityScreener {
    rules: Vec<DenyRule>,
}

impl SecurityScreener {
    /// Screener with the built-in rules only.
    pub fn new() -> Result<Self, ExecutionError> {
        Self::with_extra_patterns(&[])
    }

    /// Built-in rules followed by deployment-specific expressions.
    pub fn with_extra_patterns(patterns: &[String]) -> Result<Self, ExecutionError> {
        let mut rules = Vec::with_capacity(BUILTIN_RULES.len() + patterns.len());
        for (name, pattern) in BUILTIN_RULES {
            rules.push(DenyRule::new(*name, pattern)?);
        }
        for (index, pattern) in patterns.iter().enumerate() {
            rules.push(DenyRule::new(format!("custom-{}", index + 1), pattern)?);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[DenyRule] {
        &self.rules
    }

    pub fn scan(&self, code: &str) -> ScreenVerdict {
        match self.rules.iter().find(|rule| rule.matches(code)) {
            Some(rule) => ScreenVerdict::Reject {
                rule: rule.name.clone(),
            },
            None => ScreenVerdict::Pass,
        }
    }

    /// [`scan`](Self::scan) as a `Result`, for use with `?`.
    pub fn check(&self, code: &str) -> Result<(), ExecutionError> {
        match self.scan(code) {
            ScreenVerdict::Pass => Ok(()),
            ScreenVerdict::Reject { rule } => {
                log::warn!("Submission rejected by security rule '{}'", rule);
                Err(ExecutionError::SecurityRejection { rule })
            }
        }
    }
}
