//! Per-language toolchains for the compile-and-run executor.
//!
//! A toolchain knows how to turn a learner snippet into a complete
//! translation unit, which processes build and run it, and how to check that
//! those processes exist on this host.

use regex::Regex;

use super::process::ProcessSpec;
use super::workspace::ScratchWorkspace;
use crate::config::{CppToolchainSettings, JavaToolchainSettings};
use crate::core_types::Language;
use crate::errors::ExecutionError;

/// Source ready to be written into a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub source_name: String,
    pub artifact_name: String,
    pub contents: String,
    /// Entry point handed to the runtime (the Java class name, the binary otherwise).
    pub entry: String,
}

pub trait Toolchain: Send + Sync {
    fn language(&self) -> Language;

    /// Human-readable name used in diagnostics ("Java", "C++").
    fn label(&self) -> &str {
        self.language().display_name()
    }

    /// Prefix of scratch directory names.
    fn workspace_prefix(&self) -> &str;

    /// Normalize a snippet into a complete program.
    fn prepare(&self, code: &str) -> PreparedSource;

    /// Source submitted to a remote compile-and-run service.
    fn prepare_remote(&self, code: &str) -> String {
        self.prepare(code).contents
    }

    fn compile_spec(&self, workspace: &ScratchWorkspace, source: &PreparedSource) -> ProcessSpec;

    fn run_spec(&self, workspace: &ScratchWorkspace, source: &PreparedSource) -> ProcessSpec;

    /// Version checks that must all succeed for the toolchain to be usable.
    fn probes(&self) -> Vec<ProcessSpec>;
}

const JAVA_CLASS_PATTERN: &str = r"public\s+class\s+(\w+)";

pub struct JavaToolchain {
    settings: JavaToolchainSettings,
    class_pattern: Regex,
}

impl JavaToolchain {
    pub fn new(settings: JavaToolchainSettings) -> Result<Self, ExecutionError> {
        let class_pattern = Regex::new(JAVA_CLASS_PATTERN).map_err(|e| {
            ExecutionError::Internal(format!("Invalid Java class pattern: {}", e))
        })?;
        Ok(Self {
            settings,
            class_pattern,
        })
    }

    fn class_name(&self, code: &str) -> String {
        self.class_pattern
            .captures(code)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "Main".to_string())
    }
}

impl Toolchain for JavaToolchain {
    fn language(&self) -> Language {
        Language::Java
    }

    fn workspace_prefix(&self) -> &str {
        "java-"
    }

    fn prepare(&self, code: &str) -> PreparedSource {
        let contents = if code.contains("public class") {
            code.to_string()
        } else {
            format!(
                "public class Main {{\n    public static void main(String[] args) {{\n{}\n    }}\n}}\n",
                code
            )
        };
        let class_name = self.class_name(&contents);

        PreparedSource {
            source_name: format!("{}.java", class_name),
            artifact_name: format!("{}.class", class_name),
            contents,
            entry: class_name,
        }
    }

    /// Statement-only snippets run inside `main`. Preprocessor and `using`
    /// lines stay at file scope.
    fn prepare_remote(&self, code: &str) -> String {
        if code.contains("int main") {
            return self.prepare(code).contents;
        }

        let (directives, statements): (Vec<&str>, Vec<&str>) = code.lines().partition(|line| {
            let line = line.trim_start();
            line.starts_with('#') || line.starts_with("using ")
        });

        let mut contents = String::with_capacity(code.len() + CPP_PRELUDE.len() + 64);
        if !code.contains("#include") {
            contents.push_str(CPP_PRELUDE);
        }
        for directive in directives {
            contents.push_str(directive);
            contents.push('\n');
        }
        contents.push_str("int main() {\n");
        for statement in statements {
            contents.push_str("    ");
            contents.push_str(statement);
            contents.push('\n');
        }
        contents.push_str("    return 0;\n}\n");
        contents
    }

    fn compile_spec(&self, workspace: &ScratchWorkspace, _source: &PreparedSource) -> ProcessSpec {
        ProcessSpec::new(&self.settings.compiler).arg(workspace.source_path())
    }

    fn run_spec(&self, workspace: &ScratchWorkspace, source: &PreparedSource) -> ProcessSpec {
        ProcessSpec::new(&self.settings.runtime)
            .arg("-cp")
            .arg(workspace.root())
            .arg(&source.entry)
    }

    fn probes(&self) -> Vec<ProcessSpec> {
        vec![
            ProcessSpec::new(&self.settings.compiler).arg("-version"),
            ProcessSpec::new(&self.settings.runtime).arg("-version"),
        ]
    }
}

const CPP_PRELUDE: &str =
    "#include <iostream>\n#include <vector>\n#include <string>\nusing namespace std;\n\n";

pub struct CppToolchain {
    settings: CppToolchainSettings,
}

impl CppToolchain {
    pub fn new(settings: CppToolchainSettings) -> Self {
        Self { settings }
    }
}

impl Default for CppToolchain {
    fn default() -> Self {
        Self::new(CppToolchainSettings::default())
    }
}

impl Toolchain for CppToolchain {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn workspace_prefix(&self) -> &str {
        "cpp-"
    }

    fn prepare(&self, code: &str) -> PreparedSource {
        let mut contents = String::with_capacity(code.len() + CPP_PRELUDE.len());
        if !code.contains("#include") {
            contents.push_str(CPP_PRELUDE);
        }
        contents.push_str(code);
        if !code.contains("int main") {
            contents.push_str("\n\nint main() {\n    return 0;\n}\n");
        }

        PreparedSource {
            source_name: "program.cpp".to_string(),
            artifact_name: "program".to_string(),
            contents,
            entry: "program".to_string(),
        }
    }

    fn compile_spec(&self, workspace: &ScratchWorkspace, _source: &PreparedSource) -> ProcessSpec {
        ProcessSpec::new(&self.settings.compiler)
            .args(&self.settings.flags)
            .arg("-o")
            .arg(workspace.artifact_path())
            .arg(workspace.source_path())
    }

    fn run_spec(&self, workspace: &ScratchWorkspace, _source: &PreparedSource) -> ProcessSpec {
        ProcessSpec::new(workspace.artifact_path().to_string_lossy())
    }

    fn probes(&self) -> Vec<ProcessSpec> {
        vec![ProcessSpec::new(&self.settings.compiler).arg("--version")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn java() -> JavaToolchain {
        JavaToolchain::new(JavaToolchainSettings::default()).unwrap()
    }

    #[test]
    fn test_java_class_pattern_compiles() {
        assert!(Regex::new(JAVA_CLASS_PATTERN).is_ok());
        assert_eq!(java().class_name("public  class   Kata {}"), "Kata");
    }

    #[test]
    fn test_java_wraps_bare_statements() {
        let prepared = java().prepare("System.out.println(42);");
        assert!(prepared.contents.starts_with("public class Main {"));
        assert!(prepared.contents.contains("System.out.println(42);"));
        assert_eq!(prepared.source_name, "Main.java");
        assert_eq!(prepared.artifact_name, "Main.class");
        assert_eq!(prepared.entry, "Main");
    }

    #[test]
    fn test_java_keeps_declared_class() {
        let code = "public class Solution {\n  public static void main(String[] a) {}\n}";
        let prepared = java().prepare(code);
        assert_eq!(prepared.contents, code);
        assert_eq!(prepared.entry, "Solution");
        assert_eq!(prepared.source_name, "Solution.java");
    }

    #[test]
    fn test_cpp_adds_headers_and_entry_point() {
        let prepared = CppToolchain::default().prepare("int square(int x) { return x * x; }");
        assert!(prepared.contents.starts_with("#include <iostream>"));
        assert!(prepared.contents.contains("using namespace std;"));
        assert!(prepared.contents.contains("int main()"));
        assert_eq!(prepared.source_name, "program.cpp");
    }

    #[test]
    fn test_cpp_leaves_complete_programs_alone() {
        let code = "#include <cstdio>\nint main() { puts(\"hi\"); }";
        let prepared = CppToolchain::default().prepare(code);
        assert_eq!(prepared.contents, code);
    }

    #[test]
    fn test_cpp_remote_source_wraps_statements_in_main() {
        let contents = CppToolchain::default().prepare_remote("cout << 1;");
        assert_eq!(
            contents,
            format!(
                "{}int main() {{\n    cout << 1;\n    return 0;\n}}\n",
                CPP_PRELUDE
            )
        );

        let contents = CppToolchain::default()
            .prepare_remote("#include <cmath>\nusing namespace std;\nprintf(\"%d\", (int) sqrt(16));");
        assert_eq!(
            contents,
            "#include <cmath>\nusing namespace std;\nint main() {\n    printf(\"%d\", (int) sqrt(16));\n    return 0;\n}\n"
        );

        let complete = "#include <cstdio>\nint main() { puts(\"hi\"); }";
        assert_eq!(CppToolchain::default().prepare_remote(complete), complete);
    }

    #[test]
    fn test_java_remote_source_matches_local() {
        let code = "System.out.println(42);";
        assert_eq!(java().prepare_remote(code), java().prepare(code).contents);
    }

    #[test]
    fn test_cpp_compile_spec_uses_flags() {
        let toolchain = CppToolchain::new(CppToolchainSettings {
            flags: vec!["-O2".to_string()],
            ..Default::default()
        });
        let workspace =
            ScratchWorkspace::create("cpp-", None, "program.cpp", "program").unwrap();
        let source = toolchain.prepare("int main(){}");
        let spec = toolchain.compile_spec(&workspace, &source);
        assert_eq!(spec.program(), "g++");
        assert_eq!(spec.get_args()[0], "-O2");
        assert_eq!(spec.get_args()[1], "-o");
    }
}
