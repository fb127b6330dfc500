//! Supported source languages and their toolchains
//!
//! Each [`Language`] knows how to name its source file, how to prepare a
//! snippet for compilation (default includes, a `Main` wrapper for Java), and
//! which commands compile and run it. The sandbox interface does not change
//! across languages.

use crate::classify::builtin_regex;
use crate::error::SandboxError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

static JAVA_PUBLIC_CLASS: Lazy<Regex> =
    Lazy::new(|| builtin_regex(r"public\s+(?:final\s+|abstract\s+)*class\s+([A-Za-z_][A-Za-z0-9_]*)"));

const C_PRELUDE: &str = "#include <stdio.h>\n#include <stdlib.h>\n#include <string.h>\n#include <math.h>\n#include <limits.h>\n\n";

const CPP_PRELUDE: &str = "#include <iostream>\n#include <vector>\n#include <string>\n#include <algorithm>\n#include <cmath>\n#include <climits>\nusing namespace std;\n\n";

/// Source language tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python 3 (primary language of the repair pipeline)
    Python,
    /// JavaScript on node
    JavaScript,
    /// C via gcc
    C,
    /// C++17 via g++
    Cpp,
    /// Java via javac/java
    Java,
    /// Rust via rustc
    Rust,
    /// Go via the go toolchain
    Go,
}

/// Commands needed to build and run one prepared source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Optional compile step, run before `run`
    pub compile: Option<Vec<String>>,
    /// Run step
    pub run: Vec<String>,
    /// Whether an address-space rlimit can be applied to the run step.
    ///
    /// Runtimes that reserve large virtual ranges up front (JVM, V8, Go)
    /// refuse to start under `ulimit -v`; they get their own heap flags
    /// instead.
    pub address_limit: bool,
}

impl Language {
    /// All supported languages
    pub const ALL: [Self; 7] = [
        Self::Python,
        Self::JavaScript,
        Self::C,
        Self::Cpp,
        Self::Java,
        Self::Rust,
        Self::Go,
    ];

    /// Canonical tag
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
            Self::Rust => "rust",
            Self::Go => "go",
        }
    }

    /// Source file extension (without dot)
    #[inline]
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::JavaScript => "js",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Java => "java",
            Self::Rust => "rs",
            Self::Go => "go",
        }
    }

    /// Whether a compile step precedes execution
    #[inline]
    #[must_use]
    pub const fn is_compiled(&self) -> bool {
        matches!(self, Self::C | Self::Cpp | Self::Java | Self::Rust | Self::Go)
    }

    /// Prepare submitted code for the toolchain.
    ///
    /// C and C++ get a default include prelude when the snippet has no
    /// `#include` of its own. Java snippets without a `main` method inside a
    /// class are wrapped in `public class Main`.
    #[must_use]
    pub fn prepare_source(&self, code: &str) -> String {
        match self {
            Self::C if !code.contains("#include") => format!("{C_PRELUDE}{code}\n"),
            Self::Cpp if !code.contains("#include") => format!("{CPP_PRELUDE}{code}\n"),
            Self::Java if !(code.contains("class ") && code.contains("public static void main")) => {
                let body: Vec<String> = code
                    .lines()
                    .map(|line| {
                        if line.trim().is_empty() {
                            String::new()
                        } else {
                            format!("        {line}")
                        }
                    })
                    .collect();
                format!(
                    "public class Main {{\n    public static void main(String[] args) {{\n{}\n    }}\n}}\n",
                    body.join("\n")
                )
            }
            _ => code.to_string(),
        }
    }

    /// Java class name that must match the file name (`Main` by default)
    #[must_use]
    pub fn java_class_name(source: &str) -> String {
        JAVA_PUBLIC_CLASS
            .captures(source)
            .and_then(|c| c.get(1))
            .map_or_else(|| "Main".to_string(), |m| m.as_str().to_string())
    }

    /// File name for the prepared source
    #[must_use]
    pub fn source_file_name(&self, prepared: &str) -> String {
        match self {
            Self::Java => format!("{}.java", Self::java_class_name(prepared)),
            other => format!("main.{}", other.extension()),
        }
    }

    /// Build the compile/run commands for a prepared source file
    #[must_use]
    pub fn toolchain(&self, source_file: &str, memory_mb: u64) -> Toolchain {
        let owned = |args: &[&str]| args.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        match self {
            Self::Python => Toolchain {
                compile: None,
                run: owned(&["python3", "-I", "-B", source_file]),
                address_limit: true,
            },
            Self::JavaScript => Toolchain {
                compile: None,
                run: vec![
                    "node".to_string(),
                    format!("--max-old-space-size={memory_mb}"),
                    source_file.to_string(),
                ],
                address_limit: false,
            },
            Self::C => Toolchain {
                compile: Some(owned(&["gcc", "-O0", "-o", "main", source_file, "-lm"])),
                run: owned(&["./main"]),
                address_limit: true,
            },
            Self::Cpp => Toolchain {
                compile: Some(owned(&["g++", "-std=c++17", "-O0", "-o", "main", source_file])),
                run: owned(&["./main"]),
                address_limit: true,
            },
            Self::Java => {
                let class = source_file.trim_end_matches(".java");
                Toolchain {
                    compile: Some(owned(&["javac", source_file])),
                    run: vec![
                        "java".to_string(),
                        format!("-Xmx{memory_mb}m"),
                        "-cp".to_string(),
                        ".".to_string(),
                        class.to_string(),
                    ],
                    address_limit: false,
                }
            }
            Self::Rust => Toolchain {
                compile: Some(owned(&["rustc", "--edition", "2021", "-o", "main", source_file])),
                run: owned(&["./main"]),
                address_limit: true,
            },
            Self::Go => Toolchain {
                compile: Some(owned(&["go", "build", "-o", "main", source_file])),
                run: owned(&["./main"]),
                address_limit: false,
            },
        }
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Self::Python),
            "javascript" | "js" | "node" => Ok(Self::JavaScript),
            "c" => Ok(Self::C),
            "cpp" | "c++" | "cxx" => Ok(Self::Cpp),
            "java" => Ok(Self::Java),
            "rust" | "rs" => Ok(Self::Rust),
            "go" | "golang" => Ok(Self::Go),
            _ => Err(SandboxError::UnsupportedLanguage(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("C++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("golang".parse::<Language>().unwrap(), Language::Go);
        assert_eq!(" JS ".parse::<Language>().unwrap(), Language::JavaScript);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for lang in Language::ALL {
            assert_eq!(lang.to_string().parse::<Language>().unwrap(), lang);
        }
    }

    #[test]
    fn test_java_snippet_wrapped_in_main() {
        let prepared = Language::Java.prepare_source("System.out.println(1);");
        assert!(prepared.starts_with("public class Main {"));
        assert!(prepared.contains("        System.out.println(1);"));
        assert_eq!(Language::Java.source_file_name(&prepared), "Main.java");
    }

    #[test]
    fn test_java_class_name_follows_public_class() {
        let code = "public class Greeter {\n    public static void main(String[] a) {}\n}\n";
        assert_eq!(Language::Java.prepare_source(code), code);
        assert_eq!(Language::Java.source_file_name(code), "Greeter.java");
        let chain = Language::Java.toolchain("Greeter.java", 256);
        assert_eq!(chain.run.last().map(String::as_str), Some("Greeter"));
    }

    #[test]
    fn test_c_prelude_only_when_missing() {
        let bare = Language::C.prepare_source("int main(void) { return 0; }");
        assert!(bare.starts_with("#include <stdio.h>"));

        let own = "#include <stdio.h>\nint main(void) { return 0; }";
        assert_eq!(Language::C.prepare_source(own), own);
    }

    #[test]
    fn test_interpreted_languages_have_no_compile_step() {
        assert!(Language::Python.toolchain("main.py", 512).compile.is_none());
        assert!(Language::JavaScript.toolchain("main.js", 512).compile.is_none());
        assert!(Language::Rust.toolchain("main.rs", 512).compile.is_some());
        assert!(!Language::Go.toolchain("main.go", 512).address_limit);
    }

    #[test]
    fn test_serde_uses_lowercase_tags() {
        let json = serde_json::to_string(&Language::JavaScript).unwrap();
        assert_eq!(json, "\"javascript\"");
    }
}
