//! YAML configuration document parsing
//!
//! ```yaml
//! match:
//!   - executableName: program.exe
//!     executablePathRegex: ".*\\company\\.*"
//!     profiler:
//!       targetdir: c:\traces
//!       enabled: true
//! ```
//!
//! Option names are case-insensitive and stored lower-case. Scalar values of
//! any YAML type are kept as their textual form; nested values are rejected.

use crate::result::{RecorderError, RecorderResult};
use regex::{Regex, RegexBuilder};
use serde_yaml_ng::Value;
use std::collections::BTreeMap;

/// Key of the top-level section list
const MATCH_KEY: &str = "match";
/// Case-insensitive file name filter
const EXECUTABLE_NAME_KEY: &str = "executableName";
/// Case-insensitive full-path regex filter
const EXECUTABLE_PATH_REGEX_KEY: &str = "executablePathRegex";
/// Older spelling of the path regex filter
const LEGACY_PROCESS_KEY: &str = "process";
/// Option map of a section
const PROFILER_KEY: &str = "profiler";

/// One `match` entry: filters plus the options it applies
#[derive(Debug, Clone)]
pub struct ProcessSection {
    /// Executable file name, compared case-insensitively
    pub executable_name: Option<String>,
    /// Anchored, case-insensitive regex over the full process path
    pub path_regex: Option<Regex>,
    /// Option name (lower-case) → value
    pub options: BTreeMap<String, String>,
}

impl ProcessSection {
    /// Whether both filters (where present) accept `process_path`
    #[must_use]
    pub fn matches(&self, process_path: &str) -> bool {
        if let Some(regex) = &self.path_regex {
            if !regex.is_match(process_path) {
                return false;
            }
        }
        match &self.executable_name {
            Some(name) => name.to_lowercase() == executable_name(process_path).to_lowercase(),
            None => true,
        }
    }

    /// Option value by case-insensitive name
    #[must_use]
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Parsed configuration document, sections in file order
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// Process sections
    pub sections: Vec<ProcessSection>,
}

impl ConfigFile {
    /// Parse a YAML document
    pub fn parse(text: &str) -> RecorderResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let root: Value = serde_yaml_ng::from_str(text).map_err(|e| {
            let message = match e.location() {
                Some(location) => format!(
                    "Parsing the YAML config file failed at line {}, column {}: {e}",
                    location.line(),
                    location.column()
                ),
                None => format!("Parsing the YAML config file failed: {e}"),
            };
            RecorderError::config_parse(message)
        })?;

        let root = match root {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(RecorderError::config_parse(format!(
                    "expected a mapping at the document root, found {}",
                    type_name(&other)
                )))
            }
        };

        let Some(Value::Sequence(entries)) = root.get(MATCH_KEY) else {
            return Ok(Self::default());
        };

        let sections = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_section(index, entry))
            .collect::<RecorderResult<Vec<_>>>()?;
        Ok(Self { sections })
    }

    /// Sections accepting `process_path`, in file order
    pub fn matching<'a>(&'a self, process_path: &'a str) -> impl Iterator<Item = &'a ProcessSection> {
        self.sections
            .iter()
            .filter(move |section| section.matches(process_path))
    }
}

fn parse_section(index: usize, entry: &Value) -> RecorderResult<ProcessSection> {
    let Value::Mapping(mapping) = entry else {
        return Err(RecorderError::config_parse(format!(
            "match entry {index} must be a mapping, found {}",
            type_name(entry)
        )));
    };

    let executable_name = mapping
        .get(EXECUTABLE_NAME_KEY)
        .map(|value| scalar(value, EXECUTABLE_NAME_KEY))
        .transpose()?
        .filter(|name| !name.is_empty());

    let pattern = mapping
        .get(EXECUTABLE_PATH_REGEX_KEY)
        .or_else(|| mapping.get(LEGACY_PROCESS_KEY))
        .map(|value| scalar(value, EXECUTABLE_PATH_REGEX_KEY))
        .transpose()?;
    let path_regex = pattern.as_deref().map(compile_path_regex).transpose()?;

    let mut options = BTreeMap::new();
    match mapping.get(PROFILER_KEY) {
        None | Some(Value::Null) => {}
        Some(Value::Mapping(profiler)) => {
            for (key, value) in profiler {
                let name = scalar(key, PROFILER_KEY)?.to_lowercase();
                let value = scalar(value, &name)?;
                options.insert(name, value);
            }
        }
        Some(other) => {
            return Err(RecorderError::config_parse(format!(
                "'{PROFILER_KEY}' in match entry {index} must be a mapping, found {}",
                type_name(other)
            )))
        }
    }

    Ok(ProcessSection {
        executable_name,
        path_regex,
        options,
    })
}

/// Compile with full-match, case-insensitive semantics
fn compile_path_regex(pattern: &str) -> RecorderResult<Regex> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            RecorderError::config_parse(format!("invalid {EXECUTABLE_PATH_REGEX_KEY} '{pattern}': {e}"))
        })
}

fn scalar(value: &Value, context: &str) -> RecorderResult<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        other => Err(RecorderError::config_parse(format!(
            "expected a scalar value for '{context}', found {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Final path segment, accepting both `/` and `\` separators
#[must_use]
pub fn executable_name(process_path: &str) -> &str {
    process_path
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(process_path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document() {
        assert!(ConfigFile::parse("").unwrap().sections.is_empty());
        assert!(ConfigFile::parse("# only a comment\n").unwrap().sections.is_empty());
    }

    #[test]
    fn test_document_without_match() {
        let file = ConfigFile::parse("other: 1\n").unwrap();
        assert!(file.sections.is_empty());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = ConfigFile::parse("match: [\n  - {").unwrap_err();
        assert!(matches!(err, RecorderError::ConfigParse { .. }));
    }

    #[test]
    fn test_scalar_root_is_rejected() {
        assert!(ConfigFile::parse("just a string").is_err());
    }

    #[test]
    fn test_nested_option_value_is_rejected() {
        let err = ConfigFile::parse(
            r#"
match:
  - executablePathRegex: "foo.*"
    profiler:
      - bla
      - blu
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mapping"));

        let err = ConfigFile::parse(
            r#"
match:
  - profiler:
      targetdir: [a, b]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("targetdir"));
    }

    #[test]
    fn test_valid_section() {
        let file = ConfigFile::parse(
            r#"
match:
  - executablePathRegex: "foo.*"
    profiler:
      enabled: "0"
"#,
        )
        .unwrap();
        assert_eq!(file.sections.len(), 1);
        let section = &file.sections[0];
        assert!(section.matches("foobar"));
        assert!(section.matches("FOOBAR"));
        assert!(!section.matches("xfoobar"));
        assert_eq!(section.option("enabled"), Some("0"));
    }

    #[test]
    fn test_option_names_are_case_insensitive() {
        let file = ConfigFile::parse(
            r#"
match:
  - profiler:
      ENablED: "1"
"#,
        )
        .unwrap();
        assert_eq!(file.sections[0].option("enabled"), Some("1"));
        assert_eq!(file.sections[0].option("ENABLED"), Some("1"));
    }

    #[test]
    fn test_scalar_type_conversion() {
        let file = ConfigFile::parse(
            r#"
match:
  - profiler:
      enabled: true
      enabled2: 1
      ratio: 0.5
      empty:
"#,
        )
        .unwrap();
        let section = &file.sections[0];
        assert_eq!(section.option("enabled"), Some("true"));
        assert_eq!(section.option("enabled2"), Some("1"));
        assert_eq!(section.option("ratio"), Some("0.5"));
        assert_eq!(section.option("empty"), Some(""));
    }

    #[test]
    fn test_executable_name_filter() {
        let file = ConfigFile::parse(
            r#"
match:
  - executableName: Program.EXE
    profiler:
      targetdir: x
"#,
        )
        .unwrap();
        let section = &file.sections[0];
        assert!(section.matches(r"c:\company\program.exe"));
        assert!(section.matches("/opt/company/PROGRAM.exe"));
        assert!(!section.matches(r"c:\company\program.exe.config"));
    }

    #[test]
    fn test_both_filters_must_match() {
        let file = ConfigFile::parse(
            r#"
match:
  - executableName: program.exe
    executablePathRegex: ".*\\\\company\\\\.*"
"#,
        )
        .unwrap();
        let section = &file.sections[0];
        assert!(section.matches(r"c:\company\program.exe"));
        assert!(!section.matches(r"c:\other\program.exe"));
        assert!(!section.matches(r"c:\company\tool.exe"));
    }

    #[test]
    fn test_legacy_process_key() {
        let file = ConfigFile::parse("match:\n  - process: \".*prog1.exe\"\n").unwrap();
        assert!(file.sections[0].matches(r"c:\bin\prog1.exe"));
        assert!(!file.sections[0].matches(r"c:\bin\prog2.exe"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = ConfigFile::parse("match:\n  - executablePathRegex: \"(unclosed\"\n").unwrap_err();
        assert!(err.to_string().contains("executablePathRegex"));
    }

    #[test]
    fn test_matching_preserves_file_order() {
        let file = ConfigFile::parse(
            r#"
match:
  - profiler: { targetdir: first }
  - executableName: other.exe
    profiler: { targetdir: skipped }
  - profiler: { targetdir: last }
"#,
        )
        .unwrap();
        let dirs: Vec<_> = file
            .matching("/bin/program.exe")
            .filter_map(|s| s.option("targetdir"))
            .collect();
        assert_eq!(dirs, vec!["first", "last"]);
    }

    #[test]
    fn test_executable_name_helper() {
        assert_eq!(executable_name(r"c:\company\program.exe"), "program.exe");
        assert_eq!(executable_name("/usr/bin/dotnet"), "dotnet");
        assert_eq!(executable_name("plain"), "plain");
    }
}
