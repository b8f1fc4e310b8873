//! Environment option sources
//!
//! Options are looked up by their upper-case name (`TARGETDIR`, `PROCESS`).
//! An empty value counts as unset.

use std::collections::HashMap;

/// Prefix of the process environment variables carrying options
pub const ENV_PREFIX: &str = "COR_PROFILER_";

/// Reads option overrides from the environment
pub trait EnvironmentReader {
    /// Value for the upper-case option `name`, `None` if unset or empty
    fn read(&self, name: &str) -> Option<String>;
}

impl<F> EnvironmentReader for F
where
    F: Fn(&str) -> Option<String>,
{
    fn read(&self, name: &str) -> Option<String> {
        self(name).filter(|value| !value.is_empty())
    }
}

impl EnvironmentReader for HashMap<String, String> {
    fn read(&self, name: &str) -> Option<String> {
        self.get(name).filter(|value| !value.is_empty()).cloned()
    }
}

/// The real process environment, `NAME` → `COR_PROFILER_NAME`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl ProcessEnvironment {
    /// Environment variable that carries option `name`
    #[must_use]
    pub fn variable_name(name: &str) -> String {
        format!("{ENV_PREFIX}{}", name.to_ascii_uppercase())
    }

    /// All variables visible to this process, sorted by name
    #[must_use]
    pub fn snapshot() -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = std::env::vars_os()
            .map(|(key, value)| {
                (
                    key.to_string_lossy().into_owned(),
                    value.to_string_lossy().into_owned(),
                )
            })
            .collect();
        vars.sort();
        vars
    }
}

impl EnvironmentReader for ProcessEnvironment {
    fn read(&self, name: &str) -> Option<String> {
        std::env::var(Self::variable_name(name))
            .ok()
            .filter(|value| !value.is_empty())
    }
}

/// Reader that never returns a value
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnvironment;

impl EnvironmentReader for NoEnvironment {
    fn read(&self, _name: &str) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name() {
        assert_eq!(ProcessEnvironment::variable_name("targetdir"), "COR_PROFILER_TARGETDIR");
    }

    #[test]
    fn test_closure_reader_treats_empty_as_unset() {
        let reader = |name: &str| match name {
            "TARGETDIR" => Some("env".to_string()),
            "PROCESS" => Some(String::new()),
            _ => None,
        };
        assert_eq!(reader.read("TARGETDIR").as_deref(), Some("env"));
        assert_eq!(reader.read("PROCESS"), None);
        assert_eq!(reader.read("ENABLED"), None);
    }

    #[test]
    fn test_map_reader() {
        let mut map = HashMap::new();
        map.insert("EAGERNESS".to_string(), "5".to_string());
        assert_eq!(map.read("EAGERNESS").as_deref(), Some("5"));
        assert_eq!(NoEnvironment.read("EAGERNESS"), None);
    }
}
