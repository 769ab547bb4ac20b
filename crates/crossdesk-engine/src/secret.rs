//! Secret reference resolver.
//!
//! Values in `config.toml` can point at secrets kept outside the file:
//!
//! - `pass::path/in/store` runs `pass show path/in/store` and uses the first line
//! - `env::VAR_NAME` reads `$VAR_NAME`
//! - anything else is used as written

use crate::error::{EngineError, EngineResult};

/// Resolves a value that may be a secret reference.
pub fn resolve(value: &str) -> EngineResult<String> {
    if let Some(path) = value.strip_prefix("pass::") {
        resolve_pass(path)
    } else if let Some(var) = value.strip_prefix("env::") {
        resolve_env(var)
    } else {
        Ok(value.to_string())
    }
}

/// Resolves an optional value, keeping `None` as `None`.
pub fn resolve_opt(value: Option<&str>) -> EngineResult<Option<String>> {
    value.map(resolve).transpose()
}

fn resolve_pass(path: &str) -> EngineResult<String> {
    let output = std::process::Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| EngineError::config(format!("failed to run `pass show {}`: {}", path, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::config(format!(
            "`pass show {}` failed (exit {}): {}",
            path,
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|s| s.to_string())
        .ok_or_else(|| EngineError::config(format!("`pass show {}` produced no output", path)))
}

fn resolve_env(var: &str) -> EngineResult<String> {
    std::env::var(var)
        .map_err(|_| EngineError::config(format!("environment variable `{}` is not set", var)))
}
