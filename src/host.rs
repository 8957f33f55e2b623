//! Binding to the GitHub Actions runner. Inputs arrive as `INPUT_*`
//! environment variables, outputs leave through the `GITHUB_OUTPUT` file,
//! failures are reported as `::error::` workflow commands.

use std::io::Write;

use crate::errors::{Result, SyncError};

fn input_env_key(name: &str) -> String {
    format!("INPUT_{}", name.to_uppercase().replace('-', "_"))
}

/// Read an action input. Trimmed; an unset or empty input is `None`.
pub fn get_input(name: &str) -> Option<String> {
    std::env::var(input_env_key(name))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn get_required_input(name: &str) -> Result<String> {
    get_input(name).ok_or_else(|| SyncError::MissingInput(name.to_string()))
}

/// Comma separated input as a list of trimmed, non-empty items.
pub fn get_list_input(name: &str) -> Vec<String> {
    get_input(name)
        .map(|v| util::csv_list(&v))
        .unwrap_or_default()
}

/// Boolean input; only the literal string `true` counts.
pub fn get_bool_input(name: &str) -> bool {
    get_input(name).as_deref() == Some("true")
}

/// Publish an output for later workflow steps. Appends to the file named
/// by `GITHUB_OUTPUT`, falling back to the legacy workflow command when
/// the variable is absent (e.g. local runs).
pub fn set_output(name: &str, value: &str) {
    match std::env::var("GITHUB_OUTPUT") {
        Ok(path) if !path.is_empty() => {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("output file error");
            writeln!(file, "{name}={value}").expect("output file error");
        }
        _ => println!("::set-output name={name}::{value}"),
    }
}

/// Report a failure to the runner. The caller is responsible for the
/// non-zero exit.
pub fn set_failed(message: &str) {
    println!("::error::{message}");
}
