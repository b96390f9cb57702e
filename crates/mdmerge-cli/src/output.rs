//! Shared output layer for pretty/text/JSON parity across `mdm` commands.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / hidden `--json` flag
//! 2. `MDMERGE_FORMAT` env var: `pretty` | `text` | `json`
//! 3. Default: [`OutputMode::Pretty`] if stdout is a TTY, [`OutputMode::Text`] if piped.

use clap::ValueEnum;
use mdmerge_core::MergeError;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

pub const FORMAT_ENV: &str = "MDMERGE_FORMAT";

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 64;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<16} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Sections and aligned key/value lines.
    Pretty,
    /// `key=value` lines for scripts and pipes.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }
    if json_flag {
        return OutputMode::Json;
    }
    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }
    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from CLI flags, environment and TTY defaults.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var(FORMAT_ENV).ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// A structured error with optional hint and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: None,
            error_code: None,
        }
    }
}

impl From<&MergeError> for CliError {
    fn from(err: &MergeError) -> Self {
        Self {
            message: err.to_string(),
            hint: err.hint().map(ToString::to_string),
            error_code: Some(err.code().code().to_string()),
        }
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(hint) = &error.hint {
                writeln!(out, "  hint: {hint}")?;
            }
        }
    }
    Ok(())
}

/// Report a merge failure on stderr and turn it into the command's error.
pub fn merge_failure(mode: OutputMode, err: MergeError) -> anyhow::Error {
    // the rendered error is best effort; the returned one carries the exit status
    let _ = render_error(mode, &CliError::from(&err));
    anyhow::Error::new(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_flag_wins_over_json_and_env() {
        let mode = resolve_output_mode_inner(Some(OutputMode::Text), true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn json_flag_wins_over_env() {
        let mode = resolve_output_mode_inner(None, true, Some("text"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn env_is_case_insensitive_and_unknown_values_fall_through() {
        assert_eq!(
            resolve_output_mode_inner(None, false, Some("JSON"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode_inner(None, false, Some("yaml"), false),
            OutputMode::Text
        );
    }

    #[test]
    fn tty_decides_the_default() {
        assert_eq!(resolve_output_mode_inner(None, false, None, true), OutputMode::Pretty);
        assert_eq!(resolve_output_mode_inner(None, false, None, false), OutputMode::Text);
    }

    #[test]
    fn merge_errors_carry_code_and_hint() {
        let err = MergeError::TooFewDimensions { n_dims: 1 };
        let cli = CliError::from(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E1002"));
        assert!(cli.message.contains('1'));
        assert_eq!(cli.hint.as_deref(), err.hint());

        let plain = CliError::new("boom");
        let json = serde_json::to_value(&plain).expect("serialize");
        assert_eq!(json, serde_json::json!({ "message": "boom" }));
    }
}
