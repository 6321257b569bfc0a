#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("cannot read expected output {path}: {source}")]
    ReadExpected {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Loads the recorded expectation for one case. Read fresh per case.
pub fn load_expected(path: &Path) -> Result<String, OracleError> {
    fs::read_to_string(path).map_err(|source| OracleError::ReadExpected {
        path: path.to_path_buf(),
        source,
    })
}

/// Why a case failed its assertion.
///
/// An exit-code mismatch is reported even when stdout matches; both sides
/// of a stdout mismatch are kept (already trimmed) for diffing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Mismatch {
    ExitCode { code: i32 },
    Stdout { expected: String, actual: String },
}

impl Mismatch {
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::ExitCode { code } => {
                format!("process exited with status {code}, expected 0")
            }
            Self::Stdout { expected, actual } => {
                format!("stdout mismatch\n{}", render_diff(expected, actual))
            }
        }
    }
}

/// Compares one execution against its expectation.
///
/// Exit code must be zero and stdout must equal the expected text after
/// trimming leading/trailing whitespace on both sides; internal whitespace
/// stays significant.
pub fn verdict(exit_code: i32, stdout: &str, expected: &str) -> Result<(), Mismatch> {
    if exit_code != 0 {
        return Err(Mismatch::ExitCode { code: exit_code });
    }

    let actual = stdout.trim();
    let wanted = expected.trim();
    if actual != wanted {
        return Err(Mismatch::Stdout {
            expected: wanted.to_owned(),
            actual: actual.to_owned(),
        });
    }
    Ok(())
}

/// Two-sided line diff: shared lines once, divergent lines as `-`/`+`.
#[must_use]
pub fn render_diff(expected: &str, actual: &str) -> String {
    let expected_lines = expected.lines().collect::<Vec<_>>();
    let actual_lines = actual.lines().collect::<Vec<_>>();

    let mut out = String::from("--- expected\n+++ actual\n");
    for idx in 0..expected_lines.len().max(actual_lines.len()) {
        match (expected_lines.get(idx), actual_lines.get(idx)) {
            (Some(e), Some(a)) if e == a => {
                out.push_str("  ");
                out.push_str(e);
                out.push('\n');
            }
            (e, a) => {
                if let Some(e) = e {
                    out.push_str("- ");
                    out.push_str(e);
                    out.push('\n');
                }
                if let Some(a) = a {
                    out.push_str("+ ");
                    out.push_str(a);
                    out.push('\n');
                }
            }
        }
    }
    out
}
