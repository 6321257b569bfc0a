#![forbid(unsafe_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ccs_corpus::{
    AdmissionOutcome, CorpusError, ExclusionSet, Rejection, discover, filter_corpus,
    normalize_corpus,
};
use ccs_oracle::{Mismatch, load_expected, verdict};
use ccs_pipeline::{
    PipelineRunner, SetupFailure, Stage, ToolchainConfig, run_setup,
};
use ccs_plan::{PlanOrder, TestCase, build_plan};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUITE_NAME: &str = "stress";
pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 300;

/// Everything one run needs: where the corpus lives, which deny-list to
/// load, the external toolchain, and the one-time setup commands.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub corpus_root: PathBuf,
    /// `None` means an empty deny-list; a configured path that cannot be
    /// read is an error, not a fallback.
    pub exclusion_config: Option<PathBuf>,
    pub toolchain: ToolchainConfig,
    /// Builds the compiler binary before any case runs (`make cc`).
    pub build_command: Option<Vec<String>>,
    /// Clears artifacts from a previous run (`make clean`).
    pub clean_command: Option<Vec<String>>,
    pub setup_timeout: Duration,
    pub order: PlanOrder,
    pub report_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            corpus_root: PathBuf::from("stress"),
            exclusion_config: None,
            toolchain: ToolchainConfig::with_workdir(PathBuf::from(".")),
            build_command: Some(vec!["make".to_owned(), "cc".to_owned()]),
            clean_command: Some(vec!["make".to_owned(), "clean".to_owned()]),
            setup_timeout: Duration::from_secs(DEFAULT_SETUP_TIMEOUT_SECS),
            order: PlanOrder::Sorted,
            report_root: PathBuf::from("artifacts/stress"),
        }
    }

    #[must_use]
    pub fn run_report_path(&self) -> PathBuf {
        self.report_root.join("run_report.json")
    }

    #[must_use]
    pub fn run_history_path(&self) -> PathBuf {
        self.report_root.join("run_history.jsonl")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("setup failed: {0}")]
    Setup(#[from] SetupFailure),
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

/// How a case failed: a broken pipeline step, an unreadable expectation,
/// or an assertion mismatch. The program's own non-zero exit lands in
/// `Assertion`, not `Pipeline`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureDetail {
    Pipeline { stage: Stage, message: String },
    Expectation { message: String },
    Assertion { mismatch: Mismatch },
}

impl FailureDetail {
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Pipeline { stage, message } => format!("{stage} stage failed: {message}"),
            Self::Expectation { message } => message.clone(),
            Self::Assertion { mismatch } => mismatch.render(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub status: CaseStatus,
    pub failure: Option<FailureDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub suite: String,
    pub seed: Option<u64>,
    pub discovered: usize,
    pub normalized: usize,
    pub rejections: Vec<Rejection>,
    pub planned: usize,
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl RunReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub fn first_failure(&self) -> Option<&CaseResult> {
        self.results
            .iter()
            .find(|result| matches!(result.status, CaseStatus::Fail))
    }
}

/// Runs the whole suite: setup, discovery, normalization, admission,
/// planning, then strictly sequential fail-fast case execution.
///
/// Case failures come back inside the report (fail-fast, first failure
/// recorded); only setup, corpus, and artifact I/O problems are `Err`.
pub fn run(config: &HarnessConfig) -> Result<RunReport, HarnessError> {
    run_setup_steps(config)?;

    let files = discover(&config.corpus_root)?;
    let discovered = files.len();
    let normalized = normalize_corpus(&files)?;

    let exclusions = match &config.exclusion_config {
        Some(path) => ExclusionSet::from_yaml_file(path)?,
        None => ExclusionSet::default(),
    };
    let AdmissionOutcome {
        admitted,
        rejections,
    } = filter_corpus(files, &exclusions)?;

    let plan = build_plan(&admitted, config.order);
    tracing::info!(
        discovered,
        normalized,
        rejected = rejections.len(),
        planned = plan.cases.len(),
        seed = plan.seed,
        "plan ready"
    );

    let mut runner = PipelineRunner::new(config.toolchain.clone());
    let mut results = Vec::with_capacity(plan.cases.len());
    let mut failed = 0;
    for case in &plan.cases {
        tracing::info!(case = case.name.as_str(), "running case");
        match run_case(&mut runner, case) {
            Ok(()) => results.push(CaseResult {
                name: case.name.clone(),
                status: CaseStatus::Pass,
                failure: None,
            }),
            Err(detail) => {
                tracing::error!(
                    case = case.name.as_str(),
                    "case failed: {}",
                    detail.render()
                );
                results.push(CaseResult {
                    name: case.name.clone(),
                    status: CaseStatus::Fail,
                    failure: Some(detail),
                });
                failed = 1;
                break;
            }
        }
    }

    let executed = results.len();
    Ok(RunReport {
        suite: SUITE_NAME.to_owned(),
        seed: plan.seed,
        discovered,
        normalized,
        rejections,
        planned: plan.cases.len(),
        executed,
        passed: executed - failed,
        failed,
        results,
    })
}

fn run_setup_steps(config: &HarnessConfig) -> Result<(), HarnessError> {
    for command in [&config.build_command, &config.clean_command]
        .into_iter()
        .flatten()
    {
        run_setup(command, &config.toolchain.workdir, config.setup_timeout)?;
    }
    Ok(())
}

fn run_case(runner: &mut PipelineRunner, case: &TestCase) -> Result<(), FailureDetail> {
    let execution = runner
        .run_case(&case.source_path)
        .map_err(|err| FailureDetail::Pipeline {
            stage: err.stage(),
            message: err.to_string(),
        })?;

    let expected =
        load_expected(&case.expected_path).map_err(|err| FailureDetail::Expectation {
            message: err.to_string(),
        })?;

    verdict(execution.exit_code, &execution.stdout, &expected)
        .map_err(|mismatch| FailureDetail::Assertion { mismatch })
}

pub fn write_run_report(path: &Path, report: &RunReport) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub ts_unix_ms: u64,
    pub suite: String,
    pub seed: Option<u64>,
    pub planned: usize,
    pub executed: usize,
    pub passed: usize,
    pub failed: usize,
    pub green: bool,
}

/// Appends a one-row summary of this run to the JSONL history file.
pub fn append_run_history(path: &Path, report: &RunReport) -> Result<PathBuf, HarnessError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    let entry = RunHistoryEntry {
        ts_unix_ms: now_unix_ms(),
        suite: report.suite.clone(),
        seed: report.seed,
        planned: report.planned,
        executed: report.executed,
        passed: report.passed,
        failed: report.failed,
        green: report.is_green(),
    };
    writeln!(file, "{}", serde_json::to_string(&entry)?)?;
    Ok(path.to_path_buf())
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{CaseResult, CaseStatus, FailureDetail, RunReport, Stage};

    fn report_with(results: Vec<CaseResult>) -> RunReport {
        let failed = results
            .iter()
            .filter(|result| matches!(result.status, CaseStatus::Fail))
            .count();
        RunReport {
            suite: super::SUITE_NAME.to_owned(),
            seed: None,
            discovered: results.len(),
            normalized: 0,
            rejections: Vec::new(),
            planned: results.len(),
            executed: results.len(),
            passed: results.len() - failed,
            failed,
            results,
        }
    }

    #[test]
    fn report_greenness_tracks_failures() {
        let green = report_with(vec![CaseResult {
            name: "001".to_owned(),
            status: CaseStatus::Pass,
            failure: None,
        }]);
        assert!(green.is_green());
        assert!(green.first_failure().is_none());

        let red = report_with(vec![
            CaseResult {
                name: "001".to_owned(),
                status: CaseStatus::Pass,
                failure: None,
            },
            CaseResult {
                name: "002".to_owned(),
                status: CaseStatus::Fail,
                failure: Some(FailureDetail::Pipeline {
                    stage: Stage::Link,
                    message: "link step exited with status 1".to_owned(),
                }),
            },
        ]);
        assert!(!red.is_green());
        assert_eq!(red.first_failure().map(|case| case.name.as_str()), Some("002"));
    }

    #[test]
    fn failure_rendering_names_the_stage() {
        let detail = FailureDetail::Pipeline {
            stage: Stage::Assemble,
            message: "assemble step exited with status 1: bad encoding".to_owned(),
        };
        assert!(detail.render().starts_with("assemble stage failed"));
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = report_with(vec![CaseResult {
            name: "003".to_owned(),
            status: CaseStatus::Fail,
            failure: Some(FailureDetail::Assertion {
                mismatch: ccs_oracle::Mismatch::ExitCode { code: 1 },
            }),
        }]);
        let json = serde_json::to_string(&report).expect("serialize");
        let back: RunReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, report);
    }
}
