#![forbid(unsafe_code)]

//! Umbrella crate: one import surface over the ccstress workspace.
//!
//! The member crates mirror the data flow: corpus discovery and admission
//! (`ccs-corpus`), plan construction (`ccs-plan`), the external toolchain
//! pipeline (`ccs-pipeline`), expectation verdicts (`ccs-oracle`), and the
//! fail-fast driver plus reports (`ccs-harness`).

pub use ccs_corpus as corpus;
pub use ccs_harness as harness;
pub use ccs_oracle as oracle;
pub use ccs_pipeline as pipeline;
pub use ccs_plan as plan;

pub use ccs_corpus::{
    DISALLOWED_MARKERS, ExclusionSet, PRINTF_FORWARD_DECL, STDIO_INCLUDE, SourceFile,
};
pub use ccs_harness::{HarnessConfig, HarnessError, RunReport, run};
pub use ccs_oracle::Mismatch;
pub use ccs_pipeline::{PipelineRunner, Stage, ToolchainConfig};
pub use ccs_plan::{PlanOrder, TestCase, TestPlan};
