#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use ccs_harness::{HarnessConfig, append_run_history, run, write_run_report};
use ccs_plan::PlanOrder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let mut config = HarnessConfig::default_paths();
    let mut shuffle = false;
    let mut seed: Option<u64> = None;
    let mut write_report = false;
    let mut write_history = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--corpus" => {
                let value = args.next().ok_or("--corpus requires a directory")?;
                config.corpus_root = PathBuf::from(value);
            }
            "--exclusions" => {
                let value = args.next().ok_or("--exclusions requires a file")?;
                config.exclusion_config = Some(PathBuf::from(value));
            }
            "--workdir" => {
                let value = args.next().ok_or("--workdir requires a directory")?;
                config.toolchain.workdir = PathBuf::from(value);
            }
            "--shuffle" => {
                shuffle = true;
            }
            "--seed" => {
                let value = args.next().ok_or("--seed requires a u64 value")?;
                seed = Some(value.parse::<u64>().map_err(|_| {
                    format!("--seed value is not a u64: {value}")
                })?);
            }
            "--timeout-secs" => {
                let value = args.next().ok_or("--timeout-secs requires a value")?;
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| format!("--timeout-secs value is not a u64: {value}"))?;
                config.toolchain.step_timeout = Duration::from_secs(secs);
            }
            "--skip-setup" => {
                config.build_command = None;
                config.clean_command = None;
            }
            "--write-report" => {
                write_report = true;
            }
            "--write-run-history" => {
                write_history = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    if shuffle || seed.is_some() {
        config.order = PlanOrder::Shuffled { seed };
    }

    let report = run(&config)?;
    println!(
        "suite={} planned={} executed={} passed={} failed={} green={}{}",
        report.suite,
        report.planned,
        report.executed,
        report.passed,
        report.failed,
        report.is_green(),
        report
            .seed
            .map(|seed| format!(" seed={seed}"))
            .unwrap_or_default()
    );
    for rejection in &report.rejections {
        println!("excluded {}: {:?}", rejection.name, rejection.reason);
    }
    if let Some(case) = report.first_failure() {
        println!("case {} failed", case.name);
        if let Some(failure) = &case.failure {
            println!("{}", failure.render());
        }
    }

    if write_report {
        let path = config.run_report_path();
        write_run_report(&path, &report)?;
        println!("wrote run_report={}", path.display());
    }
    if write_history {
        let path = append_run_history(&config.run_history_path(), &report)?;
        println!("wrote run_history={}", path.display());
    }

    if !report.is_green() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_help() {
    println!(
        "ccstress-cli\n\
         Usage:\n\
         \tccstress-cli [--corpus stress] [--exclusions stress/exclusions.yaml] [--shuffle] [--seed N]\n\
         Options:\n\
         \t--corpus <dir>         Corpus directory of NNN.c fixtures (default: stress)\n\
         \t--exclusions <file>    YAML deny-list config (known_broken / not_of_interest)\n\
         \t--workdir <dir>        Working directory for toolchain artifacts (default: .)\n\
         \t--shuffle              Randomize case order (seed is drawn and printed)\n\
         \t--seed <u64>           Shuffle with an explicit seed (implies --shuffle)\n\
         \t--timeout-secs <n>     Per-step timeout for external commands\n\
         \t--skip-setup           Skip the compiler build and artifact clean steps\n\
         \t--write-report         Write run_report.json under the artifact root\n\
         \t--write-run-history    Append a summary row to run_history.jsonl\n\
         \t-h, --help             Show this help"
    );
}
