//! Config-driven runs
//!
//! Runs every case under testbench/cases/ against the built-in models. Each
//! case holds a run config and the outcome it must produce. The driver's demo
//! configs under configs/ must simply finish.

use anyhow::Result;
use glob::glob;
use libtest_mimic::{Arguments, Failed, Trial};
use std::path::{Path, PathBuf};
use testbench::ConfigCase;

const CASES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/cases");
const DEMOS_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../configs");

fn main() -> Result<()> {
    let args = Arguments::from_args();

    let tests = discover_tests()?;

    libtest_mimic::run(&args, tests).exit();
}

fn discover_tests() -> Result<Vec<Trial>> {
    let mut trials = Vec::new();

    let pattern = format!("{CASES_PATH}/*.yaml");
    for case_path in glob(&pattern)? {
        let case_path: PathBuf = case_path?;
        let Some(case_name) = case_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let case_name = case_name.to_owned();

        trials.push(Trial::test(case_name, move || run_test(&case_path)));
    }

    let pattern = format!("{DEMOS_PATH}/*.yaml");
    for demo_path in glob(&pattern)? {
        let demo_path: PathBuf = demo_path?;
        let Some(demo_name) = demo_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let demo_name = format!("demo::{demo_name}");

        trials.push(Trial::test(demo_name, move || run_demo(&demo_path)));
    }

    Ok(trials)
}

fn run_test(case_path: &Path) -> Result<(), Failed> {
    ConfigCase::load(case_path)
        .and_then(|case| case.check())
        .map_err(|e| format!("{e:#}").into())
}

fn run_demo(demo_path: &Path) -> Result<(), Failed> {
    ConfigCase::load_demo(demo_path)
        .and_then(|case| case.check())
        .map_err(|e| format!("{e:#}").into())
}
