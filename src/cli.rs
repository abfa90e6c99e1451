//! Minimal flag parsing for the `pgxfer` binary.
//!
//! Spec §1 explicitly carves CLI parsing out of the core ("CLI parsing,
//! configuration loading, logging setup, filesystem helpers" are
//! external collaborators), so this is deliberately thin: no subcommand
//! tree, no declarative schema, just enough `--flag value` handling to
//! build a [`Config`] and hand off to [`crate::orchestrator`].

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use pgx_config::WorkDirMode;

use crate::config::Config;

pub fn parse_args(args: impl Iterator<Item = String>) -> Result<Config> {
    let mut config = Config::default();
    let mut restart = false;
    let mut resume = false;
    let mut workdir: Option<PathBuf> = None;

    let mut args = args.peekable();
    args.next(); // argv[0]

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--source" => config.source_uri = next_value(&mut args, "--source")?,
            "--target" => config.target_uri = next_value(&mut args, "--target")?,
            "--dir" => workdir = Some(PathBuf::from(next_value(&mut args, "--dir")?)),
            "--restart" => restart = true,
            "--resume" => resume = true,
            "--table-jobs" => config.table_jobs = next_usize(&mut args, "--table-jobs")?,
            "--index-jobs" => config.index_jobs = next_usize(&mut args, "--index-jobs")?,
            "--vacuum-jobs" => config.vacuum_jobs = next_usize(&mut args, "--vacuum-jobs")?,
            "--split-tables-larger-than" => {
                config.split_tables_larger_than = next_value(&mut args, "--split-tables-larger-than")?
                    .parse()
                    .context("--split-tables-larger-than expects a byte count")?;
            }
            "--max-retries" => {
                config.max_retries = next_value(&mut args, "--max-retries")?
                    .parse()
                    .context("--max-retries expects an integer")?;
            }
            "--retry-time-budget-secs" => {
                let secs: u64 = next_value(&mut args, "--retry-time-budget-secs")?
                    .parse()
                    .context("--retry-time-budget-secs expects an integer")?;
                config.retry_time_budget = std::time::Duration::from_secs(secs);
            }
            "--not-consistent" => config.not_consistent = true,
            "--no-fail-fast" => config.fail_fast = false,
            "--skip-vacuum" => config.skip_vacuum = true,
            "--skip-blobs" => config.skip_blobs = true,
            "--skip-sequences" => config.skip_sequences = true,
            "--skip-extension-config" => config.skip_extension_config = true,
            "--text-copy" => config.binary_copy = false,
            other => bail!("unrecognized argument: {other}"),
        }
    }

    if config.source_uri.is_empty() {
        bail!("--source <postgres-uri> is required");
    }
    if config.target_uri.is_empty() {
        bail!("--target <postgres-uri> is required");
    }

    config.mode = match (restart, resume) {
        (true, true) => bail!("--restart and --resume are mutually exclusive"),
        (true, false) => WorkDirMode::Restart,
        (false, true) => WorkDirMode::Resume,
        (false, false) => WorkDirMode::Fresh,
    };

    config.workdir = match workdir {
        Some(dir) => dir,
        None => pgx_config::default_workdir_root().context("resolving default work directory")?,
    };

    Ok(config)
}

fn next_value(args: &mut std::iter::Peekable<impl Iterator<Item = String>>, flag: &str) -> Result<String> {
    args.next().with_context(|| format!("{flag} requires a value"))
}

fn next_usize(args: &mut std::iter::Peekable<impl Iterator<Item = String>>, flag: &str) -> Result<usize> {
    next_value(args, flag)?
        .parse()
        .with_context(|| format!("{flag} expects a positive integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> impl Iterator<Item = String> {
        std::iter::once("pgxfer".to_string()).chain(v.iter().map(|s| s.to_string()))
    }

    #[test]
    fn requires_source_and_target() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["--source", "postgres://a"])).is_err());
    }

    #[test]
    fn parses_minimal_invocation() {
        let config = parse_args(args(&[
            "--source",
            "postgres://a/db",
            "--target",
            "postgres://b/db",
            "--dir",
            "/tmp/pgxfer-run",
        ]))
        .unwrap();
        assert_eq!(config.source_uri, "postgres://a/db");
        assert_eq!(config.target_uri, "postgres://b/db");
        assert_eq!(config.mode, WorkDirMode::Fresh);
    }

    #[test]
    fn restart_and_resume_conflict() {
        let result = parse_args(args(&[
            "--source",
            "postgres://a/db",
            "--target",
            "postgres://b/db",
            "--restart",
            "--resume",
        ]));
        assert!(result.is_err());
    }
}
