//! `pgxfer`: parallel Postgres-to-Postgres clone orchestrator.
//!
//! Parses argv into a [`pgxfer::config::Config`] and hands off to
//! [`pgxfer::orchestrator::run`]. A failed run exits non-zero and
//! prints the first fatal error with full `anyhow` context.

use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match pgxfer::cli::parse_args(std::env::args()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} version {}", pgx_buildcfg::PROGRAM_NAME, pgx_buildcfg::PGXFER_PKG_VERSION);
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match pgxfer::orchestrator::run(config) {
        Ok(summary) => {
            log::info!(
                "migration complete: {} tables, {} parts copied",
                summary.tables_enqueued,
                summary.parts_enqueued,
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("migration failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
