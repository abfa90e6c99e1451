//! `pgxfer`: a parallel Postgres-to-Postgres clone orchestrator.
//!
//! The workspace is split the way the teacher splits its own workspace:
//! small, low-level crates (`pgx-api-types`, `pgx-buildcfg`, `pgx-tools`,
//! `pgx-config`, `pgx-catalog`) hold data types and primitives with few
//! dependencies, while this crate wires them into the actual scheduler
//! — supervisors, workers, the partition planner, and the root
//! orchestrator that drives one migration run end to end.

#[macro_use]
pub mod task;

pub mod aux;
pub mod cli;
pub mod config;
pub mod copy;
pub mod db;
pub mod external;
pub mod index;
pub mod orchestrator;
pub mod signal;
pub mod snapshot;
pub mod source;
pub mod vacuum;
