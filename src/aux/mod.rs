//! Auxiliary single-shot processes (spec §2.9): blobs copy, sequence
//! reset, extension-config data copy. Each runs as one short-lived
//! worker alongside the main copy/index/vacuum pipeline rather than as
//! a pool, since none of them partition their work the way table data
//! does.

pub mod blobs;
pub mod extension_config;
pub mod sequences;

pub use blobs::run_blob_copy;
pub use extension_config::run_extension_config_copy;
pub use sequences::run_sequence_reset;
