//! # vcopy Engine - Verified Copy Library
//!
//! A headless engine that copies a directory tree and proves the copy is
//! byte-identical, using SHA-256 ledgers computed before and after the copy.
//! Designed as the foundation for non-interactive and interactive front ends.
//!
//! ## Overview
//!
//! A run is strictly sequential:
//! - Recursive enumeration with operational artifacts excluded
//! - Streaming source digests, written line by line to a source ledger
//! - Chunked copy with per-file error isolation
//! - Streaming destination digests and a destination ledger
//! - Comparison into matched / mismatched / missing / extra
//! - A JSON manifest with the inventory, ledger digests and a PASS/FAIL verdict
//!
//! Per-file failures never abort a run; they show up in the verdict.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{run_pipeline, LogProgress, PipelineConfig, RunContext, TransferRequest, Verdict};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = RunContext::new("operator", PipelineConfig::default());
//! let request = TransferRequest {
//!     source: "/mnt/archive/box_0042".into(),
//!     destination_parent: "/mnt/vault".into(),
//!     allow_overwrite: false,
//! };
//!
//! let report = run_pipeline(&request, &ctx, &LogProgress)?;
//! println!("{} -> {}", report.manifest_path.display(), report.verdict());
//! assert_eq!(report.verdict(), Verdict::Pass);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core records (FileRecord, DigestMapping, RunContext, Verdict)
//! - **error**: Error types and fatal/per-file classification
//! - **config**: Tunables and TOML loading
//! - **fs_ops**: Enumeration, chunked copy, relocate
//! - **checksums**: SHA-256 digests and ledger read/write
//! - **compare**: Source/destination classification
//! - **manifest**: Manifest build, validation, write and audit
//! - **progress**: Progress callback trait
//! - **pipeline**: Run orchestration

pub mod checksums;
pub mod compare;
pub mod config;
pub mod error;
pub mod fs_ops;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod progress;

// Re-export main types and functions
pub use checksums::{digest_file, hash_tree, parse_ledger, read_ledger, HashedTree};
pub use compare::{compare, ComparisonSummary};
pub use config::PipelineConfig;
pub use error::{EngineError, Result};
pub use fs_ops::{copy_tree, enumerate, relocate, CopyOutcome, Relocation};
pub use manifest::{
    audit_manifest, build_manifest, read_manifest, write_manifest, AuditReport, Manifest,
};
pub use model::{
    is_operational_artifact, DigestMapping, FileRecord, LedgerRole, RunContext, TransferRequest,
    Verdict,
};
pub use pipeline::{
    hash_package, run_pipeline, verify_against_ledger, LedgerVerification, PipelineReport,
};
pub use progress::{LogProgress, ProgressCallback, ProgressUpdate, Stage};
