//! Run orchestration.
//!
//! A verified copy runs these stages strictly in order, each consuming the
//! complete output of the one before:
//! - preflight (path checks and overwrite guard, no writes)
//! - enumerate and hash the source, writing the source ledger into the source root
//! - copy the tree
//! - enumerate and hash the destination, writing the destination ledger
//! - compare, then write the manifest into the destination root
//!
//! A manifest only exists if every stage completed.

use crate::checksums::{hash_tree, read_ledger, HashedTree};
use crate::compare::{compare, ComparisonSummary};
use crate::error::{EngineError, Result};
use crate::fs_ops::{self, check_directory, copy_tree, enumerate, package_name, CopyOutcome};
use crate::manifest::{build_manifest, write_manifest, Manifest};
use crate::model::{is_operational_artifact, LedgerRole, RunContext, TransferRequest, Verdict};
use crate::progress::ProgressCallback;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub package_name: String,
    pub destination_root: PathBuf,
    /// Source ledger as written in the source root.
    pub source_ledger: PathBuf,
    pub destination_ledger: PathBuf,
    pub manifest_path: PathBuf,
    pub copy: CopyOutcome,
    pub summary: ComparisonSummary,
    pub manifest: Manifest,
}

impl PipelineReport {
    pub fn verdict(&self) -> Verdict {
        self.manifest.result
    }
}

/// Copy `file` into `dir` under the same name, refusing to replace anything.
fn place_artifact(file: &Path, dir: &Path) -> Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| EngineError::InvalidPath {
        path: file.to_path_buf(),
        reason: "artifact path has no file name".to_string(),
    })?;
    let target = dir.join(name);

    let mut reader = File::open(file).map_err(|e| EngineError::io(file, e))?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .map_err(|e| EngineError::io(&target, e))?;
    io::copy(&mut reader, &mut writer)
        .and_then(|_| writer.sync_all())
        .map_err(|e| EngineError::io(&target, e))?;
    Ok(target)
}

/// Run the full verified copy described by `request`.
///
/// Per-file hash and copy failures do not abort the run; they surface in the
/// manifest as mismatched or missing entries and force a FAIL verdict.
///
/// # Errors
/// - `PathNotFound`, `NotADirectory`, `InvalidPath`, `DestinationExists` from
///   preflight, before anything is written
/// - `ArtifactExists` or `Io` if a ledger or the manifest cannot be written
/// - `Config` if the run configuration is invalid
pub fn run_pipeline(
    request: &TransferRequest,
    ctx: &RunContext,
    progress: &dyn ProgressCallback,
) -> Result<PipelineReport> {
    let span = tracing::info_span!("run", run_id = %ctx.run_id, stamp = %ctx.stamp);
    let _guard = span.enter();

    ctx.config.validate()?;
    fs_ops::plan_destination(
        &request.source,
        &request.destination_parent,
        request.allow_overwrite,
    )?;
    let name = package_name(&request.source)?;
    tracing::info!(
        package = %name,
        source = %request.source.display(),
        destination_parent = %request.destination_parent.display(),
        technician = %ctx.technician,
        "verified copy started"
    );

    let source_files = enumerate(&request.source, &is_operational_artifact)?;
    let source = hash_tree(
        &request.source,
        &source_files,
        LedgerRole::Source,
        &name,
        ctx,
        progress,
    )?;

    let copy = copy_tree(
        &request.source,
        &request.destination_parent,
        request.allow_overwrite,
        ctx,
        progress,
    )?;
    if !copy.failed.is_empty() {
        tracing::warn!(failed = copy.failed.len(), "some files were not copied");
    }

    // Re-enumerate rather than trusting the copied list, so gaps and strays show up
    let destination_root = copy.destination_root.clone();
    let destination_files = enumerate(&destination_root, &is_operational_artifact)?;
    let destination = hash_tree(
        &destination_root,
        &destination_files,
        LedgerRole::Destination,
        &name,
        ctx,
        progress,
    )?;

    let summary = compare(&source.mapping, &destination.mapping, ctx.config.sample_limit);
    tracing::info!(
        matched = summary.matched,
        mismatched = summary.mismatched,
        missing_in_destination = summary.missing_in_destination,
        extra_in_destination = summary.extra_in_destination,
        "comparison finished"
    );

    let placed_source_ledger = place_artifact(&source.ledger_path, &destination_root)?;
    let manifest = build_manifest(
        &name,
        ctx,
        &destination_files,
        &destination.mapping,
        &summary,
        &placed_source_ledger,
        &destination.ledger_path,
    )?;
    let manifest_path = write_manifest(&manifest, &destination_root)?;

    match manifest.result {
        Verdict::Pass => tracing::info!(files = manifest.file_count, "verified copy PASS"),
        Verdict::Fail => tracing::warn!(files = manifest.file_count, "verified copy FAIL"),
    }

    Ok(PipelineReport {
        package_name: name,
        destination_root,
        source_ledger: source.ledger_path,
        destination_ledger: destination.ledger_path,
        manifest_path,
        copy,
        summary,
        manifest,
    })
}

/// Outcome of checking a tree against an existing ledger.
#[derive(Debug, Clone)]
pub struct LedgerVerification {
    pub summary: ComparisonSummary,
    /// Ledger written for `root` during the check.
    pub ledger_path: PathBuf,
}

/// Reload `ledger_path` as the source side, hash `root` as the destination
/// side (writing its ledger into `root`), and compare.
pub fn verify_against_ledger(
    ledger_path: &Path,
    root: &Path,
    ctx: &RunContext,
    progress: &dyn ProgressCallback,
) -> Result<LedgerVerification> {
    let span = tracing::info_span!("verify", run_id = %ctx.run_id, stamp = %ctx.stamp);
    let _guard = span.enter();

    ctx.config.validate()?;
    check_directory(root)?;
    if !ledger_path.is_file() {
        return Err(EngineError::PathNotFound {
            path: ledger_path.to_path_buf(),
        });
    }

    let expected = read_ledger(ledger_path)?;
    let files = enumerate(root, &is_operational_artifact)?;
    let hashed = hash_tree(
        root,
        &files,
        LedgerRole::Destination,
        &package_name(root)?,
        ctx,
        progress,
    )?;
    let summary = compare(&expected, &hashed.mapping, ctx.config.sample_limit);
    tracing::info!(
        verdict = %summary.verdict(),
        ledger = %ledger_path.display(),
        "ledger check finished"
    );

    Ok(LedgerVerification {
        summary,
        ledger_path: hashed.ledger_path,
    })
}

/// Hash a tree in place, writing a source-role ledger into `root`.
pub fn hash_package(
    root: &Path,
    ctx: &RunContext,
    progress: &dyn ProgressCallback,
) -> Result<HashedTree> {
    let span = tracing::info_span!("hash", run_id = %ctx.run_id, stamp = %ctx.stamp);
    let _guard = span.enter();

    ctx.config.validate()?;
    check_directory(root)?;
    let files = enumerate(root, &is_operational_artifact)?;
    let hashed = hash_tree(
        root,
        &files,
        LedgerRole::Source,
        &package_name(root)?,
        ctx,
        progress,
    )?;
    if hashed.mapping.unhashed_count() > 0 {
        tracing::warn!(unhashed = hashed.mapping.unhashed_count(), "some files have no digest");
    }
    Ok(hashed)
}
