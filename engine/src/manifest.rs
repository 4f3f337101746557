//! Run manifest: the final, structured record of one verified transfer.
//!
//! A manifest is built once after comparison, validated, and written as
//! pretty-printed JSON to `manifest_<stamp>.json` in the destination root.
//! It references both ledgers by file name and by the digest of the ledger
//! file itself, so [`audit_manifest`] can later tell whether either ledger was
//! edited after the run.

use crate::checksums::{digest_file, is_hex_digest};
use crate::compare::ComparisonSummary;
use crate::error::{EngineError, Result};
use crate::model::{
    is_run_stamp, manifest_file_name, DigestMapping, FileRecord, RunContext, Verdict,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One destination file in the manifest inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub rel_path: String,
    pub size: Option<u64>,
    /// `None` when the destination digest could not be computed.
    pub sha256: Option<String>,
}

/// A ledger file and the digest of its contents at manifest time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReference {
    pub file: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReferences {
    pub source: LedgerReference,
    pub destination: LedgerReference,
}

/// Structured report of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub package_name: String,
    pub technician: String,
    pub created_at: String,
    pub stamp: String,
    pub file_count: usize,
    pub files: Vec<ManifestFile>,
    pub checksums: LedgerReferences,
    pub verification: ComparisonSummary,
    pub result: Verdict,
}

impl Manifest {
    /// Check the manifest is internally consistent.
    ///
    /// # Errors
    /// `Manifest` describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(EngineError::Manifest { message });

        if !is_run_stamp(&self.stamp) {
            return fail(format!("malformed run stamp: {}", self.stamp));
        }
        if self.file_count != self.files.len() {
            return fail(format!(
                "file_count {} does not match {} inventory entries",
                self.file_count,
                self.files.len()
            ));
        }
        if self.result != self.verification.verdict() {
            return fail(format!(
                "result {} contradicts verification counters",
                self.result
            ));
        }
        for reference in [&self.checksums.source, &self.checksums.destination] {
            if !is_hex_digest(&reference.sha256) {
                return fail(format!("bad ledger digest for {}", reference.file));
            }
        }
        if let Some(bad) = self
            .files
            .iter()
            .find(|f| f.sha256.as_deref().is_some_and(|d| !is_hex_digest(d)))
        {
            return fail(format!("bad digest for {}", bad.rel_path));
        }
        Ok(())
    }

    pub fn file_name(&self) -> String {
        manifest_file_name(&self.stamp)
    }
}

fn ledger_reference(path: &Path, chunk_size: usize) -> Result<LedgerReference> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::InvalidPath {
            path: path.to_path_buf(),
            reason: "ledger path has no file name".to_string(),
        })?;
    let sha256 = digest_file(path, chunk_size).map_err(|e| match e {
        EngineError::Hash { path, source } => EngineError::Io { path, source },
        other => other,
    })?;
    Ok(LedgerReference { file, sha256 })
}

/// Assemble the manifest for a finished run.
///
/// The inventory lists `files` (the destination enumeration) with digests
/// taken from `destination`. The two ledgers are hashed here, so both must be
/// complete on disk.
///
/// # Errors
/// `Io` if a ledger cannot be read.
pub fn build_manifest(
    package_name: &str,
    ctx: &RunContext,
    files: &[FileRecord],
    destination: &DigestMapping,
    summary: &ComparisonSummary,
    source_ledger: &Path,
    destination_ledger: &Path,
) -> Result<Manifest> {
    let chunk_size = ctx.config.chunk_size;
    let mut inventory: Vec<ManifestFile> = files
        .iter()
        .map(|record| ManifestFile {
            rel_path: record.relative_path.clone(),
            size: record.size,
            sha256: destination
                .get(&record.relative_path)
                .flatten()
                .map(str::to_string),
        })
        .collect();
    inventory.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    Ok(Manifest {
        package_name: package_name.to_string(),
        technician: ctx.technician.clone(),
        created_at: ctx.created_at_iso(),
        stamp: ctx.stamp.clone(),
        file_count: inventory.len(),
        files: inventory,
        checksums: LedgerReferences {
            source: ledger_reference(source_ledger, chunk_size)?,
            destination: ledger_reference(destination_ledger, chunk_size)?,
        },
        verification: summary.clone(),
        result: summary.verdict(),
    })
}

/// Validate and write `manifest` into `dir`. Never replaces an existing file.
///
/// # Errors
/// - `Manifest` if validation or serialization fails
/// - `ArtifactExists` if a manifest for this stamp is already present
/// - `Io` on write failure
pub fn write_manifest(manifest: &Manifest, dir: &Path) -> Result<PathBuf> {
    manifest.validate()?;
    let json = serde_json::to_string_pretty(manifest).map_err(|e| EngineError::Manifest {
        message: e.to_string(),
    })?;

    let path = dir.join(manifest.file_name());
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| EngineError::io(&path, e))?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.sync_all())
        .map_err(|e| EngineError::io(&path, e))?;

    tracing::info!(manifest = %path.display(), result = %manifest.result, "manifest written");
    Ok(path)
}

/// Load and validate a manifest.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    let manifest: Manifest = serde_json::from_str(&content).map_err(|e| EngineError::Manifest {
        message: format!("{}: {}", path.display(), e),
    })?;
    manifest.validate()?;
    Ok(manifest)
}

/// Recomputed state of one ledger referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCheck {
    pub path: PathBuf,
    pub recorded: String,
    /// `None` if the ledger is gone or unreadable.
    pub actual: Option<String>,
}

impl LedgerCheck {
    pub fn is_intact(&self) -> bool {
        self.actual.as_deref() == Some(self.recorded.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuditReport {
    pub manifest: Manifest,
    pub source: LedgerCheck,
    pub destination: LedgerCheck,
}

impl AuditReport {
    /// True if both ledgers still hash to the recorded digests.
    pub fn ledgers_intact(&self) -> bool {
        self.source.is_intact() && self.destination.is_intact()
    }
}

fn check_ledger(dir: &Path, reference: &LedgerReference, chunk_size: usize) -> LedgerCheck {
    let path = dir.join(&reference.file);
    let actual = match digest_file(&path, chunk_size) {
        Ok(digest) => Some(digest),
        Err(e) => {
            tracing::warn!(ledger = %path.display(), error = %e, "cannot rehash ledger");
            None
        }
    };
    if actual.as_deref() != Some(reference.sha256.as_str()) {
        tracing::warn!(ledger = %path.display(), "ledger differs from manifest record");
    }
    LedgerCheck {
        path,
        recorded: reference.sha256.clone(),
        actual,
    }
}

/// Reload a manifest and rehash both ledgers it references.
///
/// Ledgers are resolved in the manifest's directory.
pub fn audit_manifest(path: &Path, chunk_size: usize) -> Result<AuditReport> {
    let manifest = read_manifest(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let source = check_ledger(dir, &manifest.checksums.source, chunk_size);
    let destination = check_ledger(dir, &manifest.checksums.destination, chunk_size);
    Ok(AuditReport {
        manifest,
        source,
        destination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare;
    use crate::config::PipelineConfig;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        ctx: RunContext,
        source_ledger: PathBuf,
        destination_ledger: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = dir.path().to_path_buf();
        let ctx = RunContext::new("tester", PipelineConfig::default());
        let source_ledger = root.join(format!("source_{}.txt", ctx.stamp));
        let destination_ledger = root.join(format!("destination_{}.txt", ctx.stamp));
        fs::write(&source_ledger, format!("{}  *a.txt\n", HELLO_SHA256))
            .expect("Failed to write file");
        fs::write(&destination_ledger, format!("{}  *a.txt\n", HELLO_SHA256))
            .expect("Failed to write file");
        Fixture {
            _dir: dir,
            root,
            ctx,
            source_ledger,
            destination_ledger,
        }
    }

    fn mapping(digest: Option<&str>) -> DigestMapping {
        let mut mapping = DigestMapping::new();
        mapping.insert("a.txt", digest.map(str::to_string));
        mapping
    }

    fn files() -> Vec<FileRecord> {
        vec![FileRecord::from_native(PathBuf::from("a.txt"), Some(5))]
    }

    fn build(fx: &Fixture, src: &DigestMapping, dst: &DigestMapping) -> Manifest {
        let summary = compare(src, dst, 200);
        build_manifest(
            "pkg",
            &fx.ctx,
            &files(),
            dst,
            &summary,
            &fx.source_ledger,
            &fx.destination_ledger,
        )
        .expect("build manifest")
    }

    #[test]
    fn test_build_pass_manifest() {
        let fx = fixture();
        let m = mapping(Some(HELLO_SHA256));
        let manifest = build(&fx, &m, &m);

        assert_eq!(manifest.result, Verdict::Pass);
        assert_eq!(manifest.file_count, 1);
        assert_eq!(manifest.files[0].sha256.as_deref(), Some(HELLO_SHA256));
        assert_eq!(manifest.checksums.source.file, format!("source_{}.txt", fx.ctx.stamp));
        assert!(is_hex_digest(&manifest.checksums.destination.sha256));
        manifest.validate().expect("valid manifest");
    }

    #[test]
    fn test_unhashed_destination_fails_verdict() {
        let fx = fixture();
        let manifest = build(&fx, &mapping(Some(HELLO_SHA256)), &mapping(None));

        assert_eq!(manifest.result, Verdict::Fail);
        assert_eq!(manifest.verification.mismatched, 1);
        assert_eq!(manifest.files[0].sha256, None);
    }

    #[test]
    fn test_json_field_names() {
        let fx = fixture();
        let m = mapping(Some(HELLO_SHA256));
        let manifest = build(&fx, &m, &m);

        let value = serde_json::to_value(&manifest).expect("serialize");
        for field in [
            "package_name",
            "technician",
            "created_at",
            "stamp",
            "file_count",
            "files",
            "checksums",
            "verification",
            "result",
        ] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(value["result"], "PASS");
        assert_eq!(value["files"][0]["rel_path"], "a.txt");
        assert_eq!(value["verification"]["missing_in_destination"], 0);
        assert!(value["checksums"]["source"]["sha256"].is_string());
    }

    #[test]
    fn test_validate_rejects_inconsistent_manifest() {
        let fx = fixture();
        let m = mapping(Some(HELLO_SHA256));

        let mut forged = build(&fx, &m, &m);
        forged.verification.extra_in_destination = 1;
        assert!(matches!(forged.validate(), Err(EngineError::Manifest { .. })));

        let mut miscounted = build(&fx, &m, &m);
        miscounted.file_count = 7;
        assert!(miscounted.validate().is_err());

        let mut bad_digest = build(&fx, &m, &m);
        bad_digest.files[0].sha256 = Some("XYZ".to_string());
        assert!(bad_digest.validate().is_err());
    }

    #[test]
    fn test_write_never_overwrites() {
        let fx = fixture();
        let m = mapping(Some(HELLO_SHA256));
        let manifest = build(&fx, &m, &m);

        let path = write_manifest(&manifest, &fx.root).expect("write manifest");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(manifest.file_name().as_str()));

        let err = write_manifest(&manifest, &fx.root).expect_err("second write must fail");
        assert!(matches!(err, EngineError::ArtifactExists { .. }));

        let reloaded = read_manifest(&path).expect("read manifest");
        assert_eq!(reloaded, manifest);
    }

    #[test]
    fn test_audit_detects_edited_ledger() {
        let fx = fixture();
        let m = mapping(Some(HELLO_SHA256));
        let manifest = build(&fx, &m, &m);
        let path = write_manifest(&manifest, &fx.root).expect("write manifest");

        let report = audit_manifest(&path, 1024).expect("audit");
        assert!(report.ledgers_intact());

        fs::write(&fx.destination_ledger, "edited\n").expect("Failed to write file");
        fs::remove_file(&fx.source_ledger).expect("Failed to remove file");

        let report = audit_manifest(&path, 1024).expect("audit");
        assert!(!report.ledgers_intact());
        assert_eq!(report.source.actual, None);
        assert!(report.destination.actual.is_some());
        assert!(!report.destination.is_intact());
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("manifest_20240101_000000.json");
        fs::write(&path, "{ not json").expect("Failed to write file");
        assert!(matches!(read_manifest(&path), Err(EngineError::Manifest { .. })));
    }
}
