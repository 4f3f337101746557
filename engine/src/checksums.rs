//! Digest computation and digest ledgers.
//!
//! This module provides:
//! - Streaming SHA-256 of a single file in fixed-size chunks
//! - The ledger writer: header comments, then one `<digest>  *<path>` line per
//!   file, flushed as it is written so an interrupted run leaves a truthful
//!   partial ledger. A path holding a backslash, `\n` or `\r` is escaped and
//!   its line prefixed with `\`, the way `sha256sum` does it
//! - The ledger reader, which turns a ledger back into a DigestMapping
//! - `hash_tree`, which hashes a file list and writes its ledger in one pass

use crate::error::{EngineError, Result};
use crate::model::{
    local_timestamp, DigestMapping, FileRecord, LedgerRole, RunContext, NO_DIGEST,
};
use crate::progress::{ProgressCallback, Stage, StageTracker};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Returns true for a 64-character lowercase hex string.
pub fn is_hex_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Compute the SHA-256 of a file, reading it through `buffer`.
///
/// The buffer length is the chunk size; memory use is independent of file size.
///
/// # Errors
/// `EngineError::Hash` if the file cannot be opened or a read fails mid-stream.
pub fn compute_file_digest(path: &Path, buffer: &mut [u8]) -> Result<String> {
    let hash_err = |e: io::Error| EngineError::Hash {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(hash_err)?;
    let mut hasher = Sha256::new();
    loop {
        match file.read(buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(hash_err(e)),
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 of a file with a freshly allocated chunk buffer.
pub fn digest_file(path: &Path, chunk_size: usize) -> Result<String> {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    compute_file_digest(path, &mut buffer)
}

fn needs_escape(text: &str) -> bool {
    text.contains(['\\', '\n', '\r'])
}

/// Escape backslash, newline and carriage return so `text` fits on one line.
pub fn escape_field(text: &str) -> Cow<'_, str> {
    if !needs_escape(text) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape_field`]. Returns `None` for an unknown or dangling escape.
pub fn unescape_field(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

/// Identifying comment lines written at the top of a ledger.
#[derive(Debug, Clone)]
pub struct LedgerHeader<'a> {
    pub role: LedgerRole,
    pub package_name: &'a str,
    pub technician: &'a str,
    pub started_at: &'a str,
}

/// Append-only ledger file.
///
/// Every line is flushed before `append` returns.
pub struct LedgerWriter {
    path: PathBuf,
    out: BufWriter<File>,
    entries: usize,
}

impl LedgerWriter {
    /// Create a new ledger and write its header.
    ///
    /// # Errors
    /// `ArtifactExists` if a file with that name is already present (ledgers
    /// are never overwritten); `Io` for any other write failure.
    pub fn create(path: &Path, header: &LedgerHeader<'_>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| EngineError::io(path, e))?;
        let mut writer = LedgerWriter {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            entries: 0,
        };
        writer.write_line(&format!("# sha256 ledger ({})", header.role))?;
        writer.write_line(&format!("# started: {}", header.started_at))?;
        writer.write_line(&format!("# package: {}", escape_field(header.package_name)))?;
        writer.write_line(&format!("# technician: {}", escape_field(header.technician)))?;
        Ok(writer)
    }

    /// Append one entry; `None` writes the no-digest sentinel.
    pub fn append(&mut self, relative_path: &str, digest: Option<&str>) -> Result<()> {
        let digest = digest.unwrap_or(NO_DIGEST);
        let line = if needs_escape(relative_path) {
            format!("\\{}  *{}", digest, escape_field(relative_path))
        } else {
            format!("{}  *{}", digest, relative_path)
        };
        self.write_line(&line)?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write the completion trailer and close the ledger.
    pub fn finish(mut self, completed_at: &str) -> Result<PathBuf> {
        let trailer = format!("# completed: {} entries: {}", completed_at, self.entries);
        self.write_line(&trailer)?;
        Ok(self.path)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)
            .and_then(|()| self.out.flush())
            .map_err(|e| EngineError::io(&self.path, e))
    }
}

/// A parsed ledger.
#[derive(Debug, Default)]
pub struct LedgerContents {
    pub mapping: DigestMapping,
    /// Lines that could not be parsed; always `LedgerParse` errors.
    pub rejected: Vec<EngineError>,
    /// True if the completion trailer was present.
    pub complete: bool,
}

/// Parse ledger text.
///
/// Comment lines (`#`) and blank lines are ignored. Each entry line is a
/// digest token, whitespace, then the path with an optional leading `*`.
/// Lines with fewer than two tokens, or whose first token is neither a
/// digest nor the no-digest sentinel, are rejected and skipped. A line that
/// starts with `\\` carries an escaped path; a bad escape rejects the line.
pub fn parse_ledger(content: &str) -> LedgerContents {
    let mut contents = LedgerContents::default();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if comment.trim_start().starts_with("completed:") {
                contents.complete = true;
            }
            continue;
        }

        let entry = line.trim_start();
        let (escaped, entry) = match entry.strip_prefix('\\') {
            Some(body) => (true, body),
            None => (false, entry),
        };
        let Some((token, rest)) = entry.split_once(char::is_whitespace) else {
            contents.rejected.push(EngineError::LedgerParse {
                line_no,
                reason: "expected a digest and a path".to_string(),
            });
            continue;
        };
        let rest = rest.trim_start();
        let path_text = rest.strip_prefix('*').unwrap_or(rest);
        if path_text.is_empty() {
            contents.rejected.push(EngineError::LedgerParse {
                line_no,
                reason: "expected a digest and a path".to_string(),
            });
            continue;
        }

        let digest = if token == NO_DIGEST {
            None
        } else if is_hex_digest(token) {
            Some(token.to_string())
        } else {
            contents.rejected.push(EngineError::LedgerParse {
                line_no,
                reason: format!("not a sha256 digest: {}", token),
            });
            continue;
        };
        let relative_path = if escaped {
            match unescape_field(path_text) {
                Some(path) => path,
                None => {
                    contents.rejected.push(EngineError::LedgerParse {
                        line_no,
                        reason: format!("bad escape in path: {}", path_text),
                    });
                    continue;
                }
            }
        } else {
            path_text.to_string()
        };
        contents.mapping.insert(relative_path, digest);
    }

    contents
}

/// Load a ledger file into a DigestMapping, logging and skipping bad lines.
///
/// # Errors
/// `Io` if the file cannot be read.
pub fn read_ledger(path: &Path) -> Result<DigestMapping> {
    let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
    let parsed = parse_ledger(&content);
    for err in &parsed.rejected {
        tracing::warn!(ledger = %path.display(), error = %err, "skipping ledger line");
    }
    if !parsed.complete {
        tracing::warn!(
            ledger = %path.display(),
            "ledger has no completion trailer; it may be partial"
        );
    }
    Ok(parsed.mapping)
}

/// Result of hashing one tree.
#[derive(Debug, Clone)]
pub struct HashedTree {
    pub mapping: DigestMapping,
    pub ledger_path: PathBuf,
}

/// Hash `files` under `root` in relative-path order, writing the
/// `<role>_<stamp>.txt` ledger into `root` as each digest is computed.
///
/// A file that cannot be read is logged and recorded with the no-digest
/// sentinel; the pass continues.
///
/// # Errors
/// Only ledger creation or write failures.
pub fn hash_tree(
    root: &Path,
    files: &[FileRecord],
    role: LedgerRole,
    package_name: &str,
    ctx: &RunContext,
    progress: &dyn ProgressCallback,
) -> Result<HashedTree> {
    let ledger_path = root.join(role.ledger_file_name(&ctx.stamp));
    let started_at = local_timestamp();
    let mut ledger = LedgerWriter::create(
        &ledger_path,
        &LedgerHeader {
            role,
            package_name,
            technician: &ctx.technician,
            started_at: &started_at,
        },
    )?;
    tracing::info!(ledger = %ledger_path.display(), files = files.len(), "hashing {} tree", role);

    let mut ordered: Vec<&FileRecord> = files.iter().collect();
    ordered.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let stage = match role {
        LedgerRole::Source => Stage::HashSource,
        LedgerRole::Destination => Stage::HashDestination,
    };
    let mut tracker = StageTracker::start(
        stage,
        ordered.len(),
        ctx.config.hash_progress_interval,
        progress,
    );
    let mut buffer = vec![0u8; ctx.config.chunk_size];
    let mut mapping = DigestMapping::new();

    for record in ordered {
        let path = root.join(&record.native_path);
        let digest = match compute_file_digest(&path, &mut buffer) {
            Ok(digest) => Some(digest),
            Err(e) => {
                tracing::warn!(path = %record.relative_path, error = %e, "no digest recorded");
                None
            }
        };
        ledger.append(&record.relative_path, digest.as_deref())?;
        mapping.insert(record.relative_path.clone(), digest);
        tracker.advance(&record.relative_path);
    }
    tracker.finish();

    let ledger_path = ledger.finish(&local_timestamp())?;
    Ok(HashedTree {
        mapping,
        ledger_path,
    })
}
