//! Command dispatch shared by the one-shot CLI and the interactive shell.
//!
//! Both front ends build an [`Action`] and hand it to [`dispatch`]; neither
//! calls the engine directly.

use engine::{
    audit_manifest, hash_package, relocate, run_pipeline, verify_against_ledger, AuditReport,
    EngineError, HashedTree, LedgerVerification, PipelineConfig, PipelineReport, ProgressCallback,
    Relocation, RunContext, TransferRequest, Verdict,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// Word the operator must type to allow copying into an existing destination.
pub const CONSENT_WORD: &str = "YES";

/// Exit code for a run that completed with a FAIL verdict.
pub const EXIT_FAIL: i32 = 1;

/// Exit code for a fatal error.
pub const EXIT_ERROR: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Copy,
    Hash,
    Verify,
    Audit,
    Relocate,
}

impl Verb {
    pub const ALL: [Verb; 5] = [Verb::Copy, Verb::Hash, Verb::Verify, Verb::Audit, Verb::Relocate];

    pub fn name(&self) -> &'static str {
        match self {
            Verb::Copy => "copy",
            Verb::Hash => "hash",
            Verb::Verify => "verify",
            Verb::Audit => "audit",
            Verb::Relocate => "relocate",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Verb::Copy => "Verified copy: hash, copy, re-hash, compare, manifest",
            Verb::Hash => "Write a checksum ledger for a folder",
            Verb::Verify => "Check a folder against an existing ledger",
            Verb::Audit => "Re-check the ledgers referenced by a manifest",
            Verb::Relocate => "Move a file or folder into another folder",
        }
    }

    /// Accepts the verb name or its 1-based menu number.
    pub fn parse(input: &str) -> Option<Verb> {
        let input = input.trim();
        if let Ok(n) = input.parse::<usize>() {
            return n.checked_sub(1).and_then(|i| Verb::ALL.get(i)).copied();
        }
        Verb::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(input))
    }

    /// Prompts the shell asks, in the order [`Action::from_fields`] expects.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Verb::Copy => &["Technician name", "Source top folder", "Destination parent"],
            Verb::Hash => &["Technician name", "Folder to hash"],
            Verb::Verify => &["Technician name", "Ledger file", "Folder to check"],
            Verb::Audit => &["Manifest file"],
            Verb::Relocate => &["Path to relocate", "Destination folder"],
        }
    }
}

/// A fully resolved request for one engine operation.
#[derive(Debug, Clone)]
pub enum Action {
    Copy {
        request: TransferRequest,
        technician: String,
    },
    Hash {
        root: PathBuf,
        technician: String,
    },
    Verify {
        ledger: PathBuf,
        root: PathBuf,
        technician: String,
    },
    Audit {
        manifest: PathBuf,
    },
    Relocate {
        path: PathBuf,
        dest_dir: PathBuf,
    },
}

impl Action {
    /// Build an action from answers to [`Verb::fields`].
    ///
    /// Returns `None` if the number of answers is wrong or any is empty.
    pub fn from_fields(verb: Verb, answers: &[String]) -> Option<Action> {
        if answers.len() != verb.fields().len() || answers.iter().any(|a| a.trim().is_empty()) {
            return None;
        }
        let text = |i: usize| answers[i].trim().to_string();
        let path = |i: usize| normalize_path(&answers[i]);

        Some(match verb {
            Verb::Copy => Action::Copy {
                technician: text(0),
                request: TransferRequest {
                    source: path(1),
                    destination_parent: path(2),
                    allow_overwrite: false,
                },
            },
            Verb::Hash => Action::Hash {
                technician: text(0),
                root: path(1),
            },
            Verb::Verify => Action::Verify {
                technician: text(0),
                ledger: path(1),
                root: path(2),
            },
            Verb::Audit => Action::Audit { manifest: path(0) },
            Verb::Relocate => Action::Relocate {
                path: path(0),
                dest_dir: path(1),
            },
        })
    }

    /// The same action with overwrite consent granted, if it is a copy.
    pub fn with_overwrite(&self) -> Option<Action> {
        match self {
            Action::Copy {
                request,
                technician,
            } => Some(Action::Copy {
                request: TransferRequest {
                    allow_overwrite: true,
                    ..request.clone()
                },
                technician: technician.clone(),
            }),
            _ => None,
        }
    }
}

/// What an action produced.
#[derive(Debug)]
pub enum Outcome {
    Copied(Box<PipelineReport>),
    Hashed(HashedTree),
    Verified(LedgerVerification),
    Audited(Box<AuditReport>),
    Relocated { target: PathBuf, how: Relocation },
}

impl Outcome {
    /// 0 on success or PASS, [`EXIT_FAIL`] when verification failed.
    pub fn exit_code(&self) -> i32 {
        let passed = match self {
            Outcome::Copied(report) => report.verdict() == Verdict::Pass,
            Outcome::Verified(check) => check.summary.verdict() == Verdict::Pass,
            Outcome::Audited(report) => {
                report.ledgers_intact() && report.manifest.result == Verdict::Pass
            }
            Outcome::Hashed(_) | Outcome::Relocated { .. } => true,
        };
        if passed {
            0
        } else {
            EXIT_FAIL
        }
    }

    /// Human-readable result summary.
    pub fn write_summary(&self, out: &mut dyn Write) -> io::Result<()> {
        match self {
            Outcome::Copied(report) => {
                let s = &report.summary;
                writeln!(out, "Destination: {}", report.destination_root.display())?;
                writeln!(
                    out,
                    "Copied: {} files, {} failed",
                    report.copy.copied.len(),
                    report.copy.failed.len()
                )?;
                writeln!(
                    out,
                    "Verification: {} matched, {} mismatched, {} missing, {} extra",
                    s.matched, s.mismatched, s.missing_in_destination, s.extra_in_destination
                )?;
                for path in &s.samples.mismatched {
                    writeln!(out, "  mismatched: {}", path)?;
                }
                for path in &s.samples.missing_in_destination {
                    writeln!(out, "  missing: {}", path)?;
                }
                for path in &s.samples.extra_in_destination {
                    writeln!(out, "  extra: {}", path)?;
                }
                writeln!(out, "Manifest: {}", report.manifest_path.display())?;
                writeln!(out, "Result: {}", report.verdict())?;
            }
            Outcome::Hashed(hashed) => {
                writeln!(out, "Ledger: {}", hashed.ledger_path.display())?;
                writeln!(
                    out,
                    "Files: {} ({} without digest)",
                    hashed.mapping.len(),
                    hashed.mapping.unhashed_count()
                )?;
            }
            Outcome::Verified(check) => {
                let s = &check.summary;
                writeln!(out, "Ledger written: {}", check.ledger_path.display())?;
                writeln!(
                    out,
                    "Verification: {} matched, {} mismatched, {} missing, {} extra",
                    s.matched, s.mismatched, s.missing_in_destination, s.extra_in_destination
                )?;
                writeln!(out, "Result: {}", s.verdict())?;
            }
            Outcome::Audited(report) => {
                let checks = [("source", &report.source), ("destination", &report.destination)];
                for (role, check) in checks {
                    let state = if check.is_intact() { "intact" } else { "ALTERED OR MISSING" };
                    writeln!(out, "{} ledger {}: {}", role, check.path.display(), state)?;
                }
                writeln!(out, "Recorded result: {}", report.manifest.result)?;
            }
            Outcome::Relocated { target, how } => {
                let how = match how {
                    Relocation::Moved => "moved",
                    Relocation::CopiedThenRemoved => "copied then removed",
                };
                writeln!(out, "Relocated to {} ({})", target.display(), how)?;
            }
        }
        Ok(())
    }
}

/// Strip surrounding quotes left by drag-and-drop and expand a leading `~`.
pub fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| trimmed.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
        .unwrap_or(trimmed);

    if let Some(rest) = unquoted.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = std::env::var_os("HOME") {
                return Path::new(&home).join(rest.trim_start_matches('/'));
            }
        }
    }
    PathBuf::from(unquoted)
}

/// Run one action against the engine.
pub fn dispatch(
    action: &Action,
    config: &PipelineConfig,
    progress: &dyn ProgressCallback,
) -> engine::Result<Outcome> {
    match action {
        Action::Copy {
            request,
            technician,
        } => {
            let ctx = RunContext::new(technician.as_str(), config.clone());
            run_pipeline(request, &ctx, progress).map(|r| Outcome::Copied(Box::new(r)))
        }
        Action::Hash { root, technician } => {
            let ctx = RunContext::new(technician.as_str(), config.clone());
            hash_package(root, &ctx, progress).map(Outcome::Hashed)
        }
        Action::Verify {
            ledger,
            root,
            technician,
        } => {
            let ctx = RunContext::new(technician.as_str(), config.clone());
            verify_against_ledger(ledger, root, &ctx, progress).map(Outcome::Verified)
        }
        Action::Audit { manifest } => {
            audit_manifest(manifest, config.chunk_size).map(|r| Outcome::Audited(Box::new(r)))
        }
        Action::Relocate { path, dest_dir } => {
            let how = relocate(path, dest_dir)?;
            let target = match path.file_name() {
                Some(name) => dest_dir.join(name),
                None => dest_dir.clone(),
            };
            Ok(Outcome::Relocated { target, how })
        }
    }
}

/// Line-oriented interactive front end.
pub struct Shell<'a, R, W> {
    input: R,
    output: W,
    config: &'a PipelineConfig,
    progress: &'a dyn ProgressCallback,
}

impl<'a, R: BufRead, W: Write> Shell<'a, R, W> {
    pub fn new(
        input: R,
        output: W,
        config: &'a PipelineConfig,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Shell {
            input,
            output,
            config,
            progress,
        }
    }

    /// Print `label` and read one trimmed line. `None` on end of input.
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", label)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn print_menu(&mut self) -> io::Result<()> {
        writeln!(self.output)?;
        for (i, verb) in Verb::ALL.iter().enumerate() {
            writeln!(self.output, "  {}) {:<9} {}", i + 1, verb.name(), verb.describe())?;
        }
        writeln!(self.output, "  q) quit")
    }

    /// Run until `quit` or end of input. Returns the exit code of the last command.
    pub fn run(&mut self) -> io::Result<i32> {
        let mut last_code = 0;
        loop {
            self.print_menu()?;
            let Some(choice) = self.prompt("> ")? else {
                break;
            };
            if choice.is_empty() {
                continue;
            }
            if matches!(choice.to_ascii_lowercase().as_str(), "q" | "quit" | "exit") {
                break;
            }
            let Some(verb) = Verb::parse(&choice) else {
                writeln!(self.output, "Unknown command: {}", choice)?;
                continue;
            };

            let mut answers = Vec::new();
            for field in verb.fields() {
                match self.prompt(&format!("{}: ", field))? {
                    Some(answer) => answers.push(answer),
                    None => return Ok(last_code),
                }
            }
            let Some(action) = Action::from_fields(verb, &answers) else {
                writeln!(self.output, "All fields are required; {} cancelled", verb.name())?;
                continue;
            };
            last_code = self.execute(&action)?;
        }
        Ok(last_code)
    }

    fn execute(&mut self, action: &Action) -> io::Result<i32> {
        let result = match dispatch(action, self.config, self.progress) {
            Err(EngineError::DestinationExists { path }) => match action.with_overwrite() {
                Some(consented) => {
                    writeln!(self.output, "Destination already exists: {}", path.display())?;
                    let label = format!(
                        "Type '{}' to proceed and allow overwrites, or press Enter to cancel: ",
                        CONSENT_WORD
                    );
                    if self.prompt(&label)?.as_deref() != Some(CONSENT_WORD) {
                        writeln!(self.output, "Cancelled")?;
                        return Ok(EXIT_ERROR);
                    }
                    dispatch(&consented, self.config, self.progress)
                }
                None => Err(EngineError::DestinationExists { path }),
            },
            other => other,
        };

        match result {
            Ok(outcome) => {
                outcome.write_summary(&mut self.output)?;
                Ok(outcome.exit_code())
            }
            Err(e) => {
                tracing::error!(error = %e, "command failed");
                writeln!(self.output, "Error: {}", e)?;
                Ok(EXIT_ERROR)
            }
        }
    }
}
