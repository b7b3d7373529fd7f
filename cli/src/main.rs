//! privxfer - Command-line interface for the transfer engine.
//!
//! A thin driver for manual use and smoke testing: back privileged trees up
//! into a document tree, restore them, and look up mount paths.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use privxfer_engine::{
    ensure_directory, DocumentHandle, EngineConfig, EngineError, EntryOutcome, EntryState, FsDocumentTree,
    LocalShell, MountPathResolver, ParallelRunner, PrivilegedShell, TransferProgress, TransferReport, TreeTransfer,
    WritablePath,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// privxfer - copy directory trees across a privilege boundary
#[derive(Parser, Debug)]
#[command(name = "privxfer")]
#[command(version = "0.1.0")]
#[command(about = "Copy directory trees between privileged locations and a document tree")]
struct Args {
    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy privileged directories into a document tree
    Backup {
        /// Privileged source directory (repeatable)
        #[arg(long = "src", value_name = "DIR", required = true, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Directory holding the document tree
        #[arg(long, value_name = "DIR")]
        dst: PathBuf,

        /// Number of sources transferred at once (overrides the config)
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,

        /// Command launcher for privileged commands, e.g. "su -c"
        #[arg(long, value_name = "LAUNCHER")]
        shell: Option<String>,
    },

    /// Copy a document tree back onto the privileged filesystem
    Restore {
        /// Directory holding the document tree
        #[arg(long, value_name = "DIR")]
        src: PathBuf,

        /// Privileged destination directory
        #[arg(long, value_name = "DIR")]
        dst: PathBuf,

        /// Command launcher for privileged commands, e.g. "su -c"
        #[arg(long, value_name = "LAUNCHER")]
        shell: Option<String>,
    },

    /// Print the real mount path of a logical storage location
    Resolve {
        #[arg(long)]
        user: String,

        #[arg(long, required_unless_present = "android")]
        storage: Option<String>,

        #[arg(long, default_value = "")]
        subpath: String,

        /// Resolve inside the user's Android folder instead of a shadow mount
        #[arg(long)]
        android: bool,
    },
}

/// How a successful command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Clean,
    /// Some entries or units failed, or nothing was found
    Incomplete,
}

/// CLI implementation of TransferProgress for displaying transfer progress
struct CliProgress {
    verbose: bool,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress { verbose }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl TransferProgress for CliProgress {
    fn on_transfer_started(&self, report: &TransferReport) {
        eprintln!("Starting transfer: {} -> {}", report.source, report.destination);
    }

    fn on_entry_started(&self, _report: &TransferReport, entry: &EntryOutcome) {
        if self.verbose {
            eprintln!("  Starting: {}", entry.path);
        }
    }

    fn on_entry_completed(&self, _report: &TransferReport, entry: &EntryOutcome) {
        if self.verbose {
            let status = match entry.state {
                EntryState::Done => "Done",
                EntryState::Skipped => "Skipped",
                EntryState::Failed => "Failed",
                _ => "Unknown",
            };
            eprintln!("  {}: {}", status, entry.path);
        }
    }

    fn on_transfer_completed(&self, report: &TransferReport) {
        let counts = report.counts();
        let elapsed = report
            .finished_at
            .and_then(|finished| (finished - report.started_at).to_std().ok())
            .unwrap_or_default();

        eprintln!("Transfer complete: {}", report.source);
        eprintln!(
            "  Summary: {} done, {} skipped, {} failed",
            counts.done, counts.skipped, counts.failed
        );
        eprintln!(
            "  Bytes copied: {} of {}",
            Self::format_bytes(report.total_bytes_copied),
            Self::format_bytes(report.total_bytes_expected)
        );
        eprintln!("  Elapsed: {}", Self::format_duration(elapsed));

        if counts.failed > 0 {
            eprintln!("  Failed entries:");
            for entry in report.failed_entries() {
                let msg = entry.error_message.as_deref().unwrap_or("(unknown error)");
                eprintln!("    {}: {}", entry.path, msg);
            }
        }
    }
}

/// Parse arguments, set up logging, then run the command
fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match run_cli(&args) {
        Ok(Status::Clean) => 0,
        Ok(Status::Incomplete) => 1,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<Status> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    debug!(?config, "loaded configuration");

    match &args.command {
        Command::Backup {
            sources,
            dst,
            jobs,
            shell,
        } => backup(&config, sources, dst, *jobs, shell.as_deref(), args.verbose),
        Command::Restore { src, dst, shell } => restore(&config, src, dst, shell.as_deref(), args.verbose),
        Command::Resolve {
            user,
            storage,
            subpath,
            android,
        } => {
            let resolver = MountPathResolver::new(config.mounts.clone());
            let found = if *android {
                resolver.resolve_android_folder(user, subpath, &WritablePath)
            } else {
                resolver.resolve_shadow(user, storage.as_deref().unwrap_or_default(), subpath)
            };
            match found {
                Some(path) => {
                    println!("{}", path.display());
                    Ok(Status::Clean)
                }
                None => {
                    println!("not found");
                    Ok(Status::Incomplete)
                }
            }
        }
    }
}

fn build_shell(launcher: Option<&str>) -> LocalShell {
    match launcher {
        Some(launcher) => LocalShell::with_launcher(launcher.split_whitespace()),
        None => LocalShell::new(),
    }
}

fn backup(
    config: &EngineConfig,
    sources: &[PathBuf],
    dst: &Path,
    jobs: Option<usize>,
    launcher: Option<&str>,
    verbose: bool,
) -> Result<Status> {
    // Each source lands in a document directory named after it
    let mut names = HashMap::new();
    for source in sources {
        if let Some(name) = source.file_name() {
            if let Some(previous) = names.insert(name, source) {
                bail!(
                    "Sources {} and {} would both be backed up as {:?}",
                    previous.display(),
                    source.display(),
                    name
                );
            }
        }
    }

    let tree = FsDocumentTree::open(dst)
        .with_context(|| format!("Cannot open document tree at {}", dst.display()))?;
    let shell = build_shell(launcher);
    let progress = CliProgress::new(verbose);
    let runner = ParallelRunner::new(jobs.unwrap_or(config.concurrency));
    let start_time = Instant::now();

    let results = runner.run(sources.to_vec(), |source: PathBuf| -> Result<TransferReport, EngineError> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| EngineError::InvalidPath {
                path: source.clone(),
                reason: "source has no usable directory name".to_string(),
            })?;

        let entries = shell.list_tree(&source)?;
        let root = tree.root();
        let target = ensure_directory(&root, name).map_err(|e| EngineError::Document {
            op: "ensure_directory",
            location: root.location(),
            source: e,
        })?;

        Ok(TreeTransfer::new(&shell)
            .with_policy(config.reopen)
            .with_progress(&progress)
            .to_document(&entries, &target))
    });

    let mut status = Status::Clean;
    for (source, result) in sources.iter().zip(results) {
        match result {
            Ok(report) if report.counts().failed == 0 => {}
            Ok(_) => status = Status::Incomplete,
            Err(e) => {
                eprintln!("Backup of {} failed: {}", source.display(), e);
                status = Status::Incomplete;
            }
        }
    }
    eprintln!(
        "Backed up {} source(s) in {}",
        sources.len(),
        CliProgress::format_duration(start_time.elapsed())
    );
    Ok(status)
}

fn restore(config: &EngineConfig, src: &Path, dst: &Path, launcher: Option<&str>, verbose: bool) -> Result<Status> {
    if dst.exists() && !dst.is_dir() {
        bail!("Destination is not a directory: {}", dst.display());
    }
    let tree = FsDocumentTree::open(src)
        .with_context(|| format!("Cannot open document tree at {}", src.display()))?;
    let shell = build_shell(launcher);
    let progress = CliProgress::new(verbose);

    TreeTransfer::new(&shell)
        .with_policy(config.reopen)
        .with_progress(&progress)
        .from_document(&tree.root(), dst)
        .with_context(|| format!("Restore into {} failed", dst.display()))?;
    Ok(Status::Clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn backup_args(sources: Vec<PathBuf>, dst: &Path) -> Args {
        Args {
            config: None,
            verbose: false,
            command: Command::Backup {
                sources,
                dst: dst.to_path_buf(),
                jobs: Some(2),
                shell: None,
            },
        }
    }

    fn resolve_args(config: Option<PathBuf>, storage: &str, subpath: &str) -> Args {
        Args {
            config,
            verbose: false,
            command: Command::Resolve {
                user: "0".to_string(),
                storage: Some(storage.to_string()),
                subpath: subpath.to_string(),
                android: false,
            },
        }
    }

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("nested")).expect("Failed to create dir");
        fs::write(root.join("top.txt"), "hello").expect("Failed to write file");
        fs::write(root.join("nested/inner.bin"), vec![7u8; 3000]).expect("Failed to write file");
    }

    #[test]
    fn test_parse_repeated_sources() {
        let args = Args::try_parse_from([
            "privxfer", "backup", "--src", "/a", "--src", "/b", "--dst", "/out", "--shell", "su -c",
        ])
        .expect("arguments should parse");

        match args.command {
            Command::Backup { sources, shell, .. } => {
                assert_eq!(sources, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
                assert_eq!(shell.as_deref(), Some("su -c"));
            }
            other => panic!("Expected backup, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_resolve_requires_storage_unless_android() {
        assert!(Args::try_parse_from(["privxfer", "resolve", "--user", "0"]).is_err());
        assert!(Args::try_parse_from(["privxfer", "resolve", "--user", "0", "--android"]).is_ok());
    }

    #[test]
    fn test_backup_copies_each_source() {
        let first = TempDir::new().expect("Failed to create temp dir");
        let second = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        write_tree(first.path());
        fs::write(second.path().join("only.txt"), "second").expect("Failed to write file");

        let args = backup_args(vec![first.path().to_path_buf(), second.path().to_path_buf()], dst_dir.path());
        let status = run_cli(&args).expect("backup should succeed");
        assert_eq!(status, Status::Clean);

        let first_copy = dst_dir.path().join(first.path().file_name().expect("temp dir name"));
        assert_eq!(fs::read(first_copy.join("top.txt")).expect("copied file"), b"hello");
        assert_eq!(fs::read(first_copy.join("nested/inner.bin")).expect("copied file").len(), 3000);

        let second_copy = dst_dir.path().join(second.path().file_name().expect("temp dir name"));
        assert_eq!(fs::read(second_copy.join("only.txt")).expect("copied file"), b"second");
    }

    #[test]
    fn test_backup_missing_source_is_incomplete() {
        let good = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        write_tree(good.path());

        let args = backup_args(
            vec![PathBuf::from("/nonexistent/privxfer-source"), good.path().to_path_buf()],
            dst_dir.path(),
        );
        let status = run_cli(&args).expect("backup should still run");
        assert_eq!(status, Status::Incomplete);

        // The failing unit does not stop the other one
        let copy = dst_dir.path().join(good.path().file_name().expect("temp dir name"));
        assert!(copy.join("top.txt").exists());
    }

    #[test]
    fn test_backup_rejects_sources_with_same_name() {
        let parent_a = TempDir::new().expect("Failed to create temp dir");
        let parent_b = TempDir::new().expect("Failed to create temp dir");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        for parent in [&parent_a, &parent_b] {
            write_tree(&parent.path().join("files"));
        }

        let args = backup_args(
            vec![parent_a.path().join("files"), parent_b.path().join("files")],
            dst_dir.path(),
        );
        assert!(run_cli(&args).is_err(), "CLI should reject clashing source names");
        assert_eq!(fs::read_dir(dst_dir.path()).expect("list dst").count(), 0);
    }

    #[test]
    fn test_backup_rejects_missing_destination() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");

        let args = backup_args(vec![src_dir.path().to_path_buf()], Path::new("/nonexistent/privxfer-dst"));
        assert!(run_cli(&args).is_err(), "CLI should reject missing destination");
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_round_trip() {
        let src_dir = TempDir::new().expect("Failed to create temp dir");
        let docs = TempDir::new().expect("Failed to create temp dir");
        let restored = TempDir::new().expect("Failed to create temp dir");
        write_tree(src_dir.path());

        let status = run_cli(&backup_args(vec![src_dir.path().to_path_buf()], docs.path())).expect("backup");
        assert_eq!(status, Status::Clean);

        let target = restored.path().join("out");
        let args = Args {
            config: None,
            verbose: true,
            command: Command::Restore {
                src: docs.path().to_path_buf(),
                dst: target.clone(),
                shell: None,
            },
        };
        assert_eq!(run_cli(&args).expect("restore should succeed"), Status::Clean);

        let copy = target.join(src_dir.path().file_name().expect("temp dir name"));
        assert_eq!(fs::read(copy.join("top.txt")).expect("restored file"), b"hello");
        assert_eq!(
            fs::read(copy.join("nested/inner.bin")).expect("restored file"),
            vec![7u8; 3000]
        );
    }

    #[test]
    fn test_restore_rejects_missing_source() {
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let args = Args {
            config: None,
            verbose: false,
            command: Command::Restore {
                src: PathBuf::from("/nonexistent/privxfer-docs"),
                dst: dst_dir.path().to_path_buf(),
                shell: None,
            },
        };
        assert!(run_cli(&args).is_err(), "CLI should reject missing source");
    }

    #[test]
    fn test_resolve_uses_configured_candidates() {
        let mounts = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(mounts.path().join("sdcard/Android/data")).expect("Failed to create dir");

        let config_path = mounts.path().join("config.json");
        let template = format!("{}/{{storage}}/{{subpath}}", mounts.path().display());
        let config = format!(
            r#"{{"mounts": {{"candidates": {{"shadow": ["/nonexistent/{{storage}}/{{subpath}}", "{}"]}}}}}}"#,
            template
        );
        fs::write(&config_path, config).expect("Failed to write config");

        let found = run_cli(&resolve_args(Some(config_path.clone()), "sdcard", "Android/data")).expect("resolve");
        assert_eq!(found, Status::Clean);

        let missing = run_cli(&resolve_args(Some(config_path), "sdcard", "Android/missing")).expect("resolve");
        assert_eq!(missing, Status::Incomplete);
    }

    #[test]
    fn test_resolve_rejects_broken_config() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, "not json").expect("Failed to write config");

        assert!(run_cli(&resolve_args(Some(config_path), "sdcard", "")).is_err());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(1536), "1.50 KB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
