/// Dialogue Linter: validates the structure of dialogue templates.
///
/// Usage: dialogue_linter <file_or_dir> [--deny-warnings]
///
/// Per-file results are logged; set RUST_LOG=warn to only see problems.

use dialogue_engine::core::validation::{validate_structure, ValidationResult};
use dialogue_engine::schema::template::DialogueTemplate;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, warn};

/// Problems found in one file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LintCounts {
    errors: usize,
    warnings: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: dialogue_linter <file_or_dir> [--deny-warnings]");
        process::exit(0);
    }

    let target = Path::new(&args[1]);
    let deny_warnings = args[2..].iter().any(|a| a == "--deny-warnings");

    let files = if target.is_file() {
        vec![target.to_path_buf()]
    } else if target.is_dir() {
        let mut files = Vec::new();
        collect_dialogue_files(target, &mut files);
        files.sort();
        files
    } else {
        error!(path = %target.display(), "path does not exist");
        process::exit(1);
    };

    info!(files = files.len(), "linting dialogues");

    let mut total = LintCounts::default();
    for path in &files {
        let counts = lint_file(path);
        total.errors += counts.errors;
        total.warnings += counts.warnings;
    }

    println!(
        "Summary: {} files, {} errors, {} warnings",
        files.len(),
        total.errors,
        total.warnings
    );

    if total.errors > 0 || (deny_warnings && total.warnings > 0) {
        process::exit(1);
    }
}

fn lint_file(path: &Path) -> LintCounts {
    let template = match DialogueTemplate::load(path) {
        Ok(t) => t,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to load");
            return LintCounts {
                errors: 1,
                warnings: 0,
            };
        }
    };

    match validate_structure(&template) {
        ValidationResult::Valid => {
            info!(path = %path.display(), "ok");
            LintCounts::default()
        }
        ValidationResult::Warnings(found) => {
            for w in &found {
                warn!(path = %path.display(), "{}", w);
            }
            LintCounts {
                errors: 0,
                warnings: found.len(),
            }
        }
        ValidationResult::Error(e) => {
            error!(path = %path.display(), "{}", e);
            LintCounts {
                errors: 1,
                warnings: 0,
            }
        }
    }
}

fn collect_dialogue_files(dir: &Path, files: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_dialogue_files(&path, files);
            } else if matches!(
                path.extension().and_then(|s| s.to_str()),
                Some("ron") | Some("json")
            ) {
                files.push(path);
            }
        }
    }
}
