//! Dialogue library: validated templates by id, and the sessions started
//! from them.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::machine::{DialogueStateMachine, MachineError, MachineRole, ResumePoint};
use crate::core::validation::{validate_structure, ValidationResult};
use crate::schema::template::{DialogueTemplate, TemplateError};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        source: TemplateError,
    },
    #[error("dialogue '{0}' is defined more than once")]
    Duplicate(String),
    #[error("dialogue '{id}' is invalid: {message}")]
    Invalid { id: String, message: String },
    #[error("dialogue '{id}' has warnings: {message}")]
    Warnings { id: String, message: String },
    #[error("unknown dialogue '{0}'")]
    UnknownDialogue(String),
    #[error(transparent)]
    Machine(#[from] MachineError),
}

/// Validated templates keyed by dialogue id. Built via
/// `DialogueLibrary::builder()`.
#[derive(Debug)]
pub struct DialogueLibrary {
    templates: FxHashMap<String, Arc<DialogueTemplate>>,
    seed: Option<u64>,
    sessions: AtomicU64,
}

/// Builder for constructing a `DialogueLibrary`.
#[derive(Debug, Default)]
pub struct DialogueLibraryBuilder {
    dialogues_dir: Option<PathBuf>,
    templates: Vec<(String, DialogueTemplate)>,
    seed: Option<u64>,
    deny_warnings: bool,
}

impl DialogueLibrary {
    pub fn builder() -> DialogueLibraryBuilder {
        DialogueLibraryBuilder::default()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<DialogueTemplate>> {
        self.templates.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Dialogue ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Start an authoritative session of dialogue `id`, at `start` or at
    /// the template's start state.
    pub fn start(
        &self,
        id: &str,
        start: Option<&str>,
    ) -> Result<DialogueStateMachine, LibraryError> {
        self.open(id, start, MachineRole::Authoritative)
    }

    /// Rebuild an authoritative session from a persisted resume point.
    pub fn resume(&self, point: &ResumePoint) -> Result<DialogueStateMachine, LibraryError> {
        self.start(&point.dialogue_id, Some(&point.state_key))
    }

    /// Open a mirror session of dialogue `id`.
    pub fn mirror(
        &self,
        id: &str,
        start: Option<&str>,
    ) -> Result<DialogueStateMachine, LibraryError> {
        self.open(id, start, MachineRole::Mirror)
    }

    fn open(
        &self,
        id: &str,
        start: Option<&str>,
        role: MachineRole,
    ) -> Result<DialogueStateMachine, LibraryError> {
        let template = self
            .get(id)
            .ok_or_else(|| LibraryError::UnknownDialogue(id.to_string()))?;
        let rng = match self.seed {
            Some(seed) => {
                let n = self.sessions.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed.wrapping_add(n))
            }
            None => StdRng::from_entropy(),
        };
        Ok(DialogueStateMachine::with_rng(
            id,
            Arc::clone(template),
            start,
            role,
            rng,
        )?)
    }
}

impl DialogueLibraryBuilder {
    /// Load every `.ron` and `.json` file in `path`; the file stem is the id.
    pub fn dialogues_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.dialogues_dir = Some(path.into());
        self
    }

    /// Provide a template directly (for testing without files).
    pub fn with_template(mut self, id: impl Into<String>, template: DialogueTemplate) -> Self {
        self.templates.push((id.into(), template));
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject templates that validate with warnings.
    pub fn deny_warnings(mut self, deny: bool) -> Self {
        self.deny_warnings = deny;
        self
    }

    pub fn build(self) -> Result<DialogueLibrary, LibraryError> {
        let mut templates = FxHashMap::default();

        let mut loaded = Vec::new();
        if let Some(ref dir) = self.dialogues_dir {
            load_files_from_dir(dir, |id, path| {
                let template = DialogueTemplate::load(path).map_err(|source| LibraryError::Load {
                    path: path.to_path_buf(),
                    source,
                })?;
                loaded.push((id, template));
                Ok(())
            })?;
        }

        for (id, template) in loaded.into_iter().chain(self.templates) {
            if templates.contains_key(&id) {
                return Err(LibraryError::Duplicate(id));
            }
            match validate_structure(&template) {
                ValidationResult::Valid => {}
                ValidationResult::Warnings(warnings) => {
                    for w in &warnings {
                        warn!(dialogue = %id, "{}", w);
                    }
                    if self.deny_warnings {
                        let message = ValidationResult::Warnings(warnings).message();
                        return Err(LibraryError::Warnings { id, message });
                    }
                }
                ValidationResult::Error(e) => {
                    return Err(LibraryError::Invalid {
                        id,
                        message: e.to_string(),
                    });
                }
            }
            templates.insert(id, Arc::new(template));
        }

        info!(dialogues = templates.len(), "dialogue library loaded");

        Ok(DialogueLibrary {
            templates,
            seed: self.seed,
            sessions: AtomicU64::new(0),
        })
    }
}

/// Load all .ron and .json files from a directory, calling `loader` with
/// each file's stem and path.
fn load_files_from_dir<F>(dir: &Path, mut loader: F) -> Result<(), LibraryError>
where
    F: FnMut(String, &Path) -> Result<(), LibraryError>,
{
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("ron") | Some("json")
        ) {
            paths.push(path);
        }
    }
    // read_dir order is platform dependent
    paths.sort();

    for path in paths {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        loader(id, &path)?;
    }
    Ok(())
}
