//! Error types for bundle assembly.
//!
//! Every variant aborts the assembly of the bundle it was raised for. There is
//! no partial-success path: callers either get a complete plan (or image) or
//! one of these errors wrapped in a [`PipelineError`] naming the stage.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving, planning, staging or building a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The device configuration lists no native device architecture.
    #[error("device build with no primary arch")]
    NoDeviceArch,

    #[error("unknown architecture '{0}'")]
    UnknownArch(String),

    #[error("invalid configuration '{path}': {message}")]
    Config { path: PathBuf, message: String },

    #[error("invalid bundle definition '{path}': {message}")]
    Definition { path: PathBuf, message: String },

    #[error("invalid module graph '{path}': {message}")]
    ModuleGraph { path: PathBuf, message: String },

    #[error("module '{0}' is defined twice")]
    DuplicateModule(String),

    /// A declared dependency names a module the graph does not know.
    #[error("{category} dependency '{name}' does not exist")]
    UnknownModule { category: String, name: String },

    /// The module exists but has no variant matching the requested variations.
    #[error("module '{name}' has no variant matching [{variations}]")]
    NoMatchingVariant { name: String, variations: String },

    /// The module exists but is not of the kind the dependency tag expects.
    #[error("module '{name}' is a {actual}, but was declared as a {expected} dependency")]
    ModuleKindMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("module '{name}' produces no output")]
    NoOutputs { name: String },

    /// Two different sources resolve to the same in-image destination.
    #[error(
        "layout conflict at '{destination}': '{existing}' and '{incoming}' both map there"
    )]
    LayoutConflict {
        destination: PathBuf,
        existing: PathBuf,
        incoming: PathBuf,
    },

    /// A path is used both as a file and as a directory inside the image.
    #[error("'{path}' is used both as a file and as a directory in the image")]
    PathKindCollision { path: PathBuf },

    #[error("invalid sub-directory '{sub_dir}' for '{name}': {reason}")]
    InvalidSubDir {
        name: String,
        sub_dir: String,
        reason: String,
    },

    /// A declared input of the image build does not exist.
    #[error("missing input '{0}'")]
    MissingInput(PathBuf),

    #[error("staged image differs from the layout plan: {0}")]
    StagedTreeMismatch(String),

    #[error("host tools not found in '{}': {}", .dir.display(), .tools.join(", "))]
    ToolNotFound { tools: Vec<String>, dir: PathBuf },

    /// The tool could not be started at all.
    #[error("launching '{program}': {source}")]
    ToolLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The image builder exited unsuccessfully.
    #[error("'{program}' failed (exit code {code}){}", format_stderr(.stderr))]
    ToolFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("invalid manifest '{path}': {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("output '{0}' is locked by another build")]
    OutputLocked(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serializing {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{trimmed}")
    }
}

impl BundleError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Layout,
    Metadata,
    Invoke,
    Staging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Resolve => write!(f, "resolve"),
            Stage::Layout => write!(f, "layout"),
            Stage::Metadata => write!(f, "metadata"),
            Stage::Invoke => write!(f, "invoke"),
            Stage::Staging => write!(f, "staging"),
        }
    }
}

/// A [`BundleError`] tagged with the bundle and stage that failed.
#[derive(Debug, Error)]
#[error("bundle '{bundle}' failed at {stage} stage: {source}")]
pub struct PipelineError {
    pub bundle: String,
    pub stage: Stage,
    #[source]
    pub source: BundleError,
}

impl PipelineError {
    pub fn new(bundle: impl Into<String>, stage: Stage, source: BundleError) -> Self {
        Self {
            bundle: bundle.into(),
            stage,
            source,
        }
    }
}

pub type Result<T, E = BundleError> = std::result::Result<T, E>;
