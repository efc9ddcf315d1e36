//! The declarative catalog: resources, dependencies, and their payloads.
//!
//! A [`Catalog`] is the input to both the applier and the script generator.
//! Records are immutable after load. The engine consumes the decoded value
//! and does not depend on the serialization; the serde surface here is the
//! reference codec used by the CLI front-ends.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Unique, nonzero identifier of a resource within a catalog.
pub type ResourceId = u64;

/// A decoded catalog: an ordered list of resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Resources in catalog order. Order seeds the scheduler's tie-breaking
    /// but carries no semantic meaning beyond the dependency edges.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Catalog {
    /// Decode a catalog from a reader.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Decode`] when the bytes are not a valid
    /// catalog.
    pub fn from_reader(r: impl Read) -> Result<Self, CatalogError> {
        Ok(serde_json::from_reader(r)?)
    }

    /// Load a catalog from `path`, or from standard input when `path` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] when the source cannot be read and
    /// [`CatalogError::Decode`] when it cannot be decoded.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(p) => {
                let file = std::fs::File::open(p).map_err(|source| CatalogError::Io {
                    path: p.display().to_string(),
                    source,
                })?;
                Self::from_reader(std::io::BufReader::new(file))
            }
            None => Self::from_reader(std::io::stdin().lock()),
        }
    }
}

/// One unit of desired state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Unique nonzero id.
    pub id: ResourceId,
    /// Optional human-readable label used in log messages.
    #[serde(default)]
    pub comment: String,
    /// Ids of resources that must complete before this one starts.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// What kind of state this resource declares.
    pub payload: Payload,
}

impl Resource {
    /// Human-readable description for log lines: `comment (id=N)` when a
    /// comment is present, `id=N` otherwise.
    #[must_use]
    pub fn description(&self) -> String {
        if self.comment.is_empty() {
            format!("id={}", self.id)
        } else {
            format!("{} (id={})", self.comment, self.id)
        }
    }
}

/// The state a resource declares, discriminated by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// No state to reconcile; its changed-bit is the OR of its dependencies'.
    Noop,
    /// A filesystem node.
    File(File),
    /// A command with an execution condition.
    Exec(Exec),
}

/// A filesystem resource: a path plus the state it should be in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    /// Absolute path of the node.
    pub path: PathBuf,
    /// Desired state of the node.
    pub state: FileState,
}

/// Desired state of a filesystem node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// A regular file. Without `content`, the file is asserted to exist and
    /// is never written.
    Plain {
        /// Exact bytes the file should hold, when managed.
        #[serde(default)]
        content: Option<Vec<u8>>,
        /// Permissions and ownership to enforce.
        #[serde(default)]
        mode: Mode,
    },
    /// A directory.
    Directory {
        /// Permissions and ownership to enforce.
        #[serde(default)]
        mode: Mode,
    },
    /// A symbolic link pointing at `target`.
    Symlink {
        /// Link target, stored verbatim.
        target: PathBuf,
    },
    /// Nothing may exist at the path.
    Absent,
}

/// Permission bits and ownership to enforce on a node.
///
/// Each part is independently optional; a wholly unset mode is skipped by the
/// applier without touching the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    /// Permission bits: the rwx triads plus sticky/setuid/setgid (lowest 12
    /// bits). `None` leaves the node's bits alone.
    #[serde(default)]
    pub bits: Option<u32>,
    /// Owning user.
    #[serde(default)]
    pub user: OwnerRef,
    /// Owning group.
    #[serde(default)]
    pub group: OwnerRef,
}

/// Mask of the mode bits the engine manages.
pub const MODE_BITS_MASK: u32 = 0o7777;

impl Mode {
    /// Whether every part of the mode is unset.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.bits.is_none() && self.user.is_unset() && self.group.is_unset()
    }
}

/// Reference to a user or group: unset, a numeric id, or a name requiring
/// lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRef {
    /// Leave this axis alone.
    #[default]
    Unset,
    /// Numeric uid/gid.
    Id(u32),
    /// Name to resolve through the system's user/group database.
    Name(String),
}

impl OwnerRef {
    /// Whether this reference leaves its axis untouched.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

/// A command to execute, with its environment and working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// How the process is invoked.
    #[serde(flatten)]
    pub line: CommandLine,
    /// Environment entries in catalog order, passed verbatim.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Absolute working directory; the system root when absent.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

/// Invocation style of a [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandLine {
    /// Explicit argument vector; argv[0] must be an absolute path.
    Argv(Vec<String>),
    /// Script body fed to the configured bash interpreter on stdin.
    Bash(String),
}

/// One `NAME=VALUE` environment entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name; must be non-empty.
    pub name: String,
    /// Variable value.
    #[serde(default)]
    pub value: String,
}

/// When an exec resource's command runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Run unconditionally.
    #[default]
    Always,
    /// Run iff the probe command exits zero.
    OnlyIf(Command),
    /// Run iff the probe command exits nonzero.
    Unless(Command),
    /// Run iff nothing exists at the path.
    FileAbsent(PathBuf),
    /// Run iff any listed direct dependency reported a change.
    IfDepsChanged(Vec<ResourceId>),
}

/// A command plus the condition gating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exec {
    /// The command to run when the condition holds.
    pub command: Command,
    /// When to run it.
    #[serde(default)]
    pub condition: Condition,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
