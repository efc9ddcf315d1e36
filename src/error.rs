//! Domain-specific error types for the convergence engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Library modules return typed errors while the command handlers at the CLI
//! boundary convert them to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! CatalogError  — catalog file I/O and decoding
//! GraphError    — dependency graph construction (zero id, unknown dep, cycle)
//! ResourceError — single-resource convergence failures
//! ApplyError    — whole-run outcomes (stuck graph, cancellation, summary)
//! ```

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::catalog::ResourceId;

/// Errors that arise while reading and decoding a catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// An I/O error occurred while reading the catalog.
    #[error("read catalog {path}: {source}")]
    Io {
        /// Path to the catalog that could not be read (`<stdin>` for stdin).
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The catalog bytes could not be decoded into the resource list.
    #[error("decode catalog: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors that arise while building the dependency graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A resource declared the reserved id 0.
    #[error("build dependency graph: encountered resource with id=0")]
    ZeroId,

    /// A dependency list referenced an id not present in the catalog.
    #[error("build dependency graph: unknown dependency id {dependency} requested by resource {dependent}")]
    UnknownDependency {
        /// The missing id.
        dependency: ResourceId,
        /// A resource that requested it.
        dependent: ResourceId,
    },

    /// The dependency graph contains at least one cycle.
    #[error("build dependency graph: dependency cycle through resources {}", format_ids(.0))]
    Cycle(Vec<ResourceId>),
}

/// Errors that arise while converging a single resource.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// A file resource has an empty path.
    #[error("file path is empty")]
    EmptyPath,

    /// The path exists but is not a regular file.
    #[error("{} is not a regular file", path.display())]
    NotRegularFile {
        /// The offending path.
        path: PathBuf,
    },

    /// The path exists but is not a directory.
    #[error("{} is not a directory", path.display())]
    NotDirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// The path exists but is not a symlink.
    #[error("{} is not a symlink", path.display())]
    NotSymlink {
        /// The offending path.
        path: PathBuf,
    },

    /// An exec resource has a zero-length argv.
    #[error("0-length argv")]
    EmptyArgv,

    /// argv[0] must name the executable by absolute path.
    #[error("argv[0] ({argv0:?}) is not an absolute path")]
    RelativeArgv {
        /// The rejected argv[0] value.
        argv0: String,
    },

    /// An environment entry is missing its name.
    #[error("environment[{index}] missing name")]
    MissingEnvName {
        /// Position of the entry in the catalog's environment list.
        index: usize,
    },

    /// A working directory must be absolute when present.
    #[error("working directory {dir:?} is not absolute")]
    RelativeWorkingDirectory {
        /// The rejected working directory.
        dir: PathBuf,
    },

    /// `ifDepsChanged` was given an empty id list.
    #[error("ifDepsChanged is empty list")]
    EmptyDepsChanged,

    /// `ifDepsChanged` listed an id outside the resource's direct dependencies.
    #[error("depends on id {id}, which is not in resource's direct dependencies")]
    IndirectDependency {
        /// The rejected id.
        id: ResourceId,
    },

    /// A user name could not be resolved to a uid.
    #[error("resolve user {name:?}: {source}")]
    LookupUser {
        /// The user name that failed to resolve.
        name: String,
        /// Underlying lookup error.
        source: io::Error,
    },

    /// A group name could not be resolved to a gid.
    #[error("resolve group {name:?}: {source}")]
    LookupGroup {
        /// The group name that failed to resolve.
        name: String,
        /// Underlying lookup error.
        source: io::Error,
    },

    /// A system operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        /// The operation that failed (e.g. `lstat`, `mkdir`).
        op: &'static str,
        /// The path the operation was applied to.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A command ran but exited nonzero.
    #[error("command exited with {}", code.map_or_else(|| "unknown status".to_string(), |c| format!("status {c}")))]
    CommandFailed {
        /// Exit code, when the platform reported one.
        code: Option<i32>,
        /// Combined stdout/stderr captured from the command.
        output: Vec<u8>,
    },

    /// A command could not be started at all.
    #[error("start command: {source}")]
    CommandSpawn {
        /// Underlying spawn error.
        source: io::Error,
    },
}

impl ResourceError {
    /// Build a `map_err` adapter that wraps an I/O error with operation and
    /// path context.
    pub fn io(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io { op, path, source }
    }

    /// Combined command output attached to this error, if any.
    #[must_use]
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            Self::CommandFailed { output, .. } if !output.is_empty() => Some(output),
            _ => None,
        }
    }
}

/// Outcome of a whole Apply run.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The dependency graph could not be built.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The graph is not done but the ready set is empty with nothing in
    /// flight. Indicates a catalog or scheduler bug.
    #[error("graph not done, but has nothing to do")]
    Stuck,

    /// The caller cancelled the run.
    #[error("apply interrupted")]
    Cancelled,

    /// At least one resource failed; independent resources were still applied.
    #[error("not all resources applied cleanly")]
    NotClean,
}

fn format_ids(ids: &[ResourceId]) -> String {
    let strs: Vec<String> = ids.iter().map(ToString::to_string).collect();
    strs.join(", ")
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // GraphError
    // -----------------------------------------------------------------------

    #[test]
    fn graph_error_zero_id_display() {
        let e = GraphError::ZeroId;
        assert_eq!(
            e.to_string(),
            "build dependency graph: encountered resource with id=0"
        );
    }

    #[test]
    fn graph_error_unknown_dependency_display() {
        let e = GraphError::UnknownDependency {
            dependency: 7,
            dependent: 42,
        };
        assert_eq!(
            e.to_string(),
            "build dependency graph: unknown dependency id 7 requested by resource 42"
        );
    }

    #[test]
    fn graph_error_cycle_display() {
        let e = GraphError::Cycle(vec![1, 2, 3]);
        assert_eq!(
            e.to_string(),
            "build dependency graph: dependency cycle through resources 1, 2, 3"
        );
    }

    // -----------------------------------------------------------------------
    // ResourceError
    // -----------------------------------------------------------------------

    #[test]
    fn resource_error_io_display() {
        let e = ResourceError::io("mkdir", Path::new("/tmp/x"))(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert_eq!(e.to_string(), "mkdir /tmp/x: permission denied");
    }

    #[test]
    fn resource_error_command_failed_display() {
        let e = ResourceError::CommandFailed {
            code: Some(3),
            output: b"boom".to_vec(),
        };
        assert_eq!(e.to_string(), "command exited with status 3");
    }

    #[test]
    fn resource_error_command_failed_unknown_code_display() {
        let e = ResourceError::CommandFailed {
            code: None,
            output: Vec::new(),
        };
        assert_eq!(e.to_string(), "command exited with unknown status");
    }

    #[test]
    fn resource_error_output_present_only_when_nonempty() {
        let with = ResourceError::CommandFailed {
            code: Some(1),
            output: b"err".to_vec(),
        };
        let without = ResourceError::CommandFailed {
            code: Some(1),
            output: Vec::new(),
        };
        assert_eq!(with.output(), Some(b"err".as_slice()));
        assert!(without.output().is_none());
        assert!(ResourceError::EmptyArgv.output().is_none());
    }

    #[test]
    fn resource_error_indirect_dependency_display() {
        let e = ResourceError::IndirectDependency { id: 9 };
        assert_eq!(
            e.to_string(),
            "depends on id 9, which is not in resource's direct dependencies"
        );
    }

    // -----------------------------------------------------------------------
    // ApplyError
    // -----------------------------------------------------------------------

    #[test]
    fn apply_error_from_graph_error() {
        let e: ApplyError = GraphError::ZeroId.into();
        assert!(e.to_string().contains("id=0"));
    }

    #[test]
    fn apply_error_not_clean_display() {
        assert_eq!(
            ApplyError::NotClean.to_string(),
            "not all resources applied cleanly"
        );
    }

    // -----------------------------------------------------------------------
    // Send + Sync bounds
    // -----------------------------------------------------------------------

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<CatalogError>();
        assert_send_sync::<GraphError>();
        assert_send_sync::<ResourceError>();
        assert_send_sync::<ApplyError>();
    }
}
