// Shared helpers for integration tests.
//
// Provides catalog builders so each test can assemble resources without
// repeating struct literals, plus a fake-system fixture with the directories
// most scenarios need.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use converge::apply::{Applier, ApplyOptions};
use converge::system::System;
use converge::catalog::{
    Catalog, Command, CommandLine, Condition, Exec, File, FileState, Mode, Payload, Resource,
    ResourceId,
};
use converge::logging::MemoryLog;
use converge::system::FakeSystem;

/// Assemble a catalog from resources.
pub fn catalog(resources: Vec<Resource>) -> Catalog {
    Catalog { resources }
}

/// Build a resource with the given id, comment, dependencies, and payload.
pub fn resource(id: ResourceId, comment: &str, deps: &[ResourceId], payload: Payload) -> Resource {
    Resource {
        id,
        comment: comment.to_string(),
        dependencies: deps.to_vec(),
        payload,
    }
}

/// A plain file with managed content.
pub fn plain_file(path: &str, content: &[u8]) -> Payload {
    Payload::File(File {
        path: PathBuf::from(path),
        state: FileState::Plain {
            content: Some(content.to_vec()),
            mode: Mode::default(),
        },
    })
}

/// A plain file without content: asserts a regular file exists at the path.
pub fn plain_file_bare(path: &str) -> Payload {
    Payload::File(File {
        path: PathBuf::from(path),
        state: FileState::Plain {
            content: None,
            mode: Mode::default(),
        },
    })
}

/// A directory.
pub fn directory(path: &str) -> Payload {
    Payload::File(File {
        path: PathBuf::from(path),
        state: FileState::Directory {
            mode: Mode::default(),
        },
    })
}

/// A symlink at `path` pointing at `target`.
pub fn symlink(target: &str, path: &str) -> Payload {
    Payload::File(File {
        path: PathBuf::from(path),
        state: FileState::Symlink {
            target: PathBuf::from(target),
        },
    })
}

/// Nothing may exist at `path`.
pub fn absent(path: &str) -> Payload {
    Payload::File(File {
        path: PathBuf::from(path),
        state: FileState::Absent,
    })
}

/// An exec resource.
pub fn exec(command: Command, condition: Condition) -> Payload {
    Payload::Exec(Exec { command, condition })
}

/// An argv command with no environment and default working directory.
pub fn argv(parts: &[&str]) -> Command {
    Command {
        line: CommandLine::Argv(parts.iter().map(ToString::to_string).collect()),
        env: Vec::new(),
        working_directory: None,
    }
}

/// A bash command with no environment and default working directory.
pub fn bash(body: &str) -> Command {
    Command {
        line: CommandLine::Bash(body.to_string()),
        env: Vec::new(),
        working_directory: None,
    }
}

/// A fake system pre-seeded with `/tmp` and `/bin`, plus an applier over it.
pub struct Fixture {
    pub system: FakeSystem,
    pub log: Arc<MemoryLog>,
    jobs: usize,
}

impl Fixture {
    /// Serial fixture (one worker).
    pub fn new() -> Self {
        Self::with_jobs(1)
    }

    /// Fixture with a worker pool of the given size.
    pub fn with_jobs(jobs: usize) -> Self {
        let system = FakeSystem::new();
        system
            .mkdir(Path::new("/tmp"), 0o777)
            .expect("create /tmp");
        system
            .mkdir(Path::new("/bin"), 0o777)
            .expect("create /bin");
        Self {
            system,
            log: Arc::new(MemoryLog::new()),
            jobs,
        }
    }

    /// Build an applier over the fixture's system and log.
    pub fn applier(&self) -> Applier {
        let options = ApplyOptions {
            jobs: self.jobs,
            ..ApplyOptions::default()
        };
        Applier::with_options(
            Arc::new(self.system.clone()),
            self.log.clone(),
            options,
        )
    }
}
