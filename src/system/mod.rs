//! Capability interface over filesystem and process operations.
//!
//! The engine never touches the OS directly; every filesystem and process
//! call goes through the [`System`] trait so that convergence logic can be
//! exercised against an in-memory implementation. Paths are required to be
//! absolute. Implementations must be safe to call from multiple threads.
//!
//! Implementations:
//!
//! - [`LocalSystem`] — the real operating system
//! - [`FakeSystem`] — in-memory, for tests
//! - [`SimulatedSystem`] — suppresses mutations, for dry runs
//! - [`LoggedSystem`] — logs mutating calls and command runs, for `-s`

pub mod fake;
pub mod local;
pub mod logged;
pub mod simulated;

pub use fake::FakeSystem;
pub use local::LocalSystem;
pub use logged::LoggedSystem;
pub use simulated::SimulatedSystem;

use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Root path of the local filesystem.
pub const LOCAL_ROOT: &str = "/";

/// What kind of node sits at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Anything else (socket, device, ...).
    Other,
}

/// Result of an [`lstat`](System::lstat) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Node kind. `lstat` does not follow a terminal symlink.
    pub kind: FileKind,
    /// Permission bits plus sticky/setuid/setgid (lowest 12 bits).
    pub mode: u32,
    /// Content size in bytes.
    pub size: u64,
    /// `(uid, gid)` when the platform reports owner data.
    pub owner: Option<(u32, u32)>,
}

impl FileInfo {
    /// Whether the node is a regular file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Whether the node is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Whether the node is a symbolic link.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// A process to execute on a system.
#[derive(Debug, Clone)]
pub struct Cmd {
    /// Absolute path of the executable.
    pub path: PathBuf,
    /// Full argument vector, argv[0] included.
    pub args: Vec<String>,
    /// Environment entries, replacing the inherited environment.
    pub env: Vec<(String, String)>,
    /// Absolute working directory.
    pub dir: PathBuf,
    /// Bytes fed to the process on standard input.
    pub stdin: Option<Vec<u8>>,
}

/// Result of running a command that could be started.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Combined stdout and stderr.
    pub output: Vec<u8>,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, when the platform reported one.
    pub code: Option<i32>,
}

/// An open file: read, write, seek, truncate. Dropping the handle closes it.
pub trait FileHandle: Read + Write + Seek + Send + std::fmt::Debug {
    /// Truncate the file to `size` bytes without moving the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying file cannot be resized.
    fn truncate(&mut self, size: u64) -> io::Result<()>;
}

/// The capability set the engine needs from an operating system.
///
/// Error discrimination relies on [`io::ErrorKind`]: `NotFound` and
/// `AlreadyExists` are contract, everything else is opaque.
pub trait System: Send + Sync {
    /// Stat a path without following a terminal symlink.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing exists at the path.
    fn lstat(&self, path: &Path) -> io::Result<FileInfo>;

    /// Read the target of a symlink.
    ///
    /// # Errors
    ///
    /// Fails when the path does not exist or is not a symlink.
    fn readlink(&self, path: &Path) -> io::Result<PathBuf>;

    /// Create a directory with the given permission bits (umask applies).
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when anything is present at the path.
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Remove the node at a path. Directories must be empty.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing exists at the path.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Create a symlink at `link` pointing at `target`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when anything is present at `link`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    /// Exclusively create a file with the given permission bits.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when anything is present at the path.
    fn create_file(&self, path: &Path, mode: u32) -> io::Result<Box<dyn FileHandle>>;

    /// Open an existing file for reading and writing.
    ///
    /// # Errors
    ///
    /// `NotFound` when the file does not already exist.
    fn open_file(&self, path: &Path) -> io::Result<Box<dyn FileHandle>>;

    /// Set a node's permission bits.
    ///
    /// # Errors
    ///
    /// Propagates the underlying failure.
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Change a node's owner. `None` on an axis leaves it as-is.
    ///
    /// # Errors
    ///
    /// Propagates the underlying failure.
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()>;

    /// Extract `(uid, gid)` from a stat result.
    ///
    /// # Errors
    ///
    /// Fails on platforms whose stat data carries no owner information.
    fn owner_info(&self, info: &FileInfo) -> io::Result<(u32, u32)> {
        info.owner
            .ok_or_else(|| io::Error::other("file info has no uid/gid fields"))
    }

    /// Resolve a user name to a uid.
    ///
    /// # Errors
    ///
    /// `NotFound` when the name is unknown.
    fn lookup_user(&self, name: &str) -> io::Result<u32>;

    /// Resolve a group name to a gid.
    ///
    /// # Errors
    ///
    /// `NotFound` when the name is unknown.
    fn lookup_group(&self, name: &str) -> io::Result<u32>;

    /// Run a process to completion, capturing combined output.
    ///
    /// # Errors
    ///
    /// An `Err` means the process could not be started at all; a process
    /// that ran and exited nonzero is an `Ok` result with `success == false`.
    fn run(&self, cmd: &Cmd) -> io::Result<ExecResult>;
}

/// Read a whole file through a system.
///
/// # Errors
///
/// Propagates open and read failures.
pub fn read_file(sys: &dyn System, path: &Path) -> io::Result<Vec<u8>> {
    let mut f = sys.open_file(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

impl<S: System + ?Sized> System for std::sync::Arc<S> {
    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        (**self).lstat(path)
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        (**self).readlink(path)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        (**self).mkdir(path, mode)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        (**self).remove(path)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        (**self).symlink(target, link)
    }

    fn create_file(&self, path: &Path, mode: u32) -> io::Result<Box<dyn FileHandle>> {
        (**self).create_file(path, mode)
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        (**self).open_file(path)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        (**self).chmod(path, mode)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        (**self).chown(path, uid, gid)
    }

    fn owner_info(&self, info: &FileInfo) -> io::Result<(u32, u32)> {
        (**self).owner_info(info)
    }

    fn lookup_user(&self, name: &str) -> io::Result<u32> {
        (**self).lookup_user(name)
    }

    fn lookup_group(&self, name: &str) -> io::Result<u32> {
        (**self).lookup_group(name)
    }

    fn run(&self, cmd: &Cmd) -> io::Result<ExecResult> {
        (**self).run(cmd)
    }
}
