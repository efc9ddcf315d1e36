//! In-memory [`System`] implementation for tests.
//!
//! Keeps a flat map from absolute path to entry, advances a logical clock on
//! each call, resolves symlinks in directory components, and lets tests
//! install callbacks at paths to simulate executables. Safe to use from
//! multiple threads; clones share the same filesystem.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Cmd, ExecResult, FileHandle, FileInfo, FileKind, System};

/// A function to call when an executable file is run.
pub type Program = Arc<dyn Fn(&mut ProgramContext<'_>) -> i32 + Send + Sync>;

/// Arguments handed to a [`Program`].
pub struct ProgramContext<'a> {
    /// Full argument vector, argv[0] included.
    pub args: &'a [String],
    /// Environment entries.
    pub env: &'a [(String, String)],
    /// Working directory.
    pub dir: &'a Path,
    /// Combined output buffer.
    pub output: &'a mut Vec<u8>,
}

#[derive(Clone)]
struct Entry {
    kind: FileKind,
    mode: u32,
    mtime: u64,
    content: Vec<u8>,
    program: Option<Program>,
    link: PathBuf,
    owner: (u32, u32),
}

impl Entry {
    fn new(kind: FileKind, mode: u32, mtime: u64) -> Self {
        Self {
            kind,
            mode,
            mtime,
            content: Vec::new(),
            program: None,
            link: PathBuf::new(),
            owner: (0, 0),
        }
    }
}

#[derive(Default)]
struct State {
    fs: HashMap<PathBuf, Entry>,
    clock: u64,
    users: HashMap<String, u32>,
    groups: HashMap<String, u32>,
    lookups: u64,
}

/// An in-memory filesystem and process runner.
///
/// The zero value is a filesystem containing only the root directory.
#[derive(Clone, Default)]
pub struct FakeSystem {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for FakeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSystem").finish_non_exhaustive()
    }
}

const LINK_HOPS: usize = 40;

fn clean_path(path: &Path) -> io::Result<PathBuf> {
    if !path.is_absolute() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("fake system: path {} is not absolute", path.display()),
        ));
    }
    Ok(path.to_path_buf())
}

/// Resolve symlinks in the directory components of `path`, leaving the final
/// component untouched (lstat semantics).
fn locate(fs: &HashMap<PathBuf, Entry>, path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => resolve(fs, dir).join(name),
        _ => path.to_path_buf(),
    }
}

/// Follow symlink chains at `path` until a non-link entry (or a missing one).
fn follow_links(fs: &HashMap<PathBuf, Entry>, path: &Path) -> (PathBuf, bool) {
    let mut path = path.to_path_buf();
    for _ in 0..LINK_HOPS {
        match fs.get(&path) {
            None => return (path, false),
            Some(ent) if ent.kind != FileKind::Symlink => return (path, true),
            Some(ent) => {
                path = if ent.link.is_absolute() {
                    ent.link.clone()
                } else {
                    path.parent().unwrap_or_else(|| Path::new("/")).join(&ent.link)
                };
            }
        }
    }
    (path, false)
}

/// Resolve symlinks in every component of `path`.
fn resolve(fs: &HashMap<PathBuf, Entry>, path: &Path) -> PathBuf {
    let mut comps = path.components();
    let Some(root) = comps.next() else {
        return path.to_path_buf();
    };
    let mut curr = PathBuf::from(root.as_os_str());
    let rest: Vec<_> = comps.map(|c| c.as_os_str().to_os_string()).collect();
    for (i, part) in rest.iter().enumerate() {
        let (resolved, exists) = follow_links(fs, &curr.join(part));
        if !exists {
            let mut out = resolved;
            for later in &rest[i + 1..] {
                out.push(later);
            }
            return out;
        }
        curr = resolved;
    }
    curr
}

impl State {
    fn init(&mut self) {
        if self.fs.is_empty() {
            self.fs
                .insert(PathBuf::from("/"), Entry::new(FileKind::Directory, 0o777, 0));
        }
        self.clock += 1;
    }

    /// Create an entry at `path`, checking the parent directory.
    fn mkentry(&mut self, path: &Path, kind: FileKind, mode: u32) -> io::Result<PathBuf> {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(io::ErrorKind::AlreadyExists.into());
        };
        let dir = resolve(&self.fs, dir);
        let Some(parent) = self.fs.get(&dir) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        if parent.kind != FileKind::Directory {
            return Err(io::Error::other("fake system: not a directory"));
        }
        if parent.mode & 0o222 == 0 {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        let full = dir.join(name);
        if self.fs.contains_key(&full) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        self.fs.insert(full.clone(), Entry::new(kind, mode, self.clock));
        Ok(full)
    }

    fn readdir_len(&self, path: &Path) -> usize {
        self.fs
            .keys()
            .filter(|p| *p != path && p.parent() == Some(path))
            .count()
    }
}

impl FakeSystem {
    /// Create an empty fake filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.init();
        state
    }

    /// Install a program callback at `path`, creating an executable entry.
    ///
    /// # Errors
    ///
    /// Fails like [`System::create_file`] would (missing parent, exists, ...).
    pub fn mkprogram(&self, path: &Path, program: Program) -> io::Result<()> {
        let path = clean_path(path)?;
        let mut state = self.lock();
        let full = state.mkentry(&path, FileKind::File, 0o777)?;
        if let Some(ent) = state.fs.get_mut(&full) {
            ent.program = Some(program);
        }
        Ok(())
    }

    /// Register a user name for [`System::lookup_user`].
    pub fn add_user(&self, name: &str, uid: u32) {
        self.lock().users.insert(name.to_string(), uid);
    }

    /// Register a group name for [`System::lookup_group`].
    pub fn add_group(&self, name: &str, gid: u32) {
        self.lock().groups.insert(name.to_string(), gid);
    }

    /// Set the recorded owner of an existing node.
    pub fn set_owner(&self, path: &Path, uid: u32, gid: u32) {
        let mut state = self.lock();
        let full = resolve(&state.fs, path);
        if let Some(ent) = state.fs.get_mut(&full) {
            ent.owner = (uid, gid);
        }
    }

    /// Number of name lookups that reached the system (cache-miss counter
    /// for tests).
    #[must_use]
    pub fn lookup_count(&self) -> u64 {
        self.lock().lookups
    }

    /// Logical-clock timestamp of the node's last mutation.
    #[must_use]
    pub fn mtime(&self, path: &Path) -> Option<u64> {
        let state = self.lock();
        let full = locate(&state.fs, path);
        state.fs.get(&full).map(|ent| ent.mtime)
    }
}

impl System for FakeSystem {
    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        let path = clean_path(path)?;
        let state = self.lock();
        let full = locate(&state.fs, &path);
        let Some(ent) = state.fs.get(&full) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        Ok(FileInfo {
            kind: ent.kind,
            mode: ent.mode,
            size: ent.content.len() as u64,
            owner: Some(ent.owner),
        })
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        let path = clean_path(path)?;
        let state = self.lock();
        let full = locate(&state.fs, &path);
        let Some(ent) = state.fs.get(&full) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        if ent.kind != FileKind::Symlink {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fake system: not a symlink",
            ));
        }
        Ok(ent.link.clone())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        let path = clean_path(path)?;
        let mut state = self.lock();
        state.mkentry(&path, FileKind::Directory, mode & 0o777)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let path = clean_path(path)?;
        let mut state = self.lock();
        let full = locate(&state.fs, &path);
        match full.parent().and_then(|d| state.fs.get(d)) {
            Some(parent) if parent.kind == FileKind::Directory => {
                if parent.mode & 0o222 == 0 {
                    return Err(io::ErrorKind::PermissionDenied.into());
                }
            }
            _ => return Err(io::ErrorKind::NotFound.into()),
        }
        let Some(ent) = state.fs.get(&full) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        if ent.kind == FileKind::Directory && state.readdir_len(&full) > 0 {
            return Err(io::Error::other("fake system: directory not empty"));
        }
        state.fs.remove(&full);
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let link = clean_path(link)?;
        let mut state = self.lock();
        let full = state.mkentry(&link, FileKind::Symlink, 0o777)?;
        if let Some(ent) = state.fs.get_mut(&full) {
            ent.link = target.to_path_buf();
        }
        Ok(())
    }

    fn create_file(&self, path: &Path, mode: u32) -> io::Result<Box<dyn FileHandle>> {
        let path = clean_path(path)?;
        let mut state = self.lock();
        let full = state.mkentry(&path, FileKind::File, mode & 0o777)?;
        drop(state);
        Ok(Box::new(FakeFile {
            state: Arc::clone(&self.state),
            path: full,
            data: Vec::new(),
            pos: 0,
        }))
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        let path = clean_path(path)?;
        let mut state = self.lock();
        let full = resolve(&state.fs, &path);
        let clock = state.clock;
        let Some(ent) = state.fs.get_mut(&full) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        if ent.kind != FileKind::File {
            return Err(io::Error::other("fake system: not a file"));
        }
        ent.mtime = clock;
        let data = ent.content.clone();
        drop(state);
        Ok(Box::new(FakeFile {
            state: Arc::clone(&self.state),
            path: full,
            data,
            pos: 0,
        }))
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let path = clean_path(path)?;
        let mut state = self.lock();
        let full = resolve(&state.fs, &path);
        let Some(ent) = state.fs.get_mut(&full) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        ent.mode = mode & crate::catalog::MODE_BITS_MASK;
        Ok(())
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        let path = clean_path(path)?;
        let mut state = self.lock();
        let full = resolve(&state.fs, &path);
        let Some(ent) = state.fs.get_mut(&full) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        if let Some(uid) = uid {
            ent.owner.0 = uid;
        }
        if let Some(gid) = gid {
            ent.owner.1 = gid;
        }
        Ok(())
    }

    fn lookup_user(&self, name: &str) -> io::Result<u32> {
        let mut state = self.lock();
        state.lookups += 1;
        state.users.get(name).copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown user {name}"))
        })
    }

    fn lookup_group(&self, name: &str) -> io::Result<u32> {
        let mut state = self.lock();
        state.lookups += 1;
        state.groups.get(name).copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("unknown group {name}"))
        })
    }

    fn run(&self, cmd: &Cmd) -> io::Result<ExecResult> {
        let path = clean_path(&cmd.path)?;
        let state = self.lock();
        let full = resolve(&state.fs, &path);
        let Some(ent) = state.fs.get(&full) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        if ent.mode & 0o111 == 0 {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        let Some(program) = ent.program.clone() else {
            return Err(io::Error::other("fake system: not a program"));
        };
        // Run outside the lock so the program may call back into the system.
        drop(state);
        let mut output = Vec::new();
        let exit = program(&mut ProgramContext {
            args: &cmd.args,
            env: &cmd.env,
            dir: &cmd.dir,
            output: &mut output,
        });
        Ok(ExecResult {
            success: exit == 0,
            code: Some(exit),
            output,
        })
    }
}

/// An open fake file. Mutations are written back to the filesystem entry as
/// they happen, so dropping the handle loses nothing.
struct FakeFile {
    state: Arc<Mutex<State>>,
    path: PathBuf,
    data: Vec<u8>,
    pos: usize,
}

impl std::fmt::Debug for FakeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeFile")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl FakeFile {
    fn commit(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let clock = state.clock;
        if let Some(ent) = state.fs.get_mut(&self.path) {
            ent.content = self.data.clone();
            ent.program = None;
            ent.mtime = clock;
        }
    }
}

impl Read for FakeFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let n = available.min(buf.len());
        if let (Some(dst), Some(src)) = (
            buf.get_mut(..n),
            self.data.get(self.pos..self.pos + n),
        ) {
            dst.copy_from_slice(src);
        }
        self.pos += n;
        Ok(n)
    }
}

impl Write for FakeFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len();
        let mut rest = buf;
        if self.pos < self.data.len() {
            let overlap = (self.data.len() - self.pos).min(rest.len());
            if let (Some(dst), Some(src)) = (
                self.data.get_mut(self.pos..self.pos + overlap),
                rest.get(..overlap),
            ) {
                dst.copy_from_slice(src);
            }
            rest = rest.get(overlap..).unwrap_or_default();
            self.pos += overlap;
        }
        self.data.extend_from_slice(rest);
        self.pos += rest.len();
        self.commit();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FakeFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(n) => i64::try_from(n).ok(),
            SeekFrom::Current(delta) => (self.pos as i64).checked_add(delta),
            SeekFrom::End(delta) => (self.data.len() as i64).checked_add(delta),
        };
        match next {
            Some(n) if n >= 0 && n as usize <= self.data.len() => {
                self.pos = n as usize;
                Ok(self.pos as u64)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fake file: seek past boundaries",
            )),
        }
    }
}

impl FileHandle for FakeFile {
    fn truncate(&mut self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size < self.data.len() {
            self.data.truncate(size);
        }
        self.commit();
        Ok(())
    }
}
