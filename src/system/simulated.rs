//! Mutation-suppressing [`System`] wrapper for dry runs.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{Cmd, ExecResult, FileHandle, FileInfo, System};

/// Wraps another system: reads pass through, mutations succeed without
/// effect, and commands report success without running.
///
/// `create_file` still reports `AlreadyExists` for occupied paths so the
/// applier follows the same code path it would for real.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedSystem<S> {
    inner: S,
}

impl<S: System> SimulatedSystem<S> {
    /// Wrap `inner` in a dry-run shield.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: System> System for SimulatedSystem<S> {
    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        self.inner.lstat(path)
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.readlink(path)
    }

    fn mkdir(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    fn remove(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn symlink(&self, _target: &Path, _link: &Path) -> io::Result<()> {
        Ok(())
    }

    fn create_file(&self, path: &Path, _mode: u32) -> io::Result<Box<dyn FileHandle>> {
        match self.inner.lstat(path) {
            Ok(_) => Err(io::ErrorKind::AlreadyExists.into()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Box::new(DiscardFile)),
            Err(e) => Err(e),
        }
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        let inner = self.inner.open_file(path)?;
        Ok(Box::new(ReadOnlyFile {
            inner,
            wrote: false,
        }))
    }

    fn chmod(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    fn chown(&self, _path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
        Ok(())
    }

    fn owner_info(&self, info: &FileInfo) -> io::Result<(u32, u32)> {
        self.inner.owner_info(info)
    }

    fn lookup_user(&self, name: &str) -> io::Result<u32> {
        self.inner.lookup_user(name)
    }

    fn lookup_group(&self, name: &str) -> io::Result<u32> {
        self.inner.lookup_group(name)
    }

    fn run(&self, _cmd: &Cmd) -> io::Result<ExecResult> {
        Ok(ExecResult {
            output: Vec::new(),
            success: true,
            code: Some(0),
        })
    }
}

/// Writer handed out for a simulated exclusive create.
#[derive(Debug)]
struct DiscardFile;

impl Read for DiscardFile {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for DiscardFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for DiscardFile {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Ok(0)
    }
}

impl FileHandle for DiscardFile {
    fn truncate(&mut self, _size: u64) -> io::Result<()> {
        Ok(())
    }
}

/// A real file opened for reading whose writes are absorbed. Reading after a
/// simulated write would return stale bytes, so it fails instead.
#[derive(Debug)]
struct ReadOnlyFile {
    inner: Box<dyn FileHandle>,
    wrote: bool,
}

impl Read for ReadOnlyFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.wrote {
            return Err(io::Error::other("read after simulated write"));
        }
        self.inner.read(buf)
    }
}

impl Write for ReadOnlyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wrote = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for ReadOnlyFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.wrote {
            return Err(io::Error::other("seek after simulated write"));
        }
        self.inner.seek(pos)
    }
}

impl FileHandle for ReadOnlyFile {
    fn truncate(&mut self, _size: u64) -> io::Result<()> {
        self.wrote = true;
        Ok(())
    }
}
