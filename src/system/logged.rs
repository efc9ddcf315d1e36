//! [`System`] wrapper that logs mutating calls and command runs (`-s`).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Cmd, ExecResult, FileHandle, FileInfo, System};
use crate::logging::Log;

/// Logs every mutating operation and every command before delegating.
pub struct LoggedSystem<S> {
    inner: S,
    log: Arc<dyn Log>,
}

impl<S: System> LoggedSystem<S> {
    /// Wrap `inner`, reporting operations through `log`.
    pub fn new(inner: S, log: Arc<dyn Log>) -> Self {
        Self { inner, log }
    }
}

impl<S: System> System for LoggedSystem<S> {
    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        self.inner.lstat(path)
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.readlink(path)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.log.info(&format!("mkdir {}", path.display()));
        self.inner.mkdir(path, mode)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.log.info(&format!("rm {}", path.display()));
        self.inner.remove(path)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        self.log
            .info(&format!("ln -s {} {}", target.display(), link.display()));
        self.inner.symlink(target, link)
    }

    fn create_file(&self, path: &Path, mode: u32) -> io::Result<Box<dyn FileHandle>> {
        self.log.info(&format!("create file {}", path.display()));
        self.inner.create_file(path, mode)
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        self.inner.open_file(path)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.log.info(&format!("chmod {mode:o} {}", path.display()));
        self.inner.chmod(path, mode)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        let fmt = |axis: Option<u32>| axis.map_or_else(|| "-".to_string(), |v| v.to_string());
        self.log.info(&format!(
            "chown {}:{} {}",
            fmt(uid),
            fmt(gid),
            path.display()
        ));
        self.inner.chown(path, uid, gid)
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

    fn run(&self, cmd: &Cmd) -> io::Result<ExecResult> {
        self.log.info(&format!("exec {}", cmd.args.join(" ")));
        self.inner.run(cmd)
    }
}
