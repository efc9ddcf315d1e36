//! [`System`] implementation backed by the real operating system.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{Cmd, ExecResult, FileHandle, FileInfo, FileKind, System};

/// The local machine: std::fs for filesystem calls, std::process for
/// commands, libc for ownership operations on Unix.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSystem;

impl LocalSystem {
    /// Create a local system handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn info_from_metadata(meta: &fs::Metadata) -> FileInfo {
    let ft = meta.file_type();
    let kind = if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    };
    #[cfg(unix)]
    let (mode, owner) = {
        use std::os::unix::fs::MetadataExt;
        (
            meta.mode() & crate::catalog::MODE_BITS_MASK,
            Some((meta.uid(), meta.gid())),
        )
    };
    #[cfg(not(unix))]
    let (mode, owner) = (0, None);
    FileInfo {
        kind,
        mode,
        size: meta.len(),
        owner,
    }
}

/// An open local file.
#[derive(Debug)]
struct LocalFile(fs::File);

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Seek for LocalFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl FileHandle for LocalFile {
    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.0.set_len(size)
    }
}

impl System for LocalSystem {
    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        fs::symlink_metadata(path).map(|m| info_from_metadata(&m))
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new().mode(mode).create(path)
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            fs::create_dir(path)
        }
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link)
        }
        #[cfg(not(unix))]
        {
            let _ = (target, link);
            Err(io::Error::other("symlinks are not supported on this platform"))
        }
    }

    fn create_file(&self, path: &Path, mode: u32) -> io::Result<Box<dyn FileHandle>> {
        let mut opts = fs::OpenOptions::new();
        opts.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(Box::new(LocalFile(opts.open(path)?)))
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn FileHandle>> {
        let file = fs::OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Box::new(LocalFile(file)))
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
        }
        #[cfg(not(unix))]
        {
            let _ = (path, mode);
            Err(io::Error::other("chmod is not supported on this platform"))
        }
    }

    #[cfg(unix)]
    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        use std::os::unix::ffi::OsStrExt;
        let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        // uid_t(-1) / gid_t(-1) leave the axis unchanged.
        let uid = uid.unwrap_or(u32::MAX) as libc::uid_t;
        let gid = gid.unwrap_or(u32::MAX) as libc::gid_t;
        let rc = unsafe { libc::chown(cpath.as_ptr(), uid, gid) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn chown(&self, _path: &Path, _uid: Option<u32>, _gid: Option<u32>) -> io::Result<()> {
        Err(io::Error::other("chown is not supported on this platform"))
    }

    #[cfg(unix)]
    fn lookup_user(&self, name: &str) -> io::Result<u32> {
        let cname = std::ffi::CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))?;
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0u8; 4096];
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        if result.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown user {name}"),
            ));
        }
        Ok(pwd.pw_uid)
    }

    #[cfg(not(unix))]
    fn lookup_user(&self, _name: &str) -> io::Result<u32> {
        Err(io::Error::other("user lookup is not supported on this platform"))
    }

    #[cfg(unix)]
    fn lookup_group(&self, name: &str) -> io::Result<u32> {
        let cname = std::ffi::CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))?;
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut buf = vec![0u8; 4096];
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut grp,
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        if result.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown group {name}"),
            ));
        }
        Ok(grp.gr_gid)
    }

    #[cfg(not(unix))]
    fn lookup_group(&self, _name: &str) -> io::Result<u32> {
        Err(io::Error::other("group lookup is not supported on this platform"))
    }

    fn run(&self, cmd: &Cmd) -> io::Result<ExecResult> {
        let mut command = Command::new(&cmd.path);
        if cmd.args.len() > 1 {
            command.args(&cmd.args[1..]);
        }
        command.env_clear();
        for (name, value) in &cmd.env {
            command.env(name, value);
        }
        command
            .current_dir(&cmd.dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        let mut child = command.spawn()?;
        let writer = match (&cmd.stdin, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => {
                let input = input.clone();
                // Feed stdin from a separate thread so a child that fills its
                // output pipe before draining stdin cannot deadlock us.
                Some(std::thread::spawn(move || {
                    let _ = stdin.write_all(&input);
                }))
            }
            _ => None,
        };
        let out = child.wait_with_output()?;
        if let Some(handle) = writer {
            let _ = handle.join();
        }
        let mut output = out.stdout;
        output.extend_from_slice(&out.stderr);
        Ok(ExecResult {
            output,
            success: out.status.success(),
            code: out.status.code(),
        })
    }
}
