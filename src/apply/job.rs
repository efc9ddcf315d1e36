//! Convergence of a single resource: diff intended state against observed
//! state, perform the minimum mutation, report whether anything changed.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};

use crate::catalog::{
    Command, CommandLine, Condition, Exec, File, FileState, MODE_BITS_MASK, Mode, OwnerRef,
    Payload, Resource, ResourceId,
};
use crate::error::ResourceError;
use crate::logging::Log;
use crate::lookup::OwnerCache;
use crate::system::{Cmd, LOCAL_ROOT, System};

/// One unit of work handed to a worker: a resource plus everything needed to
/// converge it.
pub(crate) struct Job<'a> {
    pub(crate) resource: &'a Resource,
    /// Snapshot of the direct dependencies' changed bits, taken at dispatch.
    pub(crate) deps_changed: HashMap<ResourceId, bool>,
    pub(crate) system: &'a dyn System,
    pub(crate) lookup: &'a OwnerCache,
    pub(crate) bash: &'a Path,
    pub(crate) skip_conditions: bool,
    pub(crate) log: &'a dyn Log,
}

/// What a worker reports back for a job.
pub(crate) struct JobOutcome {
    pub(crate) id: ResourceId,
    pub(crate) result: Result<bool, ResourceError>,
}

impl Job<'_> {
    pub(crate) fn id(&self) -> ResourceId {
        self.resource.id
    }

    /// Converge the resource and report the changed bit.
    pub(crate) fn run(self) -> JobOutcome {
        JobOutcome {
            id: self.resource.id,
            result: self.converge(),
        }
    }

    fn converge(&self) -> Result<bool, ResourceError> {
        match &self.resource.payload {
            Payload::Noop => Ok(self.deps_changed.values().any(|&c| c)),
            Payload::File(file) => self.apply_file(file),
            Payload::Exec(exec) => self.apply_exec(exec),
        }
    }

    // -- files --------------------------------------------------------------

    fn apply_file(&self, file: &File) -> Result<bool, ResourceError> {
        if file.path.as_os_str().is_empty() {
            return Err(ResourceError::EmptyPath);
        }
        match &file.state {
            FileState::Plain { content, mode } => {
                self.apply_plain(&file.path, content.as_deref(), mode)
            }
            FileState::Directory { mode } => self.apply_directory(&file.path, mode),
            FileState::Symlink { target } => self.apply_symlink(&file.path, target),
            FileState::Absent => self.apply_absent(&file.path),
        }
    }

    fn apply_plain(
        &self,
        path: &Path,
        content: Option<&[u8]>,
        mode: &Mode,
    ) -> Result<bool, ResourceError> {
        let Some(content) = content else {
            // No managed content: the file must already exist as a regular
            // file; only the mode may be brought into line.
            let info = self
                .system
                .lstat(path)
                .map_err(ResourceError::io("lstat", path))?;
            if !info.is_file() {
                return Err(ResourceError::NotRegularFile {
                    path: path.to_path_buf(),
                });
            }
            return self.apply_mode_with_info(path, &info, mode);
        };

        let mut content_changed = false;
        match self.system.create_file(path, 0o666) {
            // rely on umask to restrict
            Ok(mut w) => {
                w.write_all(content)
                    .map_err(ResourceError::io("write", path))?;
                content_changed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let mut f = self
                    .system
                    .open_file(path)
                    .map_err(ResourceError::io("open", path))?;
                if !matches_content(&mut f, content).map_err(ResourceError::io("read", path))? {
                    f.seek(SeekFrom::Start(0))
                        .map_err(ResourceError::io("seek", path))?;
                    f.truncate(0).map_err(ResourceError::io("truncate", path))?;
                    f.write_all(content)
                        .map_err(ResourceError::io("write", path))?;
                    content_changed = true;
                }
            }
            Err(e) => return Err(ResourceError::io("create", path)(e)),
        }
        let mode_changed = self.apply_mode(path, mode)?;
        Ok(content_changed || mode_changed)
    }

    fn apply_directory(&self, path: &Path, mode: &Mode) -> Result<bool, ResourceError> {
        match self.system.mkdir(path, 0o777) {
            // rely on umask to restrict
            Ok(()) => {
                self.apply_mode(path, mode)?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let info = self
                    .system
                    .lstat(path)
                    .map_err(ResourceError::io("lstat", path))?;
                if !info.is_dir() {
                    return Err(ResourceError::NotDirectory {
                        path: path.to_path_buf(),
                    });
                }
                self.apply_mode_with_info(path, &info, mode)
            }
            Err(e) => Err(ResourceError::io("mkdir", path)(e)),
        }
    }

    fn apply_symlink(&self, path: &Path, target: &Path) -> Result<bool, ResourceError> {
        match self.system.symlink(target, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Ensure that what exists is a symlink before retargeting.
                let info = self
                    .system
                    .lstat(path)
                    .map_err(ResourceError::io("lstat", path))?;
                if !info.is_symlink() {
                    return Err(ResourceError::NotSymlink {
                        path: path.to_path_buf(),
                    });
                }
                let actual = self
                    .system
                    .readlink(path)
                    .map_err(ResourceError::io("readlink", path))?;
                if actual == target {
                    return Ok(false);
                }
                self.system
                    .remove(path)
                    .map_err(ResourceError::io("retarget", path))?;
                self.system
                    .symlink(target, path)
                    .map_err(ResourceError::io("retarget", path))?;
                Ok(true)
            }
            Err(e) => Err(ResourceError::io("symlink", path)(e)),
        }
    }

    fn apply_absent(&self, path: &Path) -> Result<bool, ResourceError> {
        match self.system.remove(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ResourceError::io("remove", path)(e)),
        }
    }

    // -- mode ---------------------------------------------------------------

    fn apply_mode(&self, path: &Path, mode: &Mode) -> Result<bool, ResourceError> {
        if mode.is_unset() {
            return Ok(false);
        }
        let info = self
            .system
            .lstat(path)
            .map_err(ResourceError::io("lstat", path))?;
        self.apply_mode_with_info(path, &info, mode)
    }

    fn apply_mode_with_info(
        &self,
        path: &Path,
        info: &crate::system::FileInfo,
        mode: &Mode,
    ) -> Result<bool, ResourceError> {
        let bits_changed = self.apply_mode_bits(path, info, mode.bits)?;
        let owner_changed = self.apply_mode_owner(path, info, &mode.user, &mode.group)?;
        Ok(bits_changed || owner_changed)
    }

    fn apply_mode_bits(
        &self,
        path: &Path,
        info: &crate::system::FileInfo,
        bits: Option<u32>,
    ) -> Result<bool, ResourceError> {
        let Some(bits) = bits else {
            return Ok(false);
        };
        let want = bits & MODE_BITS_MASK;
        if info.mode & MODE_BITS_MASK == want {
            return Ok(false);
        }
        self.system
            .chmod(path, want)
            .map_err(ResourceError::io("chmod", path))?;
        Ok(true)
    }

    fn apply_mode_owner(
        &self,
        path: &Path,
        info: &crate::system::FileInfo,
        user: &OwnerRef,
        group: &OwnerRef,
    ) -> Result<bool, ResourceError> {
        let uid = self.resolve_user(user)?;
        let gid = self.resolve_group(group)?;
        if uid.is_none() && gid.is_none() {
            return Ok(false);
        }
        match self.system.owner_info(info) {
            Ok((current_uid, current_gid)) => {
                if uid.is_none_or(|u| u == current_uid) && gid.is_none_or(|g| g == current_gid) {
                    return Ok(false);
                }
            }
            Err(e) => {
                self.log
                    .info(&format!("reading file owner: {e}; assuming need to chown"));
            }
        }
        self.system
            .chown(path, uid, gid)
            .map_err(ResourceError::io("chown", path))?;
        Ok(true)
    }

    fn resolve_user(&self, user: &OwnerRef) -> Result<Option<u32>, ResourceError> {
        match user {
            OwnerRef::Unset => Ok(None),
            OwnerRef::Id(id) => Ok(Some(*id)),
            OwnerRef::Name(name) => self
                .lookup
                .user(self.system, name)
                .map(Some)
                .map_err(|source| ResourceError::LookupUser {
                    name: name.clone(),
                    source,
                }),
        }
    }

    fn resolve_group(&self, group: &OwnerRef) -> Result<Option<u32>, ResourceError> {
        match group {
            OwnerRef::Unset => Ok(None),
            OwnerRef::Id(id) => Ok(Some(*id)),
            OwnerRef::Name(name) => self
                .lookup
                .group(self.system, name)
                .map(Some)
                .map_err(|source| ResourceError::LookupGroup {
                    name: name.clone(),
                    source,
                }),
        }
    }

    // -- exec ---------------------------------------------------------------

    fn apply_exec(&self, exec: &Exec) -> Result<bool, ResourceError> {
        if !self.eval_condition(&exec.condition)? {
            return Ok(false);
        }
        let cmd = self.build_command(&exec.command)?;
        match self.system.run(&cmd) {
            Ok(res) if res.success => Ok(true),
            Ok(res) => Err(ResourceError::CommandFailed {
                code: res.code,
                output: res.output,
            }),
            Err(source) => Err(ResourceError::CommandSpawn { source }),
        }
    }

    fn eval_condition(&self, condition: &Condition) -> Result<bool, ResourceError> {
        if self.skip_conditions {
            return Ok(true);
        }
        match condition {
            Condition::Always => Ok(true),
            Condition::OnlyIf(probe) => self.run_condition(probe),
            Condition::Unless(probe) => Ok(!self.run_condition(probe)?),
            Condition::FileAbsent(path) => match self.system.lstat(path) {
                Ok(_) => Ok(false),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(ResourceError::io("lstat", path)(e)),
            },
            Condition::IfDepsChanged(ids) => {
                if ids.is_empty() {
                    return Err(ResourceError::EmptyDepsChanged);
                }
                for &id in ids {
                    if !self.deps_changed.contains_key(&id) {
                        return Err(ResourceError::IndirectDependency { id });
                    }
                }
                Ok(ids
                    .iter()
                    .any(|id| self.deps_changed.get(id).copied().unwrap_or(false)))
            }
        }
    }

    /// Run a probe command; zero exit means true, nonzero means false, and a
    /// command that cannot start surfaces as an error.
    fn run_condition(&self, probe: &Command) -> Result<bool, ResourceError> {
        let cmd = self.build_command(probe)?;
        match self.system.run(&cmd) {
            Ok(res) => Ok(res.success),
            Err(source) => Err(ResourceError::CommandSpawn { source }),
        }
    }

    fn build_command(&self, command: &Command) -> Result<Cmd, ResourceError> {
        let (path, args, stdin) = match &command.line {
            CommandLine::Argv(argv) => {
                let Some(argv0) = argv.first() else {
                    return Err(ResourceError::EmptyArgv);
                };
                if !Path::new(argv0).is_absolute() {
                    return Err(ResourceError::RelativeArgv {
                        argv0: argv0.clone(),
                    });
                }
                (PathBuf::from(argv0), argv.clone(), None)
            }
            CommandLine::Bash(script) => {
                let arg0 = self.bash.to_string_lossy().into_owned();
                (
                    self.bash.to_path_buf(),
                    vec![arg0],
                    Some(script.clone().into_bytes()),
                )
            }
        };
        let mut env = Vec::with_capacity(command.env.len());
        for (index, entry) in command.env.iter().enumerate() {
            if entry.name.is_empty() {
                return Err(ResourceError::MissingEnvName { index });
            }
            env.push((entry.name.clone(), entry.value.clone()));
        }
        let dir = match &command.working_directory {
            Some(dir) if !dir.as_os_str().is_empty() => {
                if !dir.is_absolute() {
                    return Err(ResourceError::RelativeWorkingDirectory { dir: dir.clone() });
                }
                dir.clone()
            }
            _ => PathBuf::from(LOCAL_ROOT),
        };
        Ok(Cmd {
            path,
            args,
            env,
            dir,
            stdin,
        })
    }
}

/// Compare a reader's content against `want`, short-circuiting on the first
/// mismatch or size difference.
fn matches_content(r: &mut dyn Read, want: &[u8]) -> io::Result<bool> {
    let mut buf = [0u8; 4096];
    let mut remaining = want;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            return Ok(remaining.is_empty());
        }
        let Some(chunk) = buf.get(..n) else {
            return Ok(false);
        };
        if n > remaining.len() || chunk != &remaining[..n] {
            return Ok(false);
        }
        remaining = &remaining[n..];
    }
}
