//! Transpiles a catalog into a self-contained bash script.
//!
//! Walks the same dependency graph as the applier, in the same order, and
//! emits one quoted block per resource performing the equivalent action on a
//! host without the engine installed. The script targets a clean host: exec
//! conditions are carried over as shell guards, except dependency-change
//! triggers, which run unconditionally (on a clean host every dependency
//! changes).

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::apply::DEFAULT_BASH_PATH;
use crate::catalog::{
    Catalog, Command, CommandLine, Condition, Exec, File, FileState, Payload, Resource,
};
use crate::graph::Graph;

const HEREDOC_MARKER: &str = "!EOF!";

/// Convert a catalog into a bash script and write it to `w`.
///
/// # Errors
///
/// Fails on graph construction errors, on resources the script form cannot
/// express (relative argv[0], empty env names, dependency-change triggers
/// naming indirect dependencies), and on write errors.
pub fn write_script(w: &mut dyn Write, catalog: &Catalog) -> Result<()> {
    let mut graph = Graph::new(&catalog.resources)?;
    let mut out = Gen { w, indent: 0 };
    out.line("#!/bin/bash")?;
    out.line("_() {")?;
    out.line("set -e")?;
    while !graph.done() {
        let ready: Vec<_> = graph.ready().to_vec();
        if ready.is_empty() {
            bail!("graph not done, but has nothing to do");
        }
        for id in ready {
            let Some(res) = graph.resource(id) else {
                bail!("resource id={id} missing from graph");
            };
            out.resource(res)
                .with_context(|| format!("resource id={id}"))?;
            graph.mark(id);
        }
    }
    out.line("}")?;
    out.line("_ \"$0\" \"$@\"")?;
    Ok(())
}

struct Gen<'a> {
    w: &'a mut dyn Write,
    indent: usize,
}

impl Gen<'_> {
    fn line(&mut self, text: &str) -> Result<()> {
        for _ in 0..self.indent {
            self.w.write_all(b"  ")?;
        }
        self.w.write_all(text.as_bytes())?;
        self.w.write_all(b"\n")?;
        Ok(())
    }

    fn indented(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.indent += 1;
        let result = f(self);
        self.indent -= 1;
        result
    }

    fn resource(&mut self, res: &Resource) -> Result<()> {
        self.line("")?;
        if res.comment.is_empty() {
            self.line(&format!("# resource id={}", res.id))?;
        } else {
            self.line(&format!("# {}", res.comment))?;
        }
        match &res.payload {
            Payload::Noop => Ok(()),
            Payload::File(file) => self.file(file),
            Payload::Exec(exec) => self.exec(res, exec),
        }
    }

    fn file(&mut self, file: &File) -> Result<()> {
        let path = path_str(&file.path)?;
        if path.is_empty() {
            bail!("file path is empty");
        }
        let quoted = shell_quote(path);
        match &file.state {
            FileState::Plain { content, .. } => {
                // A content-less plain file only asserts existence; there is
                // nothing for the script to do.
                if let Some(content) = content {
                    self.line(&format!("base64 -d > {quoted} <<'{HEREDOC_MARKER}'"))?;
                    self.raw(&BASE64.encode(content))?;
                    self.raw(HEREDOC_MARKER)?;
                }
                Ok(())
            }
            FileState::Directory { .. } => {
                self.line(&format!("if [[ ! -d {quoted} ]]; then"))?;
                self.indented(|g| g.line(&format!("mkdir {quoted}")))?;
                self.line("fi")
            }
            FileState::Symlink { target } => {
                let target = shell_quote(path_str(target)?);
                self.line(&format!("if [[ -L {quoted} ]]; then"))?;
                self.indented(|g| {
                    g.line(&format!("if [[ \"$(readlink {quoted})\" != {target} ]]; then"))?;
                    g.indented(|g| {
                        g.line(&format!("rm {quoted}"))?;
                        g.line(&format!("ln -s {target} {quoted}"))
                    })?;
                    g.line("fi")
                })?;
                self.line(&format!("elif [[ -e {quoted} ]]; then"))?;
                self.indented(|g| {
                    g.line(&format!("echo {} >&2", shell_quote(&format!("{path} is not a symlink"))))?;
                    g.line("exit 1")
                })?;
                self.line("else")?;
                self.indented(|g| g.line(&format!("ln -s {target} {quoted}")))?;
                self.line("fi")
            }
            FileState::Absent => {
                self.line(&format!("if [[ -e {quoted} || -L {quoted} ]]; then"))?;
                self.indented(|g| g.line(&format!("rm {quoted}")))?;
                self.line("fi")
            }
        }
    }

    fn exec(&mut self, res: &Resource, exec: &Exec) -> Result<()> {
        match &exec.condition {
            Condition::Always => self.command(&exec.command),
            Condition::OnlyIf(probe) => {
                self.line(&format!("if {}; then", probe_text(probe)?))?;
                self.indented(|g| g.command(&exec.command))?;
                self.line("fi")
            }
            Condition::Unless(probe) => {
                self.line(&format!("if ! {}; then", probe_text(probe)?))?;
                self.indented(|g| g.command(&exec.command))?;
                self.line("fi")
            }
            Condition::FileAbsent(path) => {
                let quoted = shell_quote(path_str(path)?);
                self.line(&format!("if [[ ! -e {quoted} && ! -L {quoted} ]]; then"))?;
                self.indented(|g| g.command(&exec.command))?;
                self.line("fi")
            }
            Condition::IfDepsChanged(ids) => {
                if ids.is_empty() {
                    bail!("ifDepsChanged is empty list");
                }
                let direct: HashSet<_> = res.dependencies.iter().collect();
                for id in ids {
                    if !direct.contains(id) {
                        bail!(
                            "depends on id {id}, which is not in resource's direct dependencies"
                        );
                    }
                }
                // On the clean host the script targets, every dependency
                // counts as changed.
                self.command(&exec.command)
            }
        }
    }

    /// Emit a command block. `bash` commands read their body from a
    /// here-document; `argv` commands are a single quoted line.
    fn command(&mut self, cmd: &Command) -> Result<()> {
        let env = env_prefix(cmd)?;
        let cd = cd_prefix(cmd)?;
        match &cmd.line {
            CommandLine::Argv(argv) => {
                let Some(argv0) = argv.first() else {
                    bail!("0-length argv");
                };
                if !Path::new(argv0).is_absolute() {
                    bail!("argv[0] ({argv0:?}) is not an absolute path");
                }
                let words: Vec<String> = argv.iter().map(|a| shell_quote(a)).collect();
                let invocation = format!("{env}{}", words.join(" "));
                match cd {
                    Some(cd) => self.line(&format!("({cd} && {invocation})")),
                    None => self.line(&invocation),
                }
            }
            CommandLine::Bash(body) => {
                let invocation = format!("{env}{DEFAULT_BASH_PATH}");
                match cd {
                    Some(cd) => self.line(&format!(
                        "({cd} && {invocation}) <<'{HEREDOC_MARKER}'"
                    ))?,
                    None => self.line(&format!("{invocation} <<'{HEREDOC_MARKER}'"))?,
                }
                self.raw(body)?;
                self.raw(HEREDOC_MARKER)
            }
        }
    }

    /// Write text at column zero, regardless of indent (here-document data).
    fn raw(&mut self, text: &str) -> Result<()> {
        self.w.write_all(text.as_bytes())?;
        self.w.write_all(b"\n")?;
        Ok(())
    }
}

/// Render a probe as a single command suitable for an `if` clause. The body
/// of a bash probe is piped to the interpreter instead of a here-document so
/// it stays on one line.
fn probe_text(probe: &Command) -> Result<String> {
    let env = env_prefix(probe)?;
    let cd = cd_prefix(probe)?;
    let bare = match &probe.line {
        CommandLine::Argv(argv) => {
            let Some(argv0) = argv.first() else {
                bail!("0-length argv");
            };
            if !Path::new(argv0).is_absolute() {
                bail!("argv[0] ({argv0:?}) is not an absolute path");
            }
            let words: Vec<String> = argv.iter().map(|a| shell_quote(a)).collect();
            format!("{env}{}", words.join(" "))
        }
        CommandLine::Bash(body) => {
            format!("printf '%s' {} | {env}{DEFAULT_BASH_PATH}", shell_quote(body))
        }
    };
    Ok(match cd {
        Some(cd) => format!("({cd} && {bare})"),
        None => bare,
    })
}

fn env_prefix(cmd: &Command) -> Result<String> {
    if cmd.env.is_empty() {
        return Ok(String::new());
    }
    let mut out = String::from("env ");
    for (index, entry) in cmd.env.iter().enumerate() {
        if entry.name.is_empty() {
            bail!("environment[{index}] missing name");
        }
        out.push_str(&shell_quote(&format!("{}={}", entry.name, entry.value)));
        out.push(' ');
    }
    Ok(out)
}

fn cd_prefix(cmd: &Command) -> Result<Option<String>> {
    match &cmd.working_directory {
        Some(dir) if !dir.as_os_str().is_empty() => {
            if !dir.is_absolute() {
                bail!("working directory {dir:?} is not absolute");
            }
            Ok(Some(format!("cd {}", shell_quote(path_str(dir)?))))
        }
        _ => Ok(None),
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path {} is not valid UTF-8", path.display()))
}

/// Quote a string for bash: safe strings pass through, everything else is
/// single-quoted with embedded quotes escaped as `'\''`.
fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.bytes().all(is_shell_safe) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn is_shell_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'/'
}
