//! Interpreter selection by file extension.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WorkbenchError};

/// Extension (lowercase, no dot) to command line, e.g. `py -> ["python3"]`.
pub type InterpreterTable = BTreeMap<String, Vec<String>>;

pub fn default_interpreters() -> InterpreterTable {
    [
        ("py", "python3"),
        ("js", "node"),
        ("mjs", "node"),
        ("cjs", "node"),
        ("sh", "sh"),
    ]
    .into_iter()
    .map(|(ext, program)| (ext.to_string(), vec![program.to_string()]))
    .collect()
}

/// Program plus leading arguments; the script path is appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

impl Interpreter {
    /// Full argument list for running `file`.
    pub fn args_for(&self, file: &Path) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(file.to_string_lossy().into_owned());
        args
    }
}

/// Pick the interpreter for `path`. Unknown extensions are rejected without
/// spawning anything.
pub fn interpreter_for(path: &Path, table: &InterpreterTable) -> Result<Interpreter> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let command = table
        .get(&extension)
        .filter(|cmd| !cmd.is_empty())
        .ok_or_else(|| WorkbenchError::UnsupportedKind {
            extension: extension.clone(),
        })?;
    Ok(Interpreter {
        program: command[0].clone(),
        args: command[1..].to_vec(),
    })
}

/// A fully specified process to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    pub fn for_file(interpreter: &Interpreter, file: &Path, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: interpreter.program.clone(),
            args: interpreter.args_for(file),
            cwd: cwd.into(),
        }
    }

    /// Free-form command line run through `shell` (e.g. `["sh", "-c"]`).
    pub fn for_command(shell: &[String], command: &str, cwd: impl Into<PathBuf>) -> Self {
        let (program, rest) = match shell.split_first() {
            Some((program, rest)) => (program.clone(), rest.to_vec()),
            None => ("sh".to_string(), vec!["-c".to_string()]),
        };
        let mut args = rest;
        args.push(command.to_string());
        Self {
            program,
            args,
            cwd: cwd.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_files_use_python() {
        let interp = interpreter_for(Path::new("script.py"), &default_interpreters()).expect("py");
        assert_eq!(interp.program, "python3");
    }

    #[test]
    fn javascript_files_use_node() {
        let table = default_interpreters();
        assert_eq!(interpreter_for(Path::new("app.js"), &table).expect("js").program, "node");
        assert_eq!(interpreter_for(Path::new("APP.JS"), &table).expect("js").program, "node");
    }

    #[test]
    fn unknown_extensions_are_unsupported() {
        let table = default_interpreters();
        for name in ["blob.bin", "Makefile", "archive.tar.gz"] {
            let err = interpreter_for(Path::new(name), &table).unwrap_err();
            assert!(matches!(err, WorkbenchError::UnsupportedKind { .. }), "{name}");
        }
    }

    #[test]
    fn configured_args_precede_the_script() {
        let mut table = InterpreterTable::new();
        table.insert("py".to_string(), vec!["python3".to_string(), "-u".to_string()]);
        let interp = interpreter_for(Path::new("main.py"), &table).expect("py");
        let spec = LaunchSpec::for_file(&interp, Path::new("/p/main.py"), "/p");
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args, vec!["-u", "/p/main.py"]);
    }

    #[test]
    fn commands_run_through_the_shell() {
        let shell = vec!["sh".to_string(), "-c".to_string()];
        let spec = LaunchSpec::for_command(&shell, "ls -la", "/p");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c", "ls -la"]);
    }
}
