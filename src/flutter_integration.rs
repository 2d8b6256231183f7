use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::output_kind::OutputKind;

pub const NO_CODESIGN_FLAG: &str = "--no-codesign";
const CODESIGN_REQUIRED_MARKER: &str = "code signing is required";

/// Runs `flutter build` for one output kind.
pub struct FlutterBuilder {
    program: PathBuf,
    project_dir: PathBuf,
    kind: OutputKind,
    args: Vec<String>,
}

impl FlutterBuilder {
    pub fn new(project_dir: impl AsRef<Path>, kind: OutputKind) -> Self {
        Self {
            program: PathBuf::from("flutter"),
            project_dir: project_dir.as_ref().to_path_buf(),
            kind,
            args: Vec::new(),
        }
    }

    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Full argument list passed to the flutter executable.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            self.kind.build_subcommand().to_string(),
        ];
        args.extend(self.args.iter().cloned());

        if self.kind == OutputKind::IosApp && !self.args.iter().any(|a| a == NO_CODESIGN_FLAG) {
            args.push(NO_CODESIGN_FLAG.to_string());
        }

        args
    }

    pub fn printable_command(&self) -> String {
        let mut words = vec![self.program.to_string_lossy().into_owned()];
        words.extend(self.command_args());
        shell_words::join(words)
    }

    pub fn build(&self) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args())
            .current_dir(&self.project_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        if self.kind.is_ios() {
            cmd.stdin(Stdio::piped());
        }

        info!("$ {}", self.printable_command());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::io(format!("Failed to run {}", self.program.display()), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Answers an interactive identity prompt with "abort".
            if let Err(e) = stdin.write_all(b"a") {
                debug!("Failed to write to flutter stdin: {}", e);
            }
        }

        let mut captured = String::new();
        if let Some(stderr) = child.stderr.take() {
            for line in BufReader::new(stderr).split(b'\n') {
                let line = line.map_err(|e| Error::io("Failed to read flutter output", e))?;
                let line = String::from_utf8_lossy(&line);
                eprintln!("{}", line);
                if self.kind.is_ios() {
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::io("Failed to wait for flutter", e))?;

        if self.kind == OutputKind::IosApp && requires_codesigning(&captured) {
            return Err(Error::CodeSigningRequired);
        }

        if !status.success() {
            return Err(Error::BuildFailed {
                subcommand: self.kind.build_subcommand().to_string(),
                status: status.to_string(),
            });
        }

        Ok(())
    }
}

pub fn requires_codesigning(stderr: &str) -> bool {
    stderr.to_lowercase().contains(CODESIGN_REQUIRED_MARKER)
}

/// First line of `flutter --version`, if flutter can be run.
pub fn flutter_version(program: &Path) -> Result<String> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .map_err(|e| Error::io(format!("Failed to run {} --version", program.display()), e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}
