//! Hook module backed by an external executable.
//!
//! The executable receives the configured arguments followed by the hook
//! point name (`pre-create`, `post-delete`, ...) and the record as JSON on
//! stdin. A non-zero exit fails the hook. At mutating points a non-empty
//! stdout is read back as the replacement record.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use super::{HookModule, HookPoint};
use crate::config::HookConfig;
use crate::errors::HookError;
use crate::models::PersonRecord;

pub struct CommandHookModule {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    enabled: bool,
}

impl CommandHookModule {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            name,
            program,
            args,
            enabled: true,
        }
    }

    /// Build the module from `[hooks]`, or `None` when no command is set.
    pub fn from_config(config: &HookConfig) -> Option<Self> {
        let program = config.command.as_ref()?;
        info!(command = %program.display(), enabled = config.enabled, "command hook configured");
        let mut module = Self::new(program.clone(), config.args.clone());
        module.enabled = config.enabled;
        Some(module)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run_command(&self, point: HookPoint, person: &PersonRecord) -> Result<String, HookError> {
        let input = serde_json::to_vec(person).map_err(|e| HookError::InvalidOutput {
            hook: self.name.clone(),
            detail: format!("could not encode record: {e}"),
        })?;

        debug!(
            command = %self.program.display(),
            point = %point,
            uid = %person.uid,
            "running hook command"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(point.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    HookError::CommandNotFound(self.program.display().to_string())
                } else {
                    HookError::IoError(e)
                }
            })?;

        // Stdin is fed from its own thread; a hook may echo its input back
        // before reading all of it.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || match stdin.write_all(&input) {
                // A hook that exits without reading its input closes the pipe.
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            })
        });

        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            writer.join().map_err(|_| HookError::Failed {
                hook: self.name.clone(),
                detail: "stdin writer panicked".to_string(),
            })??;
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, point = %point, "hook command failed");
            return Err(HookError::Failed {
                hook: self.name.clone(),
                detail: format!("exit code {exit_code}: {stderr}"),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_mutating(&self, point: HookPoint, person: &mut PersonRecord) -> Result<(), HookError> {
        let stdout = self.run_command(point, person)?;
        if stdout.trim().is_empty() {
            return Ok(());
        }

        let mut replacement: PersonRecord =
            serde_json::from_str(&stdout).map_err(|e| HookError::InvalidOutput {
                hook: self.name.clone(),
                detail: e.to_string(),
            })?;
        if replacement.inum != person.inum {
            warn!(
                inum = person.id(),
                attempted = replacement.id(),
                "hook tried to change inum, keeping original"
            );
        }
        if replacement.iname != person.iname || replacement.dn != person.dn {
            warn!(inum = person.id(), "hook tried to change iname or dn, keeping original");
        }
        replacement.inum = person.inum.clone();
        replacement.iname = person.iname.clone();
        replacement.dn = person.dn.clone();
        replacement.password = person.password.take();
        *person = replacement;
        debug!(point = %point, uid = %person.uid, "hook replaced record");
        Ok(())
    }
}

impl HookModule for CommandHookModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn on_new_record(&self, person: &mut PersonRecord) -> Result<(), HookError> {
        self.run_mutating(HookPoint::NewRecord, person)
    }

    fn pre_create(&self, person: &mut PersonRecord) -> Result<(), HookError> {
        self.run_mutating(HookPoint::PreCreate, person)
    }

    fn post_create(&self, person: &PersonRecord) -> Result<(), HookError> {
        self.run_command(HookPoint::PostCreate, person).map(drop)
    }

    fn pre_update(&self, person: &mut PersonRecord) -> Result<(), HookError> {
        self.run_mutating(HookPoint::PreUpdate, person)
    }

    fn post_update(&self, person: &PersonRecord) -> Result<(), HookError> {
        self.run_command(HookPoint::PostUpdate, person).map(drop)
    }

    fn pre_delete(&self, person: &mut PersonRecord) -> Result<(), HookError> {
        self.run_mutating(HookPoint::PreDelete, person)
    }

    fn post_delete(&self, person: &PersonRecord) -> Result<(), HookError> {
        self.run_command(HookPoint::PostDelete, person).map(drop)
    }
}
