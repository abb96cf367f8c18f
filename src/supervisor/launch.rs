use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::config::ServerConfig;
use crate::paths::server_log_paths;

use super::SupervisorError;

/// Operation token the driver script understands as "run the HTTP server".
pub const START_SERVER: &str = "start_server";

/// Where a server's stdout/stderr go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Inherit,
    Files { stdout: PathBuf, stderr: PathBuf },
}

/// Everything needed to spawn one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub index: usize,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub output: OutputTarget,
}

impl LaunchSpec {
    /// `<executable> <script> start_server <port> <project> <config_file>`
    /// run inside the model directory.
    pub fn from_config(config: &ServerConfig, index: usize) -> Result<Self, SupervisorError> {
        let program = config
            .executable
            .clone()
            .ok_or(SupervisorError::MissingSetting("server.executable"))?;
        let script = config
            .script
            .as_ref()
            .ok_or(SupervisorError::MissingSetting("server.script"))?;
        let project = config
            .project
            .as_ref()
            .ok_or(SupervisorError::MissingSetting("server.project"))?;
        let config_file = config
            .config_file
            .as_ref()
            .ok_or(SupervisorError::MissingSetting("server.config_file"))?;

        let output = match &config.log_dir {
            Some(dir) => {
                let (stdout, stderr) = server_log_paths(dir, index);
                OutputTarget::Files { stdout, stderr }
            }
            None => OutputTarget::Inherit,
        };

        Ok(Self {
            index,
            program,
            args: vec![
                script.display().to_string(),
                START_SERVER.to_string(),
                config.port_for(index).to_string(),
                project.clone(),
                config_file.display().to_string(),
            ],
            cwd: config.model_dir.clone(),
            output,
        })
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

/// A spawned server process.
pub trait ChildProcess: Send {
    fn id(&self) -> u32;

    /// `Some` once the process has exited; never blocks.
    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>>;

    fn kill(&mut self) -> io::Result<()>;
}

/// Spawns server processes.
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>, SupervisorError>;
}

/// Launcher backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl Launcher for CommandLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ChildProcess>, SupervisorError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null());
        match &spec.output {
            OutputTarget::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            OutputTarget::Files { stdout, stderr } => {
                cmd.stdout(open_log(stdout)?).stderr(open_log(stderr)?);
            }
        }
        let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: spec.command_line(),
            source,
        })?;
        Ok(Box::new(OsChild(child)))
    }
}

fn open_log(path: &Path) -> Result<File, SupervisorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| SupervisorError::LogFile {
            path: path.to_path_buf(),
            source,
        })?;
    }
    File::create(path).map_err(|source| SupervisorError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

struct OsChild(Child);

impl ChildProcess for OsChild {
    fn id(&self) -> u32 {
        self.0.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self
            .0
            .try_wait()?
            .map(|status| ExitInfo {
                code: status.code(),
            }))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.0.kill()?;
        // Reap so the process does not linger as a zombie.
        let _ = self.0.wait();
        Ok(())
    }
}
