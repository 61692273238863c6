use std::ffi::OsString;
use std::io;
use std::process::Command;

use crate::error::FatalError;

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// Captured result of one external command.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Narrow seam over external commands so the executor and probe can be
/// tested without ffmpeg installed.
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ToolOutput>;
}

/// Runs commands as real subprocesses.
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ToolOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Verify that a required tool is present by asking it for its version.
pub fn check_installed(runner: &dyn ToolRunner, program: &str) -> Result<(), FatalError> {
    match runner.run(program, &[OsString::from("-version")]) {
        Ok(output) if output.success => Ok(()),
        _ => Err(FatalError::DependencyMissing(program.to_string())),
    }
}

/// Render an argv for display (dry runs, diagnostics).
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
