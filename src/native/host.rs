use super::allowlist::{build_repair_script, is_launch_allowed};
use super::protocol::{read_frame, write_frame, HostRequest, HostResponse, HOST_NAME};
use crate::errors::AppResult;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

pub const OUTPUT_LIMIT: usize = 3_200;
const TRUNCATION_MARK: &str = "\n...truncated...";

static NEEDS_ELEVATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)access is denied|administrator").expect("valid regex"));

/// Result of running one script. `spawned` is false when the shell could not
/// be started at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub spawned: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

pub trait ProcessRunner: Send + Sync {
    fn run_powershell(&self, script: &str, timeout: Duration) -> ProcessOutput;
    fn launch_detached(&self, command: &str, args: &[String]) -> AppResult<()>;
}

pub fn truncate_output(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARK}", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn needs_elevation(stderr: &str) -> bool {
    NEEDS_ELEVATION.is_match(stderr)
}

/// Runs scripts with the system PowerShell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

impl ProcessRunner for SystemRunner {
    fn run_powershell(&self, script: &str, timeout: Duration) -> ProcessOutput {
        let spawned = Command::new("powershell.exe")
            .args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                return ProcessOutput {
                    error: Some(error.to_string()),
                    ..ProcessOutput::default()
                }
            }
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let (exit_code, error) = match child.wait_timeout(timeout) {
            Ok(Some(status)) => (Some(status.code().unwrap_or(0)), None),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                (None, Some(format!("timed out after {}s", timeout.as_secs())))
            }
            Err(error) => (None, Some(error.to_string())),
        };
        ProcessOutput {
            spawned: true,
            exit_code,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            error,
        }
    }

    fn launch_detached(&self, command: &str, args: &[String]) -> AppResult<()> {
        Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}

/// Serves framed requests on one pipe. Only allow-listed repair scripts and
/// launch targets ever reach the runner.
pub struct NativeHost<R: ProcessRunner> {
    runner: R,
    repair_timeout: Duration,
}

impl<R: ProcessRunner> NativeHost<R> {
    pub fn new(runner: R, repair_timeout: Duration) -> Self {
        Self { runner, repair_timeout }
    }

    pub fn handle(&self, message: &Value) -> HostResponse {
        match HostRequest::from_value(message) {
            HostRequest::Ping => HostResponse {
                ok: true,
                host: Some(HOST_NAME.to_string()),
                ts: Some(Utc::now().timestamp_millis()),
                ..HostResponse::default()
            },
            HostRequest::Repair { command_id, input_value } => self.repair(command_id, input_value.as_deref()),
            HostRequest::Launch { command, args } => self.launch(command, &args),
            HostRequest::Unknown => HostResponse::failure("no_command"),
        }
    }

    fn repair(&self, command_id: String, input_value: Option<&str>) -> HostResponse {
        let script = match build_repair_script(&command_id, input_value) {
            Ok(script) => script,
            Err(error) => {
                tracing::warn!(command_id = %command_id, error = %error, "repair request refused");
                return HostResponse {
                    command_id: Some(command_id),
                    ..HostResponse::failure("unknown_or_invalid_command")
                };
            }
        };

        let started_at = Utc::now().timestamp_millis();
        tracing::info!(command_id = %command_id, "running repair command");
        let output = self.runner.run_powershell(&script, self.repair_timeout);
        let ok = output.spawned && output.error.is_none() && output.exit_code.map_or(true, |code| code == 0);
        let stderr = truncate_output(&output.stderr, OUTPUT_LIMIT);
        HostResponse {
            ok,
            command_id: Some(command_id),
            exit_code: output.exit_code,
            stdout: Some(truncate_output(&output.stdout, OUTPUT_LIMIT)),
            needs_elevation: Some(needs_elevation(&stderr)),
            stderr: Some(stderr),
            started_at: Some(started_at),
            ended_at: Some(Utc::now().timestamp_millis()),
            error: output.error,
            ..HostResponse::default()
        }
    }

    fn launch(&self, command: String, args: &[String]) -> HostResponse {
        if !is_launch_allowed(&command) {
            tracing::warn!(command = %command, "launch request refused");
            return HostResponse {
                command: Some(command),
                ..HostResponse::failure("command_not_allowed")
            };
        }
        match self.runner.launch_detached(&command, args) {
            Ok(()) => HostResponse {
                ok: true,
                launched: Some(command),
                ..HostResponse::default()
            },
            Err(error) => {
                tracing::warn!(command = %command, error = %error, "launch failed");
                HostResponse::failure(error.user_message())
            }
        }
    }

    /// Answers frames until the input closes. A malformed frame gets an error
    /// reply; an unreadable stream ends the loop.
    pub fn serve<I: Read, O: Write>(&self, input: &mut I, output: &mut O) -> AppResult<()> {
        loop {
            let response = match read_frame(input) {
                Ok(Some(message)) => self.handle(&message),
                Ok(None) => return Ok(()),
                Err(error @ crate::errors::AppError::Validation(_)) => {
                    tracing::warn!(error = %error, "malformed native message");
                    HostResponse::failure("processing_error")
                }
                Err(error) => return Err(error),
            };
            write_frame(output, &response)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::protocol::encode_frame;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        scripts: Mutex<Vec<String>>,
        launched: Mutex<Vec<String>>,
        stderr: String,
        exit_code: Option<i32>,
    }

    impl ProcessRunner for RecordingRunner {
        fn run_powershell(&self, script: &str, _timeout: Duration) -> ProcessOutput {
            self.scripts.lock().expect("scripts").push(script.to_string());
            ProcessOutput {
                spawned: true,
                exit_code: self.exit_code,
                stdout: "x".repeat(4_000),
                stderr: self.stderr.clone(),
                error: None,
            }
        }

        fn launch_detached(&self, command: &str, _args: &[String]) -> AppResult<()> {
            self.launched.lock().expect("launched").push(command.to_string());
            Ok(())
        }
    }

    fn host(runner: RecordingRunner) -> NativeHost<RecordingRunner> {
        NativeHost::new(runner, Duration::from_secs(5))
    }

    #[test]
    fn ping_identifies_the_host() {
        let response = host(RecordingRunner::default()).handle(&json!({ "type": "ping" }));
        assert!(response.ok);
        assert_eq!(response.host.as_deref(), Some("stackdash-native"));
        assert!(response.ts.is_some());
    }

    #[test]
    fn unknown_messages_get_no_command() {
        let response = host(RecordingRunner::default()).handle(&json!({ "type": "shell", "cmd": "rm" }));
        assert_eq!(response, HostResponse::failure("no_command"));
    }

    #[test]
    fn repair_runs_only_table_scripts() {
        let runner = RecordingRunner {
            exit_code: Some(0),
            ..RecordingRunner::default()
        };
        let host = host(runner);
        let refused = host.handle(&json!({ "type": "repair", "commandId": "format-c" }));
        assert_eq!(refused.error.as_deref(), Some("unknown_or_invalid_command"));
        let refused = host.handle(&json!({ "type": "repair", "commandId": "pnp-disable", "inputValue": "a;b" }));
        assert!(!refused.ok);
        assert!(host.runner.scripts.lock().expect("scripts").is_empty());

        let response = host.handle(&json!({ "type": "repair", "commandId": "net-dns-flush" }));
        assert!(response.ok);
        assert_eq!(response.exit_code, Some(0));
        assert_eq!(response.needs_elevation, Some(false));
        let stdout = response.stdout.expect("stdout");
        assert!(stdout.ends_with("...truncated..."));
        assert_eq!(stdout.chars().filter(|ch| *ch == 'x').count(), OUTPUT_LIMIT);
        assert_eq!(
            host.runner.scripts.lock().expect("scripts").as_slice(),
            ["Clear-DnsClientCache".to_string()]
        );
    }

    #[test]
    fn access_denied_marks_elevation() {
        let runner = RecordingRunner {
            exit_code: Some(1),
            stderr: "Restart-NetAdapter : Access is denied.".to_string(),
            ..RecordingRunner::default()
        };
        let response = host(runner).handle(&json!({ "type": "repair", "commandId": "net-restart" }));
        assert!(!response.ok);
        assert_eq!(response.needs_elevation, Some(true));
    }

    #[test]
    fn launch_is_limited_to_the_allow_list() {
        let host = host(RecordingRunner::default());
        let refused = host.handle(&json!({ "command": "cmd.exe", "args": ["/c", "del"] }));
        assert_eq!(refused.error.as_deref(), Some("command_not_allowed"));
        let launched = host.handle(&json!({ "command": "notepad", "args": [] }));
        assert_eq!(launched.launched.as_deref(), Some("notepad"));
        assert_eq!(host.runner.launched.lock().expect("launched").as_slice(), ["notepad".to_string()]);
    }

    #[test]
    fn serve_answers_every_frame() {
        let mut input = encode_frame(&json!({ "type": "ping" })).expect("frame");
        input.extend(encode_frame(&json!({})).expect("frame"));
        let mut output = Vec::new();
        host(RecordingRunner::default())
            .serve(&mut Cursor::new(input), &mut output)
            .expect("serve");

        let mut replies = Cursor::new(output);
        let first = read_frame(&mut replies).expect("read").expect("first");
        let second = read_frame(&mut replies).expect("read").expect("second");
        assert_eq!(first["ok"], true);
        assert_eq!(second["error"], "no_command");
        assert!(read_frame(&mut replies).expect("read").is_none());
    }
}
