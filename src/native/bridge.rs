use super::allowlist::{build_repair_script, is_launch_allowed, repair_command, RepairCommand};
use super::host::truncate_output;
use super::protocol::{read_frame_async, write_frame_async, HostRequest, HostResponse};
use crate::errors::{AppError, AppResult};
use crate::widgets::http::BoxFuture;
use chrono::Local;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const REPAIR_LOG_LIMIT: usize = 30;
pub const DISPLAY_OUTPUT_LIMIT: usize = 1_800;

/// Sends one request to the helper and waits for its single reply.
pub trait NativeTransport: Send + Sync {
    fn exchange(&self, request: HostRequest) -> BoxFuture<'_, AppResult<HostResponse>>;
}

/// Starts the helper binary for every request, the way a browser does for
/// one-shot native messages.
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    host_path: PathBuf,
    timeout: Duration,
}

impl ProcessTransport {
    pub fn new(host_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            host_path: host_path.into(),
            timeout,
        }
    }

    async fn round_trip(&self, request: HostRequest) -> AppResult<HostResponse> {
        let mut child = Command::new(&self.host_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| AppError::Config(format!("cannot start native helper {}: {error}", self.host_path.display())))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Internal("native helper stdin unavailable".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("native helper stdout unavailable".to_string()))?;

        write_frame_async(&mut stdin, &request.to_value()).await?;
        drop(stdin);
        let reply = read_frame_async(&mut stdout)
            .await?
            .ok_or_else(|| AppError::Internal("no response from native host".to_string()))?;
        let _ = child.wait().await;
        Ok(serde_json::from_value(reply)?)
    }
}

impl NativeTransport for ProcessTransport {
    fn exchange(&self, request: HostRequest) -> BoxFuture<'_, AppResult<HostResponse>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.round_trip(request)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Internal(format!(
                    "native helper did not answer within {}s",
                    self.timeout.as_secs()
                ))),
            }
        })
    }
}

/// One line of the repair log shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairLogEntry {
    pub label: String,
    pub validation: String,
    pub exit_code: Option<i32>,
    pub output: String,
    pub timestamp: String,
}

impl RepairLogEntry {
    pub fn from_response(command: &RepairCommand, response: &HostResponse) -> Self {
        let ok = response.ok && response.exit_code.map_or(true, |code| code == 0);
        Self {
            label: command.title.to_string(),
            validation: repair_validation(command, response, ok),
            exit_code: response.exit_code,
            output: display_output(response),
            timestamp: Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

fn display_output(response: &HostResponse) -> String {
    let stdout = truncate_output(response.stdout.as_deref().unwrap_or_default(), DISPLAY_OUTPUT_LIMIT);
    let stderr = truncate_output(response.stderr.as_deref().unwrap_or_default(), DISPLAY_OUTPUT_LIMIT);
    if !stdout.is_empty() || !stderr.is_empty() {
        if stderr.is_empty() {
            return stdout;
        }
        return format!("{stdout}\n[stderr]\n{stderr}");
    }
    match &response.error {
        Some(error) => format!("[error]\n{error}"),
        None => "No output returned.".to_string(),
    }
}

/// The one-line verdict shown next to a finished repair command.
pub fn repair_validation(command: &RepairCommand, response: &HostResponse, ok: bool) -> String {
    if response.needs_elevation == Some(true) {
        return "Needs elevated PowerShell (run as Administrator).".to_string();
    }
    if let Some(error) = &response.error {
        return format!("Failed: {error}");
    }
    if !ok {
        return match response.exit_code {
            Some(code) => format!("Failed (exit {code}). Review output."),
            None => "Failed to run. Check native helper.".to_string(),
        };
    }
    if command.validation_hint.is_empty() {
        "Command completed.".to_string()
    } else {
        command.validation_hint.to_string()
    }
}

/// Dashboard-side client of the helper. Requests are checked against the same
/// tables the helper enforces before anything is sent.
pub struct NativeBridge {
    transport: Box<dyn NativeTransport>,
}

impl NativeBridge {
    pub fn new(transport: impl NativeTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    async fn send(&self, request: HostRequest) -> HostResponse {
        match self.transport.exchange(request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, "native helper exchange failed");
                HostResponse::failure(error.user_message())
            }
        }
    }

    pub async fn check_available(&self) -> HostResponse {
        self.send(HostRequest::Ping).await
    }

    pub async fn run_repair(&self, command_id: &str, input_value: Option<&str>) -> AppResult<HostResponse> {
        build_repair_script(command_id, input_value)?;
        let input_value = input_value.map(|value| value.trim().to_string());
        Ok(self
            .send(HostRequest::Repair {
                command_id: command_id.to_string(),
                input_value,
            })
            .await)
    }

    pub async fn launch(&self, command: &str, args: &[String]) -> AppResult<HostResponse> {
        if !is_launch_allowed(command) {
            return Err(AppError::Policy(format!("launching {command} is not allowed")));
        }
        Ok(self
            .send(HostRequest::Launch {
                command: command.to_string(),
                args: args.to_vec(),
            })
            .await)
    }

    pub fn describe(command_id: &str) -> Option<&'static RepairCommand> {
        repair_command(command_id)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Answers every request with a canned reply and records what was sent.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        pub sent: Arc<Mutex<Vec<HostRequest>>>,
        pub reply: Arc<Mutex<Option<HostResponse>>>,
    }

    impl ScriptedTransport {
        pub fn replying(response: HostResponse) -> Self {
            let transport = Self::default();
            *transport.reply.lock().expect("reply") = Some(response);
            transport
        }
    }

    impl NativeTransport for ScriptedTransport {
        fn exchange(&self, request: HostRequest) -> BoxFuture<'_, AppResult<HostResponse>> {
            self.sent.lock().expect("sent").push(request);
            let reply = self.reply.lock().expect("reply").clone();
            Box::pin(async move { reply.ok_or_else(|| AppError::Internal("no response from native host".to_string())) })
        }
    }
}
