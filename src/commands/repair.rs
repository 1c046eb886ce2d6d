use crate::dashboard::{ConfirmPrompt, Dashboard};
use crate::errors::{AppError, AppResult};
use crate::i18n::t;
use crate::native::allowlist::is_valid_repair_input;
use crate::native::bridge::REPAIR_LOG_LIMIT;
use crate::native::{repair_command, HostResponse, NativeBridge, RepairLogEntry};

const INVALID_INPUT: &str = "Invalid value. Use the exact InstanceId (alphanumeric, :, \\, ., -, _ only).";

impl Dashboard {
    fn bridge(&self) -> AppResult<&NativeBridge> {
        self.native
            .as_ref()
            .ok_or_else(|| AppError::Config("native helper is not configured".to_string()))
    }

    pub async fn check_native_available(&self) -> HostResponse {
        match self.bridge() {
            Ok(bridge) => bridge.check_available().await,
            Err(error) => HostResponse::failure(error.user_message()),
        }
    }

    /// Runs one repair command through the helper and records the outcome in
    /// this surface's repair log. Returns `None` when the user backs out.
    pub async fn run_repair(&self, command_id: &str, input_value: Option<&str>) -> AppResult<Option<RepairLogEntry>> {
        let command = repair_command(command_id)
            .ok_or_else(|| AppError::Policy(format!("unknown repair command: {command_id}")))?;
        let bridge = self.bridge()?;

        let input = if command.takes_input() {
            let Some(raw) = input_value.map(str::trim).filter(|raw| !raw.is_empty()) else {
                return Ok(None);
            };
            if !is_valid_repair_input(raw) {
                return Err(AppError::Validation(INVALID_INPUT.to_string()));
            }
            Some(raw)
        } else {
            None
        };

        if let Some(question) = command.confirm {
            let language = self.language().await;
            let prompt = ConfirmPrompt {
                title: t(language, "Confirm Action"),
                body: question.to_string(),
                confirm_text: t(language, "Continue"),
                danger: command.danger,
            };
            if !self.confirm(prompt).await {
                return Ok(None);
            }
        }

        tracing::info!(command_id = %command.id, "running repair command");
        let response = bridge.run_repair(command.id, input).await?;
        let entry = RepairLogEntry::from_response(command, &response);
        self.with_ui(|ui| {
            ui.repair_log.insert(0, entry.clone());
            ui.repair_log.truncate(REPAIR_LOG_LIMIT);
        });
        Ok(Some(entry))
    }

    /// Newest first.
    pub fn repair_log(&self) -> Vec<RepairLogEntry> {
        self.with_ui(|ui| ui.repair_log.clone())
    }
}
