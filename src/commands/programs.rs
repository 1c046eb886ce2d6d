use super::{name_or, not_found};
use crate::dashboard::{ConfirmPrompt, Dashboard, Durability};
use crate::errors::{AppError, AppResult};
use crate::i18n::{t, t_with};
use crate::models::{Icon, Launch, Program, StateDocument};
use crate::native::HostResponse;
use crate::scan::{programs_from_scan, BulkTemplate, IconResolver, ScanResult};
use crate::state::new_id;
use crate::validation::{IconDraft, LaunchDraft};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static URL_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").expect("valid regex"));

/// Program form input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgramDraft {
    pub title: String,
    pub notes: String,
    #[serde(flatten)]
    pub launch: LaunchDraft,
    #[serde(flatten)]
    pub icon: IconDraft,
}

/// What the surface has to do after a program tile is activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchAction {
    /// Navigate to this URL; the OS hands it to the registered handler.
    OpenScheme(String),
    /// The native helper already ran the command.
    Launched(HostResponse),
    /// A scheme program without a target. Nothing happens.
    Nothing,
}

fn find_program_mut<'a>(doc: &'a mut StateDocument, program_id: &str) -> Option<&'a mut Program> {
    doc.pages
        .iter_mut()
        .flat_map(|page| page.groups.iter_mut())
        .flat_map(|group| group.programs.iter_mut())
        .find(|program| program.id == program_id)
}

fn find_program<'a>(doc: &'a StateDocument, program_id: &str) -> Option<&'a Program> {
    doc.pages
        .iter()
        .flat_map(|page| page.groups.iter())
        .flat_map(|group| group.programs.iter())
        .find(|program| program.id == program_id)
}

fn draft_icon(draft: &IconDraft, previous: Option<&Icon>) -> AppResult<Icon> {
    match previous {
        Some(Icon::Upload { icon_data }) if draft.icon_type.trim() == "upload" && draft.icon_data.is_empty() => {
            IconDraft {
                icon_data: icon_data.clone(),
                ..draft.clone()
            }
            .program_icon()
        }
        _ => draft.program_icon(),
    }
}

impl Dashboard {
    pub async fn add_program(&self, group_id: &str, draft: &ProgramDraft) -> AppResult<String> {
        let icon = draft_icon(&draft.icon, None)?;
        let mut doc = self.document.lock().await;
        let program = Program {
            id: new_id("prg"),
            title: name_or(doc.settings.interface_language, &draft.title, "Program"),
            launch: draft.launch.build(),
            icon,
            notes: draft.notes.trim().to_string(),
        };
        let id = program.id.clone();
        doc.group_mut(group_id)
            .ok_or_else(|| not_found("group", group_id))?
            .programs
            .push(program);
        self.commit(doc, Durability::Immediate).await;
        Ok(id)
    }

    pub async fn edit_program(&self, program_id: &str, draft: &ProgramDraft) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        let title = name_or(doc.settings.interface_language, &draft.title, "Program");
        let program = find_program_mut(&mut doc, program_id).ok_or_else(|| not_found("program", program_id))?;
        let icon = draft_icon(&draft.icon, Some(&program.icon))?;
        program.title = title;
        program.launch = draft.launch.build();
        program.icon = icon;
        program.notes = draft.notes.trim().to_string();
        self.commit(doc, Durability::Immediate).await;
        Ok(())
    }

    /// Inline title edit on a tile.
    pub async fn rename_program(&self, program_id: &str, title: &str) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        let title = name_or(doc.settings.interface_language, title, "Program");
        let program = find_program_mut(&mut doc, program_id).ok_or_else(|| not_found("program", program_id))?;
        if program.title == title {
            return Ok(());
        }
        program.title = title;
        self.commit(doc, Durability::Debounced).await;
        Ok(())
    }

    pub async fn delete_program(&self, program_id: &str) -> AppResult<bool> {
        let (language, title) = {
            let doc = self.document.lock().await;
            let program = find_program(&doc, program_id).ok_or_else(|| not_found("program", program_id))?;
            (doc.settings.interface_language, program.title.clone())
        };
        let body = t_with(language, "Delete program \"{name}\"?", &[("name", &title)]);
        if !self.confirm(ConfirmPrompt::danger(language, body, "Delete")).await {
            return Ok(false);
        }

        let mut doc = self.document.lock().await;
        let mut removed = false;
        for group in doc.pages.iter_mut().flat_map(|page| page.groups.iter_mut()) {
            let before = group.programs.len();
            group.programs.retain(|program| program.id != program_id);
            removed |= group.programs.len() != before;
        }
        if removed {
            self.commit(doc, Durability::Immediate).await;
        }
        Ok(removed)
    }

    /// Adds one program per scanned executable or Steam app. Icon lookups run
    /// before the document is locked.
    pub async fn add_programs_from_scan(
        &self,
        group_id: &str,
        result: &ScanResult,
        icon: &IconDraft,
        notes: &str,
    ) -> AppResult<usize> {
        let language = self.language().await;
        if result.is_empty() {
            return Err(AppError::Validation(t(language, "The scan found no programs to add.")));
        }
        if self.document.lock().await.group(group_id).is_none() {
            return Err(not_found("group", group_id));
        }
        let template = BulkTemplate {
            icon: icon.program_icon()?,
            notes: notes.trim().to_string(),
        };
        let resolver = IconResolver::new(self.probe.as_ref());
        let programs = programs_from_scan(result, &template, &resolver).await;
        let count = programs.len();

        let mut doc = self.document.lock().await;
        doc.group_mut(group_id)
            .ok_or_else(|| not_found("group", group_id))?
            .programs
            .extend(programs);
        tracing::info!(group_id = %group_id, count, "programs added from scan");
        self.commit(doc, Durability::Immediate).await;
        Ok(count)
    }

    /// Resolves what activating a program tile does. Native launches go
    /// through the helper's allow-list.
    pub async fn launch_program(&self, program_id: &str) -> AppResult<LaunchAction> {
        let (language, launch) = {
            let doc = self.document.lock().await;
            let program = find_program(&doc, program_id).ok_or_else(|| not_found("program", program_id))?;
            (doc.settings.interface_language, program.launch.clone())
        };
        match launch {
            Launch::Scheme { scheme_or_command } if scheme_or_command.is_empty() => Ok(LaunchAction::Nothing),
            Launch::Scheme { scheme_or_command } => {
                if !URL_SCHEME.is_match(&scheme_or_command) {
                    return Err(AppError::Validation(t(
                        language,
                        "Not a valid URL scheme. Edit the program to adjust.",
                    )));
                }
                Ok(LaunchAction::OpenScheme(scheme_or_command))
            }
            Launch::Native { native_command, native_args } => {
                if native_command.is_empty() {
                    return Err(AppError::Validation(t(
                        language,
                        "No native command set. Edit the program to add one.",
                    )));
                }
                let bridge = self
                    .native
                    .as_ref()
                    .ok_or_else(|| AppError::Config("native helper is not configured".to_string()))?;
                let response = bridge.launch(&native_command, &native_args).await?;
                if !response.ok {
                    tracing::warn!(program_id = %program_id, error = ?response.error, "native launch failed");
                }
                Ok(LaunchAction::Launched(response))
            }
        }
    }
}
