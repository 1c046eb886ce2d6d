use crate::dashboard::{ConfirmPrompt, Dashboard, Durability};
use crate::errors::AppResult;
use crate::i18n::t;
use crate::state::{self, import_from_text};
use crate::store::{get_or_none, STATE_KEY};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const EMPTY_EXPORT_WARNING: &str = "Exported file appears empty: no pages or no programs/widgets found. Check that changes were saved before exporting.";

/// A rendered backup, ready to be saved under `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub contents: String,
    /// Set when the export looks like it lost unsaved state.
    pub warning: Option<String>,
}

pub fn export_filename(now: DateTime<Utc>) -> String {
    format!("homelab-dashboard-{}.json", now.format("%Y-%m-%d-%H-%M-%S"))
}

fn array_len(value: Option<&Value>) -> Option<usize> {
    value.and_then(Value::as_array).map(Vec::len)
}

/// Starts from the stored copy and takes the in-memory pages unless memory
/// holds fewer pages than the store.
fn merge_for_export(persisted: Option<Value>, memory: &Value) -> Value {
    let persisted = persisted.filter(Value::is_object);
    let mut merged = persisted.clone().unwrap_or_else(|| Value::Object(Map::new()));

    let stored_pages = array_len(merged.get("pages"));
    let memory_pages = array_len(memory.get("pages"));
    if stored_pages.is_none() || memory_pages.unwrap_or(0) >= stored_pages.unwrap_or(0) {
        merged["pages"] = memory.get("pages").cloned().unwrap_or_else(|| Value::Array(Vec::new()));
    }

    let mut settings = persisted
        .as_ref()
        .and_then(|value| value.get("settings"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(current) = memory.get("settings").and_then(Value::as_object) {
        settings.extend(current.clone());
    }
    merged["settings"] = Value::Object(settings);

    let has_selection = merged.get("selectedPageId").is_some_and(|id| id.as_str().is_some_and(|id| !id.is_empty()));
    if !has_selection {
        if let Some(selected) = memory.get("selectedPageId").filter(|id| id.is_string()) {
            merged["selectedPageId"] = selected.clone();
        }
    }
    merged
}

fn count_items(doc: &Value, field: &str) -> usize {
    doc.get("pages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|page| page.get("groups").and_then(Value::as_array))
        .flatten()
        .filter_map(|group| array_len(group.get(field)))
        .sum()
}

impl Dashboard {
    /// Flushes a pending debounced write first so the stored copy matches memory.
    pub async fn export_json(&self) -> AppResult<ExportFile> {
        if self.persister.has_pending() {
            self.persister.persist_now().await;
        }
        let (memory, language) = {
            let doc = self.document.lock().await;
            (state::to_value(&doc)?, doc.settings.interface_language)
        };
        let persisted = get_or_none(self.persister.store().as_ref(), STATE_KEY);
        let merged = merge_for_export(persisted, &memory);

        let pages = array_len(merged.get("pages")).unwrap_or(0);
        let programs = count_items(&merged, "programs");
        let widgets = count_items(&merged, "widgets");
        tracing::info!(pages, programs, widgets, "exporting dashboard");

        let warning = (pages == 0 || (programs == 0 && widgets == 0)).then(|| t(language, EMPTY_EXPORT_WARNING));
        Ok(ExportFile {
            filename: export_filename(Utc::now()),
            contents: serde_json::to_string_pretty(&merged)?,
            warning,
        })
    }

    /// Writes the export into `dir` and returns the file's path.
    pub async fn export_to_dir(&self, dir: &Path) -> AppResult<(PathBuf, ExportFile)> {
        let export = self.export_json().await?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&export.filename);
        std::fs::write(&path, &export.contents)?;
        tracing::info!(path = %path.display(), "backup written");
        Ok((path, export))
    }

    /// Replaces the whole document with an imported one and writes it at once.
    /// A rejected file leaves the current document untouched.
    pub async fn import_text(&self, text: &str) -> AppResult<()> {
        let imported = import_from_text(text)?;
        let mut doc = self.document.lock().await;
        *doc = imported;
        self.with_ui(|ui| ui.edit_groups.clear());
        tracing::info!(pages = doc.pages.len(), "dashboard imported");
        self.commit(doc, Durability::Immediate).await;
        Ok(())
    }

    /// Clears every page after confirmation. Settings survive.
    pub async fn reset_all(&self) -> AppResult<bool> {
        let language = self.language().await;
        let prompt = ConfirmPrompt::danger(
            language,
            t(language, "This will erase all pages, groups and links. Continue?"),
            "Continue",
        );
        if !self.confirm(prompt).await {
            return Ok(false);
        }
        let mut doc = self.document.lock().await;
        doc.pages.clear();
        doc.selected_page_id = None;
        self.with_ui(|ui| ui.edit_groups.clear());
        tracing::info!("dashboard reset");
        self.commit(doc, Durability::Immediate).await;
        Ok(true)
    }
}
