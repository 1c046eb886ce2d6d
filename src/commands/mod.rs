//! User-initiated mutations. Each command mutates the document under its lock,
//! rebuilds the view and persists, debounced or immediately.

mod backup;
mod groups;
mod links;
mod pages;
mod programs;
mod repair;
mod settings;
mod widgets;

pub use backup::{export_filename, ExportFile};
pub use crate::render::groups::TileKind;
pub use links::LinkDraft;
pub use programs::{LaunchAction, ProgramDraft};
pub use settings::LogFormat;

use crate::errors::AppError;
use crate::i18n::t;
use crate::models::Language;

pub(crate) fn not_found(kind: &str, id: &str) -> AppError {
    AppError::NotFound(format!("{kind} {id} not found"))
}

/// Trimmed name, or the localized placeholder when blank.
pub(crate) fn name_or(language: Language, raw: &str, placeholder: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        t(language, placeholder)
    } else {
        trimmed.to_string()
    }
}
