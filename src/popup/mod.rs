//! Secondary surface: saves the current page into a group without loading
//! the dashboard. Every write goes straight to the store and is announced on
//! the sync bus so an open dashboard reloads.

pub mod quick_save;

pub use quick_save::{build_quick_save_link, select_best_icon, PageMetadata};

use crate::errors::{AppError, AppResult};
use crate::i18n::t;
use crate::models::{Group, Link, Page, StateDocument};
use crate::state::{self, new_id};
use crate::store::KeyValueStore;
use crate::sync::{SyncBus, SyncMessage};
use crate::widgets::http::ImageProbe;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// One selectable destination in the popup's group picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    pub page_id: String,
    pub page_name: String,
    pub group_id: String,
    pub group_name: String,
}

pub fn list_group_entries(doc: &StateDocument) -> Vec<GroupEntry> {
    doc.pages
        .iter()
        .flat_map(|page| {
            page.groups.iter().map(move |group| GroupEntry {
                page_id: page.id.clone(),
                page_name: page.name.clone(),
                group_id: group.id.clone(),
                group_name: group.name.clone(),
            })
        })
        .collect()
}

/// First group of the selected page, else the first group anywhere.
pub fn preferred_group_id(doc: &StateDocument, entries: &[GroupEntry]) -> Option<String> {
    let selected = doc.selected_page_id.as_deref();
    entries
        .iter()
        .find(|entry| Some(entry.page_id.as_str()) == selected)
        .or_else(|| entries.first())
        .map(|entry| entry.group_id.clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCategory {
    pub page_id: String,
    pub group_id: String,
}

pub struct Popup {
    surface: Uuid,
    store: Arc<dyn KeyValueStore>,
    probe: Arc<dyn ImageProbe>,
    bus: SyncBus,
}

impl Popup {
    pub fn new(store: Arc<dyn KeyValueStore>, probe: Arc<dyn ImageProbe>, bus: SyncBus) -> Self {
        Self {
            surface: Uuid::new_v4(),
            store,
            probe,
            bus,
        }
    }

    /// Reads the stored document, seeding defaults when there is none.
    pub fn read_state(&self) -> StateDocument {
        state::load(self.store.as_ref())
    }

    pub fn entries(&self) -> (Vec<GroupEntry>, Option<String>) {
        let doc = self.read_state();
        let entries = list_group_entries(&doc);
        let preferred = preferred_group_id(&doc, &entries);
        (entries, preferred)
    }

    fn write_and_announce(&self, doc: &StateDocument) -> AppResult<()> {
        if !state::write_document(self.store.as_ref(), doc) {
            return Err(AppError::Internal("failed to save state".to_string()));
        }
        let reached = self.bus.publish(SyncMessage::state_updated(self.surface));
        tracing::debug!(reached, "popup announced state update");
        Ok(())
    }

    /// Adds the page as a link to `group_id` and makes its page the selected
    /// one. The icon is looked up before the store is read again.
    pub async fn quick_save(&self, group_id: &str, meta: &PageMetadata) -> AppResult<Link> {
        if group_id.trim().is_empty() {
            return Err(AppError::Validation("Please choose a category.".to_string()));
        }
        let best_icon = select_best_icon(meta, self.probe.as_ref()).await;

        let mut doc = self.read_state();
        let link = build_quick_save_link(meta, best_icon, doc.settings.interface_language)?;
        let page = doc
            .pages
            .iter_mut()
            .find(|page| page.groups.iter().any(|group| group.id == group_id))
            .ok_or_else(|| AppError::NotFound(format!("group {group_id} not found")))?;
        let page_id = page.id.clone();
        if let Some(group) = page.groups.iter_mut().find(|group| group.id == group_id) {
            group.links.push(link.clone());
        }
        doc.selected_page_id = Some(page_id);

        self.write_and_announce(&doc)?;
        tracing::info!(group_id = %group_id, url = %link.url, "quick-saved link");
        Ok(link)
    }

    /// New page holding one group of the same name, selected right away.
    pub fn create_category(&self, name: &str) -> AppResult<CreatedCategory> {
        let mut doc = self.read_state();
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation(t(
                doc.settings.interface_language,
                "Enter a category name to continue.",
            )));
        }
        let created = CreatedCategory {
            page_id: new_id("page"),
            group_id: new_id("grp"),
        };
        doc.pages.push(Page {
            id: created.page_id.clone(),
            name: name.to_string(),
            groups: vec![Group::new(created.group_id.clone(), name.to_string())],
        });
        doc.selected_page_id = Some(created.page_id.clone());
        self.write_and_announce(&doc)?;
        Ok(created)
    }
}
