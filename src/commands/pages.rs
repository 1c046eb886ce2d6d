use super::{name_or, not_found};
use crate::dashboard::{ConfirmPrompt, Dashboard, Durability};
use crate::errors::AppResult;
use crate::i18n::t_with;
use crate::models::Page;
use crate::state::new_id;

impl Dashboard {
    /// Appends a page, selects it and writes immediately.
    pub async fn add_page(&self, name: &str) -> AppResult<String> {
        let mut doc = self.document.lock().await;
        let page = Page {
            id: new_id("page"),
            name: name_or(doc.settings.interface_language, name, "Untitled"),
            groups: Vec::new(),
        };
        let id = page.id.clone();
        tracing::info!(page_id = %id, "page added");
        doc.selected_page_id = Some(id.clone());
        doc.pages.push(page);
        self.commit(doc, Durability::Immediate).await;
        Ok(id)
    }

    pub async fn rename_page(&self, page_id: &str, name: &str) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        let name = name_or(doc.settings.interface_language, name, "Untitled");
        let page = doc.page_mut(page_id).ok_or_else(|| not_found("page", page_id))?;
        page.name = name;
        self.commit(doc, Durability::Immediate).await;
        Ok(())
    }

    pub async fn select_page(&self, page_id: &str) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        if !doc.pages.iter().any(|page| page.id == page_id) {
            return Err(not_found("page", page_id));
        }
        doc.selected_page_id = Some(page_id.to_string());
        self.commit(doc, Durability::Debounced).await;
        Ok(())
    }

    /// Removes a page and everything in it after confirmation. When the
    /// selected page goes, selection moves to the previous sibling, or to
    /// nothing when no page is left. Returns false when the user declined.
    pub async fn delete_page(&self, page_id: &str) -> AppResult<bool> {
        let (language, name) = {
            let doc = self.document.lock().await;
            let page = doc
                .pages
                .iter()
                .find(|page| page.id == page_id)
                .ok_or_else(|| not_found("page", page_id))?;
            (doc.settings.interface_language, page.name.clone())
        };
        let body = t_with(language, "Delete page \"{name}\" and everything in it?", &[("name", &name)]);
        if !self.confirm(ConfirmPrompt::danger(language, body, "Delete")).await {
            return Ok(false);
        }

        let mut doc = self.document.lock().await;
        let Some(index) = doc.pages.iter().position(|page| page.id == page_id) else {
            return Ok(false);
        };
        doc.pages.remove(index);
        if doc.pages.is_empty() {
            doc.selected_page_id = None;
        } else if doc.selected_page_id.as_deref() == Some(page_id) {
            doc.selected_page_id = Some(doc.pages[index.saturating_sub(1)].id.clone());
        }
        tracing::info!(page_id = %page_id, "page deleted");
        self.commit(doc, Durability::Immediate).await;
        Ok(true)
    }
}
