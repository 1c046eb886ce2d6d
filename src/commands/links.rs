use super::{name_or, not_found};
use crate::dashboard::{ConfirmPrompt, Dashboard, Durability};
use crate::errors::AppResult;
use crate::i18n::t_with;
use crate::models::{Icon, Link, StateDocument};
use crate::state::new_id;
use crate::urls::normalize_url;
use crate::validation::IconDraft;
use serde::Deserialize;

/// Link form input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkDraft {
    pub title: String,
    pub url: String,
    #[serde(flatten)]
    pub icon: IconDraft,
}

fn find_link_mut<'a>(doc: &'a mut StateDocument, link_id: &str) -> Option<&'a mut Link> {
    doc.pages
        .iter_mut()
        .flat_map(|page| page.groups.iter_mut())
        .flat_map(|group| group.links.iter_mut())
        .find(|link| link.id == link_id)
}

/// Keeps a previously uploaded image when the form switches to upload
/// without providing new data.
fn keep_existing_upload(draft: &IconDraft, previous: &Icon) -> IconDraft {
    match previous {
        Icon::Upload { icon_data } if draft.icon_type.trim() == "upload" && draft.icon_data.is_empty() => IconDraft {
            icon_data: icon_data.clone(),
            ..draft.clone()
        },
        _ => draft.clone(),
    }
}

impl Dashboard {
    pub async fn add_link(&self, group_id: &str, draft: &LinkDraft) -> AppResult<String> {
        let icon = draft.icon.link_icon()?;
        let mut doc = self.document.lock().await;
        let link = Link {
            id: new_id("lnk"),
            title: name_or(doc.settings.interface_language, &draft.title, "Untitled"),
            url: normalize_url(&draft.url),
            icon,
        };
        let id = link.id.clone();
        doc.group_mut(group_id)
            .ok_or_else(|| not_found("group", group_id))?
            .links
            .push(link);
        self.commit(doc, Durability::Immediate).await;
        Ok(id)
    }

    /// Replaces title, URL and icon. Only the field of the chosen icon source
    /// survives.
    pub async fn edit_link(&self, link_id: &str, draft: &LinkDraft) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        let title = name_or(doc.settings.interface_language, &draft.title, "Untitled");
        let link = find_link_mut(&mut doc, link_id).ok_or_else(|| not_found("link", link_id))?;
        let icon = keep_existing_upload(&draft.icon, &link.icon).link_icon()?;
        link.title = title;
        link.url = normalize_url(&draft.url);
        link.icon = icon;
        self.commit(doc, Durability::Immediate).await;
        Ok(())
    }

    pub async fn delete_link(&self, link_id: &str) -> AppResult<bool> {
        let (language, title) = {
            let mut doc = self.document.lock().await;
            let language = doc.settings.interface_language;
            let link = find_link_mut(&mut doc, link_id).ok_or_else(|| not_found("link", link_id))?;
            (language, link.title.clone())
        };
        let body = t_with(language, "Delete link \"{name}\"?", &[("name", &title)]);
        if !self.confirm(ConfirmPrompt::danger(language, body, "Delete")).await {
            return Ok(false);
        }

        let mut doc = self.document.lock().await;
        let mut removed = false;
        for group in doc.pages.iter_mut().flat_map(|page| page.groups.iter_mut()) {
            let before = group.links.len();
            group.links.retain(|link| link.id != link_id);
            removed |= group.links.len() != before;
        }
        if removed {
            self.commit(doc, Durability::Immediate).await;
        }
        Ok(removed)
    }
}
