use super::{name_or, not_found};
use crate::dashboard::{ConfirmPrompt, Dashboard, Durability};
use crate::errors::{AppError, AppResult};
use crate::i18n::t_with;
use crate::models::{Group, Page};
use crate::render::groups::TileKind;
use crate::state::new_id;
use crate::validation::{group_span, tile_size};

fn selected_page(doc: &mut crate::models::StateDocument) -> AppResult<&mut Page> {
    doc.selected_page_mut()
        .ok_or_else(|| AppError::Validation("Select a page first.".to_string()))
}

/// Moves one element from `from` to `insert_at` in `to`. Inside one list the
/// target index refers to positions before the removal.
fn move_between<T>(
    page: &mut Page,
    list: fn(&mut Group) -> &mut Vec<T>,
    id_of: fn(&T) -> &str,
    (from_group, id): (&str, &str),
    (to_group, insert_at): (&str, usize),
) -> AppResult<()> {
    let from = page
        .groups
        .iter_mut()
        .find(|group| group.id == from_group)
        .ok_or_else(|| not_found("group", from_group))?;
    let from_index = list(from)
        .iter()
        .position(|item| id_of(item) == id)
        .ok_or_else(|| not_found("tile", id))?;
    if !page.groups.iter().any(|group| group.id == to_group) {
        return Err(not_found("group", to_group));
    }

    let from = page
        .groups
        .iter_mut()
        .find(|group| group.id == from_group)
        .ok_or_else(|| not_found("group", from_group))?;
    let moved = list(from).remove(from_index);
    let insert_at = if from_group == to_group && insert_at > from_index {
        insert_at - 1
    } else {
        insert_at
    };
    let to = page
        .groups
        .iter_mut()
        .find(|group| group.id == to_group)
        .ok_or_else(|| not_found("group", to_group))?;
    let target = list(to);
    let insert_at = insert_at.min(target.len());
    target.insert(insert_at, moved);
    Ok(())
}

impl Dashboard {
    /// Adds a group to the selected page.
    pub async fn add_group(&self, name: &str, centered: bool) -> AppResult<String> {
        let mut doc = self.document.lock().await;
        let name = name_or(doc.settings.interface_language, name, "Group");
        let page = selected_page(&mut doc)?;
        let mut group = Group::new(new_id("grp"), name);
        group.centered = centered;
        let id = group.id.clone();
        page.groups.push(group);
        self.commit(doc, Durability::Immediate).await;
        Ok(id)
    }

    pub async fn rename_group(&self, group_id: &str, name: &str) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        let name = name_or(doc.settings.interface_language, name, "Group");
        doc.group_mut(group_id).ok_or_else(|| not_found("group", group_id))?.name = name;
        self.commit(doc, Durability::Debounced).await;
        Ok(())
    }

    /// Sets the minimum tile width and column span. A tile width outside the
    /// allowed set keeps the previous one; an out-of-range span is cleared.
    pub async fn resize_group(&self, group_id: &str, tile_min: u16, span: u8, centered: bool) -> AppResult<()> {
        let tile_min = tile_size(tile_min).ok();
        let span = group_span(span).ok();
        let mut doc = self.document.lock().await;
        let group = doc.group_mut(group_id).ok_or_else(|| not_found("group", group_id))?;
        if tile_min.is_some() {
            group.tile_min = tile_min;
        }
        group.span = span;
        group.centered = centered;
        self.commit(doc, Durability::Immediate).await;
        Ok(())
    }

    pub async fn delete_group(&self, group_id: &str) -> AppResult<bool> {
        let (language, name) = {
            let doc = self.document.lock().await;
            let group = doc.group(group_id).ok_or_else(|| not_found("group", group_id))?;
            (doc.settings.interface_language, group.name.clone())
        };
        let body = t_with(language, "Delete group \"{name}\" and everything in it?", &[("name", &name)]);
        if !self.confirm(ConfirmPrompt::danger(language, body, "Delete")).await {
            return Ok(false);
        }

        let mut doc = self.document.lock().await;
        let mut removed = false;
        for page in &mut doc.pages {
            let before = page.groups.len();
            page.groups.retain(|group| group.id != group_id);
            removed |= page.groups.len() != before;
        }
        if !removed {
            return Ok(false);
        }
        self.with_ui(|ui| ui.edit_groups.remove(group_id));
        tracing::info!(group_id = %group_id, "group deleted");
        self.commit(doc, Durability::Immediate).await;
        Ok(true)
    }

    /// Flips the per-surface "edit apps" state of a group. Nothing is
    /// persisted.
    pub async fn toggle_group_edit(&self, group_id: &str) -> AppResult<bool> {
        let doc = self.document.lock().await;
        if doc.group(group_id).is_none() {
            return Err(not_found("group", group_id));
        }
        let editing = self.with_ui(|ui| {
            if ui.edit_groups.remove(group_id) {
                false
            } else {
                ui.edit_groups.insert(group_id.to_string());
                true
            }
        });
        self.render_locked(&doc);
        Ok(editing)
    }

    /// Drag-and-drop of a link or program tile within or between groups of
    /// the selected page.
    pub async fn move_tile(
        &self,
        kind: TileKind,
        from_group: &str,
        tile_id: &str,
        to_group: &str,
        insert_at: usize,
    ) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        let page = selected_page(&mut doc)?;
        match kind {
            TileKind::Link => move_between(
                page,
                |group| &mut group.links,
                |link| link.id.as_str(),
                (from_group, tile_id),
                (to_group, insert_at),
            )?,
            TileKind::Program => move_between(
                page,
                |group| &mut group.programs,
                |program| program.id.as_str(),
                (from_group, tile_id),
                (to_group, insert_at),
            )?,
        }
        self.commit(doc, Durability::Debounced).await;
        Ok(())
    }

    /// Reorders groups of the selected page; the moved group takes the
    /// target's position.
    pub async fn move_group(&self, group_id: &str, target_group_id: &str) -> AppResult<()> {
        let mut doc = self.document.lock().await;
        let page = selected_page(&mut doc)?;
        let from = page
            .groups
            .iter()
            .position(|group| group.id == group_id)
            .ok_or_else(|| not_found("group", group_id))?;
        let to = page
            .groups
            .iter()
            .position(|group| group.id == target_group_id)
            .ok_or_else(|| not_found("group", target_group_id))?;
        if from == to {
            return Ok(());
        }
        let moved = page.groups.remove(from);
        page.groups.insert(to, moved);
        self.commit(doc, Durability::Debounced).await;
        Ok(())
    }
}
