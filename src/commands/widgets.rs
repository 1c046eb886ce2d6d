use super::not_found;
use crate::dashboard::{ConfirmPrompt, Dashboard, Durability};
use crate::errors::{AppError, AppResult};
use crate::i18n::t;
use crate::models::{Widget, WidgetKind};
use crate::state::new_id;
use crate::validation::{build_widget, WidgetDraft};

impl Dashboard {
    /// Validates the form before anything is touched; a rejected draft leaves
    /// the document as it was.
    pub async fn add_widget(&self, group_id: &str, draft: &WidgetDraft) -> AppResult<String> {
        let kind = build_widget(draft)?;
        let mut doc = self.document.lock().await;
        let widget = Widget {
            id: new_id("wdg"),
            kind,
        };
        let id = widget.id.clone();
        doc.group_mut(group_id)
            .ok_or_else(|| not_found("group", group_id))?
            .widgets
            .push(widget);
        tracing::debug!(widget_id = %id, "widget added");
        self.commit(doc, Durability::Immediate).await;
        Ok(id)
    }

    pub async fn edit_widget(&self, widget_id: &str, draft: &WidgetDraft) -> AppResult<()> {
        let mut kind = build_widget(draft)?;
        let mut doc = self.document.lock().await;
        let widget = doc
            .pages
            .iter_mut()
            .flat_map(|page| page.groups.iter_mut())
            .flat_map(|group| group.widgets.iter_mut())
            .find(|widget| widget.id == widget_id)
            .ok_or_else(|| not_found("widget", widget_id))?;
        if let (WidgetKind::UptimeRobot(previous), WidgetKind::UptimeRobot(next)) = (&widget.kind, &mut kind) {
            next.monitor_index = previous.monitor_index;
        }
        widget.kind = kind;
        self.with_ui(|ui| ui.displays.remove(widget_id));
        self.commit(doc, Durability::Immediate).await;
        Ok(())
    }

    pub async fn delete_widget(&self, widget_id: &str) -> AppResult<bool> {
        let language = {
            let doc = self.document.lock().await;
            doc.find_widget(widget_id).ok_or_else(|| not_found("widget", widget_id))?;
            doc.settings.interface_language
        };
        let prompt = ConfirmPrompt::danger(language, t(language, "Delete this widget?"), "Delete");
        if !self.confirm(prompt).await {
            return Ok(false);
        }

        let mut doc = self.document.lock().await;
        let mut removed = false;
        for group in doc.pages.iter_mut().flat_map(|page| page.groups.iter_mut()) {
            let before = group.widgets.len();
            group.widgets.retain(|widget| widget.id != widget_id);
            removed |= group.widgets.len() != before;
        }
        if removed {
            self.commit(doc, Durability::Immediate).await;
        }
        Ok(removed)
    }

    /// Forgets the "new" highlight for the given feed items and redraws the
    /// card from its cached feed.
    pub async fn mark_feed_read(&self, widget_id: &str, item_ids: &[String]) -> AppResult<()> {
        let url = {
            let doc = self.document.lock().await;
            let (_, widget) = doc.find_widget(widget_id).ok_or_else(|| not_found("widget", widget_id))?;
            match &widget.kind {
                WidgetKind::Rss(options) => options.url.clone(),
                other => {
                    return Err(AppError::Validation(format!(
                        "{} widgets have no feed items",
                        other.type_name()
                    )))
                }
            }
        };
        if self.pipeline.mark_read(&url, item_ids) {
            self.poller.repoll(widget_id);
        }
        Ok(())
    }

    /// Bypasses the widget's cache for one fetch. Returns false when the
    /// widget is not on the shown page.
    pub fn refresh_widget(&self, widget_id: &str) -> bool {
        self.poller.refresh(widget_id)
    }
}

#[cfg(test)]
mod tests {
    use crate::dashboard::testing::Fixture;
    use crate::errors::AppError;
    use crate::models::{UptimeRobotOptions, WidgetKind};
    use crate::validation::WidgetDraft;
    use std::time::Duration;

    fn draft(widget_type: &str) -> WidgetDraft {
        WidgetDraft {
            widget_type: widget_type.to_string(),
            ..WidgetDraft::default()
        }
    }

    async fn first_group(fixture: &Fixture) -> String {
        fixture.dashboard.snapshot().await.pages[0].groups[0].id.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_widget_is_not_saved() {
        let fixture = Fixture::open().await;
        let group = first_group(&fixture).await;
        let before = fixture.dashboard.snapshot().await;
        let result = fixture.dashboard.add_widget(&group, &draft("rss")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        let result = fixture.dashboard.add_widget(&group, &draft("weather")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(fixture.dashboard.snapshot().await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn saved_widget_carries_only_its_own_options() {
        let fixture = Fixture::open().await;
        let group = first_group(&fixture).await;
        let weather = WidgetDraft {
            city: "Lisbon".to_string(),
            api_key: "leftover".to_string(),
            url: "https://feed".to_string(),
            ..draft("weather")
        };
        fixture.dashboard.add_widget(&group, &weather).await.expect("add");

        let stored = fixture.stored();
        let widget = &stored["pages"][0]["groups"][0]["widgets"][0];
        assert_eq!(widget["type"], "weather");
        assert_eq!(widget["options"]["city"], "Lisbon");
        assert!(widget["options"].get("apiKey").is_none());
        assert!(widget["options"].get("url").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn edit_keeps_the_chosen_monitor() {
        let fixture = Fixture::open().await;
        let group = first_group(&fixture).await;
        let uptime = WidgetDraft {
            api_key: "ur-1".to_string(),
            ..draft("uptime-robot")
        };
        let id = fixture.dashboard.add_widget(&group, &uptime).await.expect("add");
        {
            let mut doc = fixture.dashboard.document.lock().await;
            let widget = &mut doc.pages[0].groups[0].widgets[0];
            widget.kind = WidgetKind::UptimeRobot(UptimeRobotOptions {
                api_key: "ur-1".to_string(),
                monitor_index: Some(2),
            });
        }
        let rekeyed = WidgetDraft {
            api_key: "ur-2".to_string(),
            ..draft("uptime-robot")
        };
        fixture.dashboard.edit_widget(&id, &rekeyed).await.expect("edit");
        let doc = fixture.dashboard.snapshot().await;
        assert_eq!(
            doc.pages[0].groups[0].widgets[0].kind,
            WidgetKind::UptimeRobot(UptimeRobotOptions {
                api_key: "ur-2".to_string(),
                monitor_index: Some(2),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_a_widget_stops_its_poll() {
        let fixture = Fixture::open().await;
        let group = first_group(&fixture).await;
        let covid = draft("covid");
        let id = fixture.dashboard.add_widget(&group, &covid).await.expect("add");
        assert!(fixture.dashboard.poller.is_polling(&id));

        assert!(fixture.dashboard.delete_widget(&id).await.expect("delete"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!fixture.dashboard.poller.is_polling(&id));
        assert_eq!(fixture.confirmer.prompts.lock().expect("prompts")[0].body, "Delete this widget?");
    }

    #[tokio::test(start_paused = true)]
    async fn feed_read_marks_only_apply_to_rss() {
        let fixture = Fixture::open().await;
        let group = first_group(&fixture).await;
        let id = fixture.dashboard.add_widget(&group, &draft("covid")).await.expect("add");
        let result = fixture.dashboard.mark_feed_read(&id, &["a".to_string()]).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(fixture.dashboard.refresh_widget(&id));
        assert!(!fixture.dashboard.refresh_widget("wdg_missing"));
    }
}
