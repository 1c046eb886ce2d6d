pub mod groups;
pub mod pages_bar;

pub use groups::{effective_glow_color, render_groups, widget_polls, GroupView, RenderContext, TileView, WidgetView};
pub use pages_bar::{render_pages_bar, PagesBarView, Viewport};

use crate::models::{StateDocument, Theme};
use serde::Serialize;

/// Everything a surface needs to draw the dashboard, rebuilt from scratch on
/// every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub theme: Theme,
    pub language: &'static str,
    pub font: String,
    pub edit_mode: bool,
    /// `None` when glow is disabled.
    pub glow_color: Option<String>,
    pub pages_bar: PagesBarView,
    pub groups: Vec<GroupView>,
}

pub fn render(doc: &StateDocument, ctx: &RenderContext<'_>, viewport: Viewport) -> DashboardView {
    let settings = &doc.settings;
    DashboardView {
        theme: settings.theme,
        language: settings.interface_language.as_str(),
        font: settings.selected_font.clone(),
        edit_mode: settings.edit_mode,
        glow_color: settings
            .glow_enabled
            .then(|| effective_glow_color(&settings.glow_color)),
        pages_bar: render_pages_bar(doc, ctx.language, viewport),
        groups: render_groups(doc, ctx),
    }
}
