use crate::i18n::t;
use crate::models::{
    Group, Icon, IframeHeight, IframeOptions, Language, Launch, Link, Page, Program, StateDocument, Widget, WidgetKind,
    DEFAULT_TILE_SIZE,
};
use crate::urls::{favicon_for, hostname, logo_dev_url_for_domain};
use crate::widgets::{initial_display, PollSpec, WidgetDisplay};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const LOGO_SIZE: u32 = 128;

/// Per-surface inputs that are not part of the persisted document.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub language: Language,
    pub edit_groups: &'a HashSet<String>,
    pub displays: &'a HashMap<String, WidgetDisplay>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IconView {
    pub src: Option<String>,
    pub letter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TileKind {
    Link,
    Program,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileView {
    pub id: String,
    pub kind: TileKind,
    pub title: String,
    pub icon: IconView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch: Option<Launch>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
    pub editable: bool,
    pub draggable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedView {
    pub url: String,
    pub domain: String,
    pub sandbox: String,
    pub allow_fullscreen: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub auto_height: bool,
    pub card_size: String,
    pub span: String,
    pub no_border: bool,
    pub lock_scroll: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetView {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<WidgetDisplay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<EmbedView>,
    pub deletable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub tile_min: u16,
    pub span: Option<u8>,
    pub centered: bool,
    pub editing: bool,
    pub links: Vec<TileView>,
    pub programs: Vec<TileView>,
    pub widgets: Vec<WidgetView>,
}

/// Darkens glow colors too light to read against the panels. Shorthand and
/// alpha forms are left untouched.
pub fn effective_glow_color(color: &str) -> String {
    let hex = color.trim_start_matches('#');
    if hex.len() != 6 {
        return color.to_string();
    }
    let channel = |start: usize| u8::from_str_radix(&hex[start..start + 2], 16).ok();
    let (Some(r), Some(g), Some(b)) = (channel(0), channel(2), channel(4)) else {
        return color.to_string();
    };
    let luminance = (0.2126 * f64::from(r) + 0.7152 * f64::from(g) + 0.0722 * f64::from(b)) / 255.0;
    if luminance <= 0.82 {
        return color.to_string();
    }
    let darken = |value: u8| (f64::from(value) * 0.75).round() as u8;
    format!("#{:02x}{:02x}{:02x}", darken(r), darken(g), darken(b))
}

fn first_letter(title: &str) -> String {
    title
        .chars()
        .next()
        .map(|letter| letter.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string())
}

fn icon_source(icon: &Icon, logo_key: &str) -> Option<String> {
    match icon {
        Icon::Auto => None,
        Icon::Logo { logo_domain } => logo_dev_url_for_domain(logo_domain, logo_key, LOGO_SIZE),
        Icon::Url { icon_url } => Some(icon_url.clone()).filter(|url| !url.is_empty()),
        Icon::Upload { icon_data } => Some(icon_data.clone()).filter(|data| !data.is_empty()),
    }
}

fn link_tile(link: &Link, logo_key: &str, editable: bool, draggable: bool) -> TileView {
    let src = icon_source(&link.icon, logo_key)
        .or_else(|| Some(favicon_for(&link.url)))
        .filter(|src| !src.is_empty());
    TileView {
        id: link.id.clone(),
        kind: TileKind::Link,
        title: link.title.clone(),
        icon: IconView {
            src,
            letter: first_letter(&link.title),
        },
        href: Some(link.url.clone()),
        launch: None,
        notes: String::new(),
        editable,
        draggable,
    }
}

fn program_tile(program: &Program, language: Language, logo_key: &str, editable: bool, draggable: bool) -> TileView {
    let title = if program.title.is_empty() {
        t(language, "Program")
    } else {
        program.title.clone()
    };
    TileView {
        id: program.id.clone(),
        kind: TileKind::Program,
        icon: IconView {
            src: icon_source(&program.icon, logo_key),
            letter: first_letter(&title),
        },
        title,
        href: None,
        launch: Some(program.launch.clone()),
        notes: program.notes.clone(),
        editable,
        draggable,
    }
}

fn embed_view(options: &IframeOptions) -> EmbedView {
    let mut sandbox = Vec::new();
    if options.allow_scripts {
        sandbox.push("allow-scripts");
    }
    if options.allow_same_origin {
        sandbox.push("allow-same-origin");
    }
    sandbox.extend(["allow-forms", "allow-popups"]);
    let (height, auto_height) = match options.height {
        IframeHeight::Auto => (None, true),
        IframeHeight::Fixed(px) => (Some(px), false),
    };
    EmbedView {
        url: options.url.clone(),
        domain: hostname(&options.url)
            .map(|host| host.trim_start_matches("www.").to_string())
            .unwrap_or_default(),
        sandbox: sandbox.join(" "),
        allow_fullscreen: options.allow_fullscreen,
        width: options.width,
        height,
        auto_height,
        card_size: options.card_size.clone(),
        span: options.span.clone(),
        no_border: options.no_border,
        lock_scroll: options.lock_scroll,
    }
}

/// Short localized status line for states that have no richer content.
pub fn status_text(display: &WidgetDisplay, language: Language) -> Option<String> {
    let phrase = match display {
        WidgetDisplay::Loading => "Loading…",
        WidgetDisplay::NeedsConfig => "Configure widget",
        WidgetDisplay::RateLimited => "Rate limited…",
        WidgetDisplay::Empty => "No monitors",
        WidgetDisplay::Failed { reason } => reason.as_str(),
        WidgetDisplay::Uptime(view) if view.is_up => "Service Operational",
        WidgetDisplay::Uptime(_) => "Service Down",
        WidgetDisplay::Rss(view) if view.items.is_empty() => "No items",
        WidgetDisplay::Rss(_) | WidgetDisplay::Weather(_) | WidgetDisplay::Covid(_) => return None,
    };
    Some(t(language, phrase))
}

/// Index of each uptime widget among the uptime widgets of its group.
fn uptime_positions(group: &Group) -> HashMap<&str, usize> {
    group
        .widgets
        .iter()
        .filter(|widget| matches!(widget.kind, WidgetKind::UptimeRobot(_)))
        .enumerate()
        .map(|(position, widget)| (widget.id.as_str(), position))
        .collect()
}

fn widget_view(widget: &Widget, position: usize, ctx: &RenderContext<'_>, deletable: bool) -> WidgetView {
    let (display, embed) = match &widget.kind {
        WidgetKind::Iframe(options) => (None, Some(embed_view(options))),
        _ => (
            ctx.displays
                .get(&widget.id)
                .cloned()
                .or_else(|| initial_display(widget, position)),
            None,
        ),
    };
    WidgetView {
        id: widget.id.clone(),
        type_name: widget.kind.type_name(),
        status_text: display.as_ref().and_then(|display| status_text(display, ctx.language)),
        display,
        embed,
        deletable,
    }
}

fn group_view(group: &Group, doc: &StateDocument, ctx: &RenderContext<'_>) -> GroupView {
    let edit_mode = doc.settings.edit_mode;
    let editing = edit_mode && ctx.edit_groups.contains(&group.id);
    let logo_key = doc.settings.logo_dev_api_key.trim();
    let positions = uptime_positions(group);
    GroupView {
        id: group.id.clone(),
        name: group.name.clone(),
        tile_min: group.tile_min.map_or(DEFAULT_TILE_SIZE, |size| size.px()),
        span: if group.centered {
            None
        } else {
            Some(group.span.map_or(1, |span| span.get()))
        },
        centered: group.centered,
        editing,
        links: group
            .links
            .iter()
            .map(|link| link_tile(link, logo_key, editing, edit_mode))
            .collect(),
        programs: group
            .programs
            .iter()
            .map(|program| program_tile(program, ctx.language, logo_key, editing, edit_mode))
            .collect(),
        widgets: group
            .widgets
            .iter()
            .map(|widget| {
                let position = positions.get(widget.id.as_str()).copied().unwrap_or(0);
                widget_view(widget, position, ctx, edit_mode)
            })
            .collect(),
    }
}

/// Projects the selected page. Calling it twice on the same inputs yields
/// equal views.
pub fn render_groups(doc: &StateDocument, ctx: &RenderContext<'_>) -> Vec<GroupView> {
    doc.selected_page()
        .map(|page| page.groups.iter().map(|group| group_view(group, doc, ctx)).collect())
        .unwrap_or_default()
}

/// Poll parameters for every fetching widget on a page.
pub fn widget_polls(page: &Page) -> Vec<(String, PollSpec)> {
    page.groups
        .iter()
        .flat_map(|group| {
            let positions = uptime_positions(group);
            group
                .widgets
                .iter()
                .filter_map(|widget| {
                    let position = positions.get(widget.id.as_str()).copied().unwrap_or(0);
                    PollSpec::for_widget(widget, position).map(|spec| (widget.id.clone(), spec))
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Settings, UptimeRobotOptions};
    use crate::state::create_default;

    fn uptime_widget(id: &str, api_key: &str) -> Widget {
        Widget {
            id: id.to_string(),
            kind: WidgetKind::UptimeRobot(UptimeRobotOptions {
                api_key: api_key.to_string(),
                monitor_index: None,
            }),
        }
    }

    #[test]
    fn glow_safeguard_darkens_very_light_colors() {
        assert_eq!(effective_glow_color("#ffffff"), "#bfbfbf");
        assert_eq!(effective_glow_color("#8b1234"), "#8b1234");
        assert_eq!(effective_glow_color("#fff"), "#fff");
    }

    #[test]
    fn render_is_idempotent() {
        let doc = create_default();
        let edit_groups = HashSet::new();
        let displays = HashMap::new();
        let ctx = RenderContext {
            language: Language::En,
            edit_groups: &edit_groups,
            displays: &displays,
        };
        let first = render_groups(&doc, &ctx);
        assert_eq!(first, render_groups(&doc, &ctx));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].links.len(), 5);
    }

    #[test]
    fn tiles_are_editable_only_for_groups_in_edit_set() {
        let mut doc = create_default();
        let group_id = doc.pages[0].groups[0].id.clone();
        let displays = HashMap::new();
        let mut edit_groups = HashSet::new();
        let ctx = RenderContext {
            language: Language::En,
            edit_groups: &edit_groups,
            displays: &displays,
        };
        assert!(!render_groups(&doc, &ctx)[0].links[0].editable);

        edit_groups.insert(group_id);
        let ctx = RenderContext {
            language: Language::En,
            edit_groups: &edit_groups,
            displays: &displays,
        };
        assert!(render_groups(&doc, &ctx)[0].links[0].editable);

        doc.settings = Settings {
            edit_mode: false,
            ..Settings::default()
        };
        assert!(!render_groups(&doc, &ctx)[0].editing);
    }

    #[test]
    fn widgets_show_recorded_or_initial_state() {
        let mut doc = create_default();
        let group = &mut doc.pages[0].groups[0];
        group.widgets.push(uptime_widget("wdg_a", "key"));
        group.widgets.push(uptime_widget("wdg_b", ""));
        let edit_groups = HashSet::new();
        let displays = HashMap::from([("wdg_a".to_string(), WidgetDisplay::RateLimited)]);
        let ctx = RenderContext {
            language: Language::Pt,
            edit_groups: &edit_groups,
            displays: &displays,
        };
        let widgets = &render_groups(&doc, &ctx)[0].widgets;
        assert_eq!(widgets[0].display, Some(WidgetDisplay::RateLimited));
        assert_eq!(widgets[1].display, Some(WidgetDisplay::NeedsConfig));
        assert_eq!(widgets[1].status_text.as_deref(), Some("Configurar widget"));

        let polls = widget_polls(&doc.pages[0]);
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].0, "wdg_a");
    }

    #[test]
    fn missing_selection_renders_nothing() {
        let mut doc = create_default();
        doc.selected_page_id = None;
        let ctx = RenderContext {
            language: Language::En,
            edit_groups: &HashSet::new(),
            displays: &HashMap::new(),
        };
        assert!(render_groups(&doc, &ctx).is_empty());
    }
}
