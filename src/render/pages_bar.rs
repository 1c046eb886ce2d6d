use crate::i18n::t;
use crate::models::{Language, StateDocument};
use serde::Serialize;

pub const PILL_GAP: f64 = 10.0;
pub const SIDE_PADDING: f64 = 60.0;
pub const TRIGGER_RESERVE: f64 = 70.0;
pub const FULL_COLLAPSE_RATIO: f64 = 0.5;

const CHAR_WIDTH: f64 = 8.0;
const PILL_CHROME: f64 = 32.0;

/// Width available to the bar, measured by whatever draws it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub actions_width: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            actions_width: 240.0,
        }
    }
}

/// How many pills fit inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PillPacking {
    AllVisible,
    Overflow { visible: usize },
    FullCollapse,
}

/// Keeps pills inline while they fit; the rest go behind a trigger. When at
/// least half would be hidden, everything collapses into one switcher.
pub fn pack_pills(widths: &[f64], viewport: Viewport) -> PillPacking {
    let available_total = (viewport.width - viewport.actions_width - SIDE_PADDING).max(0.0);
    let total: f64 = widths.iter().map(|width| width + PILL_GAP).sum();
    if widths.is_empty() || total <= available_total {
        return PillPacking::AllVisible;
    }

    let available = available_total - TRIGGER_RESERVE;
    let mut used = 0.0;
    let mut visible = 0;
    for width in widths {
        let step = width + PILL_GAP;
        if used + step > available {
            break;
        }
        used += step;
        visible += 1;
    }

    let hidden = widths.len() - visible;
    if hidden == 0 {
        PillPacking::AllVisible
    } else if hidden as f64 / widths.len() as f64 >= FULL_COLLAPSE_RATIO {
        PillPacking::FullCollapse
    } else {
        PillPacking::Overflow { visible }
    }
}

pub fn estimate_pill_width(name: &str) -> f64 {
    name.chars().count() as f64 * CHAR_WIDTH + PILL_CHROME
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePill {
    pub id: String,
    pub name: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagesBarView {
    pub pills: Vec<PagePill>,
    pub overflow: Vec<PagePill>,
    /// Label of the single switcher when fully collapsed.
    pub switcher: Option<String>,
    pub editable: bool,
}

pub fn render_pages_bar(doc: &StateDocument, language: Language, viewport: Viewport) -> PagesBarView {
    let mut pills: Vec<PagePill> = doc
        .pages
        .iter()
        .map(|page| PagePill {
            id: page.id.clone(),
            name: if page.name.trim().is_empty() {
                t(language, "Untitled")
            } else {
                page.name.clone()
            },
            selected: doc.selected_page_id.as_deref() == Some(page.id.as_str()),
        })
        .collect();
    let widths: Vec<f64> = pills.iter().map(|pill| estimate_pill_width(&pill.name)).collect();
    let editable = doc.settings.edit_mode;

    match pack_pills(&widths, viewport) {
        PillPacking::AllVisible => PagesBarView {
            pills,
            overflow: Vec::new(),
            switcher: None,
            editable,
        },
        PillPacking::Overflow { visible } => {
            let overflow = pills.split_off(visible);
            PagesBarView {
                pills,
                overflow,
                switcher: None,
                editable,
            }
        }
        PillPacking::FullCollapse => {
            let switcher = pills
                .iter()
                .find(|pill| pill.selected)
                .map(|pill| pill.name.clone())
                .unwrap_or_else(|| t(language, "Page"));
            PagesBarView {
                pills: Vec::new(),
                overflow: pills,
                switcher: Some(switcher),
                editable,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Page, Settings};

    fn viewport(width: f64) -> Viewport {
        Viewport {
            width,
            actions_width: 0.0,
        }
    }

    #[test]
    fn everything_fits() {
        assert_eq!(pack_pills(&[90.0, 90.0], viewport(400.0)), PillPacking::AllVisible);
        assert_eq!(pack_pills(&[], viewport(0.0)), PillPacking::AllVisible);
    }

    #[test]
    fn minority_overflow_keeps_leading_pills() {
        // available = 540 - 60 = 480; packing budget = 410
        let widths = [90.0; 5];
        assert_eq!(pack_pills(&widths, viewport(540.0)), PillPacking::Overflow { visible: 4 });
    }

    #[test]
    fn majority_overflow_collapses() {
        let widths = [90.0; 6];
        assert_eq!(pack_pills(&widths, viewport(360.0)), PillPacking::FullCollapse);
    }

    #[test]
    fn empty_document_renders_no_pills() {
        let doc = StateDocument {
            settings: Settings::default(),
            pages: Vec::new(),
            selected_page_id: None,
        };
        let view = render_pages_bar(&doc, Language::En, Viewport::default());
        assert!(view.pills.is_empty() && view.overflow.is_empty());
        assert_eq!(view.switcher, None);
    }

    #[test]
    fn collapsed_switcher_names_selected_page() {
        let pages: Vec<Page> = (0..12)
            .map(|index| Page {
                id: format!("page_{index}"),
                name: format!("A fairly long page name {index}"),
                groups: Vec::new(),
            })
            .collect();
        let doc = StateDocument {
            settings: Settings::default(),
            pages,
            selected_page_id: Some("page_3".to_string()),
        };
        let view = render_pages_bar(&doc, Language::En, viewport(600.0));
        assert!(view.pills.is_empty());
        assert_eq!(view.overflow.len(), 12);
        assert_eq!(view.switcher.as_deref(), Some("A fairly long page name 3"));
    }
}
