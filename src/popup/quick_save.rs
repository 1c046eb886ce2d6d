use crate::errors::{AppError, AppResult};
use crate::i18n::t;
use crate::models::{Icon, Language, Link};
use crate::state::new_id;
use crate::urls::{fallback_title_from_url, favicon_for, is_browser_internal, normalize_url, resolve_asset_url};
use crate::widgets::http::ImageProbe;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TITLE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static LINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid regex"));
static META_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("valid regex"));
static ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)([a-z:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

const ICON_RELS: [&str; 4] = ["icon", "shortcut icon", "apple-touch-icon", "apple-touch-icon-precomposed"];
const IMAGE_META_NAMES: [&str; 3] = ["og:image", "twitter:image", "image"];

/// What the popup knows about the page being saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMetadata {
    pub title: String,
    pub url: String,
    pub favicon: String,
    pub image: String,
}

fn attributes(tag: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(tag)
        .map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            (caps[1].to_ascii_lowercase(), value.trim().to_string())
        })
        .collect()
}

fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

impl PageMetadata {
    /// Pulls title, icon link and preview image out of a page's markup.
    /// Known tags are preferred in a fixed order; the first match wins.
    pub fn from_html(url: &str, html: &str) -> Self {
        let title = TITLE_TAG
            .captures(html)
            .map(|caps| caps[1].split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();

        let links: Vec<Vec<(String, String)>> = LINK_TAG.find_iter(html).map(|m| attributes(m.as_str())).collect();
        let favicon = ICON_RELS
            .iter()
            .find_map(|rel| {
                links.iter().find_map(|attrs| {
                    let matches = attribute(attrs, "rel").is_some_and(|value| value.eq_ignore_ascii_case(rel));
                    matches.then(|| attribute(attrs, "href")).flatten()
                })
            })
            .or_else(|| {
                links.iter().find_map(|attrs| {
                    let icon_like = attribute(attrs, "rel").is_some_and(|value| value.to_ascii_lowercase().starts_with("icon"));
                    icon_like.then(|| attribute(attrs, "href")).flatten()
                })
            })
            .unwrap_or_default()
            .to_string();

        let metas: Vec<Vec<(String, String)>> = META_TAG.find_iter(html).map(|m| attributes(m.as_str())).collect();
        let image = IMAGE_META_NAMES
            .iter()
            .find_map(|name| {
                metas.iter().find_map(|attrs| {
                    let named = ["property", "name"]
                        .iter()
                        .any(|key| attribute(attrs, key).is_some_and(|value| value.eq_ignore_ascii_case(name)));
                    named
                        .then(|| attribute(attrs, "content"))
                        .flatten()
                        .filter(|content| !content.is_empty())
                })
            })
            .unwrap_or_default()
            .to_string();

        Self {
            title,
            url: url.to_string(),
            favicon,
            image,
        }
    }
}

/// Tries the page's preview image, its declared favicon and the favicon
/// service, in that order, and returns the first one that loads.
pub async fn select_best_icon(meta: &PageMetadata, probe: &dyn ImageProbe) -> Option<String> {
    let base = meta.url.as_str();
    let candidates = [
        resolve_asset_url(&meta.image, base),
        resolve_asset_url(&meta.favicon, base),
        (!base.is_empty()).then(|| favicon_for(base)).filter(|icon| !icon.is_empty()),
    ];

    let mut seen: Vec<String> = Vec::new();
    for candidate in candidates.into_iter().flatten() {
        let clean = candidate.trim().to_string();
        if clean.is_empty() || seen.contains(&clean) {
            continue;
        }
        seen.push(clean.clone());
        if is_browser_internal(&clean) {
            continue;
        }
        if probe.probe(clean.clone()).await {
            return Some(clean);
        }
    }
    None
}

pub fn build_quick_save_link(meta: &PageMetadata, best_icon: Option<String>, language: Language) -> AppResult<Link> {
    let url = normalize_url(meta.url.trim());
    if url.is_empty() {
        return Err(AppError::Validation("The page has no URL to save.".to_string()));
    }
    let title = match meta.title.trim() {
        "" => {
            let host = fallback_title_from_url(&url);
            if host.is_empty() {
                t(language, "Untitled")
            } else {
                host
            }
        }
        title => title.to_string(),
    };
    let icon = match best_icon.filter(|icon| !icon.is_empty()) {
        Some(icon_url) => Icon::Url { icon_url },
        None => Icon::Auto,
    };
    Ok(Link {
        id: new_id("lnk"),
        title,
        url,
        icon,
    })
}
