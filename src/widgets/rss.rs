use super::http::{HttpClient, HttpRequest, HttpResponse};
use crate::models::RssOptions;
use crate::store::{get_or_none, set_best_effort, KeyValueStore};
use crate::urls::{encode_component, hostname};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tokio::time::Duration;

pub const RSS_TTL: Duration = Duration::from_secs(15 * 60);
pub const BLOCKED_META_KEY: &str = "__rssBlockedMeta";
pub const BLOCK_QUIET_MS: i64 = 6 * 60 * 60 * 1000;
pub const DESCRIPTION_LIMIT: usize = 260;

const SEEN_PREFIX: &str = "rss_seen_";
const JINA_RELAY: &str = "https://r.jina.ai/";

static KNOWN_BLOCKED_HOSTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)feedburner\.com$", r"(?i)cybersecuritynews\.com$", r"(?i)cloaked\.com$"]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
});
static STUBBORN_FEED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)cloaked\.com|feedburner\.com").expect("valid regex"));
static SCRIPT_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<script.*?</script>").expect("valid regex"));
static STYLE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<style.*?</style>").expect("valid regex"));
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|<p[^>]*>").expect("valid regex"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static NBSP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)&nbsp;").expect("valid regex"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssQuery {
    pub url: String,
    pub limit: usize,
    pub compact: bool,
    pub highlight_new: bool,
    pub refresh: Duration,
}

impl RssQuery {
    pub fn from_options(options: &RssOptions) -> Option<Self> {
        let url = options.url.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            url: url.to_string(),
            limit: usize::from(options.limit.max(1)),
            compact: options.compact,
            highlight_new: options.highlight_new,
            refresh: Duration::from_secs(u64::from(options.refresh_mins.max(1)) * 60),
        })
    }

    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.url, self.limit, u8::from(self.compact))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: String,
    pub guid: String,
}

impl FeedItem {
    pub fn id(&self) -> &str {
        [&self.guid, &self.link, &self.title]
            .into_iter()
            .map(String::as_str)
            .find(|candidate| !candidate.is_empty())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Feed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// Strips markup from a feed description while keeping paragraph breaks.
pub fn clean_description(raw: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(raw, "");
    let text = STYLE_BLOCK.replace_all(&text, "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = NBSP.replace_all(&text, " ");
    BLANK_RUN.replace_all(&text, "\n\n").trim().to_string()
}

fn child_text(node: roxmltree::Node<'_, '_>, local_name: &str) -> String {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == local_name)
        .map(|child| child.text().unwrap_or_default().trim().to_string())
        .unwrap_or_default()
}

fn namespaced_text(node: roxmltree::Node<'_, '_>, local_name: &str) -> String {
    node.children()
        .find(|child| {
            child.is_element() && child.tag_name().name() == local_name && child.tag_name().namespace().is_some()
        })
        .map(|child| {
            child
                .descendants()
                .filter(|descendant| descendant.is_text())
                .filter_map(|descendant| descendant.text())
                .collect::<String>()
                .trim()
                .to_string()
        })
        .unwrap_or_default()
}

/// Parses RSS 2.0 or Atom. Anything else yields an empty feed.
pub fn parse_xml_feed(text: &str, limit: usize) -> Feed {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let document = match roxmltree::Document::parse_with_options(text, options) {
        Ok(document) => document,
        Err(error) => {
            tracing::debug!(error = %error, "feed is not well-formed XML");
            return Feed::default();
        }
    };
    let root = document.root_element();
    let is_atom = root.tag_name().name() == "feed";

    if is_atom {
        let items = root
            .children()
            .filter(|node| node.is_element() && node.tag_name().name() == "entry")
            .take(limit)
            .map(|entry| {
                let link = entry
                    .children()
                    .find(|child| child.is_element() && child.tag_name().name() == "link")
                    .and_then(|link| link.attribute("href").map(str::to_string))
                    .unwrap_or_else(|| child_text(entry, "link"));
                let summary = child_text(entry, "summary");
                let description = if summary.is_empty() { child_text(entry, "content") } else { summary };
                FeedItem {
                    title: child_text(entry, "title"),
                    link,
                    description: clean_description(&description),
                    published: child_text(entry, "updated"),
                    guid: child_text(entry, "id"),
                }
            })
            .collect();
        let title = Some(child_text(root, "title")).filter(|title| !title.is_empty());
        return Feed { title, items };
    }

    let Some(channel) = root.descendants().find(|node| node.is_element() && node.tag_name().name() == "channel") else {
        return Feed::default();
    };
    let items = channel
        .children()
        .filter(|node| node.is_element() && node.tag_name().name() == "item")
        .take(limit)
        .map(|item| {
            let encoded = namespaced_text(item, "encoded");
            let description = if encoded.is_empty() { child_text(item, "description") } else { encoded };
            let published = child_text(item, "pubDate");
            FeedItem {
                title: child_text(item, "title"),
                link: child_text(item, "link"),
                description: clean_description(&description),
                published: if published.is_empty() { namespaced_text(item, "date") } else { published },
                guid: child_text(item, "guid"),
            }
        })
        .collect();
    let title = Some(child_text(channel, "title")).filter(|title| !title.is_empty());
    Feed { title, items }
}

fn string_field(item: &Map<String, Value>, names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| item.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// JSON Feed and rss2json style payloads.
pub fn parse_json_feed(data: &Value, limit: usize) -> Feed {
    let Some(items) = data.get("items").and_then(Value::as_array) else {
        return Feed::default();
    };
    let items = items
        .iter()
        .filter_map(Value::as_object)
        .take(limit)
        .map(|item| {
            let title = string_field(item, &["title"]);
            FeedItem {
                link: string_field(item, &["url", "link", "external_url"]),
                description: clean_description(&string_field(
                    item,
                    &["content_text", "content_html", "description", "content"],
                )),
                published: string_field(item, &["date_published", "date_modified", "pubDate", "pub_date"]),
                guid: string_field(item, &["id", "url", "link", "external_url", "title"]),
                title: if title.is_empty() { "(untitled)".to_string() } else { title },
            }
        })
        .collect();
    let title = data
        .get("title")
        .or_else(|| data.get("feed").and_then(|feed| feed.get("title")))
        .and_then(Value::as_str)
        .map(str::to_string);
    Feed { title, items }
}

/// Parses whatever a direct fetch or a relay returned.
pub fn parse_body(response: &HttpResponse, limit: usize) -> Feed {
    let raw = response.body.trim();
    let looks_json = raw.starts_with('{') || raw.starts_with('[') || response.content_type.contains("json");
    if looks_json {
        if let Ok(data) = serde_json::from_str::<Value>(raw) {
            let feed = parse_json_feed(&data, limit);
            if !feed.items.is_empty() {
                return feed;
            }
            if let Some(contents) = data.get("contents").and_then(Value::as_str) {
                let feed = parse_xml_feed(contents, limit);
                if !feed.items.is_empty() {
                    return feed;
                }
            }
        }
    }
    parse_xml_feed(raw, limit)
}

pub fn is_known_blocked(host: &str) -> bool {
    KNOWN_BLOCKED_HOSTS.iter().any(|pattern| pattern.is_match(host))
}

/// Relay URLs for a feed, in the order they are tried.
pub fn relay_urls(url: &str, host: &str) -> Vec<String> {
    let encoded = encode_component(url);
    let mut relays = Vec::new();
    if host.to_ascii_lowercase().ends_with("feedburner.com") {
        relays.push(format!("https://api.rss2json.com/v1/api.json?rss_url={encoded}"));
    }
    relays.push(format!("https://api.allorigins.win/get?url={encoded}"));
    relays.push(format!("https://api.allorigins.win/raw?url={encoded}"));
    relays.push(format!("https://cors.isomorphic-git.org/{url}"));
    relays.push(format!("https://corsproxy.io/?{encoded}"));
    relays
}

/// Hosts whose direct fetch failed recently, with the failure time.
fn load_blocked_meta(store: &dyn KeyValueStore, now_ms: i64) -> Map<String, Value> {
    let mut meta = match get_or_none(store, BLOCKED_META_KEY) {
        Some(Value::Object(meta)) => meta,
        _ => Map::new(),
    };
    let before = meta.len();
    meta.retain(|_, at| at.as_i64().is_some_and(|at| now_ms - at <= BLOCK_QUIET_MS));
    if meta.len() != before {
        set_best_effort(store, BLOCKED_META_KEY, &Value::Object(meta.clone()));
    }
    meta
}

fn mark_blocked(store: &dyn KeyValueStore, host: &str, now_ms: i64) {
    if host.is_empty() {
        return;
    }
    let mut meta = load_blocked_meta(store, now_ms);
    meta.insert(host.to_string(), Value::from(now_ms));
    set_best_effort(store, BLOCKED_META_KEY, &Value::Object(meta));
}

enum Attempt {
    Items(Feed),
    Empty,
    Unreachable,
    Rejected,
}

async fn attempt(http: &dyn HttpClient, target: &str, limit: usize) -> Attempt {
    let Some(response) = http.execute(HttpRequest::get(target)).await else {
        return Attempt::Unreachable;
    };
    if !(200..400).contains(&response.status) {
        return Attempt::Rejected;
    }
    let feed = parse_body(&response, limit);
    if feed.items.is_empty() {
        Attempt::Empty
    } else {
        Attempt::Items(feed)
    }
}

async fn jina_fallback(http: &dyn HttpClient, url: &str) -> Option<Feed> {
    let target = format!("{JINA_RELAY}{}", url.replacen("http://", "https://", 1));
    let response = http.execute(HttpRequest::get(target)).await?;
    if !response.is_success() {
        return None;
    }
    let items: Vec<FeedItem> = response
        .body
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() > 25)
        .take(10)
        .enumerate()
        .map(|(index, line)| FeedItem {
            title: line.chars().take(120).collect(),
            link: url.to_string(),
            description: line.to_string(),
            published: String::new(),
            guid: format!("fallback-{index}"),
        })
        .collect();
    (!items.is_empty()).then_some(Feed { title: None, items })
}

/// Fetches a feed directly or through relays. Hosts known to block direct
/// access, or that failed within the quiet period, go to the relays first.
/// `None` means every route failed.
pub async fn fetch_feed(http: &dyn HttpClient, store: &dyn KeyValueStore, query: &RssQuery, now_ms: i64) -> Option<Feed> {
    let host = hostname(&query.url).unwrap_or_default();
    let recently_blocked = load_blocked_meta(store, now_ms).contains_key(&host);
    let relays_first = recently_blocked || is_known_blocked(&host);

    let mut routes: Vec<(String, bool)> = relay_urls(&query.url, &host)
        .into_iter()
        .map(|relay| (relay, true))
        .collect();
    if relays_first {
        routes.push((query.url.clone(), false));
    } else {
        routes.insert(0, (query.url.clone(), false));
    }

    let mut answered = false;
    for (target, via_relay) in routes {
        match attempt(http, &target, query.limit).await {
            Attempt::Items(feed) => return Some(feed),
            Attempt::Empty => answered = true,
            Attempt::Unreachable if !via_relay => {
                tracing::debug!(host = %host, "direct feed fetch failed, using relays");
                mark_blocked(store, &host, now_ms);
            }
            Attempt::Unreachable | Attempt::Rejected => {}
        }
    }

    if STUBBORN_FEED.is_match(&query.url) {
        if let Some(feed) = jina_fallback(http, &query.url).await {
            return Some(feed);
        }
    }
    if answered {
        return Some(Feed::default());
    }
    tracing::warn!(url = %query.url, "feed unavailable through every route");
    None
}

fn seen_key(url: &str) -> String {
    format!("{SEEN_PREFIX}{url}")
}

pub fn seen_ids(store: &dyn KeyValueStore, url: &str) -> Vec<String> {
    get_or_none(store, &seen_key(url))
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// Records item ids as read so they stop being highlighted.
pub fn mark_read(store: &dyn KeyValueStore, url: &str, ids: &[String]) -> bool {
    let mut seen = seen_ids(store, url);
    let mut known: HashSet<String> = seen.iter().cloned().collect();
    for id in ids {
        if known.insert(id.clone()) {
            seen.push(id.clone());
        }
    }
    set_best_effort(store, &seen_key(url), &Value::from(seen))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RssItemView {
    pub id: String,
    pub title: String,
    pub link: String,
    pub published: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RssView {
    pub title: Option<String>,
    pub favicon: Option<String>,
    pub favicon_fallback: Option<String>,
    pub items: Vec<RssItemView>,
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let mut head: String = text.chars().take(limit).collect();
        head.push('…');
        head
    } else {
        text.to_string()
    }
}

pub fn view(query: &RssQuery, feed: &Feed, seen: &[String]) -> RssView {
    let items = feed
        .items
        .iter()
        .map(|item| {
            let id = item.id().to_string();
            let is_new = query.highlight_new && !seen.contains(&id);
            let description = ANY_TAG.replace_all(&item.description, "");
            let description = NBSP.replace_all(&description, " ");
            RssItemView {
                title: if item.title.is_empty() { "(untitled)".to_string() } else { item.title.clone() },
                link: item.link.clone(),
                published: item.published.clone(),
                description: (!query.compact).then(|| truncate(description.trim(), DESCRIPTION_LIMIT)),
                is_new,
                id,
            }
        })
        .collect();

    let domain = feed
        .items
        .first()
        .and_then(|item| hostname(&item.link))
        .or_else(|| hostname(&query.url))
        .map(|host| host.trim_start_matches("www.").to_string())
        .filter(|host| !host.is_empty());
    RssView {
        title: feed.title.clone(),
        favicon: domain.as_ref().map(|domain| format!("https://logo.clearbit.com/{domain}")),
        favicon_fallback: domain.map(|domain| format!("https://www.google.com/s2/favicons?domain={domain}")),
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::widgets::http::testing::FakeHttp;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Homelab News</title>
    <item><title>First</title><link>https://news.example.com/1</link><guid>g1</guid>
      <description><![CDATA[<p>Hello&nbsp;world</p><script>x()</script>]]></description>
      <pubDate>Tue, 14 Nov 2023 10:00:00 GMT</pubDate></item>
    <item><title>Second</title><link>https://news.example.com/2</link>
      <content:encoded><![CDATA[<b>Rich</b> body]]></content:encoded><dc:date>2023-11-13</dc:date></item>
    <item><title>Third</title><link>https://news.example.com/3</link></item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>Atom Feed</title>
<entry><title>Entry</title><link href="https://atom.example.com/e1"/><id>urn:e1</id><updated>2023-11-14</updated><summary>Short</summary></entry>
</feed>"#;

    fn query(url: &str) -> RssQuery {
        RssQuery {
            url: url.to_string(),
            limit: 5,
            compact: false,
            highlight_new: true,
            refresh: RSS_TTL,
        }
    }

    #[test]
    fn parses_rss_with_namespaced_fields() {
        let feed = parse_xml_feed(RSS, 2);
        assert_eq!(feed.title.as_deref(), Some("Homelab News"));
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].description, "Hello world");
        assert_eq!(feed.items[0].id(), "g1");
        assert_eq!(feed.items[1].description, "Rich body");
        assert_eq!(feed.items[1].published, "2023-11-13");
        assert_eq!(feed.items[1].id(), "https://news.example.com/2");
    }

    #[test]
    fn parses_atom_entries() {
        let feed = parse_xml_feed(ATOM, 5);
        assert_eq!(feed.title.as_deref(), Some("Atom Feed"));
        assert_eq!(feed.items[0].link, "https://atom.example.com/e1");
        assert_eq!(feed.items[0].guid, "urn:e1");
        assert_eq!(feed.items[0].description, "Short");
    }

    #[test]
    fn reads_relay_json_wrappers() {
        let wrapped = HttpResponse {
            status: 200,
            content_type: "application/json".to_string(),
            body: json!({"contents": ATOM}).to_string(),
        };
        assert_eq!(parse_body(&wrapped, 5).items.len(), 1);

        let json_feed = HttpResponse {
            status: 200,
            content_type: "application/json".to_string(),
            body: json!({"title": "JF", "items": [{"id": "a", "url": "https://x.test/a", "content_text": "Body"}]})
                .to_string(),
        };
        let feed = parse_body(&json_feed, 5);
        assert_eq!(feed.title.as_deref(), Some("JF"));
        assert_eq!(feed.items[0].title, "(untitled)");
    }

    #[test]
    fn description_cleanup_collapses_blank_runs() {
        assert_eq!(clean_description("<style>p{}</style>a<br/><br><br/><br>b"), "a\n\nb");
    }

    #[test]
    fn view_truncates_and_highlights_unseen() {
        let mut feed = parse_xml_feed(RSS, 5);
        feed.items[2].description = "x".repeat(300);
        let view = view(&query("https://news.example.com/feed"), &feed, &["g1".to_string()]);
        assert!(!view.items[0].is_new);
        assert!(view.items[1].is_new);
        let long = view.items[2].description.as_deref().expect("description");
        assert_eq!(long.chars().count(), DESCRIPTION_LIMIT + 1);
        assert!(long.ends_with('…'));
        assert_eq!(view.favicon.as_deref(), Some("https://logo.clearbit.com/news.example.com"));
    }

    #[tokio::test]
    async fn direct_failure_marks_host_and_uses_relay() {
        let http = FakeHttp::new();
        http.fail("https://news.example.com/");
        http.route("https://api.allorigins.win/get", 200, "application/json", &json!({"contents": RSS}).to_string());
        let store = MemoryStore::new();

        let feed = fetch_feed(&http, &store, &query("https://news.example.com/feed"), NOW)
            .await
            .expect("feed");
        assert_eq!(feed.items.len(), 3);
        let meta = store.get(BLOCKED_META_KEY).expect("get").expect("meta");
        assert_eq!(meta["news.example.com"], NOW);

        // within the quiet period the relay is tried before the host
        fetch_feed(&http, &store, &query("https://news.example.com/feed"), NOW + 1_000).await;
        assert!(http.urls()[2].starts_with("https://api.allorigins.win/get"));
    }

    #[tokio::test]
    async fn quiet_period_expires() {
        let store = MemoryStore::new();
        mark_blocked(&store, "news.example.com", NOW);
        assert!(load_blocked_meta(&store, NOW + BLOCK_QUIET_MS).contains_key("news.example.com"));
        assert!(load_blocked_meta(&store, NOW + BLOCK_QUIET_MS + 1).is_empty());
    }

    #[tokio::test]
    async fn unreachable_everywhere_is_none() {
        let http = FakeHttp::new();
        let store = MemoryStore::new();
        assert!(fetch_feed(&http, &store, &query("https://down.example.com/rss"), NOW).await.is_none());
        assert!(relay_urls("https://feeds.feedburner.com/x", "feeds.feedburner.com")[0].contains("rss2json"));
    }

    #[test]
    fn mark_read_merges_ids() {
        let store = MemoryStore::new();
        assert!(mark_read(&store, "https://f.test", &["a".to_string(), "b".to_string()]));
        assert!(mark_read(&store, "https://f.test", &["b".to_string(), "c".to_string()]));
        assert_eq!(seen_ids(&store, "https://f.test"), vec!["a", "b", "c"]);
    }
}
