use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z\d+\-.]*:").expect("valid regex"));
static DOMAIN_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[a-z0-9-]+\.[a-z]{2,}$").expect("valid regex"));
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
static BROWSER_INTERNAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(chrome|edge|about|devtools):").expect("valid regex"));

const KNOWN_PRODUCT_DOMAINS: &[(&str, &str)] = &[
    ("plex", "plex.tv"),
    ("jellyfin", "jellyfin.org"),
    ("unraid", "unraid.net"),
    ("home assistant", "home-assistant.io"),
    ("pihole", "pi-hole.net"),
    ("synology", "synology.com"),
    ("qnap", "qnap.com"),
    ("proxmox", "proxmox.com"),
    ("docker", "docker.com"),
    ("grafana", "grafana.com"),
    ("portainer", "portainer.io"),
    ("traefik", "traefik.io"),
];

const GUESS_TLDS: [&str; 5] = ["com", "io", "net", "org", "tv"];

pub fn has_scheme(value: &str) -> bool {
    SCHEME_PREFIX.is_match(value)
}

/// Percent-encodes a single query component.
pub fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Adds `https://` when no scheme is present, then re-serializes the URL.
/// Input that still fails to parse is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let parsed = if has_scheme(raw) {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{raw}"))
    };
    match parsed {
        Ok(url) => url.to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

fn parse_normalized(raw: &str) -> Option<Url> {
    Url::parse(&normalize_url(raw)).ok()
}

pub fn hostname(raw: &str) -> Option<String> {
    parse_normalized(raw)?.host_str().map(ToString::to_string)
}

/// Favicon service URL for the origin of `raw`; empty when it cannot be parsed.
pub fn favicon_for(raw: &str) -> String {
    match parse_normalized(raw) {
        Some(url) if url.host_str().is_some() => format!(
            "https://www.google.com/s2/favicons?sz=128&domain={}",
            url.origin().ascii_serialization()
        ),
        _ => String::new(),
    }
}

pub fn logo_dev_url_for_domain(domain: &str, key: &str, size: u32) -> Option<String> {
    let key = key.trim();
    if key.is_empty() || domain.is_empty() {
        return None;
    }
    Some(format!(
        "https://img.logo.dev/{}?token={}&size={size}",
        encode_component(domain),
        encode_component(key)
    ))
}

pub fn logo_dev_url_for_site(site: &str, key: &str, size: u32) -> Option<String> {
    let host = hostname(site)?;
    logo_dev_url_for_domain(&host, key, size)
}

/// Likely domains for a product title, most specific first.
pub fn guess_domain_candidates(title: &str) -> Vec<String> {
    let raw = title.trim().to_lowercase();
    if raw.is_empty() {
        return Vec::new();
    }
    let mut out: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    };
    if DOMAIN_LIKE.is_match(&raw) {
        push(raw.clone());
    }
    if let Some((_, domain)) = KNOWN_PRODUCT_DOMAINS.iter().find(|(name, _)| *name == raw) {
        push((*domain).to_string());
    }
    let slug = NON_ALNUM.replace_all(&raw, "").into_owned();
    if !slug.is_empty() {
        for tld in GUESS_TLDS {
            push(format!("{slug}.{tld}"));
        }
    }
    out
}

/// Host without a leading `www.`, used as a title when a page has none.
pub fn fallback_title_from_url(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.trim_start_matches("www.").to_string()))
        .unwrap_or_default()
}

pub fn is_browser_internal(raw: &str) -> bool {
    BROWSER_INTERNAL.is_match(raw)
}

/// Resolves an asset reference found on a page against the page URL.
pub fn resolve_asset_url(candidate: &str, base: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    if candidate.starts_with("data:") || has_scheme(candidate) {
        return Some(candidate.to_string());
    }
    let base = Url::parse(base).ok()?;
    base.join(candidate).ok().map(|url| url.to_string())
}
