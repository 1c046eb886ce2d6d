pub mod migrations;
pub mod normalize;

use crate::errors::{AppError, AppResult};
use crate::models::{Group, Icon, Link, Page, Settings, StateDocument};
use crate::store::{get_or_none, set_best_effort, KeyValueStore, STATE_KEY};
use chrono::Utc;
use rand::Rng;
use serde_json::Value;

pub use migrations::{migrate_legacy_widgets, strip_deprecated_settings};
pub use normalize::{normalize_document, normalize_settings};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Short opaque identifier: `<prefix>_` + 6 random base36 chars + the last 4
/// base36 digits of the current time in milliseconds.
pub fn new_id(prefix: &str) -> String {
    let mut rng = rand::rng();
    let random: String = (0..6)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    let millis = to_base36(Utc::now().timestamp_millis().max(0) as u64);
    let tail = &millis[millis.len().saturating_sub(4)..];
    format!("{prefix}_{random}{tail}")
}

fn starter_link(title: &str, url: &str, icon_url: &str) -> Link {
    Link {
        id: new_id("lnk"),
        title: title.to_string(),
        url: url.to_string(),
        icon: Icon::Url {
            icon_url: icon_url.to_string(),
        },
    }
}

pub fn create_default() -> StateDocument {
    let mut group = Group::new(new_id("grp"), "General".to_string());
    group.links = vec![
        starter_link(
            "Router",
            "http://192.168.1.1",
            "https://pub-4864254888164cbeb1a8e4282a00434c.r2.dev/TP-Link%20Logo.jpeg",
        ),
        starter_link(
            "Unraid",
            "http://192.168.1.95",
            "https://pub-4864254888164cbeb1a8e4282a00434c.r2.dev/Logo%20API%20Unraid.jpeg",
        ),
        starter_link(
            "Plex",
            "https://plex.tv",
            "https://pub-4864254888164cbeb1a8e4282a00434c.r2.dev/Logo%20API%20Plex.jpeg",
        ),
        starter_link(
            "BusinessDaddy",
            "https://businessdaddy.org/",
            "https://res.cloudinary.com/bettercast/image/upload/v1728737295/businessdaddy/fezm6dxyqnbscofnz8el.png",
        ),
        starter_link(
            "Donate",
            "https://buy.stripe.com/cNi14oeVFaj7639avb5AQ0e",
            "assets/icon/stackdash.svg",
        ),
    ];
    let page = Page {
        id: new_id("page"),
        name: "Home".to_string(),
        groups: vec![group],
    };
    StateDocument {
        settings: Settings::default(),
        selected_page_id: Some(page.id.clone()),
        pages: vec![page],
    }
}

fn is_persisted_state_valid(raw: &Value) -> bool {
    raw.get("pages").is_some_and(Value::is_array)
}

pub fn to_value(doc: &StateDocument) -> AppResult<Value> {
    Ok(serde_json::to_value(doc)?)
}

/// Writes the whole document, logging instead of failing.
pub fn write_document(store: &dyn KeyValueStore, doc: &StateDocument) -> bool {
    match to_value(doc) {
        Ok(value) => set_best_effort(store, STATE_KEY, &value),
        Err(error) => {
            tracing::error!(error = %error, "failed to serialize state document");
            false
        }
    }
}

/// Reads the persisted document, repairing it in place.
///
/// Anything without a `pages` array is replaced by the default document, which
/// is written back immediately. A repaired document is written back when the
/// repair changed it, so generated ids and migrations stick.
pub fn load(store: &dyn KeyValueStore) -> StateDocument {
    let Some(mut raw) = get_or_none(store, STATE_KEY).filter(is_persisted_state_valid) else {
        tracing::info!("no valid stored state, seeding defaults");
        let doc = create_default();
        write_document(store, &doc);
        return doc;
    };

    migrate_legacy_widgets(&mut raw);
    strip_deprecated_settings(&mut raw);
    let doc = normalize_document(&raw);
    match to_value(&doc) {
        Ok(normalized) if normalized != raw => {
            tracing::debug!("stored state repaired on load");
            set_best_effort(store, STATE_KEY, &normalized);
        }
        Ok(_) => {}
        Err(error) => tracing::warn!(error = %error, "failed to serialize loaded state"),
    }
    doc
}

/// Validates and deep-normalizes an imported document.
pub fn import_from_json(raw: &Value) -> AppResult<StateDocument> {
    if !raw.is_object() {
        return Err(AppError::InvalidImport("Invalid file: not an object".to_string()));
    }
    if !is_persisted_state_valid(raw) {
        return Err(AppError::InvalidImport("Invalid file: missing pages[]".to_string()));
    }
    let mut raw = raw.clone();
    migrate_legacy_widgets(&mut raw);
    strip_deprecated_settings(&mut raw);
    Ok(normalize_document(&raw))
}

/// Parses import text; malformed JSON is reported as an import error.
pub fn import_from_text(text: &str) -> AppResult<StateDocument> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|error| AppError::InvalidImport(format!("Invalid JSON: {error}")))?;
    import_from_json(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn ids_are_prefixed_and_short() {
        let id = new_id("lnk");
        assert!(id.starts_with("lnk_"));
        assert_eq!(id.len(), "lnk_".len() + 10);
        assert_ne!(new_id("lnk"), new_id("lnk"));
    }

    #[test]
    fn default_document_selects_its_page() {
        let doc = create_default();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.selected_page_id.as_deref(), Some(doc.pages[0].id.as_str()));
        assert_eq!(doc.pages[0].groups[0].links.len(), 5);
    }

    #[test]
    fn load_seeds_and_persists_defaults_for_invalid_state() {
        let store = MemoryStore::new();
        store.set(STATE_KEY, &json!({"pages": "nope"})).expect("seed");
        let doc = load(&store);
        assert_eq!(doc.pages.len(), 1);
        let stored = store.get(STATE_KEY).expect("get").expect("state");
        assert_eq!(stored["pages"][0]["id"], json!(doc.pages[0].id));
    }

    #[test]
    fn load_survives_storage_failure() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let doc = load(&store);
        assert_eq!(doc.pages.len(), 1);
    }

    #[test]
    fn load_migrates_and_writes_back() {
        let store = MemoryStore::new();
        store
            .set(
                STATE_KEY,
                &json!({
                    "settings": {"openInNewTab": true},
                    "pages": [{"id": "p", "name": "Home", "groups": [{"id": "g", "name": "G", "links": [], "widgets": [
                        {"id": "w", "type": "openweather", "options": {"location": "Paris", "apiKey": "x"}}
                    ]}]}]
                }),
            )
            .expect("seed");
        let doc = load(&store);
        assert_eq!(doc.selected_page_id.as_deref(), Some("p"));
        assert!(doc.pages[0].groups[0].programs.is_empty());

        let stored = store.get(STATE_KEY).expect("get").expect("state");
        assert!(stored["settings"].get("openInNewTab").is_none());
        let widget = &stored["pages"][0]["groups"][0]["widgets"][0];
        assert_eq!(widget["type"], "weather");
        assert_eq!(widget["options"]["city"], "Paris");
        assert!(widget["options"].get("apiKey").is_none());

        let writes = store.write_count();
        load(&store);
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn import_rejects_only_structural_violations() {
        let err = import_from_json(&json!([1, 2])).expect_err("array");
        assert!(err.to_string().starts_with("INVALID_IMPORT"));
        let err = import_from_json(&json!({"pages": {}})).expect_err("pages object");
        assert_eq!(err.user_message(), "Invalid file: missing pages[]");
        assert!(import_from_text("{not json").is_err());

        let doc = import_from_json(&json!({"pages": [{"name": "X"}]})).expect("import");
        assert_eq!(doc.pages[0].name, "X");
        assert!(doc.pages[0].groups.is_empty());
    }

    #[test]
    fn export_then_import_is_structurally_equal() {
        let doc = create_default();
        let exported = to_value(&doc).expect("export");
        let imported = import_from_json(&exported).expect("import");
        assert_eq!(imported, doc);
    }
}
