use serde_json::{Map, Value};

const DEPRECATED_SETTINGS: [&str; 1] = ["openInNewTab"];

/// Rewrites legacy `openweather` widgets into keyless `weather` widgets.
///
/// `location` is folded into `city` and the old API key is dropped. Returns the
/// number of widgets rewritten; a second run over the same value rewrites none.
pub fn migrate_legacy_widgets(doc: &mut Value) -> usize {
    let Some(pages) = doc.get_mut("pages").and_then(Value::as_array_mut) else {
        return 0;
    };

    let mut rewritten = 0;
    for page in pages.iter_mut() {
        let Some(groups) = page.get_mut("groups").and_then(Value::as_array_mut) else {
            continue;
        };
        for group in groups.iter_mut() {
            let Some(widgets) = group.get_mut("widgets").and_then(Value::as_array_mut) else {
                continue;
            };
            for widget in widgets.iter_mut().filter_map(Value::as_object_mut) {
                if widget.get("type").and_then(Value::as_str) != Some("openweather") {
                    continue;
                }
                widget.insert("type".to_string(), Value::String("weather".to_string()));
                let options = widget
                    .entry("options")
                    .or_insert_with(|| Value::Object(Map::new()));
                if !options.is_object() {
                    *options = Value::Object(Map::new());
                }
                if let Some(options) = options.as_object_mut() {
                    let location = options.remove("location");
                    let has_city = options
                        .get("city")
                        .and_then(Value::as_str)
                        .is_some_and(|city| !city.is_empty());
                    if !has_city {
                        if let Some(location) = location.filter(|value| {
                            value.as_str().is_some_and(|text| !text.is_empty())
                        }) {
                            options.insert("city".to_string(), location);
                        }
                    }
                    options.remove("apiKey");
                }
                rewritten += 1;
            }
        }
    }
    if rewritten > 0 {
        tracing::info!(count = rewritten, "migrated legacy weather widgets");
    }
    rewritten
}

/// Removes settings keys that are no longer honoured. Returns whether any were present.
pub fn strip_deprecated_settings(doc: &mut Value) -> bool {
    let Some(settings) = doc.get_mut("settings").and_then(Value::as_object_mut) else {
        return false;
    };
    let mut removed = false;
    for key in DEPRECATED_SETTINGS {
        removed |= settings.remove(key).is_some();
    }
    removed
}
