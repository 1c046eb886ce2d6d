use super::new_id;
use crate::models::{
    CovidOptions, Group, GroupSpan, Icon, IframeHeight, IframeOptions, Language, Launch, Link, Page,
    Program, RssOptions, Settings, StateDocument, Theme, TileSize, UptimeAlertLog,
    UptimeRobotOptions, Units, WeatherOptions, Widget, WidgetKind,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

pub const MAX_ALERT_LOGS: usize = 200;
pub const DEFAULT_ALERT_INTERVAL_MINUTES: u32 = 5;
pub const MAX_ALERT_INTERVAL_MINUTES: u32 = 60;

pub const RSS_DEFAULT_LIMIT: u8 = 5;
pub const RSS_MAX_LIMIT: u8 = 15;
pub const RSS_DEFAULT_REFRESH_MINS: u16 = 15;
pub const RSS_MAX_REFRESH_MINS: u16 = 180;
pub const COVID_MIN_REFRESH_MINS: u16 = 5;
pub const COVID_MAX_REFRESH_MINS: u16 = 360;
pub const COVID_DEFAULT_REFRESH_MINS: u16 = 60;
pub const IFRAME_MIN_PX: u32 = 100;
pub const IFRAME_MAX_HEIGHT: u32 = 2_000;
pub const IFRAME_MAX_WIDTH: u32 = 5_000;

static GLOW_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#([0-9a-f]{3,8})$").expect("valid regex"));

fn empty_map() -> &'static Map<String, Value> {
    static EMPTY: Lazy<Map<String, Value>> = Lazy::new(Map::new);
    &EMPTY
}

fn as_object(value: Option<&Value>) -> &Map<String, Value> {
    value.and_then(Value::as_object).unwrap_or_else(|| empty_map())
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn string_or(map: &Map<String, Value>, key: &str, fallback: &str) -> String {
    string_field(map, key).unwrap_or_else(|| fallback.to_string())
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// `true` unless explicitly `false`.
fn flag_default_on(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool) != Some(false)
}

fn number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_f64).filter(|value| value.is_finite())
}

/// Numbers, or strings that parse as numbers.
fn lenient_number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|value| value.is_finite())
}

fn id_or_new(map: &Map<String, Value>, prefix: &str) -> String {
    match map.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => new_id(prefix),
    }
}

fn array<'a>(map: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    map.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// The single source of settings defaults for both loading and importing.
pub fn normalize_settings(raw: Option<&Value>) -> Settings {
    let map = as_object(raw);
    let defaults = Settings::default();

    let theme = map
        .get("theme")
        .and_then(Value::as_str)
        .and_then(Theme::parse)
        .unwrap_or(defaults.theme);
    let selected_font = map
        .get("selectedFont")
        .and_then(Value::as_str)
        .filter(|font| !font.trim().is_empty())
        .map(ToString::to_string)
        .unwrap_or(defaults.selected_font);
    let glow_color = map
        .get("glowColor")
        .and_then(Value::as_str)
        .filter(|color| GLOW_COLOR.is_match(color))
        .map(ToString::to_string)
        .unwrap_or(defaults.glow_color);
    let interface_language = map
        .get("interfaceLanguage")
        .and_then(Value::as_str)
        .and_then(Language::parse)
        .unwrap_or(defaults.interface_language);
    let uptime_alert_interval_minutes = match number(map, "uptimeAlertIntervalMinutes") {
        Some(minutes) if minutes > 0.0 => {
            (minutes.round() as u32).clamp(1, MAX_ALERT_INTERVAL_MINUTES)
        }
        _ => DEFAULT_ALERT_INTERVAL_MINUTES,
    };
    let mut uptime_alert_logs: Vec<UptimeAlertLog> = array(map, "uptimeAlertLogs")
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| UptimeAlertLog {
            monitor_name: string_or(entry, "monitorName", ""),
            ip_or_url: string_or(entry, "ipOrUrl", ""),
            status: string_or(entry, "status", "down"),
            date_time_down: string_or(entry, "dateTimeDown", ""),
        })
        .collect();
    uptime_alert_logs.truncate(MAX_ALERT_LOGS);

    Settings {
        theme,
        logo_dev_api_key: string_or(map, "logoDevApiKey", ""),
        edit_mode: flag_default_on(map, "editMode"),
        selected_font,
        glow_enabled: flag_default_on(map, "glowEnabled"),
        glow_color,
        interface_language,
        uptime_alerts_enabled: flag_default_on(map, "uptimeAlertsEnabled"),
        uptime_alert_logs,
        uptime_alert_interval_minutes,
    }
}

pub fn is_valid_glow_color(value: &str) -> bool {
    GLOW_COLOR.is_match(value)
}

/// Deep-normalizes a document whose `pages` member is already known to be an array.
pub fn normalize_document(raw: &Value) -> StateDocument {
    let root = as_object(Some(raw));
    let settings = normalize_settings(root.get("settings"));
    let pages: Vec<Page> = array(root, "pages").iter().map(normalize_page).collect();

    let requested = root
        .get("selectedPageId")
        .and_then(Value::as_str)
        .filter(|id| pages.iter().any(|page| page.id == *id))
        .map(ToString::to_string);
    let selected_page_id = requested.or_else(|| pages.first().map(|page| page.id.clone()));

    StateDocument {
        settings,
        pages,
        selected_page_id,
    }
}

fn normalize_page(raw: &Value) -> Page {
    let map = as_object(Some(raw));
    Page {
        id: id_or_new(map, "page"),
        name: string_or(map, "name", "Page"),
        groups: array(map, "groups").iter().map(normalize_group).collect(),
    }
}

fn normalize_group(raw: &Value) -> Group {
    let map = as_object(Some(raw));
    let tile_min = number(map, "tileMin")
        .filter(|px| px.fract() == 0.0 && *px > 0.0 && *px <= f64::from(u16::MAX))
        .and_then(|px| TileSize::new(px as u16));
    let span = number(map, "span")
        .filter(|span| span.fract() == 0.0 && *span >= 0.0 && *span <= f64::from(u8::MAX))
        .and_then(|span| GroupSpan::new(span as u8));

    Group {
        id: id_or_new(map, "grp"),
        name: string_or(map, "name", "Group"),
        links: array(map, "links").iter().map(normalize_link).collect(),
        widgets: array(map, "widgets").iter().filter_map(normalize_widget).collect(),
        programs: array(map, "programs").iter().map(normalize_program).collect(),
        tile_min,
        span,
        centered: flag(map, "centered"),
    }
}

fn non_empty(map: &Map<String, Value>, key: &str) -> Option<String> {
    string_field(map, key).filter(|value| !value.is_empty())
}

/// Link icon from raw fields. A source without its value falls back to auto.
pub fn link_icon(map: &Map<String, Value>) -> Icon {
    match map.get("iconType").and_then(Value::as_str) {
        Some("logo") => non_empty(map, "logoDomain").map(|logo_domain| Icon::Logo { logo_domain }),
        Some("url") => non_empty(map, "iconUrl").map(|icon_url| Icon::Url { icon_url }),
        Some("upload") => non_empty(map, "iconData").map(|icon_data| Icon::Upload { icon_data }),
        _ => None,
    }
    .unwrap_or(Icon::Auto)
}

/// Program icon from raw fields. Programs without a usable source keep a
/// logo slot, possibly empty, so a domain can be filled in later.
pub fn program_icon(map: &Map<String, Value>) -> Icon {
    match map.get("iconType").and_then(Value::as_str) {
        Some("auto") => Some(Icon::Auto),
        Some("url") => non_empty(map, "iconUrl").map(|icon_url| Icon::Url { icon_url }),
        Some("upload") => non_empty(map, "iconData").map(|icon_data| Icon::Upload { icon_data }),
        _ => None,
    }
    .unwrap_or_else(|| Icon::Logo {
        logo_domain: string_or(map, "logoDomain", ""),
    })
}

fn normalize_link(raw: &Value) -> Link {
    let map = as_object(Some(raw));
    let icon = link_icon(map);

    Link {
        id: id_or_new(map, "lnk"),
        title: string_or(map, "title", "Untitled"),
        url: string_or(map, "url", ""),
        icon,
    }
}

fn normalize_program(raw: &Value) -> Program {
    let map = as_object(Some(raw));
    let launch = match map.get("launchMethod").and_then(Value::as_str) {
        Some("native") => {
            let native_args = match map.get("nativeArgs") {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect(),
                Some(Value::String(text)) => split_args(text),
                _ => Vec::new(),
            };
            Launch::Native {
                native_command: string_or(map, "nativeCommand", ""),
                native_args,
            }
        }
        _ => Launch::Scheme {
            scheme_or_command: string_field(map, "schemeOrCommand")
                .or_else(|| string_field(map, "scheme"))
                .unwrap_or_default(),
        },
    };
    let icon = program_icon(map);

    Program {
        id: id_or_new(map, "prg"),
        title: string_or(map, "title", "Program"),
        launch,
        icon,
        notes: string_or(map, "notes", ""),
    }
}

pub fn split_args(text: &str) -> Vec<String> {
    text.split_whitespace().map(ToString::to_string).collect()
}

fn normalize_widget(raw: &Value) -> Option<Widget> {
    let map = as_object(Some(raw));
    let type_name = map
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("uptime-robot");
    let options = as_object(map.get("options"));
    let Some(kind) = normalize_widget_options(type_name, options) else {
        tracing::warn!(widget_type = %type_name, "dropping widget of unknown type");
        return None;
    };
    Some(Widget {
        id: id_or_new(map, "wdg"),
        kind,
    })
}

pub fn normalize_widget_options(type_name: &str, options: &Map<String, Value>) -> Option<WidgetKind> {
    let kind = match type_name {
        "uptime-robot" => WidgetKind::UptimeRobot(UptimeRobotOptions {
            api_key: string_or(options, "apiKey", ""),
            monitor_index: number(options, "monitorIndex")
                .filter(|index| *index >= 0.0 && index.fract() == 0.0 && *index <= f64::from(u32::MAX))
                .map(|index| index as u32),
        }),
        "weather" | "openweather" => {
            let coordinates = lenient_number(options, "lat").zip(lenient_number(options, "lon"));
            WidgetKind::Weather(WeatherOptions {
                city: string_field(options, "city")
                    .or_else(|| string_field(options, "location"))
                    .unwrap_or_default(),
                lat: coordinates.map(|(lat, _)| lat),
                lon: coordinates.map(|(_, lon)| lon),
                units: Units::parse(&string_or(options, "units", "metric")),
                hide_details: flag(options, "hideDetails"),
            })
        }
        "rss" => WidgetKind::Rss(RssOptions {
            url: string_or(options, "url", ""),
            limit: match number(options, "limit") {
                Some(limit) if limit >= 1.0 => (limit.floor() as u8).min(RSS_MAX_LIMIT),
                _ => RSS_DEFAULT_LIMIT,
            },
            compact: flag(options, "compact"),
            refresh_mins: match number(options, "refreshMins") {
                Some(mins) if mins >= 1.0 => (mins.min(f64::from(RSS_MAX_REFRESH_MINS)).floor()) as u16,
                _ => RSS_DEFAULT_REFRESH_MINS,
            },
            highlight_new: flag(options, "highlightNew"),
            size: non_empty(options, "size").unwrap_or_else(|| "large".to_string()),
        }),
        "iframe" => {
            let height = match number(options, "height") {
                _ if flag(options, "autoHeight") => IframeHeight::Auto,
                Some(px) if px >= f64::from(IFRAME_MIN_PX) => {
                    IframeHeight::Fixed((px.min(f64::from(IFRAME_MAX_HEIGHT))) as u32)
                }
                _ => IframeHeight::Auto,
            };
            let span = match options.get("span") {
                Some(Value::String(span)) if !span.is_empty() => span.clone(),
                Some(Value::Number(span)) => span.to_string(),
                _ => "full".to_string(),
            };
            WidgetKind::Iframe(IframeOptions {
                url: string_or(options, "url", ""),
                height,
                width: number(options, "width")
                    .filter(|px| *px >= f64::from(IFRAME_MIN_PX))
                    .map(|px| px.min(f64::from(IFRAME_MAX_WIDTH)) as u32),
                allow_fullscreen: flag(options, "allowFullscreen"),
                allow_scripts: flag(options, "allowScripts"),
                allow_same_origin: flag(options, "allowSameOrigin"),
                no_border: flag(options, "noBorder"),
                lock_scroll: flag(options, "lockScroll"),
                card_size: non_empty(options, "cardSize").unwrap_or_else(|| "normal".to_string()),
                span,
            })
        }
        "covid" => WidgetKind::Covid(CovidOptions {
            country: string_or(options, "country", ""),
            refresh_mins: match number(options, "refreshMins") {
                Some(mins) if mins >= f64::from(COVID_MIN_REFRESH_MINS) => {
                    mins.min(f64::from(COVID_MAX_REFRESH_MINS)).floor() as u16
                }
                _ => COVID_DEFAULT_REFRESH_MINS,
            },
        }),
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_default_when_missing_or_invalid() {
        let settings = normalize_settings(Some(&json!({
            "theme": "neon",
            "glowColor": "red",
            "interfaceLanguage": "PT-br",
            "uptimeAlertIntervalMinutes": -3,
            "editMode": "yes",
            "selectedFont": "  ",
            "openInNewTab": false
        })));
        assert_eq!(settings.theme, Theme::System);
        assert_eq!(settings.glow_color, "#8b1234");
        assert_eq!(settings.interface_language, Language::Pt);
        assert_eq!(settings.uptime_alert_interval_minutes, 5);
        assert!(settings.edit_mode);
        assert_eq!(settings.selected_font, "inter");

        assert_eq!(normalize_settings(None), Settings::default());
    }

    #[test]
    fn alert_interval_is_capped() {
        let settings = normalize_settings(Some(&json!({"uptimeAlertIntervalMinutes": 240})));
        assert_eq!(settings.uptime_alert_interval_minutes, 60);
    }

    #[test]
    fn incomplete_page_gets_id_and_empty_groups() {
        let doc = normalize_document(&json!({"pages": [{"name": "X"}]}));
        assert_eq!(doc.pages.len(), 1);
        assert!(doc.pages[0].id.starts_with("page_"));
        assert!(doc.pages[0].groups.is_empty());
        assert_eq!(doc.selected_page_id.as_deref(), Some(doc.pages[0].id.as_str()));
    }

    #[test]
    fn dangling_selection_falls_back_to_first_page() {
        let doc = normalize_document(&json!({
            "pages": [{"id": "a", "name": "A"}, {"id": "b", "name": "B"}],
            "selectedPageId": "gone"
        }));
        assert_eq!(doc.selected_page_id.as_deref(), Some("a"));

        let empty = normalize_document(&json!({"pages": [], "selectedPageId": "a"}));
        assert!(empty.selected_page_id.is_none());
    }

    #[test]
    fn link_keeps_only_active_icon_field() {
        let doc = normalize_document(&json!({"pages": [{"id": "p", "groups": [{"id": "g", "links": [
            {"id": "l1", "title": "A", "url": "https://a", "iconType": "logo", "logoDomain": "a.com", "iconUrl": "https://stale"},
            {"id": "l2", "title": "B", "url": "https://b", "iconType": "url", "iconUrl": ""},
            {"id": "l3", "iconType": "bogus"}
        ]}]}]}));
        let links = &doc.pages[0].groups[0].links;
        assert_eq!(links[0].icon, Icon::Logo { logo_domain: "a.com".to_string() });
        assert_eq!(links[1].icon, Icon::Auto);
        assert_eq!(links[2].icon, Icon::Auto);
        assert_eq!(links[2].title, "Untitled");
    }

    #[test]
    fn programs_default_to_scheme_and_accept_legacy_fields() {
        let doc = normalize_document(&json!({"pages": [{"id": "p", "groups": [{"id": "g", "programs": [
            {"id": "p1", "scheme": "steam://run/1"},
            {"id": "p2", "launchMethod": "native", "nativeCommand": "code", "nativeArgs": "--new-window  ."}
        ]}]}]}));
        let programs = &doc.pages[0].groups[0].programs;
        assert_eq!(
            programs[0].launch,
            Launch::Scheme { scheme_or_command: "steam://run/1".to_string() }
        );
        assert_eq!(programs[0].icon, Icon::Logo { logo_domain: String::new() });
        assert_eq!(
            programs[1].launch,
            Launch::Native {
                native_command: "code".to_string(),
                native_args: vec!["--new-window".to_string(), ".".to_string()],
            }
        );
    }

    #[test]
    fn widget_options_are_bounded_and_unknown_types_dropped() {
        let doc = normalize_document(&json!({"pages": [{"id": "p", "groups": [{"id": "g", "widgets": [
            {"id": "w1", "type": "rss", "options": {"url": "https://f", "limit": 99, "refreshMins": 0}},
            {"id": "w2", "type": "covid", "options": {"refreshMins": 2}},
            {"id": "w3", "type": "iframe", "options": {"url": "https://i", "autoHeight": true, "height": 500, "width": 50}},
            {"id": "w4", "type": "clock"},
            {"id": "w5"}
        ]}]}]}));
        let widgets = &doc.pages[0].groups[0].widgets;
        assert_eq!(widgets.len(), 4);
        match &widgets[0].kind {
            WidgetKind::Rss(rss) => {
                assert_eq!(rss.limit, 15);
                assert_eq!(rss.refresh_mins, 15);
                assert_eq!(rss.size, "large");
            }
            other => panic!("unexpected widget {other:?}"),
        }
        match &widgets[1].kind {
            WidgetKind::Covid(covid) => assert_eq!(covid.refresh_mins, 60),
            other => panic!("unexpected widget {other:?}"),
        }
        match &widgets[2].kind {
            WidgetKind::Iframe(iframe) => {
                assert_eq!(iframe.height, IframeHeight::Auto);
                assert!(iframe.width.is_none());
            }
            other => panic!("unexpected widget {other:?}"),
        }
        assert_eq!(widgets[3].kind.type_name(), "uptime-robot");
    }

    #[test]
    fn group_sizing_outside_allowed_sets_is_dropped() {
        let doc = normalize_document(&json!({"pages": [{"id": "p", "groups": [
            {"id": "g1", "tileMin": 150, "span": 2, "centered": true},
            {"id": "g2", "tileMin": 130, "span": 9}
        ]}]}));
        let groups = &doc.pages[0].groups;
        assert_eq!(groups[0].tile_min.map(TileSize::px), Some(150));
        assert_eq!(groups[0].span.map(GroupSpan::get), Some(2));
        assert!(groups[0].centered);
        assert!(groups[1].tile_min.is_none());
        assert!(groups[1].span.is_none());
    }

    #[test]
    fn weather_keeps_coordinates_only_in_pairs() {
        let kind = normalize_widget_options(
            "weather",
            json!({"city": "", "lat": "51.5", "units": "imperial"}).as_object().expect("object"),
        );
        match kind {
            Some(WidgetKind::Weather(weather)) => {
                assert!(weather.coordinates().is_none());
                assert_eq!(weather.units, Units::Imperial);
            }
            other => panic!("unexpected widget {other:?}"),
        }
    }
}
