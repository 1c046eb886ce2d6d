use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

pub const ALLOWED_TILE_SIZES: [u16; 5] = [110, 120, 150, 180, 220];
pub const DEFAULT_TILE_SIZE: u16 = 120;
pub const MIN_GROUP_SPAN: u8 = 1;
pub const MAX_GROUP_SPAN: u8 = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub settings: Settings,
    pub pages: Vec<Page>,
    pub selected_page_id: Option<String>,
}

impl StateDocument {
    pub fn selected_page(&self) -> Option<&Page> {
        let id = self.selected_page_id.as_deref()?;
        self.pages.iter().find(|page| page.id == id)
    }

    pub fn selected_page_mut(&mut self) -> Option<&mut Page> {
        let id = self.selected_page_id.clone()?;
        self.pages.iter_mut().find(|page| page.id == id)
    }

    pub fn page_mut(&mut self, page_id: &str) -> Option<&mut Page> {
        self.pages.iter_mut().find(|page| page.id == page_id)
    }

    pub fn group(&self, group_id: &str) -> Option<&Group> {
        self.pages
            .iter()
            .flat_map(|page| page.groups.iter())
            .find(|group| group.id == group_id)
    }

    pub fn group_mut(&mut self, group_id: &str) -> Option<&mut Group> {
        self.pages
            .iter_mut()
            .flat_map(|page| page.groups.iter_mut())
            .find(|group| group.id == group_id)
    }

    /// Locates a widget anywhere in the tree, returning its owning group id.
    pub fn find_widget(&self, widget_id: &str) -> Option<(&str, &Widget)> {
        self.pages
            .iter()
            .flat_map(|page| page.groups.iter())
            .find_map(|group| {
                group
                    .widgets
                    .iter()
                    .find(|widget| widget.id == widget_id)
                    .map(|widget| (group.id.as_str(), widget))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    System,
    Light,
    Dark,
    Crimson,
}

impl Theme {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "crimson" => Some(Self::Crimson),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Light => "light",
            Self::Dark => "dark",
            Self::Crimson => "crimson",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    En,
    Pt,
    Es,
}

impl Language {
    pub const SUPPORTED: [Language; 3] = [Language::En, Language::Pt, Language::Es];

    /// Accepts a language tag such as `pt` or `pt-BR`.
    pub fn parse(value: &str) -> Option<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        let base = lowered.split('-').next().unwrap_or_default();
        match base {
            "en" => Some(Self::En),
            "pt" => Some(Self::Pt),
            "es" => Some(Self::Es),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Pt => "pt",
            Self::Es => "es",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeAlertLog {
    pub monitor_name: String,
    pub ip_or_url: String,
    pub status: String,
    pub date_time_down: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: Theme,
    pub logo_dev_api_key: String,
    pub edit_mode: bool,
    pub selected_font: String,
    pub glow_enabled: bool,
    pub glow_color: String,
    pub interface_language: Language,
    pub uptime_alerts_enabled: bool,
    pub uptime_alert_logs: Vec<UptimeAlertLog>,
    pub uptime_alert_interval_minutes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            logo_dev_api_key: String::new(),
            edit_mode: true,
            selected_font: "inter".to_string(),
            glow_enabled: true,
            glow_color: "#8b1234".to_string(),
            interface_language: Language::En,
            uptime_alerts_enabled: true,
            uptime_alert_logs: Vec::new(),
            uptime_alert_interval_minutes: 5,
        }
    }
}

impl Settings {
    pub fn logo_key(&self) -> Option<&str> {
        let key = self.logo_dev_api_key.trim();
        (!key.is_empty()).then_some(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub name: String,
    pub groups: Vec<Group>,
}

/// Grid tile width in pixels, restricted to [`ALLOWED_TILE_SIZES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TileSize(u16);

impl TileSize {
    pub fn new(px: u16) -> Option<Self> {
        ALLOWED_TILE_SIZES.contains(&px).then_some(Self(px))
    }

    pub fn px(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GroupSpan(u8);

impl GroupSpan {
    pub fn new(span: u8) -> Option<Self> {
        (MIN_GROUP_SPAN..=MAX_GROUP_SPAN)
            .contains(&span)
            .then_some(Self(span))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub links: Vec<Link>,
    pub widgets: Vec<Widget>,
    pub programs: Vec<Program>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_min: Option<TileSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<GroupSpan>,
    #[serde(skip_serializing_if = "is_false")]
    pub centered: bool,
}

impl Group {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            links: Vec::new(),
            widgets: Vec::new(),
            programs: Vec::new(),
            tile_min: None,
            span: None,
            centered: false,
        }
    }
}

/// Where a tile's icon comes from. Each variant carries only its own field,
/// so a stale `iconUrl` can never survive a switch to `logo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "iconType", rename_all = "lowercase")]
pub enum Icon {
    Auto,
    Logo {
        #[serde(rename = "logoDomain")]
        logo_domain: String,
    },
    Url {
        #[serde(rename = "iconUrl")]
        icon_url: String,
    },
    Upload {
        #[serde(rename = "iconData")]
        icon_data: String,
    },
}

impl Icon {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Logo { .. } => "logo",
            Self::Url { .. } => "url",
            Self::Upload { .. } => "upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(flatten)]
    pub icon: Icon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "launchMethod", rename_all = "lowercase")]
pub enum Launch {
    Scheme {
        #[serde(rename = "schemeOrCommand")]
        scheme_or_command: String,
    },
    Native {
        #[serde(rename = "nativeCommand")]
        native_command: String,
        #[serde(rename = "nativeArgs")]
        native_args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub launch: Launch,
    #[serde(flatten)]
    pub icon: Icon,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Metric,
    Imperial,
}

impl Units {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("imperial") {
            Self::Imperial
        } else {
            Self::Metric
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeRobotOptions {
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherOptions {
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    pub units: Units,
    pub hide_details: bool,
}

impl WeatherOptions {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RssOptions {
    pub url: String,
    pub limit: u8,
    pub compact: bool,
    pub refresh_mins: u16,
    pub highlight_new: bool,
    pub size: String,
}

/// Iframe height is either automatic or a fixed pixel value, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IframeHeight {
    Auto,
    Fixed(u32),
}

impl Serialize for IframeHeight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Auto => map.serialize_entry("autoHeight", &true)?,
            Self::Fixed(px) => map.serialize_entry("height", px)?,
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeOptions {
    pub url: String,
    #[serde(flatten)]
    pub height: IframeHeight,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    pub allow_fullscreen: bool,
    pub allow_scripts: bool,
    pub allow_same_origin: bool,
    pub no_border: bool,
    pub lock_scroll: bool,
    pub card_size: String,
    pub span: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CovidOptions {
    pub country: String,
    pub refresh_mins: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "options", rename_all = "kebab-case")]
pub enum WidgetKind {
    UptimeRobot(UptimeRobotOptions),
    Weather(WeatherOptions),
    Rss(RssOptions),
    Iframe(IframeOptions),
    Covid(CovidOptions),
}

impl WidgetKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UptimeRobot(_) => "uptime-robot",
            Self::Weather(_) => "weather",
            Self::Rss(_) => "rss",
            Self::Iframe(_) => "iframe",
            Self::Covid(_) => "covid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Widget {
    pub id: String,
    #[serde(flatten)]
    pub kind: WidgetKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_serializes_only_the_active_icon_field() {
        let link = Link {
            id: "lnk_1".to_string(),
            title: "Router".to_string(),
            url: "https://192.168.1.1/".to_string(),
            icon: Icon::Logo {
                logo_domain: "tp-link.com".to_string(),
            },
        };
        let value = serde_json::to_value(&link).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": "lnk_1",
                "title": "Router",
                "url": "https://192.168.1.1/",
                "iconType": "logo",
                "logoDomain": "tp-link.com"
            })
        );
    }

    #[test]
    fn widget_serializes_type_and_options() {
        let widget = Widget {
            id: "wdg_1".to_string(),
            kind: WidgetKind::Iframe(IframeOptions {
                url: "https://grafana.local".to_string(),
                height: IframeHeight::Auto,
                width: None,
                allow_fullscreen: true,
                allow_scripts: false,
                allow_same_origin: false,
                no_border: false,
                lock_scroll: false,
                card_size: "normal".to_string(),
                span: "full".to_string(),
            }),
        };
        let value = serde_json::to_value(&widget).expect("serialize");
        assert_eq!(value["type"], "iframe");
        assert_eq!(value["options"]["autoHeight"], true);
        assert!(value["options"].get("height").is_none());
        assert!(value["options"].get("width").is_none());
    }

    #[test]
    fn group_omits_unset_sizing() {
        let group = Group::new("grp_1".to_string(), "Tools".to_string());
        let value = serde_json::to_value(&group).expect("serialize");
        assert!(value.get("tileMin").is_none());
        assert!(value.get("span").is_none());
        assert!(value.get("centered").is_none());
        assert_eq!(value["programs"], json!([]));
    }

    #[test]
    fn tile_size_and_span_reject_out_of_range_values() {
        assert!(TileSize::new(150).is_some());
        assert!(TileSize::new(130).is_none());
        assert!(GroupSpan::new(4).is_some());
        assert!(GroupSpan::new(0).is_none());
        assert!(GroupSpan::new(5).is_none());
    }

    #[test]
    fn program_carries_launch_method_fields() {
        let program = Program {
            id: "prg_1".to_string(),
            title: "Wireshark".to_string(),
            launch: Launch::Native {
                native_command: "wireshark".to_string(),
                native_args: vec!["-k".to_string()],
            },
            icon: Icon::Url {
                icon_url: "https://example.com/ws.png".to_string(),
            },
            notes: String::new(),
        };
        let value = serde_json::to_value(&program).expect("serialize");
        assert_eq!(value["launchMethod"], "native");
        assert_eq!(value["nativeArgs"], json!(["-k"]));
        assert!(value.get("schemeOrCommand").is_none());
        assert_eq!(value["iconType"], "url");
    }
}
