use crate::errors::{AppError, AppResult};
use crate::models::{
    CovidOptions, GroupSpan, Icon, IframeHeight, IframeOptions, Launch, RssOptions, TileSize, Units,
    UptimeRobotOptions, WeatherOptions, WidgetKind, ALLOWED_TILE_SIZES, MAX_GROUP_SPAN, MIN_GROUP_SPAN,
};
use crate::state::normalize::{
    link_icon, program_icon, split_args, COVID_DEFAULT_REFRESH_MINS, COVID_MAX_REFRESH_MINS, COVID_MIN_REFRESH_MINS,
    IFRAME_MAX_HEIGHT, IFRAME_MAX_WIDTH, IFRAME_MIN_PX, RSS_DEFAULT_LIMIT, RSS_DEFAULT_REFRESH_MINS, RSS_MAX_LIMIT,
    RSS_MAX_REFRESH_MINS,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const MAX_UPLOAD_BYTES: usize = 512 * 1024;

/// Raw widget form input. Numeric fields stay text so that bad input can be
/// reported instead of silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WidgetDraft {
    #[serde(rename = "type")]
    pub widget_type: String,
    pub api_key: String,
    pub city: String,
    pub lat: String,
    pub lon: String,
    pub units: String,
    pub hide_details: bool,
    pub url: String,
    pub limit: String,
    pub compact: bool,
    pub refresh_mins: String,
    pub highlight_new: bool,
    pub size: String,
    pub height: String,
    pub width: String,
    pub allow_fullscreen: bool,
    pub allow_scripts: bool,
    pub allow_same_origin: bool,
    pub no_border: bool,
    pub lock_scroll: bool,
    pub card_size: String,
    pub span: String,
    pub country: String,
}

fn invalid(message: &str) -> AppError {
    AppError::Validation(message.to_string())
}

fn parse_int(raw: &str) -> Option<i64> {
    let digits: String = raw
        .trim()
        .chars()
        .enumerate()
        .take_while(|(index, ch)| ch.is_ascii_digit() || (*index == 0 && *ch == '-'))
        .map(|(_, ch)| ch)
        .collect();
    digits.parse().ok()
}

fn or_default(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Validates a widget form and produces options carrying only the fields of
/// the chosen type.
pub fn build_widget(draft: &WidgetDraft) -> AppResult<WidgetKind> {
    match draft.widget_type.trim() {
        "weather" => build_weather(draft),
        "rss" => build_rss(draft),
        "iframe" => build_iframe(draft),
        "covid" => Ok(build_covid(draft)),
        _ => {
            let api_key = draft.api_key.trim();
            if api_key.is_empty() {
                return Err(invalid("API key required"));
            }
            Ok(WidgetKind::UptimeRobot(UptimeRobotOptions {
                api_key: api_key.to_string(),
                monitor_index: None,
            }))
        }
    }
}

fn build_weather(draft: &WidgetDraft) -> AppResult<WidgetKind> {
    let city = draft.city.trim();
    let lat_raw = draft.lat.trim();
    let lon_raw = draft.lon.trim();
    let lat = (!lat_raw.is_empty()).then(|| lat_raw.parse::<f64>().ok().filter(|lat| lat.is_finite()));
    let lon = (!lon_raw.is_empty()).then(|| lon_raw.parse::<f64>().ok().filter(|lon| lon.is_finite()));
    if matches!(lat, Some(None)) || matches!(lon, Some(None)) {
        return Err(invalid("Latitude/Longitude must be numbers"));
    }
    let coordinates = lat.flatten().zip(lon.flatten());
    if coordinates.is_none() && city.is_empty() {
        return Err(invalid("Provide a city or both latitude and longitude"));
    }
    Ok(WidgetKind::Weather(WeatherOptions {
        city: city.to_string(),
        lat: coordinates.map(|(lat, _)| lat),
        lon: coordinates.map(|(_, lon)| lon),
        units: Units::parse(draft.units.trim()),
        hide_details: draft.hide_details,
    }))
}

fn build_rss(draft: &WidgetDraft) -> AppResult<WidgetKind> {
    let url = draft.url.trim();
    if url.is_empty() {
        return Err(invalid("Feed URL required"));
    }
    let limit = parse_int(&draft.limit)
        .filter(|limit| *limit > 0)
        .map_or(RSS_DEFAULT_LIMIT, |limit| limit.min(i64::from(RSS_MAX_LIMIT)) as u8);
    let refresh_mins = parse_int(&draft.refresh_mins)
        .filter(|mins| *mins >= 1)
        .map_or(RSS_DEFAULT_REFRESH_MINS, |mins| mins.min(i64::from(RSS_MAX_REFRESH_MINS)) as u16);
    Ok(WidgetKind::Rss(RssOptions {
        url: url.to_string(),
        limit,
        compact: draft.compact,
        refresh_mins,
        highlight_new: draft.highlight_new,
        size: or_default(&draft.size, "large"),
    }))
}

fn build_iframe(draft: &WidgetDraft) -> AppResult<WidgetKind> {
    let url = draft.url.trim();
    if url.is_empty() {
        return Err(invalid("IFrame URL required"));
    }
    let height = if draft.height.trim().is_empty() {
        IframeHeight::Auto
    } else {
        match parse_int(&draft.height) {
            Some(px) if px >= i64::from(IFRAME_MIN_PX) => IframeHeight::Fixed(px.min(i64::from(IFRAME_MAX_HEIGHT)) as u32),
            _ => return Err(invalid("Height must be blank or a number >=100")),
        }
    };
    let width = parse_int(&draft.width)
        .filter(|px| *px >= i64::from(IFRAME_MIN_PX))
        .map(|px| px.min(i64::from(IFRAME_MAX_WIDTH)) as u32);
    Ok(WidgetKind::Iframe(IframeOptions {
        url: url.to_string(),
        height,
        width,
        allow_fullscreen: draft.allow_fullscreen,
        allow_scripts: draft.allow_scripts,
        allow_same_origin: draft.allow_same_origin,
        no_border: draft.no_border,
        lock_scroll: draft.lock_scroll,
        card_size: or_default(&draft.card_size, "normal"),
        span: or_default(&draft.span, "full"),
    }))
}

fn build_covid(draft: &WidgetDraft) -> WidgetKind {
    let refresh_mins = parse_int(&draft.refresh_mins)
        .filter(|mins| *mins >= i64::from(COVID_MIN_REFRESH_MINS))
        .map_or(COVID_DEFAULT_REFRESH_MINS, |mins| mins.min(i64::from(COVID_MAX_REFRESH_MINS)) as u16);
    WidgetKind::Covid(CovidOptions {
        country: draft.country.trim().to_string(),
        refresh_mins,
    })
}

/// Icon form fields shared by links and programs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IconDraft {
    pub icon_type: String,
    pub icon_url: String,
    pub icon_data: String,
    pub logo_domain: String,
}

impl IconDraft {
    fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("iconType".to_string(), Value::from(self.icon_type.trim()));
        map.insert("iconUrl".to_string(), Value::from(self.icon_url.trim()));
        map.insert("iconData".to_string(), Value::from(self.icon_data.as_str()));
        map.insert("logoDomain".to_string(), Value::from(self.logo_domain.trim()));
        map
    }

    fn check_upload(&self) -> AppResult<()> {
        if self.icon_type.trim() == "upload" && !self.icon_data.is_empty() {
            check_data_url_size(&self.icon_data)?;
        }
        Ok(())
    }

    pub fn link_icon(&self) -> AppResult<Icon> {
        self.check_upload()?;
        Ok(link_icon(&self.fields()))
    }

    pub fn program_icon(&self) -> AppResult<Icon> {
        self.check_upload()?;
        Ok(program_icon(&self.fields()))
    }
}

/// Encodes an uploaded image as a data URL, rejecting oversized files.
pub fn encode_upload(bytes: &[u8], mime: &str) -> AppResult<String> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(invalid("Icon too large. Keep it under 512 KB."));
    }
    let mime = if mime.trim().is_empty() { "image/png" } else { mime.trim() };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

/// Rejects base64 data URLs whose payload exceeds the upload limit.
pub fn check_data_url_size(data_url: &str) -> AppResult<()> {
    let Some((header, payload)) = data_url.split_once(',') else {
        return Err(invalid("Icon must be a data URL"));
    };
    if !header.starts_with("data:") {
        return Err(invalid("Icon must be a data URL"));
    }
    let size = if header.ends_with(";base64") {
        STANDARD
            .decode(payload.trim())
            .map_err(|error| AppError::Validation(format!("Icon data is not valid base64: {error}")))?
            .len()
    } else {
        payload.len()
    };
    if size > MAX_UPLOAD_BYTES {
        return Err(invalid("Icon too large. Keep it under 512 KB."));
    }
    Ok(())
}

/// Launch form fields for a program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchDraft {
    pub launch_method: String,
    pub scheme_or_command: String,
    pub native_command: String,
    pub native_args: String,
}

impl LaunchDraft {
    /// Anything but `native` launches through a URL scheme.
    pub fn build(&self) -> Launch {
        if self.launch_method.trim() == "native" {
            Launch::Native {
                native_command: self.native_command.trim().to_string(),
                native_args: split_args(&self.native_args),
            }
        } else {
            Launch::Scheme {
                scheme_or_command: self.scheme_or_command.trim().to_string(),
            }
        }
    }
}

pub fn tile_size(px: u16) -> AppResult<TileSize> {
    TileSize::new(px).ok_or_else(|| {
        AppError::Validation(format!("tile size must be one of {ALLOWED_TILE_SIZES:?}, got {px}"))
    })
}

pub fn group_span(span: u8) -> AppResult<GroupSpan> {
    GroupSpan::new(span).ok_or_else(|| {
        AppError::Validation(format!(
            "span must be between {MIN_GROUP_SPAN} and {MAX_GROUP_SPAN}, got {span}"
        ))
    })
}
