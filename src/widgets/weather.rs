use super::cache::TtlCache;
use super::http::{HttpClient, HttpRequest};
use crate::models::{Units, WeatherOptions};
use crate::urls::encode_component;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Duration;

pub const WEATHER_TTL: Duration = Duration::from_secs(10 * 60);
pub const WEATHER_RETRY: Duration = Duration::from_secs(60);

/// Resolved query for one weather widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherQuery {
    pub city: String,
    pub coordinates: Option<(f64, f64)>,
    pub units: Units,
    pub hide_details: bool,
}

impl WeatherQuery {
    /// `None` until the widget has a city or both coordinates.
    pub fn from_options(options: &WeatherOptions) -> Option<Self> {
        let city = options.city.trim().to_string();
        let coordinates = options.coordinates();
        if city.is_empty() && coordinates.is_none() {
            return None;
        }
        Some(Self {
            city,
            coordinates,
            units: options.units,
            hide_details: options.hide_details,
        })
    }

    pub fn cache_key(&self) -> String {
        let place = match self.coordinates {
            Some((lat, lon)) => format!("lat:{lat}|lon:{lon}"),
            None => self.city.to_lowercase(),
        };
        format!("{place}|{}|{}", self.units.as_str(), u8::from(self.hide_details))
    }

    /// The city text when given, otherwise the coordinates.
    pub fn location_label(&self) -> String {
        match (self.city.is_empty(), self.coordinates) {
            (false, _) => self.city.clone(),
            (true, Some((lat, lon))) => format!("{lat:.2},{lon:.2}"),
            (true, None) => "—".to_string(),
        }
    }

    fn symbol(&self) -> &'static str {
        match self.units {
            Units::Metric => "°C",
            Units::Imperial => "°F",
        }
    }
}

pub fn geocode_url(city: &str) -> String {
    format!(
        "https://geocoding-api.open-meteo.com/v1/search?count=1&language=en&format=json&name={}",
        encode_component(city)
    )
}

pub fn forecast_url(lat: f64, lon: f64, units: Units) -> String {
    let (temperature_unit, wind_speed_unit) = match units {
        Units::Metric => ("celsius", "ms"),
        Units::Imperial => ("fahrenheit", "mph"),
    };
    format!(
        "https://api.open-meteo.com/v1/forecast?latitude={lat}&longitude={lon}\
         &current=temperature_2m,relative_humidity_2m,apparent_temperature,pressure_msl,weather_code,wind_speed_10m,cloud_cover,visibility\
         &daily=temperature_2m_max,temperature_2m_min&forecast_days=1\
         &temperature_unit={temperature_unit}&wind_speed_unit={wind_speed_unit}&timezone=auto"
    )
}

/// WMO weather interpretation codes to a label and glyph.
pub fn describe_code(code: Option<i64>) -> (&'static str, &'static str) {
    match code {
        Some(0) => ("Clear", "☀️"),
        Some(1) => ("Mainly Clear", "🌤️"),
        Some(2) => ("Partly Cloudy", "⛅"),
        Some(3) => ("Overcast", "☁️"),
        Some(45 | 48) => ("Fog", "🌫️"),
        Some(51 | 53 | 55) => ("Drizzle", "🌦️"),
        Some(61 | 63) => ("Rain", "🌧️"),
        Some(65) => ("Heavy Rain", "🌧️"),
        Some(71 | 73 | 75) => ("Snow", "🌨️"),
        Some(80 | 81) => ("Showers", "🌦️"),
        Some(82) => ("Heavy Showers", "🌧️"),
        Some(95 | 96 | 99) => ("Thunder", "⛈️"),
        _ => ("—", "☁️"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherDetail {
    pub label: String,
    pub value: String,
    pub highlight: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    pub location: String,
    pub temperature: String,
    pub condition: String,
    pub icon: String,
    pub foggy: bool,
    pub collapsed: bool,
    pub left: Vec<WeatherDetail>,
    pub right: Vec<WeatherDetail>,
}

/// Why a weather widget has no report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherFailure {
    NotFound,
    NoData,
    Error,
}

impl WeatherFailure {
    pub fn label(self) -> &'static str {
        match self {
            Self::NotFound => "Not found",
            Self::NoData => "No data",
            Self::Error => "Error",
        }
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|number| number.is_finite())
}

fn plain(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

fn detail(label: &str, value: String) -> WeatherDetail {
    WeatherDetail {
        label: label.to_string(),
        value,
        highlight: false,
    }
}

/// Projects an open-meteo forecast payload.
pub fn report_from(query: &WeatherQuery, data: &Value) -> WeatherReport {
    let current = data.get("current").cloned().unwrap_or(Value::Null);
    let field = |name: &str| number(current.get(name));
    let symbol = query.symbol();
    let code = current.get("weather_code").and_then(Value::as_i64);
    let (condition, icon) = describe_code(code);
    let foggy = matches!(code, Some(45 | 48));
    let temperature = match field("temperature_2m") {
        Some(temperature) => format!("{}{symbol}", temperature.round() as i64),
        None => format!("--{symbol}"),
    };

    let mut report = WeatherReport {
        location: query.location_label(),
        temperature,
        condition: condition.to_string(),
        icon: icon.to_string(),
        foggy,
        collapsed: query.hide_details,
        left: Vec::new(),
        right: Vec::new(),
    };
    if query.hide_details {
        return report;
    }

    let daily = |name: &str| number(data.get("daily").and_then(|daily| daily.get(name)).and_then(|values| values.get(0)));
    if let Some(min) = daily("temperature_2m_min") {
        report.left.push(detail("Min Temp", format!("{}{symbol}", min.round() as i64)));
    }
    if let Some(max) = daily("temperature_2m_max") {
        report.left.push(detail("Max Temp", format!("{}{symbol}", max.round() as i64)));
    }
    if let Some(feels) = field("apparent_temperature") {
        report.left.push(detail("Feels Like", format!("{}{symbol}", feels.round() as i64)));
    }

    if let Some(pressure) = field("pressure_msl") {
        report.right.push(detail("Pressure", format!("{}hPa", pressure.round() as i64)));
    }
    if let Some(humidity) = field("relative_humidity_2m") {
        report.right.push(detail("Humidity", format!("{}%", plain(humidity))));
    }
    if let Some(visibility) = field("visibility") {
        report.right.push(WeatherDetail {
            label: "Visibility".to_string(),
            value: format!("{}km", (visibility / 1000.0).round() as i64),
            highlight: foggy && visibility < 1000.0,
        });
    }
    if let Some(wind) = field("wind_speed_10m") {
        let unit = match query.units {
            Units::Metric => "m/s",
            Units::Imperial => "mph",
        };
        report.right.push(detail("Wind", format!("{}{unit}", plain(wind))));
    }
    if let Some(clouds) = field("cloud_cover") {
        report.right.push(detail("Clouds", format!("{}%", plain(clouds))));
    }
    report
}

/// Geocodes (cached per city) when needed, then fetches the forecast.
pub async fn fetch_weather(
    http: &dyn HttpClient,
    geocode_cache: &TtlCache<(f64, f64)>,
    query: &WeatherQuery,
) -> Result<Value, WeatherFailure> {
    let (lat, lon) = match query.coordinates {
        Some(coordinates) => coordinates,
        None => resolve_city(http, geocode_cache, &query.city).await?,
    };

    let Some(response) = http.execute(HttpRequest::get(forecast_url(lat, lon, query.units))).await else {
        tracing::warn!(city = %query.city, "weather request failed");
        return Err(WeatherFailure::Error);
    };
    if response.status == 404 {
        return Err(WeatherFailure::NotFound);
    }
    if !response.is_success() {
        tracing::warn!(status = response.status, "weather request rejected");
        return Err(WeatherFailure::Error);
    }
    let data = response.json().ok_or(WeatherFailure::Error)?;
    if data.get("current").map_or(true, Value::is_null) {
        return Err(WeatherFailure::NoData);
    }
    Ok(data)
}

async fn resolve_city(
    http: &dyn HttpClient,
    geocode_cache: &TtlCache<(f64, f64)>,
    city: &str,
) -> Result<(f64, f64), WeatherFailure> {
    let key = city.to_lowercase();
    if let Some(found) = geocode_cache.get_any(&key) {
        return Ok(found);
    }
    let Some(response) = http.execute(HttpRequest::get(geocode_url(city))).await else {
        tracing::warn!(city = %city, "geocoding request failed");
        return Err(WeatherFailure::Error);
    };
    if !response.is_success() {
        return Err(WeatherFailure::NotFound);
    }
    let first = response
        .json()
        .and_then(|data| data.get("results").and_then(|results| results.get(0)).cloned())
        .ok_or(WeatherFailure::NotFound)?;
    let lat = number(first.get("latitude")).ok_or(WeatherFailure::NotFound)?;
    let lon = number(first.get("longitude")).ok_or(WeatherFailure::NotFound)?;
    geocode_cache.insert(key, (lat, lon));
    Ok((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::http::testing::FakeHttp;
    use serde_json::json;

    fn query(city: &str, units: Units, hide_details: bool) -> WeatherQuery {
        WeatherQuery {
            city: city.to_string(),
            coordinates: None,
            units,
            hide_details,
        }
    }

    fn forecast() -> Value {
        json!({
            "current": {
                "temperature_2m": 12.6, "relative_humidity_2m": 81, "apparent_temperature": 10.2,
                "pressure_msl": 1013.4, "weather_code": 45, "wind_speed_10m": 3.4,
                "cloud_cover": 100, "visibility": 800.0
            },
            "daily": {"temperature_2m_min": [7.9], "temperature_2m_max": [14.2]}
        })
    }

    #[test]
    fn cache_key_prefers_coordinates() {
        let mut by_city = query("Paris", Units::Metric, false);
        assert_eq!(by_city.cache_key(), "paris|metric|0");
        by_city.coordinates = Some((48.85, 2.35));
        assert_eq!(by_city.cache_key(), "lat:48.85|lon:2.35|metric|0");
    }

    #[test]
    fn needs_city_or_both_coordinates() {
        let options = WeatherOptions {
            city: "  ".to_string(),
            lat: Some(1.0),
            lon: None,
            units: Units::Metric,
            hide_details: false,
        };
        assert!(WeatherQuery::from_options(&options).is_none());
        let located = WeatherOptions { lon: Some(2.0), ..options };
        assert_eq!(WeatherQuery::from_options(&located).expect("query").location_label(), "1.00,2.00");
    }

    #[test]
    fn report_includes_unit_aware_details() {
        let report = report_from(&query("Paris", Units::Metric, false), &forecast());
        assert_eq!(report.temperature, "13°C");
        assert_eq!(report.condition, "Fog");
        assert!(report.foggy);
        let left: Vec<&str> = report.left.iter().map(|detail| detail.value.as_str()).collect();
        assert_eq!(left, vec!["8°C", "14°C", "10°C"]);
        let visibility = report
            .right
            .iter()
            .find(|detail| detail.label == "Visibility")
            .expect("visibility");
        assert_eq!(visibility.value, "1km");
        assert!(visibility.highlight);
        assert!(report.right.iter().any(|detail| detail.value == "3.4m/s"));
    }

    #[test]
    fn collapsed_report_has_no_details() {
        let report = report_from(&query("Austin", Units::Imperial, true), &json!({"current": {"weather_code": 7}}));
        assert_eq!(report.temperature, "--°F");
        assert_eq!(report.condition, "—");
        assert!(report.collapsed);
        assert!(report.left.is_empty() && report.right.is_empty());
    }

    #[tokio::test]
    async fn geocodes_once_per_city() {
        let http = FakeHttp::new();
        http.route(
            "https://geocoding-api.open-meteo.com/",
            200,
            "application/json",
            r#"{"results":[{"latitude":48.85,"longitude":2.35}]}"#,
        );
        http.route("https://api.open-meteo.com/", 200, "application/json", &forecast().to_string());
        let geocode = TtlCache::new("geocode");
        let query = query("Paris", Units::Metric, false);

        assert!(fetch_weather(&http, &geocode, &query).await.is_ok());
        assert!(fetch_weather(&http, &geocode, &query).await.is_ok());
        let urls = http.urls();
        assert_eq!(urls.iter().filter(|url| url.contains("geocoding")).count(), 1);
        assert!(urls[1].contains("latitude=48.85&longitude=2.35"));
        assert!(urls[1].contains("temperature_unit=celsius"));
    }

    #[tokio::test]
    async fn unknown_city_is_not_found() {
        let http = FakeHttp::new();
        http.route("https://geocoding-api.open-meteo.com/", 200, "application/json", r#"{"results":[]}"#);
        let result = fetch_weather(&http, &TtlCache::new("geocode"), &query("Nowhere", Units::Metric, false)).await;
        assert_eq!(result, Err(WeatherFailure::NotFound));
    }
}
