use super::http::{HttpClient, HttpRequest};
use crate::models::CovidOptions;
use crate::urls::encode_component;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Duration;

pub const COVID_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovidQuery {
    pub country: String,
    pub refresh: Duration,
}

impl CovidQuery {
    pub fn from_options(options: &CovidOptions) -> Self {
        Self {
            country: options.country.trim().to_string(),
            refresh: Duration::from_secs(u64::from(options.refresh_mins.max(1)) * 60),
        }
    }

    pub fn cache_key(&self) -> String {
        if self.country.is_empty() {
            "global".to_string()
        } else {
            format!("c:{}", self.country.to_lowercase())
        }
    }

    pub fn url(&self) -> String {
        if self.country.is_empty() {
            "https://disease.sh/v3/covid-19/all".to_string()
        } else {
            format!(
                "https://disease.sh/v3/covid-19/countries/{}?strict=true",
                encode_component(&self.country)
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CovidStats {
    pub label: String,
    pub cases: String,
    pub active: String,
    pub recovered: String,
    pub deaths: String,
    pub updated_at: Option<i64>,
}

/// Groups digits in threes, `--` when the figure is missing.
pub fn format_count(value: Option<&Value>) -> String {
    let Some(number) = value.and_then(Value::as_f64).filter(|number| number.is_finite()) else {
        return "--".to_string();
    };
    let rounded = number.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if rounded < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

pub fn stats_from(query: &CovidQuery, data: &Value) -> CovidStats {
    CovidStats {
        label: if query.country.is_empty() {
            "Global".to_string()
        } else {
            query.country.clone()
        },
        cases: format_count(data.get("cases")),
        active: format_count(data.get("active")),
        recovered: format_count(data.get("recovered")),
        deaths: format_count(data.get("deaths")),
        updated_at: data.get("updated").and_then(Value::as_i64),
    }
}

pub async fn fetch_stats(http: &dyn HttpClient, query: &CovidQuery) -> Option<Value> {
    let response = http.execute(HttpRequest::get(query.url())).await?;
    if !response.is_success() {
        tracing::warn!(status = response.status, country = %query.country, "covid stats request rejected");
        return None;
    }
    response.json().filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::http::testing::FakeHttp;
    use serde_json::json;

    #[test]
    fn counts_are_grouped() {
        assert_eq!(format_count(Some(&json!(704_753_890))), "704,753,890");
        assert_eq!(format_count(Some(&json!(999))), "999");
        assert_eq!(format_count(None), "--");
    }

    #[test]
    fn country_selects_endpoint_and_key() {
        let global = CovidQuery::from_options(&CovidOptions {
            country: " ".to_string(),
            refresh_mins: 60,
        });
        assert_eq!(global.cache_key(), "global");
        assert!(global.url().ends_with("/all"));

        let brazil = CovidQuery::from_options(&CovidOptions {
            country: "Brazil".to_string(),
            refresh_mins: 60,
        });
        assert_eq!(brazil.cache_key(), "c:brazil");
        assert_eq!(brazil.url(), "https://disease.sh/v3/covid-19/countries/Brazil?strict=true");
    }

    #[tokio::test]
    async fn fetch_projects_stats() {
        let http = FakeHttp::new();
        http.route(
            "https://disease.sh/",
            200,
            "application/json",
            r#"{"cases": 1234567, "active": 10, "recovered": 1000000, "deaths": 5000, "updated": 1700000000000}"#,
        );
        let query = CovidQuery::from_options(&CovidOptions {
            country: String::new(),
            refresh_mins: 60,
        });
        let data = fetch_stats(&http, &query).await.expect("stats");
        let stats = stats_from(&query, &data);
        assert_eq!(stats.label, "Global");
        assert_eq!(stats.cases, "1,234,567");
        assert_eq!(stats.updated_at, Some(1_700_000_000_000));
    }
}
