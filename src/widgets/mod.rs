pub mod alerts;
pub mod cache;
pub mod covid;
pub mod http;
pub mod poller;
pub mod rate_limiter;
pub mod rss;
pub mod uptime;
pub mod weather;

use crate::models::{Widget, WidgetKind};
use crate::store::KeyValueStore;
use cache::{PruneOptions, TtlCache};
use covid::{CovidQuery, CovidStats, COVID_TTL};
use http::HttpClient;
use rand::Rng;
use rate_limiter::UptimeRequestManager;
use rss::{Feed, RssQuery, RssView, RSS_TTL};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uptime::{Monitor, MonitorView};
use weather::{WeatherQuery, WeatherReport, WEATHER_RETRY, WEATHER_TTL};

pub const UPTIME_POLL: Duration = Duration::from_secs(60);

/// Wall-clock milliseconds derived from the tokio clock, so paused-time tests
/// move it forward together with timers.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_ms: i64,
    origin: Instant,
}

impl Clock {
    pub fn system() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn starting_at(base_ms: i64) -> Self {
        Self {
            base_ms,
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.base_ms + self.origin.elapsed().as_millis() as i64
    }
}

/// What a widget card currently shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum WidgetDisplay {
    Loading,
    NeedsConfig,
    RateLimited,
    Empty,
    Failed { reason: String },
    Uptime(MonitorView),
    Weather(WeatherReport),
    Rss(RssView),
    Covid(CovidStats),
}

/// A fetch result delivered to the surface that owns the widget.
#[derive(Debug, Clone)]
pub struct WidgetEvent {
    pub widget_id: String,
    pub display: WidgetDisplay,
    pub monitor: Option<Monitor>,
}

/// The resolved parameters a widget polls with. Two renders producing the
/// same spec for a widget id keep the running poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollSpec {
    Uptime { api_key: String, monitor_index: usize },
    Weather(WeatherQuery),
    Rss(RssQuery),
    Covid(CovidQuery),
}

impl PollSpec {
    /// `None` for widgets that never fetch (iframe) or are not configured yet.
    /// `uptime_position` is the widget's index among uptime widgets of its
    /// group, used when no monitor index was chosen.
    pub fn for_widget(widget: &Widget, uptime_position: usize) -> Option<Self> {
        match &widget.kind {
            WidgetKind::UptimeRobot(options) => {
                let api_key = options.api_key.trim();
                (!api_key.is_empty()).then(|| Self::Uptime {
                    api_key: api_key.to_string(),
                    monitor_index: options.monitor_index.map_or(uptime_position, |index| index as usize),
                })
            }
            WidgetKind::Weather(options) => WeatherQuery::from_options(options).map(Self::Weather),
            WidgetKind::Rss(options) => RssQuery::from_options(options).map(Self::Rss),
            WidgetKind::Covid(options) => Some(Self::Covid(CovidQuery::from_options(options))),
            WidgetKind::Iframe(_) => None,
        }
    }
}

/// Display before the first fetch lands.
pub fn initial_display(widget: &Widget, uptime_position: usize) -> Option<WidgetDisplay> {
    match (&widget.kind, PollSpec::for_widget(widget, uptime_position)) {
        (WidgetKind::Iframe(_), _) => None,
        (_, Some(_)) => Some(WidgetDisplay::Loading),
        (_, None) => Some(WidgetDisplay::NeedsConfig),
    }
}

#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub display: WidgetDisplay,
    pub monitor: Option<Monitor>,
    pub next: Duration,
}

fn jitter(max_ms: u64) -> Duration {
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

/// Fetchers and their named caches, shared by every widget on a surface.
pub struct WidgetPipeline {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn KeyValueStore>,
    clock: Clock,
    uptime: UptimeRequestManager,
    weather: TtlCache<Value>,
    geocode: TtlCache<(f64, f64)>,
    rss: TtlCache<Feed>,
    covid: TtlCache<Value>,
}

impl WidgetPipeline {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn KeyValueStore>,
        clock: Clock,
        cancel: CancellationToken,
    ) -> Self {
        let uptime = UptimeRequestManager::new(http.clone(), store.clone(), clock, cancel);
        Self {
            http,
            store,
            clock,
            uptime,
            weather: TtlCache::new("weather"),
            geocode: TtlCache::new("geocode"),
            rss: TtlCache::new("rss"),
            covid: TtlCache::new("covid"),
        }
    }

    /// Starts the shared uptime dispatcher. Requires a tokio runtime.
    pub fn start(&self) {
        self.uptime.start();
    }

    pub fn uptime(&self) -> &UptimeRequestManager {
        &self.uptime
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// One fetch-and-project cycle. `force` skips fresh cache entries.
    pub async fn poll(&self, spec: &PollSpec, force: bool) -> PollOutcome {
        match spec {
            PollSpec::Uptime { api_key, monitor_index } => {
                let response = self.uptime.get(api_key).await;
                let (display, monitor) = uptime::display_for(&response, *monitor_index);
                PollOutcome {
                    display,
                    monitor,
                    next: UPTIME_POLL + jitter(4_000),
                }
            }
            PollSpec::Weather(query) => self.poll_weather(query, force).await,
            PollSpec::Rss(query) => self.poll_rss(query, force).await,
            PollSpec::Covid(query) => self.poll_covid(query, force).await,
        }
    }

    async fn poll_weather(&self, query: &WeatherQuery, force: bool) -> PollOutcome {
        let key = query.cache_key();
        let cached = if force { None } else { self.weather.get_fresh(&key, WEATHER_TTL) };
        let fetched = match cached {
            Some(data) => Ok(data),
            None => weather::fetch_weather(self.http.as_ref(), &self.geocode, query)
                .await
                .inspect(|data| self.weather.insert(key, data.clone())),
        };
        match fetched {
            Ok(data) => PollOutcome {
                display: WidgetDisplay::Weather(weather::report_from(query, &data)),
                monitor: None,
                next: WEATHER_TTL + jitter(60_000),
            },
            Err(failure) => PollOutcome {
                display: WidgetDisplay::Failed {
                    reason: failure.label().to_string(),
                },
                monitor: None,
                next: WEATHER_RETRY,
            },
        }
    }

    async fn poll_rss(&self, query: &RssQuery, force: bool) -> PollOutcome {
        let key = query.cache_key();
        // a refresh shorter than the cache TTL must still refetch every cycle
        let freshness = query.refresh.min(RSS_TTL);
        let cached = if force { None } else { self.rss.get_fresh(&key, freshness) };
        let feed = match cached {
            Some(feed) => Some(feed),
            None => match rss::fetch_feed(self.http.as_ref(), self.store.as_ref(), query, self.clock.now_ms()).await {
                Some(feed) => {
                    self.rss.insert(key, feed.clone());
                    Some(feed)
                }
                None => self.rss.get_any(&key),
            },
        };
        let display = match feed {
            Some(feed) => {
                let seen = rss::seen_ids(self.store.as_ref(), &query.url);
                WidgetDisplay::Rss(rss::view(query, &feed, &seen))
            }
            None => WidgetDisplay::Failed {
                reason: "Feed unavailable".to_string(),
            },
        };
        PollOutcome {
            display,
            monitor: None,
            next: query.refresh,
        }
    }

    async fn poll_covid(&self, query: &CovidQuery, force: bool) -> PollOutcome {
        let key = query.cache_key();
        let cached = if force { None } else { self.covid.get_fresh(&key, COVID_TTL) };
        let data = match cached {
            Some(data) => Some(data),
            None => match covid::fetch_stats(self.http.as_ref(), query).await {
                Some(data) => {
                    self.covid.insert(key, data.clone());
                    Some(data)
                }
                None => self.covid.get_any(&key),
            },
        };
        let display = match data {
            Some(data) => WidgetDisplay::Covid(covid::stats_from(query, &data)),
            None => WidgetDisplay::Failed {
                reason: "Failed".to_string(),
            },
        };
        PollOutcome {
            display,
            monitor: None,
            next: query.refresh,
        }
    }

    /// Marks feed items as read so they stop being highlighted.
    pub fn mark_read(&self, url: &str, ids: &[String]) -> bool {
        rss::mark_read(self.store.as_ref(), url, ids)
    }

    /// Drops expired and excess entries from every named cache.
    pub fn prune(&self, options: PruneOptions) -> usize {
        let removed = self.weather.prune(options)
            + self.geocode.prune(options)
            + self.rss.prune(options)
            + self.covid.prune(options)
            + self.uptime.cache().prune(options);
        if removed > 0 {
            tracing::debug!(removed, "pruned widget caches");
        }
        removed
    }
}
