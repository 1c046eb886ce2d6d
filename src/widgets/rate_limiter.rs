use super::cache::TtlCache;
use super::http::HttpClient;
use super::uptime::{fetch_monitors, FetchOutcome, UptimeResponse};
use super::Clock;
use crate::store::{get_or_none, set_best_effort, KeyValueStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub const LIMITER_STATE_KEY: &str = "__ur_rl_state_v1";
pub const MAX_REQUESTS_PER_MINUTE: u32 = 10;
pub const TOKEN_INTERVAL_MS: i64 = 6_000;
pub const MIN_INTERVAL_MS: i64 = 15_000;
pub const INITIAL_BACKOFF_MS: u64 = 5_000;
pub const MAX_BACKOFF_MS: u64 = 300_000;
pub const STATE_MAX_AGE_MS: i64 = 10 * 60 * 1000;
pub const UPTIME_TTL: Duration = Duration::from_secs(60);

const SAFETY_TICK: Duration = Duration::from_secs(1);
const MIN_RECHECK_MS: i64 = 25;
const PERSIST_COALESCE: Duration = Duration::from_millis(300);

/// Token bucket plus per-key backoff, persisted so reloads keep the allowance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimiterState {
    pub tokens: u32,
    pub last_refill: i64,
    pub next_allowed: HashMap<String, i64>,
    pub backoff: HashMap<String, u64>,
}

impl LimiterState {
    pub fn full(now_ms: i64) -> Self {
        Self {
            tokens: MAX_REQUESTS_PER_MINUTE,
            last_refill: now_ms,
            ..Self::default()
        }
    }

    /// Restores persisted state, crediting tokens earned while nothing ran.
    /// Missing, malformed or stale state starts with a full bucket.
    pub fn restore(raw: Option<Value>, now_ms: i64) -> Self {
        let Some(parsed) = raw.and_then(|raw| serde_json::from_value::<Self>(raw).ok()) else {
            return Self::full(now_ms);
        };
        if parsed.last_refill <= 0 || now_ms - parsed.last_refill >= STATE_MAX_AGE_MS {
            return Self::full(now_ms);
        }
        let mut state = parsed;
        let earned = ((now_ms - state.last_refill).max(0) / TOKEN_INTERVAL_MS) as u32;
        state.tokens = (state.tokens.saturating_add(earned)).min(MAX_REQUESTS_PER_MINUTE);
        state.last_refill += i64::from(earned) * TOKEN_INTERVAL_MS;
        state
    }

    /// Adds one token per elapsed interval. Returns whether anything changed.
    pub fn refill(&mut self, now_ms: i64) -> bool {
        let elapsed = now_ms - self.last_refill;
        if elapsed < TOKEN_INTERVAL_MS {
            return false;
        }
        let add = (elapsed / TOKEN_INTERVAL_MS) as u32;
        self.tokens = self.tokens.saturating_add(add).min(MAX_REQUESTS_PER_MINUTE);
        self.last_refill += i64::from(add) * TOKEN_INTERVAL_MS;
        true
    }

    pub fn wait_for(&self, key: &str, now_ms: i64) -> i64 {
        self.next_allowed
            .get(key)
            .map_or(0, |allowed| (allowed - now_ms).max(0))
    }

    pub fn millis_until_token(&self, now_ms: i64) -> i64 {
        if self.tokens > 0 {
            0
        } else {
            (self.last_refill + TOKEN_INTERVAL_MS - now_ms).max(0)
        }
    }

    pub fn on_rate_limited(&mut self, key: &str, now_ms: i64) {
        let previous = self.backoff.get(key).copied().unwrap_or(0);
        let next = if previous == 0 {
            INITIAL_BACKOFF_MS
        } else {
            previous.saturating_mul(2)
        }
        .min(MAX_BACKOFF_MS);
        self.backoff.insert(key.to_string(), next);
        self.next_allowed.insert(key.to_string(), now_ms + next as i64);
    }

    pub fn on_success(&mut self, key: &str, now_ms: i64) {
        self.backoff.insert(key.to_string(), 0);
        self.next_allowed.insert(key.to_string(), now_ms + MIN_INTERVAL_MS);
    }
}

struct ManagerInner {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn KeyValueStore>,
    clock: Clock,
    cache: TtlCache<Value>,
    state: Mutex<LimiterState>,
    queue: Mutex<VecDeque<String>>,
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<UptimeResponse>>>>,
    notify: Notify,
    cancel: CancellationToken,
    persist_scheduled: AtomicBool,
    dispatched: AtomicUsize,
}

/// Serializes all uptime API traffic through one queue so that widgets sharing
/// a key never exceed the bucket or ignore a backoff.
#[derive(Clone)]
pub struct UptimeRequestManager {
    inner: Arc<ManagerInner>,
}

impl UptimeRequestManager {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn KeyValueStore>,
        clock: Clock,
        cancel: CancellationToken,
    ) -> Self {
        let state = LimiterState::restore(get_or_none(store.as_ref(), LIMITER_STATE_KEY), clock.now_ms());
        Self {
            inner: Arc::new(ManagerInner {
                http,
                store,
                clock,
                cache: TtlCache::new("uptime"),
                state: Mutex::new(state),
                queue: Mutex::new(VecDeque::new()),
                waiters: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                cancel,
                persist_scheduled: AtomicBool::new(false),
                dispatched: AtomicUsize::new(0),
            }),
        }
    }

    pub fn start(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_loop().await;
        });
    }

    /// Number of upstream dispatches performed so far.
    pub fn dispatch_count(&self) -> usize {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> LimiterState {
        self.inner.state.lock().await.clone()
    }

    pub fn cache(&self) -> &TtlCache<Value> {
        &self.inner.cache
    }

    /// Fresh cache hit, or a place in the queue. Concurrent callers for the
    /// same key share one upstream request.
    pub async fn get(&self, api_key: &str) -> UptimeResponse {
        if let Some(data) = self.inner.cache.get_fresh(api_key, UPTIME_TTL) {
            return UptimeResponse::Data(data);
        }

        let (sender, receiver) = oneshot::channel();
        {
            let mut waiters = self.inner.waiters.lock().await;
            match waiters.get_mut(api_key) {
                Some(pending) => pending.push(sender),
                None => {
                    waiters.insert(api_key.to_string(), vec![sender]);
                    self.inner.queue.lock().await.push_back(api_key.to_string());
                }
            }
        }
        self.inner.notify.notify_one();

        receiver.await.unwrap_or(UptimeResponse::Error)
    }

    async fn run_loop(self) {
        loop {
            let next_check = self.attempt_dispatch().await;
            let sleep_for = next_check.map_or(SAFETY_TICK, |delay| delay.min(SAFETY_TICK));
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        self.persist_state().await;
        tracing::debug!("uptime request manager stopped");
    }

    /// Admits every queued key that has both a token and an expired backoff.
    /// Returns how long to wait before the next admission could succeed.
    async fn attempt_dispatch(&self) -> Option<Duration> {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.lock().await;
        if state.refill(now) {
            self.schedule_persist();
        }

        let mut queue = self.inner.queue.lock().await;
        let mut index = 0;
        while index < queue.len() && state.tokens > 0 {
            if state.wait_for(&queue[index], now) > 0 {
                index += 1;
                continue;
            }
            let Some(api_key) = queue.remove(index) else {
                break;
            };
            state.tokens -= 1;
            self.schedule_persist();
            self.spawn_fetch(api_key);
        }

        if queue.is_empty() {
            return None;
        }
        let soonest = queue
            .iter()
            .map(|key| state.wait_for(key, now))
            .min()
            .unwrap_or(0);
        let wait = soonest.max(state.millis_until_token(now)).max(MIN_RECHECK_MS);
        Some(Duration::from_millis(wait as u64))
    }

    fn spawn_fetch(&self, api_key: String) {
        self.inner.dispatched.fetch_add(1, Ordering::SeqCst);
        let manager = self.clone();
        tokio::spawn(async move {
            let outcome = fetch_monitors(manager.inner.http.as_ref(), &api_key).await;
            manager.complete(api_key, outcome).await;
        });
    }

    async fn complete(&self, api_key: String, outcome: FetchOutcome) {
        let now = self.inner.clock.now_ms();
        let response = match outcome {
            FetchOutcome::RateLimited => {
                self.inner.state.lock().await.on_rate_limited(&api_key, now);
                UptimeResponse::RateLimited
            }
            FetchOutcome::Data(data) => {
                self.inner.cache.insert(api_key.clone(), data.clone());
                self.inner.state.lock().await.on_success(&api_key, now);
                UptimeResponse::Data(data)
            }
            FetchOutcome::Exhausted => self
                .inner
                .cache
                .get_any(&api_key)
                .map(UptimeResponse::Data)
                .unwrap_or(UptimeResponse::Error),
        };
        self.schedule_persist();

        let waiting = self.inner.waiters.lock().await.remove(&api_key).unwrap_or_default();
        for waiter in waiting {
            let _ = waiter.send(response.clone());
        }
        self.inner.notify.notify_one();
    }

    fn schedule_persist(&self) {
        if self.inner.persist_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PERSIST_COALESCE).await;
            manager.inner.persist_scheduled.store(false, Ordering::SeqCst);
            manager.persist_state().await;
        });
    }

    async fn persist_state(&self) {
        let state = self.inner.state.lock().await.clone();
        match serde_json::to_value(&state) {
            Ok(value) => {
                set_best_effort(self.inner.store.as_ref(), LIMITER_STATE_KEY, &value);
            }
            Err(error) => tracing::warn!(error = %error, "failed to serialize limiter state"),
        }
    }
}
