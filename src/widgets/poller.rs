use super::{PollSpec, WidgetEvent, WidgetPipeline};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct PollJob {
    spec: PollSpec,
    token: CancellationToken,
}

/// Counts from one `sync` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub started: usize,
    pub kept: usize,
    pub stopped: usize,
}

/// Owns at most one polling task per widget id. Re-rendering calls `sync`
/// with the current widgets; unchanged widgets keep their task, changed ones
/// get a fresh task and the old one is cancelled before it can fire again.
pub struct WidgetPoller {
    pipeline: Arc<WidgetPipeline>,
    events: mpsc::UnboundedSender<WidgetEvent>,
    jobs: Mutex<HashMap<String, PollJob>>,
    root: CancellationToken,
}

impl WidgetPoller {
    pub fn new(
        pipeline: Arc<WidgetPipeline>,
        events: mpsc::UnboundedSender<WidgetEvent>,
        root: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            events,
            jobs: Mutex::new(HashMap::new()),
            root,
        }
    }

    fn with_jobs<R>(&self, f: impl FnOnce(&mut HashMap<String, PollJob>) -> R) -> R {
        match self.jobs.lock() {
            Ok(mut jobs) => f(&mut *jobs),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    pub fn sync(&self, wanted: Vec<(String, PollSpec)>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut to_start = Vec::new();
        self.with_jobs(|jobs| {
            let wanted_ids: Vec<&str> = wanted.iter().map(|(id, _)| id.as_str()).collect();
            jobs.retain(|id, job| {
                let keep = wanted_ids.contains(&id.as_str());
                if !keep {
                    job.token.cancel();
                    report.stopped += 1;
                }
                keep
            });

            for (widget_id, spec) in &wanted {
                match jobs.get(widget_id) {
                    Some(job) if job.spec == *spec => report.kept += 1,
                    Some(job) => {
                        job.token.cancel();
                        report.stopped += 1;
                        to_start.push((widget_id.clone(), spec.clone()));
                    }
                    None => to_start.push((widget_id.clone(), spec.clone())),
                }
            }
            for (widget_id, spec) in to_start {
                let token = self.spawn(widget_id.clone(), spec.clone(), false);
                jobs.insert(widget_id, PollJob { spec, token });
                report.started += 1;
            }
        });
        tracing::debug!(
            started = report.started,
            kept = report.kept,
            stopped = report.stopped,
            "widget polls synced"
        );
        report
    }

    /// Restarts a widget's poll with a forced fetch. Returns false when the
    /// widget has no running poll.
    pub fn refresh(&self, widget_id: &str) -> bool {
        self.restart(widget_id, true)
    }

    /// Restarts a widget's poll, letting it answer from cache.
    pub fn repoll(&self, widget_id: &str) -> bool {
        self.restart(widget_id, false)
    }

    fn restart(&self, widget_id: &str, force: bool) -> bool {
        self.with_jobs(|jobs| {
            let Some(job) = jobs.get_mut(widget_id) else {
                return false;
            };
            job.token.cancel();
            job.token = self.spawn(widget_id.to_string(), job.spec.clone(), force);
            true
        })
    }

    pub fn active_count(&self) -> usize {
        self.with_jobs(|jobs| jobs.values().filter(|job| !job.token.is_cancelled()).count())
    }

    pub fn is_polling(&self, widget_id: &str) -> bool {
        self.with_jobs(|jobs| jobs.contains_key(widget_id))
    }

    pub fn shutdown(&self) {
        self.with_jobs(|jobs| {
            for job in jobs.values() {
                job.token.cancel();
            }
            jobs.clear();
        });
    }

    fn spawn(&self, widget_id: String, spec: PollSpec, force: bool) -> CancellationToken {
        let token = self.root.child_token();
        let pipeline = self.pipeline.clone();
        let events = self.events.clone();
        let job_token = token.clone();
        tokio::spawn(async move {
            run_job(pipeline, events, widget_id, spec, job_token, force).await;
        });
        token
    }
}

impl Drop for WidgetPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_job(
    pipeline: Arc<WidgetPipeline>,
    events: mpsc::UnboundedSender<WidgetEvent>,
    widget_id: String,
    spec: PollSpec,
    token: CancellationToken,
    mut force: bool,
) {
    loop {
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            outcome = pipeline.poll(&spec, force) => outcome,
        };
        force = false;
        if token.is_cancelled() {
            return;
        }
        let event = WidgetEvent {
            widget_id: widget_id.clone(),
            display: outcome.display,
            monitor: outcome.monitor,
        };
        if events.send(event).is_err() {
            return;
        }
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(outcome.next) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CovidOptions, RssOptions};
    use crate::store::MemoryStore;
    use crate::widgets::covid::CovidQuery;
    use crate::widgets::rss::RssQuery;
    use crate::widgets::http::testing::FakeHttp;
    use crate::widgets::Clock;
    use tokio::time::Duration;

    fn covid(country: &str, refresh_mins: u16) -> PollSpec {
        PollSpec::Covid(CovidQuery::from_options(&CovidOptions {
            country: country.to_string(),
            refresh_mins,
        }))
    }

    const FEED_URL: &str = "https://news.example.com/feed.xml";

    fn rss(refresh_mins: u16) -> PollSpec {
        let query = RssQuery::from_options(&RssOptions {
            url: FEED_URL.to_string(),
            limit: 5,
            compact: false,
            refresh_mins,
            highlight_new: false,
            size: "large".to_string(),
        });
        PollSpec::Rss(query.expect("feed url"))
    }

    fn fixture() -> (Arc<FakeHttp>, WidgetPoller, mpsc::UnboundedReceiver<WidgetEvent>) {
        let http = Arc::new(FakeHttp::new());
        http.route("https://disease.sh/", 200, "application/json", r#"{"cases": 1}"#);
        http.route(
            FEED_URL,
            200,
            "application/rss+xml",
            r#"<rss><channel><title>News</title><item><title>One</title><guid>n1</guid></item></channel></rss>"#,
        );
        let pipeline = Arc::new(WidgetPipeline::new(
            http.clone(),
            Arc::new(MemoryStore::new()),
            Clock::starting_at(0),
            CancellationToken::new(),
        ));
        let (sender, receiver) = mpsc::unbounded_channel();
        let poller = WidgetPoller::new(pipeline, sender, CancellationToken::new());
        (http, poller, receiver)
    }

    #[tokio::test(start_paused = true)]
    async fn rerender_does_not_stack_polls() {
        let (http, poller, mut events) = fixture();
        let wanted = vec![("wdg_a".to_string(), covid("", 5))];

        assert_eq!(poller.sync(wanted.clone()).started, 1);
        for _ in 0..5 {
            let report = poller.sync(wanted.clone());
            assert_eq!((report.started, report.kept), (0, 1));
        }
        assert_eq!(poller.active_count(), 1);

        events.recv().await.expect("first event");
        // cache TTL equals the refresh period, so every cycle refetches once
        tokio::time::sleep(Duration::from_secs(5 * 60 * 3 + 30)).await;
        assert_eq!(http.request_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn short_feed_refresh_refetches_every_cycle() {
        let (http, poller, mut events) = fixture();
        poller.sync(vec![("wdg_feed".to_string(), rss(1))]);
        events.recv().await.expect("first event");
        assert_eq!(http.request_count(), 1);

        tokio::time::sleep(Duration::from_secs(5 * 60 + 30)).await;
        let fetched = http.urls().iter().filter(|url| url.as_str() == FEED_URL).count();
        assert_eq!(fetched, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_spec_supersedes_and_removed_widget_stops() {
        let (_http, poller, mut events) = fixture();
        poller.sync(vec![("wdg_a".to_string(), covid("", 60))]);
        events.recv().await.expect("event");

        let report = poller.sync(vec![
            ("wdg_a".to_string(), covid("Chile", 60)),
            ("wdg_b".to_string(), covid("", 60)),
        ]);
        assert_eq!(report, SyncReport { started: 2, kept: 0, stopped: 1 });
        assert_eq!(poller.active_count(), 2);

        let report = poller.sync(vec![("wdg_b".to_string(), covid("", 60))]);
        assert_eq!(report.stopped, 1);
        assert!(!poller.is_polling("wdg_a"));

        poller.shutdown();
        assert_eq!(poller.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_forces_a_fetch() {
        let (http, poller, mut events) = fixture();
        poller.sync(vec![("wdg_a".to_string(), covid("", 60))]);
        events.recv().await.expect("event");
        assert_eq!(http.request_count(), 1);

        assert!(poller.refresh("wdg_a"));
        events.recv().await.expect("refreshed");
        assert_eq!(http.request_count(), 2);
        assert!(!poller.refresh("missing"));

        assert!(poller.repoll("wdg_a"));
        events.recv().await.expect("repolled");
        assert_eq!(http.request_count(), 2);
    }
}
