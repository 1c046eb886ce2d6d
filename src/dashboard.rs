use crate::config::DashboardConfig;
use crate::db::SqliteStore;
use crate::errors::AppResult;
use crate::i18n::t;
use crate::models::{Language, StateDocument};
use crate::native::{NativeBridge, ProcessTransport, RepairLogEntry};
use crate::persistence::{Persister, SharedDocument};
use crate::render::{render, widget_polls, DashboardView, RenderContext, Viewport};
use crate::state;
use crate::store::KeyValueStore;
use crate::sync::{SyncBus, SyncListener, SyncMessage};
use crate::widgets::alerts::UptimeAlertTracker;
use crate::widgets::cache::PruneOptions;
use crate::widgets::http::{BoxFuture, HttpClient, HttpImageProbe, ImageProbe, ReqwestClient};
use crate::widgets::poller::WidgetPoller;
use crate::widgets::{Clock, WidgetDisplay, WidgetEvent, WidgetPipeline};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const PRUNE_EVERY_MS: i64 = 30 * 60 * 1000;
const PRUNE_JITTER_MS: i64 = 5 * 60 * 1000;

/// A yes/no question put to the user before a destructive command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub title: String,
    pub body: String,
    pub confirm_text: String,
    pub danger: bool,
}

impl ConfirmPrompt {
    pub fn danger(language: Language, body: String, confirm_phrase: &str) -> Self {
        Self {
            title: t(language, "Confirm Action"),
            body,
            confirm_text: t(language, confirm_phrase),
            danger: true,
        }
    }
}

pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: ConfirmPrompt) -> BoxFuture<'_, bool>;
}

/// Receives every freshly built view. The view replaces whatever was shown.
pub trait RenderSink: Send + Sync {
    fn present(&self, view: &DashboardView);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Debounced,
    Immediate,
}

pub struct DashboardDeps {
    pub store: Arc<dyn KeyValueStore>,
    pub http: Arc<dyn HttpClient>,
    pub probe: Arc<dyn ImageProbe>,
    pub confirmer: Arc<dyn Confirmer>,
    pub sink: Arc<dyn RenderSink>,
    pub bus: SyncBus,
    pub clock: Clock,
    pub debounce: Duration,
    pub native: Option<NativeBridge>,
}

impl DashboardDeps {
    /// Production wiring: SQLite store, reqwest fetchers and, when configured,
    /// the native helper.
    pub fn from_config(
        config: &DashboardConfig,
        confirmer: Arc<dyn Confirmer>,
        sink: Arc<dyn RenderSink>,
        bus: SyncBus,
    ) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = SqliteStore::new(&config.database_path())?;
        let native = config
            .native_host_path
            .as_ref()
            .map(|path| NativeBridge::new(ProcessTransport::new(path, config.repair_timeout())));
        Ok(Self {
            store: Arc::new(store),
            http: Arc::new(ReqwestClient::new(config.http_timeout())?),
            probe: Arc::new(HttpImageProbe::new(config.image_probe_timeout())?),
            confirmer,
            sink,
            bus,
            clock: Clock::system(),
            debounce: config.debounce(),
            native,
        })
    }
}

/// Per-surface state that is never persisted.
#[derive(Debug, Default)]
pub(crate) struct SurfaceState {
    pub(crate) edit_groups: HashSet<String>,
    pub(crate) viewport: Viewport,
    pub(crate) displays: HashMap<String, WidgetDisplay>,
    pub(crate) repair_log: Vec<RepairLogEntry>,
    next_prune_ms: i64,
}

/// The primary surface: owns the document, its persistence, widget polling
/// and the subscription to other surfaces' updates. Commands live in
/// `crate::commands` as further `impl Dashboard` blocks.
pub struct Dashboard {
    pub(crate) surface: Uuid,
    pub(crate) document: SharedDocument,
    pub(crate) persister: Persister,
    pub(crate) pipeline: Arc<WidgetPipeline>,
    pub(crate) poller: WidgetPoller,
    pub(crate) confirmer: Arc<dyn Confirmer>,
    sink: Arc<dyn RenderSink>,
    pub(crate) probe: Arc<dyn ImageProbe>,
    pub(crate) bus: SyncBus,
    pub(crate) native: Option<NativeBridge>,
    ui: StdMutex<SurfaceState>,
    alerts: StdMutex<UptimeAlertTracker>,
    cancel: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

fn with_lock<T, R>(mutex: &StdMutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
    match mutex.lock() {
        Ok(mut guard) => f(&mut *guard),
        Err(poisoned) => f(&mut *poisoned.into_inner()),
    }
}

impl Dashboard {
    /// Loads the stored document, starts widget fetching and listens for
    /// updates from other surfaces. Must be called inside a tokio runtime.
    pub async fn open(deps: DashboardDeps) -> Arc<Self> {
        let surface = Uuid::new_v4();
        let document: SharedDocument = Arc::new(tokio::sync::Mutex::new(state::load(deps.store.as_ref())));
        let persister = Persister::new(deps.store.clone(), document.clone(), deps.debounce);
        let cancel = CancellationToken::new();
        let pipeline = Arc::new(WidgetPipeline::new(
            deps.http.clone(),
            deps.store.clone(),
            deps.clock,
            cancel.child_token(),
        ));
        pipeline.start();
        let (events, receiver) = mpsc::unbounded_channel();
        let poller = WidgetPoller::new(pipeline.clone(), events, cancel.child_token());
        let listener = deps.bus.subscribe(surface);

        let this = Arc::new(Self {
            surface,
            document,
            persister,
            pipeline,
            poller,
            confirmer: deps.confirmer,
            sink: deps.sink,
            probe: deps.probe,
            bus: deps.bus,
            native: deps.native,
            ui: StdMutex::new(SurfaceState::default()),
            alerts: StdMutex::new(UptimeAlertTracker::new()),
            cancel,
            tasks: StdMutex::new(Vec::new()),
        });
        let event_task = spawn_widget_events(Arc::downgrade(&this), receiver, this.cancel.clone());
        let sync_task = spawn_sync_listener(Arc::downgrade(&this), listener, this.cancel.clone());
        with_lock(&this.tasks, |tasks| tasks.extend([event_task, sync_task]));
        tracing::info!(surface = %surface, "dashboard opened");

        this.render().await;
        this
    }

    pub fn surface_id(&self) -> Uuid {
        self.surface
    }

    pub async fn snapshot(&self) -> StateDocument {
        self.document.lock().await.clone()
    }

    pub(crate) fn with_ui<R>(&self, f: impl FnOnce(&mut SurfaceState) -> R) -> R {
        with_lock(&self.ui, f)
    }

    pub async fn render(&self) -> DashboardView {
        let doc = self.document.lock().await;
        self.render_locked(&doc)
    }

    /// Rebuilds the view from scratch and points widget polling at the
    /// widgets of the selected page.
    pub(crate) fn render_locked(&self, doc: &StateDocument) -> DashboardView {
        let wanted = doc.selected_page().map(widget_polls).unwrap_or_default();
        let polled: HashSet<String> = wanted.iter().map(|(id, _)| id.clone()).collect();
        self.poller.sync(wanted);
        self.prune_caches_if_due();

        let view = self.with_ui(|ui| {
            ui.displays.retain(|id, _| polled.contains(id));
            let ctx = RenderContext {
                language: doc.settings.interface_language,
                edit_groups: &ui.edit_groups,
                displays: &ui.displays,
            };
            render(doc, &ctx, ui.viewport)
        });
        self.sink.present(&view);
        view
    }

    fn prune_caches_if_due(&self) {
        let now = self.pipeline.clock().now_ms();
        let due = self.with_ui(|ui| {
            if now < ui.next_prune_ms {
                return false;
            }
            let jitter = rand::rng().random_range(0..PRUNE_JITTER_MS);
            ui.next_prune_ms = now + PRUNE_EVERY_MS + jitter;
            true
        });
        if due {
            self.pipeline.prune(PruneOptions::default());
        }
    }

    /// Re-renders under the held lock, then persists. An immediate write waits
    /// for the store after the lock is released.
    pub(crate) async fn commit(&self, doc: MutexGuard<'_, StateDocument>, durability: Durability) -> DashboardView {
        let view = self.render_locked(&doc);
        match durability {
            Durability::Debounced => {
                self.persister.schedule_persist();
                drop(doc);
            }
            Durability::Immediate => {
                drop(doc);
                self.persister.persist_now().await;
            }
        }
        view
    }

    /// Asks the user; a closed dialog counts as "no".
    pub(crate) async fn confirm(&self, prompt: ConfirmPrompt) -> bool {
        self.confirmer.confirm(prompt).await
    }

    pub(crate) async fn language(&self) -> Language {
        self.document.lock().await.settings.interface_language
    }

    /// Replaces the in-memory document with what the store holds now.
    pub async fn reload(&self) -> DashboardView {
        let mut doc = self.document.lock().await;
        *doc = state::load(self.persister.store().as_ref());
        tracing::debug!(pages = doc.pages.len(), "dashboard reloaded from store");
        self.render_locked(&doc)
    }

    pub async fn set_viewport(&self, viewport: Viewport) -> DashboardView {
        self.with_ui(|ui| ui.viewport = viewport);
        self.render().await
    }

    /// Tells other surfaces that the stored document changed.
    pub(crate) fn broadcast(&self) -> usize {
        self.bus.publish(SyncMessage::state_updated(self.surface))
    }

    async fn apply_widget_event(&self, event: WidgetEvent) {
        let mut doc = self.document.lock().await;
        if let Some(monitor) = &event.monitor {
            let now = self.pipeline.clock().now_ms();
            let logged = with_lock(&self.alerts, |tracker| tracker.observe(monitor, &mut doc.settings, now));
            if logged.is_some() {
                self.persister.schedule_persist();
            }
        }
        self.with_ui(|ui| ui.displays.insert(event.widget_id, event.display));
        self.render_locked(&doc);
    }

    /// Flushes a pending write and stops every background task.
    pub async fn shutdown(&self) {
        if self.persister.has_pending() {
            self.persister.persist_now().await;
        }
        self.cancel.cancel();
        self.poller.shutdown();
        with_lock(&self.tasks, |tasks| {
            for task in tasks.drain(..) {
                task.abort();
            }
        });
        tracing::info!(surface = %self.surface, "dashboard closed");
    }
}

fn spawn_widget_events(
    dashboard: Weak<Dashboard>,
    mut receiver: mpsc::UnboundedReceiver<WidgetEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = receiver.recv() => event,
            };
            let (Some(event), Some(dashboard)) = (event, dashboard.upgrade()) else {
                return;
            };
            dashboard.apply_widget_event(event).await;
        }
    })
}

fn spawn_sync_listener(dashboard: Weak<Dashboard>, mut listener: SyncListener, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let update = tokio::select! {
                _ = cancel.cancelled() => return,
                update = listener.next_update() => update,
            };
            let (Some(update), Some(dashboard)) = (update, dashboard.upgrade()) else {
                return;
            };
            tracing::debug!(origin = %update.origin, "state updated elsewhere");
            dashboard.reload().await;
        }
    })
}
