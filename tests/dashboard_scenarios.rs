use serde_json::{json, Value};
use stackdash_lib::commands::LinkDraft;
use stackdash_lib::dashboard::{ConfirmPrompt, Confirmer, Dashboard, DashboardDeps, RenderSink};
use stackdash_lib::models::{UptimeRobotOptions, Widget, WidgetKind};
use stackdash_lib::popup::{PageMetadata, Popup};
use stackdash_lib::render::DashboardView;
use stackdash_lib::store::{KeyValueStore, MemoryStore, STATE_KEY};
use stackdash_lib::sync::SyncBus;
use stackdash_lib::widgets::http::{BoxFuture, HttpClient, HttpRequest, HttpResponse, ImageProbe};
use stackdash_lib::widgets::{Clock, WidgetDisplay};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Yes;

impl Confirmer for Yes {
    fn confirm(&self, _prompt: ConfirmPrompt) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }
}

#[derive(Default)]
struct LastView(Mutex<Option<DashboardView>>);

impl RenderSink for LastView {
    fn present(&self, view: &DashboardView) {
        *self.0.lock().expect("view") = Some(view.clone());
    }
}

impl LastView {
    fn get(&self) -> DashboardView {
        self.0.lock().expect("view").clone().expect("a view was presented")
    }
}

/// Answers uptime requests with three healthy monitors; everything else fails.
#[derive(Default)]
struct UptimeOnly {
    requests: Mutex<Vec<String>>,
}

impl HttpClient for UptimeOnly {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, Option<HttpResponse>> {
        self.requests.lock().expect("requests").push(request.url.clone());
        let response = request.url.starts_with("https://api.uptimerobot.com/").then(|| {
            let monitors: Vec<Value> = (1..=3)
                .map(|id| {
                    json!({
                        "id": id,
                        "friendly_name": format!("svc-{id}"),
                        "url": format!("http://10.0.0.{id}"),
                        "status": 2,
                        "custom_uptime_ratio": "99.9",
                        "logs": []
                    })
                })
                .collect();
            HttpResponse {
                status: 200,
                content_type: "application/json".to_string(),
                body: json!({ "stat": "ok", "monitors": monitors }).to_string(),
            }
        });
        Box::pin(async move { response })
    }
}

struct NoImages;

impl ImageProbe for NoImages {
    fn probe(&self, _url: String) -> BoxFuture<'_, bool> {
        Box::pin(async { false })
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    http: Arc<UptimeOnly>,
    sink: Arc<LastView>,
    bus: SyncBus,
    dashboard: Arc<Dashboard>,
}

impl Harness {
    async fn open() -> Self {
        let store = Arc::new(MemoryStore::new());
        let http = Arc::new(UptimeOnly::default());
        let sink = Arc::new(LastView::default());
        let bus = SyncBus::new();
        let dashboard = Dashboard::open(DashboardDeps {
            store: store.clone(),
            http: http.clone(),
            probe: Arc::new(NoImages),
            confirmer: Arc::new(Yes),
            sink: sink.clone(),
            bus: bus.clone(),
            clock: Clock::starting_at(1_700_000_000_000),
            debounce: Duration::from_millis(150),
            native: None,
        })
        .await;
        Self {
            store,
            http,
            sink,
            bus,
            dashboard,
        }
    }

    fn stored(&self) -> Value {
        self.store.get(STATE_KEY).expect("get").expect("stored state")
    }
}

#[tokio::test(start_paused = true)]
async fn work_page_with_router_link_exports_two_pages() {
    let harness = Harness::open().await;
    let page = harness.dashboard.add_page("Work").await.expect("page");
    let group = harness.dashboard.add_group("Tools", false).await.expect("group");
    let draft: LinkDraft = serde_json::from_value(json!({ "title": "Router", "url": "192.168.1.1" })).expect("draft");
    harness.dashboard.add_link(&group, &draft).await.expect("link");

    let stored = harness.stored();
    assert_eq!(stored["selectedPageId"], page.as_str());
    assert_eq!(stored["pages"][1]["groups"][0]["name"], "Tools");
    assert_eq!(stored["pages"][1]["groups"][0]["links"][0]["url"], "https://192.168.1.1/");

    let export = harness.dashboard.export_json().await.expect("export");
    let exported: Value = serde_json::from_str(&export.contents).expect("json");
    assert_eq!(exported["pages"].as_array().map(Vec::len), Some(2));
    assert_eq!(harness.sink.get().pages_bar.pills.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn import_without_ids_generates_them() {
    let harness = Harness::open().await;
    harness
        .dashboard
        .import_text(r#"{ "pages": [{ "name": "X" }] }"#)
        .await
        .expect("import");
    let doc = harness.dashboard.snapshot().await;
    assert_eq!(doc.pages.len(), 1);
    assert!(!doc.pages[0].id.is_empty());
    assert!(doc.pages[0].groups.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deleting_the_only_page_leaves_an_empty_bar() {
    let harness = Harness::open().await;
    let page = harness.dashboard.snapshot().await.pages[0].id.clone();
    assert!(harness.dashboard.delete_page(&page).await.expect("delete"));

    let stored = harness.stored();
    assert_eq!(stored["selectedPageId"], Value::Null);
    assert_eq!(stored["pages"], json!([]));
    let view = harness.sink.get();
    assert!(view.pages_bar.pills.is_empty());
    assert!(view.groups.is_empty());
}

#[tokio::test(start_paused = true)]
async fn legacy_openweather_widget_is_migrated_on_import() {
    let harness = Harness::open().await;
    let legacy = json!({
        "pages": [{
            "id": "page_1",
            "name": "Home",
            "groups": [{
                "id": "grp_1",
                "name": "General",
                "widgets": [{ "id": "wdg_1", "type": "openweather", "options": { "location": "Paris", "apiKey": "x" } }]
            }]
        }]
    });
    harness.dashboard.import_text(&legacy.to_string()).await.expect("import");
    let widget = &harness.stored()["pages"][0]["groups"][0]["widgets"][0];
    assert_eq!(widget["type"], "weather");
    assert_eq!(widget["options"]["city"], "Paris");
    assert!(widget["options"].get("apiKey").is_none());
}

#[tokio::test(start_paused = true)]
async fn rapid_renames_write_once_with_the_last_name() {
    let harness = Harness::open().await;
    let group = harness.dashboard.snapshot().await.pages[0].groups[0].id.clone();
    let before = harness.store.write_count();
    for name in ["A", "AB", "ABC", "ABCD", "Final"] {
        harness.dashboard.rename_group(&group, name).await.expect("rename");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.store.write_count(), before);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.store.write_count(), before + 1);
    assert_eq!(harness.stored()["pages"][0]["groups"][0]["name"], "Final");
}

#[tokio::test(start_paused = true)]
async fn uptime_widgets_sharing_a_key_are_all_answered_by_one_call() {
    let harness = Harness::open().await;
    {
        let mut doc = harness.dashboard.snapshot().await;
        let group = &mut doc.pages[0].groups[0];
        for index in 0..3 {
            group.widgets.push(Widget {
                id: format!("wdg_up{index}"),
                kind: WidgetKind::UptimeRobot(UptimeRobotOptions {
                    api_key: "shared-key".to_string(),
                    monitor_index: None,
                }),
            });
        }
        let text = serde_json::to_string(&doc).expect("serialize");
        harness.dashboard.import_text(&text).await.expect("import");
    }

    tokio::time::sleep(Duration::from_secs(5)).await;
    let view = harness.sink.get();
    let displays: Vec<Option<WidgetDisplay>> = view.groups[0].widgets.iter().map(|widget| widget.display.clone()).collect();
    assert_eq!(displays.len(), 3);
    for display in &displays {
        assert!(matches!(display, Some(WidgetDisplay::Uptime(_))), "unexpected display {display:?}");
    }
    let upstream = harness
        .http
        .requests
        .lock()
        .expect("requests")
        .iter()
        .filter(|url| url.starts_with("https://api.uptimerobot.com/"))
        .count();
    assert_eq!(upstream, 1);
}

#[tokio::test(start_paused = true)]
async fn popup_save_reaches_the_open_dashboard() {
    let harness = Harness::open().await;
    let popup = Popup::new(harness.store.clone(), Arc::new(NoImages), harness.bus.clone());
    let (entries, preferred) = popup.entries();
    assert_eq!(preferred.as_deref(), Some(entries[0].group_id.as_str()));

    let meta = PageMetadata {
        title: "Proxmox".to_string(),
        url: "https://pve.lan:8006/".to_string(),
        ..PageMetadata::default()
    };
    popup.quick_save(&entries[0].group_id, &meta).await.expect("save");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let doc = harness.dashboard.snapshot().await;
    let titles: Vec<&str> = doc.pages[0].groups[0].links.iter().map(|link| link.title.as_str()).collect();
    assert_eq!(titles.last().copied(), Some("Proxmox"));
    let view = harness.sink.get();
    assert_eq!(view.groups[0].links.last().map(|tile| tile.title.as_str()), Some("Proxmox"));
}
