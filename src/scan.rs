use crate::models::{Icon, Launch, Program};
use crate::state::new_id;
use crate::widgets::http::ImageProbe;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

const PATH_BLACKLIST_SEGMENTS: &[&str] = &[
    "bin/x64/crashreporter",
    "commonredist",
    "/_redist/",
    "/redist/",
    "/_installer/",
    "/support/",
    "/tools/",
    "/utils/",
    "/binaries/win32/",
    "/binaries/win64/",
    "/directx/",
    "/vcredist/",
];

const ACF_BLACKLIST: &[&str] = &["bonus content", "steamworks shared"];

const EXECUTABLE_BLACKLIST: &[&str] = &[
    "crashpad_handler.exe",
    "vc_redist.x64.exe",
    "crashreport.exe",
    "vconsole2.exe",
    "dxsetup.exe",
    "unins000.exe",
    "unins001.exe",
    "unins002.exe",
    "uninstall.exe",
    "uninstaller.exe",
    "vc_redist.x86.exe",
    "vcredist.exe",
    "vcredist_x86.exe",
    "vcredist_x64.exe",
    "dxwebsetup.exe",
    "dotnetfx.exe",
    "oalinst.exe",
    "setup.exe",
    "redengineerrorreporter.exe",
    "physx_systemsoftware.exe",
    "ue4prereqsetup_x64.exe",
    "unitycrashhandler64.exe",
    "installermessage.exe",
    "crashhandler.exe",
    "crashreporter.exe",
    "errorreporter.exe",
    "steamerrorreporter.exe",
    "unitycrashhandler32.exe",
    "activation.exe",
    "updater.exe",
    "autoupdater.exe",
];

pub const LAUNCH_SCHEME: &str = "puffl://";
const CLEARBIT_BASE: &str = "https://logo.clearbit.com";
const GOOGLE_FAVICON_BASE: &str = "https://www.google.com/s2/favicons";
const STEAM_STATIC_BASE: &str = "https://cdn.akamai.steamstatic.com";

static EXE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.exe$").expect("valid regex"));
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[_\-.]").expect("valid regex"));
static ACRONYM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("valid regex"));
static CAMEL_STEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z\d])([A-Z])").expect("valid regex"));
static APP_MANIFEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)appmanifest_(\d+)\.acf").expect("valid regex"));
static INSTALL_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)"installdir"\s+"([^"]+)""#).expect("valid regex"));

/// A file found under the picked folder, with its path relative to that folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub name: String,
    pub relative_path: String,
    /// Text content, only read for Steam manifests.
    pub content: Option<String>,
}

impl ScannedFile {
    pub fn new(relative_path: &str) -> Self {
        let normalized = relative_path.replace('\\', "/");
        let name = normalized.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            name,
            relative_path: normalized,
            content: None,
        }
    }

    pub fn with_content(relative_path: &str, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(relative_path)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Generic,
    Steam,
}

/// What a folder scan found, ready to become programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Executables(Vec<ScannedFile>),
    /// Install folder name mapped to its Steam app id.
    SteamApps(BTreeMap<String, String>),
}

impl ScanResult {
    pub fn len(&self) -> usize {
        match self {
            Self::Executables(files) => files.len(),
            Self::SteamApps(apps) => apps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn scan_folder(files: &[ScannedFile], kind: FolderKind) -> ScanResult {
    match kind {
        FolderKind::Generic => ScanResult::Executables(find_executables(files)),
        FolderKind::Steam => ScanResult::SteamApps(parse_steam_manifests(files)),
    }
}

pub fn find_executables(files: &[ScannedFile]) -> Vec<ScannedFile> {
    let mut found: Vec<ScannedFile> = files
        .iter()
        .filter(|file| {
            let name = file.name.to_lowercase();
            if !name.ends_with(".exe") || EXECUTABLE_BLACKLIST.contains(&name.as_str()) {
                return false;
            }
            let path = file.relative_path.to_lowercase();
            !PATH_BLACKLIST_SEGMENTS.iter().any(|segment| path.contains(segment))
        })
        .cloned()
        .collect();
    found.sort_by(|left, right| left.name.cmp(&right.name));
    found
}

pub fn parse_steam_manifests(files: &[ScannedFile]) -> BTreeMap<String, String> {
    let mut apps = BTreeMap::new();
    let manifests: Vec<&ScannedFile> = files
        .iter()
        .filter(|file| file.relative_path.to_lowercase().ends_with(".acf"))
        .collect();
    if manifests.is_empty() {
        tracing::warn!("no appmanifest_*.acf files found; expected a steamapps folder");
        return apps;
    }

    for file in manifests {
        let Some(content) = file.content.as_deref() else {
            tracing::warn!(file = %file.name, "steam manifest has no content");
            continue;
        };
        let app_id = APP_MANIFEST.captures(&file.name).and_then(|caps| caps.get(1));
        let install_dir = INSTALL_DIR.captures(content).and_then(|caps| caps.get(1));
        let (Some(app_id), Some(install_dir)) = (app_id, install_dir) else {
            continue;
        };
        let folder = install_dir.as_str();
        let lowered = folder.to_lowercase();
        if ACF_BLACKLIST.iter().any(|keyword| lowered.contains(keyword)) {
            continue;
        }
        apps.insert(folder.to_string(), app_id.as_str().to_string());
    }
    apps
}

/// `RE8_launcher.exe` -> `RE8 Launcher`, `HTTPServer` -> `HTTP Server`.
pub fn format_title(file_name: &str) -> String {
    let stripped = EXE_SUFFIX.replace(file_name, "");
    let spaced = SEPARATORS.replace_all(&stripped, " ");
    let split = ACRONYM_RUN.replace_all(&spaced, "$1 $2");
    let split = CAMEL_STEP.replace_all(&split, "$1 $2");
    split
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn launch_scheme_for(title: &str) -> String {
    format!("{LAUNCH_SCHEME}{}", EXE_SUFFIX.replace(title, ""))
}

fn guess_domain_from_name(name: &str) -> Option<String> {
    let slug = name.to_lowercase().replace(['_', ' '], "");
    let slug = slug.replacen("code", "", 1).replacen("studio", "", 1);
    (!slug.is_empty()).then(|| format!("{slug}.com"))
}

/// Best-effort icon lookup for scanned programs. Every candidate is checked
/// with the image probe; nothing here ever fails loudly.
pub struct IconResolver<'a> {
    probe: &'a dyn ImageProbe,
}

impl<'a> IconResolver<'a> {
    pub fn new(probe: &'a dyn ImageProbe) -> Self {
        Self { probe }
    }

    pub async fn for_program_name(&self, name: &str) -> Option<String> {
        let domain = guess_domain_from_name(name)?;
        let candidates = [
            format!("{CLEARBIT_BASE}/{domain}"),
            format!("{GOOGLE_FAVICON_BASE}/favicons?domain={domain}&sz=128"),
        ];
        for candidate in candidates {
            if self.probe.probe(candidate.clone()).await {
                return Some(candidate);
            }
        }
        None
    }

    pub async fn for_steam_app(&self, app_id: &str) -> Option<String> {
        let url = format!(
            "{STEAM_STATIC_BASE}/steam/apps/{}/header.jpg",
            crate::urls::encode_component(app_id)
        );
        self.probe.probe(url.clone()).await.then_some(url)
    }
}

/// Shared fields applied to every program created from one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkTemplate {
    pub icon: Icon,
    pub notes: String,
}

/// Turns a scan result into programs. With an `auto` icon each program gets
/// a looked-up icon URL when one can be found.
pub async fn programs_from_scan(
    result: &ScanResult,
    template: &BulkTemplate,
    resolver: &IconResolver<'_>,
) -> Vec<Program> {
    let entries: Vec<(String, Option<&str>)> = match result {
        ScanResult::Executables(files) => files.iter().map(|file| (format_title(&file.name), None)).collect(),
        ScanResult::SteamApps(apps) => apps
            .iter()
            .map(|(folder, app_id)| (folder.clone(), Some(app_id.as_str())))
            .collect(),
    };

    let mut programs = Vec::with_capacity(entries.len());
    for (title, app_id) in entries {
        let icon = match &template.icon {
            Icon::Auto => {
                let found = match app_id {
                    Some(app_id) => resolver.for_steam_app(app_id).await,
                    None => resolver.for_program_name(&title).await,
                };
                found.map_or(Icon::Auto, |icon_url| Icon::Url { icon_url })
            }
            other => other.clone(),
        };
        programs.push(Program {
            id: new_id("prg"),
            launch: Launch::Scheme {
                scheme_or_command: launch_scheme_for(&title),
            },
            title,
            icon,
            notes: template.notes.clone(),
        });
    }
    programs
}
