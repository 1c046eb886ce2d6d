//! Native messaging host. Stdout carries framed replies, so logs only ever go
//! to `native.log`.

use anyhow::Context;
use stackdash_lib::config::DashboardConfig;
use stackdash_lib::init_tracing;
use stackdash_lib::native::{NativeHost, SystemRunner};
use std::path::PathBuf;

const CONFIG_ENV: &str = "STACKDASH_CONFIG";

fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("stackdash.yaml")))
        .unwrap_or_else(|| PathBuf::from("stackdash.yaml"))
}

fn main() -> anyhow::Result<()> {
    let config = DashboardConfig::load(&config_path()).context("loading stackdash config")?;
    if let Err(error) = init_tracing(&config.log_dir(), "native.log") {
        eprintln!("stackdash-native: logging disabled: {error}");
    }
    tracing::info!(args = ?std::env::args().skip(1).collect::<Vec<_>>(), "native host started");

    let host = NativeHost::new(SystemRunner, config.repair_timeout());
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let result = host.serve(&mut stdin.lock(), &mut stdout.lock());
    if let Err(error) = &result {
        tracing::error!(error = %error, "native host stopped");
    }
    result.context("serving native messages")
}
