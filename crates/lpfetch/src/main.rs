//! lpfetch - load resources through the lowprofile engine and report

mod probe;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lowprofile::{CacheKey, Engine, EngineConfig, ForegroundQueue, ResourceLocator, StatsSnapshot};
use serde::Serialize;
use tracing::info;

use crate::probe::{ByteProbe, HeadlessTarget, Probe};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Locators to load (absolute URLs or bundle-relative paths)
    locators: Vec<String>,

    /// Cache root directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Cache namespace under the root
    #[arg(long)]
    namespace: Option<String>,

    /// Directory serving relative locators
    #[arg(long)]
    bundle_root: Option<PathBuf>,

    /// Requests and responses handled per worker iteration
    #[arg(long)]
    quantum: Option<usize>,

    /// Network request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON engine configuration; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Give up on unsettled loads after this many milliseconds
    #[arg(long, default_value_t = 30_000)]
    wait_ms: u64,

    /// Treat payloads without an image signature as undecodable
    #[arg(long)]
    strict: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Print the cache key for a locator and exit
    #[arg(long, value_name = "LOCATOR")]
    key: Option<String>,
}

#[derive(Debug, Serialize)]
struct Entry {
    locator: String,
    key: Option<String>,
    cached: bool,
    result: Option<Probe>,
}

#[derive(Debug, Serialize)]
struct Report {
    entries: Vec<Entry>,
    stats: StatsSnapshot,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(locator) = &args.key {
        println!("{}", ResourceLocator::parse(locator).cache_key());
        return Ok(());
    }

    if args.locators.is_empty() {
        anyhow::bail!("no locators given");
    }

    let config = load_config(&args)?;
    info!("Starting lpfetch v{}", env!("CARGO_PKG_VERSION"));

    let report = fetch_all(&args, config)?;
    print_report(&report, args.json)?;
    Ok(())
}

/// Read the config file, if any, then apply flag overrides
fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => EngineConfig::default(),
    };

    if let Some(dir) = &args.cache_dir {
        config.cache_root = dir.clone();
    }
    if let Some(namespace) = &args.namespace {
        config.cache_namespace = namespace.clone();
    }
    if let Some(root) = &args.bundle_root {
        config.bundle_root = Some(root.clone());
    }
    if let Some(quantum) = args.quantum {
        config.quantum = quantum;
    }
    if let Some(timeout) = args.timeout_ms {
        config.request_timeout_ms = timeout;
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn fetch_all(args: &Args, config: EngineConfig) -> Result<Report> {
    let foreground = Arc::new(ForegroundQueue::new());
    let mut engine: Engine<HeadlessTarget> =
        Engine::builder(ByteProbe { strict: args.strict }, foreground.clone())
            .config(config)
            .build()
            .context("starting engine")?;

    let targets: Vec<Arc<HeadlessTarget>> = args
        .locators
        .iter()
        .map(|s| Arc::new(HeadlessTarget::new(ResourceLocator::parse(s))))
        .collect();
    for target in &targets {
        engine.request(target, target.locator().clone());
    }

    // Every load ends in a value or one of the dropped-load counters
    let settled = foreground.run_until(Duration::from_millis(args.wait_ms), || {
        let stats = engine.stats();
        let loaded = targets.iter().filter(|t| t.value().is_some()).count() as u64;
        let dropped =
            stats.network_failures() + stats.bundled_missing() + stats.decode_failures();
        loaded + dropped >= targets.len() as u64
    });
    if !settled {
        info!("Gave up waiting after {} ms", args.wait_ms);
    }

    engine.shutdown();

    let entries = targets
        .iter()
        .map(|target| {
            let locator = target.locator();
            let key = locator.is_network().then(|| locator.cache_key());
            Entry {
                locator: locator.to_string(),
                cached: key.as_ref().is_some_and(|k| engine.cache().contains(k)),
                key: key.as_ref().map(CacheKey::to_string),
                result: target.value(),
            }
        })
        .collect();

    Ok(Report {
        entries,
        stats: engine.stats().snapshot(),
    })
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for entry in &report.entries {
        let result = match &entry.result {
            Some(probe) => format!("{} {} bytes", probe.format, probe.bytes),
            None => "unavailable".to_string(),
        };
        let cached = if entry.cached { " (cached)" } else { "" };
        println!("{}\t{}{}", entry.locator, result, cached);
    }

    let stats = &report.stats;
    println!(
        "requests {} | cache hits {} misses {} | network {} failed {} | bundled {} missing {}",
        stats.requests,
        stats.cache_hits,
        stats.cache_misses,
        stats.network_fetches,
        stats.network_failures,
        stats.bundled_hits,
        stats.bundled_missing
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["lpfetch"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"quantum": 9, "cache_namespace": "from-file"}"#).unwrap();

        let config = load_config(&args(&[
            "--config",
            path.to_str().unwrap(),
            "--namespace",
            "from-flag",
            "/a.png",
        ]))
        .unwrap();

        assert_eq!(config.quantum, 9);
        assert_eq!(config.cache_namespace, "from-flag");
        assert!(config.cache_undecodable);
    }

    #[test]
    fn test_bad_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(load_config(&args(&["--config", path.to_str().unwrap()])).is_err());
    }

    #[test]
    fn test_fetch_bundled_and_missing() {
        let dir = TempDir::new().unwrap();
        let bundle = dir.path().join("bundle");
        std::fs::create_dir_all(bundle.join("img")).unwrap();
        std::fs::write(bundle.join("img/logo.png"), b"\x89PNG\r\n\x1a\nrest").unwrap();

        let args = args(&[
            "--cache-dir",
            dir.path().join("cache").to_str().unwrap(),
            "--bundle-root",
            bundle.to_str().unwrap(),
            "--wait-ms",
            "5000",
            "/img/logo.png",
            "/img/missing.png",
        ]);
        let config = load_config(&args).unwrap();
        let report = fetch_all(&args, config).unwrap();

        assert_eq!(report.entries.len(), 2);
        let logo = report.entries[0].result.as_ref().unwrap();
        assert_eq!(logo.format, "png");
        assert_eq!(logo.bytes, 12);
        assert!(!report.entries[0].cached);
        assert_eq!(report.entries[0].key, None);
        assert_eq!(report.entries[1].result, None);
        assert_eq!(report.stats.bundled_hits, 1);
        assert_eq!(report.stats.bundled_missing, 1);
    }
}
