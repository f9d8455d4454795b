use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lowprofile::{
    CacheKey, Engine, EngineConfig, FetchCallback, ForegroundQueue, LoadError, Materializer,
    MemorySource, NetworkFetcher, ResourceLocator, VisualTarget,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

/// Stand-in for an image element
#[derive(Default)]
struct Image {
    wanted: Mutex<Option<ResourceLocator>>,
    shown: Mutex<Option<Vec<u8>>>,
}

impl Image {
    fn shown(&self) -> Option<Vec<u8>> {
        self.shown.lock().clone()
    }
}

impl VisualTarget for Image {
    type Renderable = Vec<u8>;

    fn current_locator(&self) -> Option<ResourceLocator> {
        self.wanted.lock().clone()
    }

    fn set_renderable(&self, value: Option<Vec<u8>>) {
        *self.shown.lock() = value;
    }
}

/// Rejects payloads starting with `BAD`; bypass yields a marker
struct Decoder;

impl Materializer<Vec<u8>> for Decoder {
    fn materialize(&self, bytes: &[u8]) -> Result<Vec<u8>, LoadError> {
        if bytes.starts_with(b"BAD") {
            return Err(LoadError::DecodeFailure("bad magic".to_string()));
        }
        Ok(bytes.to_vec())
    }

    fn materialize_direct(&self, locator: &ResourceLocator) -> Option<Vec<u8>> {
        Some(format!("direct:{}", locator).into_bytes())
    }
}

/// Serves canned bodies from a background thread and counts fetches
#[derive(Default)]
struct CannedNetwork {
    bodies: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl CannedNetwork {
    fn with(bodies: &[(&str, &[u8])]) -> Self {
        Self {
            bodies: bodies
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NetworkFetcher for CannedNetwork {
    fn fetch(&self, url: &Url, on_done: FetchCallback) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .bodies
            .get(url.as_str())
            .cloned()
            .ok_or(LoadError::NotFound);
        thread::spawn(move || on_done(result));
    }
}

/// Holds every fetch until the test releases it
#[derive(Default)]
struct GatedNetwork {
    held: Mutex<Vec<(Url, FetchCallback)>>,
}

impl GatedNetwork {
    fn held(&self) -> usize {
        self.held.lock().len()
    }

    fn release(&self, url: &str, body: &[u8]) {
        let mut held = self.held.lock();
        let pos = held
            .iter()
            .position(|(u, _)| u.as_str() == url)
            .expect("fetch was issued");
        let (_, on_done) = held.remove(pos);
        drop(held);
        on_done(Ok(body.to_vec()));
    }
}

impl NetworkFetcher for GatedNetwork {
    fn fetch(&self, url: &Url, on_done: FetchCallback) {
        self.held.lock().push((url.clone(), on_done));
    }
}

struct Setup {
    _dir: TempDir,
    engine: Engine<Image>,
    foreground: Arc<ForegroundQueue>,
}

fn setup(network: Arc<dyn NetworkFetcher>, bundle: Arc<MemorySource>, config: EngineConfig) -> Setup {
    let dir = TempDir::new().unwrap();
    let foreground = Arc::new(ForegroundQueue::new());
    let engine = Engine::builder(Decoder, foreground.clone())
        .config(EngineConfig {
            cache_root: dir.path().to_path_buf(),
            ..config
        })
        .network(network)
        .bundled(bundle)
        .build()
        .unwrap();
    Setup {
        _dir: dir,
        engine,
        foreground,
    }
}

/// What the UI binding does when an element's source changes
fn set_source(engine: &Engine<Image>, image: &Arc<Image>, locator: &str) {
    let locator = ResourceLocator::parse(locator);
    *image.wanted.lock() = Some(locator.clone());
    engine.request(image, locator);
}

#[test]
fn test_network_load_is_applied_and_cached() {
    let network = Arc::new(CannedNetwork::with(&[("http://host/a.png", b"B")]));
    let s = setup(network.clone(), Arc::new(MemorySource::new()), EngineConfig::default());
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "http://host/a.png");
    assert!(s.foreground.run_until(WAIT, || image.shown().is_some()));

    assert_eq!(image.shown().unwrap(), b"B");
    assert_eq!(network.calls(), 1);
    let key = CacheKey::for_locator("http://host/a.png");
    assert_eq!(s.engine.cache().get(&key).unwrap(), b"B");
    assert_eq!(s.engine.stats().cache_writes(), 1);
}

#[test]
fn test_second_load_served_from_cache() {
    let network = Arc::new(CannedNetwork::with(&[("http://host/a.png", b"B")]));
    let s = setup(network.clone(), Arc::new(MemorySource::new()), EngineConfig::default());

    let first = Arc::new(Image::default());
    set_source(&s.engine, &first, "http://host/a.png");
    assert!(s.foreground.run_until(WAIT, || first.shown().is_some()));

    let second = Arc::new(Image::default());
    set_source(&s.engine, &second, "http://host/a.png");
    assert!(s.foreground.run_until(WAIT, || second.shown().is_some()));

    assert_eq!(second.shown(), first.shown());
    assert_eq!(network.calls(), 1);
    assert_eq!(s.engine.stats().cache_hits(), 1);
    assert_eq!(s.engine.stats().cache_writes(), 1);
    assert_eq!(s.engine.cache().len(), 1);
}

#[test]
fn test_cache_survives_engine_restart() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::with_cache_root(dir.path());
    let key = CacheKey::for_locator("http://host/a.png");

    {
        let foreground = Arc::new(ForegroundQueue::new());
        let network = Arc::new(CannedNetwork::with(&[("http://host/a.png", b"B")]));
        let engine: Engine<Image> = Engine::builder(Decoder, foreground.clone())
            .config(config.clone())
            .network(network)
            .build()
            .unwrap();
        let image = Arc::new(Image::default());
        set_source(&engine, &image, "http://host/a.png");
        assert!(foreground.run_until(WAIT, || image.shown().is_some()));
    }

    let foreground = Arc::new(ForegroundQueue::new());
    let network = Arc::new(CannedNetwork::default());
    let engine: Engine<Image> = Engine::builder(Decoder, foreground.clone())
        .config(config)
        .network(network.clone())
        .build()
        .unwrap();
    assert!(engine.cache().contains(&key));

    let image = Arc::new(Image::default());
    set_source(&engine, &image, "HTTP://HOST/A.PNG");
    assert!(foreground.run_until(WAIT, || image.shown().is_some()));
    assert_eq!(image.shown().unwrap(), b"B");
    assert_eq!(network.calls(), 0);
}

#[test]
fn test_missing_bundled_resource_never_completes() {
    let s = setup(
        Arc::new(CannedNetwork::default()),
        Arc::new(MemorySource::new()),
        EngineConfig::default(),
    );
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "/images/logo.png");
    assert!(s
        .foreground
        .run_until(WAIT, || s.engine.stats().bundled_missing() == 1));
    s.foreground.run_for(Duration::from_millis(50));

    assert_eq!(image.shown(), None);
    assert_eq!(s.engine.stats().completions(), 0);
    assert!(s.engine.cache().is_empty());
}

#[test]
fn test_bundled_resource_is_loaded_not_cached() {
    let bundle = Arc::new(MemorySource::new());
    bundle.insert("images/logo.png", b"logo".to_vec());
    let s = setup(Arc::new(CannedNetwork::default()), bundle, EngineConfig::default());
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "/images/logo.png");
    assert!(s.foreground.run_until(WAIT, || image.shown().is_some()));

    assert_eq!(image.shown().unwrap(), b"logo");
    assert!(s.engine.cache().is_empty());
}

#[test]
fn test_superseded_fetch_does_not_overwrite() {
    let network = Arc::new(GatedNetwork::default());
    let s = setup(network.clone(), Arc::new(MemorySource::new()), EngineConfig::default());
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "http://host/old.png");
    assert!(s.foreground.run_until(WAIT, || network.held() == 1));

    set_source(&s.engine, &image, "http://host/new.png");
    assert!(s.foreground.run_until(WAIT, || network.held() == 2));

    // The old fetch still completes, but the target has moved on
    network.release("http://host/old.png", b"OLD");
    assert!(s
        .foreground
        .run_until(WAIT, || s.engine.stats().stale_discarded() == 1));
    assert_eq!(image.shown(), None);
    assert!(!s
        .engine
        .cache()
        .contains(&CacheKey::for_locator("http://host/old.png")));

    network.release("http://host/new.png", b"NEW");
    assert!(s.foreground.run_until(WAIT, || image.shown().is_some()));
    assert_eq!(image.shown().unwrap(), b"NEW");
}

#[test]
fn test_rapid_requests_end_on_latest() {
    let bundle = Arc::new(MemorySource::new());
    for i in 0..50 {
        bundle.insert(&format!("{i}.png"), format!("image {i}").into_bytes());
    }
    let s = setup(Arc::new(CannedNetwork::default()), bundle, EngineConfig::default());
    let image = Arc::new(Image::default());

    for i in 0..50 {
        set_source(&s.engine, &image, &format!("/{i}.png"));
    }
    assert!(s
        .foreground
        .run_until(WAIT, || image.shown().as_deref() == Some(&b"image 49"[..])));

    // Nothing older can land afterwards
    s.foreground.run_for(Duration::from_millis(50));
    assert_eq!(image.shown().unwrap(), b"image 49");
}

#[test]
fn test_network_failure_is_dropped() {
    let network = Arc::new(CannedNetwork::default());
    let s = setup(network.clone(), Arc::new(MemorySource::new()), EngineConfig::default());
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "http://host/missing.png");
    assert!(s
        .foreground
        .run_until(WAIT, || s.engine.stats().network_failures() == 1));

    assert_eq!(image.shown(), None);
    assert_eq!(network.calls(), 1);
    assert!(s.engine.cache().is_empty());
}

#[test]
fn test_undecodable_bytes_are_cached_but_not_shown() {
    let network = Arc::new(CannedNetwork::with(&[("http://host/bad.png", b"BAD bytes")]));
    let s = setup(network, Arc::new(MemorySource::new()), EngineConfig::default());
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "http://host/bad.png");
    assert!(s
        .foreground
        .run_until(WAIT, || s.engine.stats().decode_failures() == 1));

    assert_eq!(image.shown(), None);
    let key = CacheKey::for_locator("http://host/bad.png");
    assert_eq!(s.engine.cache().get(&key).unwrap(), b"BAD bytes");
}

#[test]
fn test_request_clears_previous_value() {
    let bundle = Arc::new(MemorySource::new());
    bundle.insert("a.png", b"a".to_vec());
    let network = Arc::new(GatedNetwork::default());
    let s = setup(network, bundle, EngineConfig::default());
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "/a.png");
    assert!(s.foreground.run_until(WAIT, || image.shown().is_some()));

    set_source(&s.engine, &image, "http://host/slow.png");
    assert_eq!(image.shown(), None);
}

#[test]
fn test_disabled_engine_bypasses_queue_and_cache() {
    let network = Arc::new(CannedNetwork::with(&[("http://host/a.png", b"B")]));
    let config = EngineConfig {
        enabled: false,
        ..EngineConfig::default()
    };
    let s = setup(network.clone(), Arc::new(MemorySource::new()), config);
    let image = Arc::new(Image::default());

    set_source(&s.engine, &image, "http://host/a.png");

    assert_eq!(image.shown().unwrap(), b"direct:http://host/a.png");
    assert_eq!(s.engine.queued_requests(), 0);
    assert_eq!(s.foreground.run_for(Duration::from_millis(50)), 0);
    assert_eq!(network.calls(), 0);
    assert!(s.engine.cache().is_empty());
}

#[test]
fn test_shutdown_stops_worker() {
    let network = Arc::new(CannedNetwork::with(&[("http://host/a.png", b"B")]));
    let mut s = setup(network.clone(), Arc::new(MemorySource::new()), EngineConfig::default());
    assert!(s.engine.is_running());

    s.engine.shutdown();
    assert!(!s.engine.is_running());
    s.engine.shutdown();

    let image = Arc::new(Image::default());
    set_source(&s.engine, &image, "http://host/a.png");
    assert_eq!(s.engine.queued_requests(), 0);
    assert_eq!(s.foreground.run_for(Duration::from_millis(50)), 0);
    assert_eq!(network.calls(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let result: lowprofile::Result<Engine<Image>> =
        Engine::builder(Decoder, Arc::new(ForegroundQueue::new()))
            .config(EngineConfig {
                quantum: 0,
                ..EngineConfig::with_cache_root(dir.path())
            })
            .network(Arc::new(CannedNetwork::default()))
            .build();
    assert!(matches!(result, Err(lowprofile::Error::Config(_))));
}
