//! The process-wide toggle lives in its own test binary so flipping it
//! cannot race the other engine tests.

use std::sync::Arc;
use std::time::Duration;

use lowprofile::{
    is_enabled, set_enabled, Engine, EngineConfig, ForegroundQueue, LoadError, Materializer,
    MemorySource, ResourceLocator, VisualTarget,
};
use parking_lot::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct Label {
    wanted: Mutex<Option<ResourceLocator>>,
    text: Mutex<Option<String>>,
}

impl VisualTarget for Label {
    type Renderable = String;

    fn current_locator(&self) -> Option<ResourceLocator> {
        self.wanted.lock().clone()
    }

    fn set_renderable(&self, value: Option<String>) {
        *self.text.lock() = value;
    }
}

struct Utf8;

impl Materializer<String> for Utf8 {
    fn materialize(&self, bytes: &[u8]) -> Result<String, LoadError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| LoadError::DecodeFailure(e.to_string()))
    }

    fn materialize_direct(&self, locator: &ResourceLocator) -> Option<String> {
        Some(format!("inline {}", locator))
    }
}

#[test]
fn test_global_toggle() {
    let dir = TempDir::new().unwrap();
    let bundle = Arc::new(MemorySource::new());
    bundle.insert("hello.txt", "hello");
    let foreground = Arc::new(ForegroundQueue::new());
    let engine: Engine<Label> = Engine::builder(Utf8, foreground.clone())
        .config(EngineConfig::with_cache_root(dir.path()))
        .bundled(bundle)
        .build()
        .unwrap();
    let label = Arc::new(Label::default());
    let locator = ResourceLocator::parse("/hello.txt");
    *label.wanted.lock() = Some(locator.clone());

    assert!(is_enabled());
    set_enabled(false);
    engine.request(&label, locator.clone());
    assert_eq!(label.text.lock().as_deref(), Some("inline /hello.txt"));
    assert_eq!(engine.queued_requests(), 0);

    set_enabled(true);
    engine.request(&label, locator);
    assert_eq!(*label.text.lock(), None);
    assert!(foreground.run_until(Duration::from_secs(5), || label.text.lock().is_some()));
    assert_eq!(label.text.lock().as_deref(), Some("hello"));
}
