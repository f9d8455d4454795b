//! Seams to the UI layer: the element that displays a resource and the
//! decoder that turns bytes into something it can display.

use crate::error::LoadError;
use crate::locator::ResourceLocator;

/// A consumer of loaded resources, typically a UI element.
///
/// The engine holds targets as `Arc<T>` and compares them by pointer
/// identity; it never looks inside beyond the two methods below.
pub trait VisualTarget: Send + Sync + 'static {
    /// Decoded form assigned to the target
    type Renderable: Send + 'static;

    /// The locator the target currently wants to display
    fn current_locator(&self) -> Option<ResourceLocator>;

    /// Assign (or clear) the displayed value. Called on the foreground
    /// context for completed loads, and on the requesting thread when a
    /// request clears the previous value.
    fn set_renderable(&self, value: Option<Self::Renderable>);
}

/// Turns fetched bytes into a renderable value
pub trait Materializer<R>: Send + Sync + 'static {
    /// Decode `bytes`. Failures are swallowed by the dispatcher.
    fn materialize(&self, bytes: &[u8]) -> Result<R, LoadError>;

    /// Synchronous bypass used when async loading is disabled. The engine
    /// does not touch its queues or cache on this path.
    fn materialize_direct(&self, _locator: &ResourceLocator) -> Option<R> {
        None
    }
}

impl<R, F> Materializer<R> for F
where
    F: Fn(&[u8]) -> Result<R, LoadError> + Send + Sync + 'static,
{
    fn materialize(&self, bytes: &[u8]) -> Result<R, LoadError> {
        self(bytes)
    }
}
