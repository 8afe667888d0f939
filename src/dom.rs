use std::sync::Arc;
use std::task::{Context, Poll};

use danmakuoxide_types::{Comment, LayerId, Rect, VideoId};

use crate::error::Result;

/// Facade over the document hosting the injected runtime.
///
/// The platform binding owns the raw element references; everything crossing
/// this seam is a [`VideoId`] handle. Implementations are interior mutable
/// the way real DOM bindings are, so all methods take `&self`.
pub trait VideoDom: Send + Sync {
    /// All video elements currently matching `selector`, in document order.
    fn query_all(&self, selector: &str) -> Result<Vec<VideoId>>;

    /// Begin delivering insertion/removal notifications for `selector`.
    ///
    /// A selector the platform rejects fails synchronously.
    fn observe(&self, selector: &str) -> Result<()>;

    /// Stop delivering notifications. Safe to call when not observing.
    fn disconnect(&self);

    fn is_playing(&self, video: VideoId) -> bool;

    /// Bounding rectangle of the video, `None` once the element is gone.
    fn video_rect(&self, video: VideoId) -> Option<Rect>;

    fn viewport(&self) -> Rect;

    /// Whether the element currently lives inside an active
    /// picture-in-picture surface.
    fn in_picture_in_picture(&self, video: VideoId) -> bool;

    /// Attach the source-change sub-observer to `video`, detaching it from
    /// wherever it was attached before. There is at most one.
    fn watch_source(&self, video: VideoId);

    fn unwatch_source(&self);

    fn seek(&self, video: VideoId, time: f64) -> Result<()>;
}

/// Owns the positioned overlay layer node of one document.
pub trait LayerHost: Send + Sync {
    /// Attach the layer to the document if necessary and return its handle.
    fn ensure_layer(&self) -> LayerId;

    /// Detach the layer. Safe to call when no layer is attached.
    fn remove_layer(&self);

    fn set_layer_rect(&self, rect: Rect);

    fn set_layer_visible(&self, visible: bool);

    /// Relocate the video element and the overlay layer into the
    /// host-supplied picture-in-picture surface, preserving listeners.
    fn move_to_pip(&self, video: VideoId, layer: LayerId) -> Result<()>;

    /// Move both back into the document.
    fn restore_from_pip(&self) -> Result<()>;
}

/// Delivers bounding-rectangle changes for one tracked video element.
pub trait GeometryTracker: Send {
    /// Poll for the next rectangle change. `Ready(None)` once the tracker
    /// stopped delivering.
    fn poll_rect(&mut self, cx: &mut Context<'_>) -> Poll<Option<Rect>>;

    /// Synchronously stop tracking.
    fn cleanup(&mut self);
}

pub trait GeometryTrackerFactory: Send {
    fn track(&self, video: VideoId) -> Box<dyn GeometryTracker>;
}

/// The drop-in comment rendering engine instance mounted inside the layer.
///
/// All operations are fallible; the caller isolates and logs failures
/// instead of propagating them.
pub trait CommentRenderer: Send {
    /// Re-lay-out against a new rectangle without recreating the instance.
    fn resize(&mut self, rect: Rect) -> Result<()>;

    fn show(&mut self) -> Result<()>;

    fn hide(&mut self) -> Result<()>;

    /// Apply a partial configuration update.
    fn update_config(&mut self, config: &serde_json::Value) -> Result<()>;

    /// Tear down all animation state. Called exactly once before drop.
    fn destroy(&mut self);
}

pub trait RendererFactory: Send {
    fn create(
        &self,
        container: LayerId,
        video: VideoId,
        comments: &[Comment],
    ) -> Result<Box<dyn CommentRenderer>>;
}

/// Pluggable predicate deciding whether a video candidate counts as visible.
pub trait VisibilityProbe: Send {
    fn is_visible(&self, video: VideoId) -> bool;
}

/// Default visibility definition: non-zero rendered size intersecting the
/// viewport.
pub struct ViewportProbe {
    dom: Arc<dyn VideoDom>,
}

impl ViewportProbe {
    pub fn new(dom: Arc<dyn VideoDom>) -> Self {
        Self { dom }
    }
}

impl VisibilityProbe for ViewportProbe {
    fn is_visible(&self, video: VideoId) -> bool {
        self.dom
            .video_rect(video)
            .map(|rect| !rect.is_empty() && rect.intersects(&self.dom.viewport()))
            .unwrap_or(false)
    }
}

/// One insertion or removal reported by the document observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomMutation {
    Added(VideoId),
    Removed(VideoId),
}

/// Change notification delivered by the platform binding to the injected
/// runtime.
#[derive(Debug, Clone)]
pub enum DomEvent {
    /// Insertions/removals of one notification batch, in delivery order.
    Mutations(Vec<DomMutation>),
    PlaybackChanged { video: VideoId, playing: bool },
    /// The source-change sub-observer fired for the watched element.
    SourceChanged { video: VideoId },
    /// The picture-in-picture surface holding the relocated video closed.
    PipClosed,
}
