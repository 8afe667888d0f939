//! Hand-rolled fakes for the platform trait seams, shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::future::BoxFuture;
use futures::Stream;
use std::pin::Pin;

use danmakuoxide_types::{Comment, FrameId, LayerId, MethodCall, Rect, Response, VideoId};

use crate::bridge::{FrameInfo, HostBridge, Transport};
use crate::dom::{
    CommentRenderer, GeometryTracker, GeometryTrackerFactory, LayerHost, RendererFactory,
    VideoDom, VisibilityProbe,
};
use crate::error::{OverlayError, Result};

#[derive(Debug)]
struct FakeVideo {
    playing: bool,
    rect: Rect,
}

#[derive(Debug, Default)]
struct DomState {
    reject_selectors: bool,
    videos: Vec<(VideoId, FakeVideo)>,
    pip: HashSet<VideoId>,
    watched: Option<VideoId>,
    observing: Option<String>,
    disconnects: usize,
    viewport: Rect,
    seeks: Vec<(VideoId, f64)>,
}

/// In-memory document facade.
#[derive(Debug)]
pub(crate) struct FakeDom {
    inner: Mutex<DomState>,
}

impl FakeDom {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DomState {
                viewport: Rect::new(0., 0., 1280., 720.),
                ..Default::default()
            }),
        })
    }

    pub(crate) fn rejecting_selectors() -> Arc<Self> {
        let dom = Self::new();
        dom.inner.lock().unwrap().reject_selectors = true;
        dom
    }

    pub(crate) fn add_video(&self, video: VideoId, playing: bool, rect: Rect) {
        let mut state = self.inner.lock().unwrap();
        state.pip.remove(&video);
        if let Some(entry) = state.videos.iter_mut().find(|(id, _)| *id == video) {
            entry.1 = FakeVideo { playing, rect };
        } else {
            state.videos.push((video, FakeVideo { playing, rect }));
        }
    }

    pub(crate) fn remove_video(&self, video: VideoId) {
        self.inner
            .lock()
            .unwrap()
            .videos
            .retain(|(id, _)| *id != video);
    }

    pub(crate) fn set_rect(&self, video: VideoId, rect: Rect) {
        if let Some(entry) = self
            .inner
            .lock()
            .unwrap()
            .videos
            .iter_mut()
            .find(|(id, _)| *id == video)
        {
            entry.1.rect = rect;
        }
    }

    /// The element is relocated into the picture-in-picture surface, which
    /// also removes it from the document.
    pub(crate) fn enter_pip(&self, video: VideoId) {
        let mut state = self.inner.lock().unwrap();
        state.videos.retain(|(id, _)| *id != video);
        state.pip.insert(video);
    }

    pub(crate) fn watched_source(&self) -> Option<VideoId> {
        self.inner.lock().unwrap().watched
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    pub(crate) fn seeks(&self) -> Vec<(VideoId, f64)> {
        self.inner.lock().unwrap().seeks.clone()
    }
}

impl VideoDom for FakeDom {
    fn query_all(&self, selector: &str) -> Result<Vec<VideoId>> {
        let state = self.inner.lock().unwrap();
        if state.reject_selectors {
            return Err(OverlayError::InvalidSelector {
                selector: selector.to_string(),
            });
        }
        Ok(state.videos.iter().map(|(id, _)| *id).collect())
    }

    fn observe(&self, selector: &str) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.reject_selectors {
            return Err(OverlayError::InvalidSelector {
                selector: selector.to_string(),
            });
        }
        state.observing = Some(selector.to_string());
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.inner.lock().unwrap();
        state.observing = None;
        state.disconnects += 1;
    }

    fn is_playing(&self, video: VideoId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .videos
            .iter()
            .find(|(id, _)| *id == video)
            .map(|(_, v)| v.playing)
            .unwrap_or(false)
    }

    fn video_rect(&self, video: VideoId) -> Option<Rect> {
        self.inner
            .lock()
            .unwrap()
            .videos
            .iter()
            .find(|(id, _)| *id == video)
            .map(|(_, v)| v.rect)
    }

    fn viewport(&self) -> Rect {
        self.inner.lock().unwrap().viewport
    }

    fn in_picture_in_picture(&self, video: VideoId) -> bool {
        self.inner.lock().unwrap().pip.contains(&video)
    }

    fn watch_source(&self, video: VideoId) {
        self.inner.lock().unwrap().watched = Some(video);
    }

    fn unwatch_source(&self) {
        self.inner.lock().unwrap().watched = None;
    }

    fn seek(&self, video: VideoId, time: f64) -> Result<()> {
        self.inner.lock().unwrap().seeks.push((video, time));
        Ok(())
    }
}

/// Visibility decided by an explicit per-video flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProbe {
    visible: Arc<Mutex<HashSet<VideoId>>>,
}

impl FakeProbe {
    pub(crate) fn set_visible(&self, video: VideoId, visible: bool) {
        let mut set = self.visible.lock().unwrap();
        if visible {
            set.insert(video);
        } else {
            set.remove(&video);
        }
    }
}

impl VisibilityProbe for FakeProbe {
    fn is_visible(&self, video: VideoId) -> bool {
        self.visible.lock().unwrap().contains(&video)
    }
}

#[derive(Debug, Default)]
struct LayerState {
    attached: Option<LayerId>,
    next_id: u64,
    rect: Option<Rect>,
    visible: Option<bool>,
    pip: Option<(VideoId, LayerId)>,
    restores: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FakeLayers {
    inner: Mutex<LayerState>,
}

impl FakeLayers {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn attached(&self) -> Option<LayerId> {
        self.inner.lock().unwrap().attached
    }

    pub(crate) fn rect(&self) -> Option<Rect> {
        self.inner.lock().unwrap().rect
    }

    pub(crate) fn visible(&self) -> Option<bool> {
        self.inner.lock().unwrap().visible
    }

    pub(crate) fn pip(&self) -> Option<(VideoId, LayerId)> {
        self.inner.lock().unwrap().pip
    }

    pub(crate) fn restore_count(&self) -> usize {
        self.inner.lock().unwrap().restores
    }
}

impl LayerHost for FakeLayers {
    fn ensure_layer(&self) -> LayerId {
        let mut state = self.inner.lock().unwrap();
        if let Some(layer) = state.attached {
            return layer;
        }
        state.next_id += 1;
        let layer = LayerId::new(state.next_id);
        state.attached = Some(layer);
        layer
    }

    fn remove_layer(&self) {
        let mut state = self.inner.lock().unwrap();
        state.attached = None;
        state.rect = None;
        state.visible = None;
    }

    fn set_layer_rect(&self, rect: Rect) {
        self.inner.lock().unwrap().rect = Some(rect);
    }

    fn set_layer_visible(&self, visible: bool) {
        self.inner.lock().unwrap().visible = Some(visible);
    }

    fn move_to_pip(&self, video: VideoId, layer: LayerId) -> Result<()> {
        self.inner.lock().unwrap().pip = Some((video, layer));
        Ok(())
    }

    fn restore_from_pip(&self) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.pip = None;
        state.restores += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RenderOp {
    Created { video: VideoId, comments: usize },
    Resized(Rect),
    Shown,
    Hidden,
    Config(serde_json::Value),
    Destroyed,
}

#[derive(Debug, Default)]
pub(crate) struct FakeRenderers {
    log: Arc<Mutex<Vec<RenderOp>>>,
    fail_create: AtomicBool,
    fail_resize: AtomicBool,
}

impl FakeRenderers {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_resize(&self, fail: bool) {
        self.fail_resize.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn log(&self) -> Vec<RenderOp> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn created_count(&self) -> usize {
        self.count(|op| matches!(op, RenderOp::Created { .. }))
    }

    pub(crate) fn destroyed_count(&self) -> usize {
        self.count(|op| matches!(op, RenderOp::Destroyed))
    }

    fn count(&self, f: impl Fn(&RenderOp) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|op| f(op)).count()
    }
}

impl RendererFactory for Arc<FakeRenderers> {
    fn create(
        &self,
        _container: LayerId,
        video: VideoId,
        comments: &[Comment],
    ) -> Result<Box<dyn CommentRenderer>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(OverlayError::Transport("renderer exploded".to_string()));
        }
        self.log.lock().unwrap().push(RenderOp::Created {
            video,
            comments: comments.len(),
        });
        Ok(Box::new(FakeRenderer {
            log: self.log.clone(),
            fail_resize: self.fail_resize.load(Ordering::SeqCst),
        }))
    }
}

#[derive(Debug)]
struct FakeRenderer {
    log: Arc<Mutex<Vec<RenderOp>>>,
    fail_resize: bool,
}

impl CommentRenderer for FakeRenderer {
    fn resize(&mut self, rect: Rect) -> Result<()> {
        if self.fail_resize {
            return Err(OverlayError::Transport("resize exploded".to_string()));
        }
        self.log.lock().unwrap().push(RenderOp::Resized(rect));
        Ok(())
    }

    fn show(&mut self) -> Result<()> {
        self.log.lock().unwrap().push(RenderOp::Shown);
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        self.log.lock().unwrap().push(RenderOp::Hidden);
        Ok(())
    }

    fn update_config(&mut self, config: &serde_json::Value) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(RenderOp::Config(config.clone()));
        Ok(())
    }

    fn destroy(&mut self) {
        self.log.lock().unwrap().push(RenderOp::Destroyed);
    }
}

#[derive(Default)]
struct TrackerState {
    tracked: Vec<VideoId>,
    cleaned: Vec<Arc<AtomicBool>>,
    senders: Vec<UnboundedSender<Rect>>,
}

/// Factory handing out channel-backed trackers; pushed rects reach the most
/// recently created tracker.
#[derive(Default)]
pub(crate) struct FakeTrackers {
    inner: Mutex<TrackerState>,
}

impl FakeTrackers {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_rect(&self, rect: Rect) {
        if let Some(tx) = self.inner.lock().unwrap().senders.last() {
            let _ = tx.unbounded_send(rect);
        }
    }

    pub(crate) fn tracked(&self) -> Vec<VideoId> {
        self.inner.lock().unwrap().tracked.clone()
    }

    pub(crate) fn cleaned_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .cleaned
            .iter()
            .filter(|flag| flag.load(Ordering::SeqCst))
            .count()
    }
}

impl GeometryTrackerFactory for Arc<FakeTrackers> {
    fn track(&self, video: VideoId) -> Box<dyn GeometryTracker> {
        let (tx, rx) = unbounded();
        let cleaned = Arc::new(AtomicBool::new(false));
        let mut state = self.inner.lock().unwrap();
        state.tracked.push(video);
        state.cleaned.push(cleaned.clone());
        state.senders.push(tx);
        Box::new(FakeTracker { rx, cleaned })
    }
}

struct FakeTracker {
    rx: UnboundedReceiver<Rect>,
    cleaned: Arc<AtomicBool>,
}

impl GeometryTracker for FakeTracker {
    fn poll_rect(&mut self, cx: &mut Context<'_>) -> Poll<Option<Rect>> {
        Stream::poll_next(Pin::new(&mut self.rx), cx)
    }

    fn cleanup(&mut self) {
        self.cleaned.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}

#[derive(Debug, Default)]
struct BridgeState {
    /// Scripted enumeration results; the last one repeats
    listings: VecDeque<Vec<FrameInfo>>,
    last: Option<Vec<FrameInfo>>,
    list_calls: usize,
    injections: Vec<FrameId>,
    failing: HashSet<FrameId>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeBridge {
    inner: Mutex<BridgeState>,
}

impl FakeBridge {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_listing(&self, frames: Vec<FrameInfo>) {
        self.inner.lock().unwrap().listings.push_back(frames);
    }

    pub(crate) fn fail_injection(&self, frame_id: FrameId, fail: bool) {
        let mut state = self.inner.lock().unwrap();
        if fail {
            state.failing.insert(frame_id);
        } else {
            state.failing.remove(&frame_id);
        }
    }

    pub(crate) fn injections(&self) -> Vec<FrameId> {
        self.inner.lock().unwrap().injections.clone()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }
}

impl HostBridge for FakeBridge {
    fn list_frames(&self) -> BoxFuture<'static, Result<Vec<FrameInfo>>> {
        let mut state = self.inner.lock().unwrap();
        state.list_calls += 1;
        let frames = match state.listings.pop_front() {
            Some(frames) => {
                state.last = Some(frames.clone());
                frames
            }
            None => state.last.clone().unwrap_or_default(),
        };
        Box::pin(async move { Ok(frames) })
    }

    fn inject(&self, frame_id: FrameId) -> BoxFuture<'static, Result<()>> {
        let mut state = self.inner.lock().unwrap();
        state.injections.push(frame_id);
        let result = if state.failing.contains(&frame_id) {
            Err(OverlayError::Transport("injection refused".to_string()))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }
}

#[derive(Debug, Default)]
struct TransportState {
    requests: Vec<MethodCall>,
    notifies: Vec<(FrameId, String)>,
    /// Frames that answer with a clean failure
    dead: HashSet<FrameId>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    inner: Mutex<TransportState>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn mark_dead(&self, frame_id: FrameId) {
        self.inner.lock().unwrap().dead.insert(frame_id);
    }

    pub(crate) fn requests(&self) -> Vec<MethodCall> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub(crate) fn notifies(&self) -> Vec<(FrameId, String)> {
        self.inner.lock().unwrap().notifies.clone()
    }
}

impl Transport for FakeTransport {
    fn request(&self, call: MethodCall) -> BoxFuture<'static, Result<Response>> {
        let mut state = self.inner.lock().unwrap();
        let id = call.id;
        let frame_id = call.frame_id;
        let dead = state.dead.contains(&frame_id);
        state.requests.push(call);
        Box::pin(async move {
            if dead {
                Err(OverlayError::FrameGone(frame_id))
            } else {
                Ok(Response {
                    id,
                    result: Some(serde_json::json!({})),
                    error: None,
                })
            }
        })
    }

    fn notify(
        &self,
        frame_id: FrameId,
        method: std::borrow::Cow<'static, str>,
        _params: serde_json::Value,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .notifies
            .push((frame_id, method.to_string()));
        Ok(())
    }
}
