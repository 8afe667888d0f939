use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::{debug, warn};

use danmakuoxide_types::{Comment, LayerId, Rect, VideoId};

use crate::dom::{
    CommentRenderer, GeometryTracker, GeometryTrackerFactory, LayerHost, RendererFactory,
    VideoDom,
};
use crate::error::{OverlayError, Result};

/// Owns the overlay layer of one context and the comment rendering engine
/// instance mounted inside it.
///
/// Mount state follows video presence and comment availability: a comment
/// set handed over while no video is active is buffered and mounted
/// automatically on the next active-video change. Rendering engine and
/// geometry failures are isolated per event; they are logged and never
/// propagate.
pub struct OverlayManager {
    dom: Arc<dyn VideoDom>,
    layers: Arc<dyn LayerHost>,
    renderers: Box<dyn RendererFactory>,
    trackers: Box<dyn GeometryTrackerFactory>,
    /// Buffered comment set, survives video removal
    comments: Option<Vec<Comment>>,
    /// The engine instance; `Some` means mounted
    renderer: Option<Box<dyn CommentRenderer>>,
    tracker: Option<Box<dyn GeometryTracker>>,
    layer: Option<LayerId>,
    video: Option<VideoId>,
    in_pip: bool,
}

impl OverlayManager {
    pub fn new(
        dom: Arc<dyn VideoDom>,
        layers: Arc<dyn LayerHost>,
        renderers: Box<dyn RendererFactory>,
        trackers: Box<dyn GeometryTrackerFactory>,
    ) -> Self {
        Self {
            dom,
            layers,
            renderers,
            trackers,
            comments: None,
            renderer: None,
            tracker: None,
            layer: None,
            video: None,
            in_pip: false,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn has_comments(&self) -> bool {
        self.comments.is_some()
    }

    pub fn video(&self) -> Option<VideoId> {
        self.video
    }

    /// Record the comment set and mount the engine if a video is active.
    ///
    /// Returns whether the engine was actually mounted; `false` means the
    /// set was buffered awaiting a video. Mounting again replaces a live
    /// engine instance with a fresh one, the engine leaves orphaned
    /// animation state behind when reused across comment sets.
    pub fn mount(&mut self, comments: Vec<Comment>) -> Result<bool> {
        self.comments = Some(comments);
        if self.video.is_none() {
            debug!("no active video, comment set buffered");
            return Ok(false);
        }
        self.do_mount();
        Ok(self.is_mounted())
    }

    /// Unmount the engine and clear all comment state.
    ///
    /// Never fails; when nothing is mounted only the buffered comments are
    /// dropped.
    pub fn unmount(&mut self) {
        self.comments = None;
        if let Some(mut renderer) = self.renderer.take() {
            renderer.destroy();
            self.layers.remove_layer();
            self.layer = None;
        }
    }

    /// The context's active video changed.
    pub fn on_video_change(&mut self, video: VideoId) {
        self.clear_tracker();
        self.tracker = Some(self.trackers.track(video));
        self.video = Some(video);
        if self.layer.is_some() {
            self.layers.set_layer_visible(true);
        }
        if self.comments.is_some() {
            // deferred or re-bound mount against the new element
            self.do_mount();
        }
        if let Some(rect) = self.dom.video_rect(video) {
            self.apply_rect(rect);
        }
    }

    /// The context no longer has an active video.
    ///
    /// Destroys the engine and hides the layer but keeps the buffered
    /// comment set, so the next video change remounts automatically.
    pub fn on_video_removed(&mut self) {
        self.clear_tracker();
        if let Some(mut renderer) = self.renderer.take() {
            renderer.destroy();
        }
        if self.layer.is_some() {
            self.layers.set_layer_visible(false);
        }
        self.video = None;
    }

    /// Seek the active video.
    pub fn seek(&mut self, time: f64) -> Result<()> {
        let video = self.video.ok_or(OverlayError::NoActiveVideo)?;
        self.dom.seek(video, time)
    }

    pub fn show(&mut self) {
        self.set_visible(true)
    }

    pub fn hide(&mut self) {
        self.set_visible(false)
    }

    fn set_visible(&mut self, visible: bool) {
        if self.layer.is_some() {
            self.layers.set_layer_visible(visible);
        }
        if let Some(renderer) = self.renderer.as_mut() {
            let res = if visible {
                renderer.show()
            } else {
                renderer.hide()
            };
            if let Err(err) = res {
                warn!("renderer visibility toggle failed: {err}");
            }
        }
    }

    /// Force a geometry re-check against the tracked video.
    pub fn resize(&mut self) {
        if let Some(video) = self.video {
            if let Some(rect) = self.dom.video_rect(video) {
                self.apply_rect(rect);
            }
        }
    }

    /// Pass a partial configuration update through to the engine.
    pub fn update_config(&mut self, config: &serde_json::Value) {
        match self.renderer.as_mut() {
            Some(renderer) => {
                if let Err(err) = renderer.update_config(config) {
                    warn!("renderer config update failed: {err}");
                }
            }
            None => debug!("config update while unmounted ignored"),
        }
    }

    /// Relocate the video and the overlay layer into the host's
    /// picture-in-picture surface.
    pub fn enter_picture_in_picture(&mut self) -> Result<()> {
        let video = self.video.ok_or(OverlayError::NoActiveVideo)?;
        let layer = match self.layer {
            Some(layer) => layer,
            None => {
                let layer = self.layers.ensure_layer();
                self.layer = Some(layer);
                layer
            }
        };
        self.layers.move_to_pip(video, layer)?;
        self.in_pip = true;
        Ok(())
    }

    /// The picture-in-picture surface closed; move everything back and
    /// re-check geometry.
    pub fn on_pip_closed(&mut self) {
        if !self.in_pip {
            return;
        }
        self.in_pip = false;
        if let Err(err) = self.layers.restore_from_pip() {
            warn!("restoring from picture-in-picture failed: {err}");
        }
        self.resize();
    }

    /// Drain pending rectangle changes of the tracked video.
    pub(crate) fn poll_geometry(&mut self, cx: &mut Context<'_>) {
        loop {
            let poll = match self.tracker.as_mut() {
                Some(tracker) => tracker.poll_rect(cx),
                None => return,
            };
            match poll {
                Poll::Ready(Some(rect)) => self.apply_rect(rect),
                Poll::Ready(None) => {
                    self.tracker = None;
                    return;
                }
                Poll::Pending => return,
            }
        }
    }

    /// Tear everything down. Idempotent.
    pub fn teardown(&mut self) {
        self.clear_tracker();
        if let Some(mut renderer) = self.renderer.take() {
            renderer.destroy();
        }
        if self.layer.take().is_some() {
            self.layers.remove_layer();
        }
        self.comments = None;
        self.video = None;
        self.in_pip = false;
    }

    fn clear_tracker(&mut self) {
        if let Some(mut tracker) = self.tracker.take() {
            tracker.cleanup();
        }
    }

    fn apply_rect(&mut self, rect: Rect) {
        if self.layer.is_none() {
            return;
        }
        self.layers.set_layer_rect(rect);
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(err) = renderer.resize(rect) {
                warn!("renderer re-layout failed: {err}");
            }
        }
    }

    fn do_mount(&mut self) {
        let video = match self.video {
            Some(video) => video,
            None => return,
        };
        let comments = match self.comments.as_ref() {
            Some(comments) => comments,
            None => return,
        };
        if let Some(mut old) = self.renderer.take() {
            old.destroy();
        }
        let layer = match self.layer {
            Some(layer) => layer,
            None => {
                let layer = self.layers.ensure_layer();
                self.layer = Some(layer);
                layer
            }
        };
        match self.renderers.create(layer, video, comments) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.layers.set_layer_visible(true);
            }
            Err(err) => {
                warn!(%video, "failed to create comment renderer: {err}");
            }
        }
    }
}

impl std::fmt::Debug for OverlayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayManager")
            .field("mounted", &self.is_mounted())
            .field("has_comments", &self.has_comments())
            .field("video", &self.video)
            .field("in_pip", &self.in_pip)
            .finish()
    }
}
