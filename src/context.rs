use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Instant;

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot::{channel as oneshot_channel, Sender as OneshotSender};
use futures::stream::{Fuse, Stream, StreamExt};
use futures::task::{Context, Poll};
use futures::Future;
use futures_timer::Delay;
use tracing::debug;

use danmakuoxide_types::{Error as ProtocolError, MethodCall, Response};

use crate::dom::DomEvent;
use crate::error::{OverlayError, Result};
use crate::overlay::OverlayManager;
use crate::protocol::{
    DetachParams, EnterPictureInPictureParams, EnterPictureInPictureReturns, EventVideoChange,
    EventVideoRemoved, MountParams, MountReturns, OverlayEvent, ResizeParams, ResizeReturns,
    SeekParams, SeekReturns, SetVisibleParams, SetVisibleReturns, UnmountParams, UnmountReturns,
    UpdateConfigParams, UpdateConfigReturns,
};
use crate::video::{VideoEvent, VideoManager};

/// One injected browsing context: the arbitration monitor and the overlay
/// lifecycle manager wired together.
///
/// Controller requests and platform notifications arrive through the
/// [`ContextHandle`]; the stream yields the events to report back to the
/// controller. The embedder drives the stream on its local event loop.
#[must_use = "streams do nothing unless polled"]
pub struct FrameContext {
    video: VideoManager,
    overlay: OverlayManager,
    from_handle: Fuse<UnboundedReceiver<ContextMessage>>,
    queued_events: VecDeque<OverlayEvent>,
    /// Armed to the arbitration gate's next emission deadline
    deadline: Option<Delay>,
    running: bool,
}

impl FrameContext {
    pub fn new(video: VideoManager, overlay: OverlayManager) -> (Self, ContextHandle) {
        let (tx, rx) = unbounded();
        let ctx = Self {
            video,
            overlay,
            from_handle: rx.fuse(),
            queued_events: Default::default(),
            deadline: None,
            running: true,
        };
        (ctx, ContextHandle { sender: tx })
    }

    /// Begin observing the document. An invalid selector fails here,
    /// synchronously, before anything is driven.
    pub fn start(&mut self, selector: &str) -> Result<()> {
        self.video.start(selector, Instant::now())
    }

    pub fn video(&self) -> &VideoManager {
        &self.video
    }

    pub fn video_mut(&mut self) -> &mut VideoManager {
        &mut self.video
    }

    pub fn overlay(&self) -> &OverlayManager {
        &self.overlay
    }

    fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        debug!("tearing down injected context");
        self.running = false;
        // refuse further handle traffic so callers fail cleanly
        self.from_handle.get_mut().close();
        self.video.stop();
        self.overlay.teardown();
    }

    fn on_dom(&mut self, event: DomEvent, now: Instant) {
        match event {
            DomEvent::Mutations(batch) => self.video.on_mutations(&batch, now),
            DomEvent::PlaybackChanged { video, playing } => {
                self.video.on_playback_changed(video, playing, now)
            }
            DomEvent::SourceChanged { video } => self.video.on_source_changed(video, now),
            DomEvent::PipClosed => self.overlay.on_pip_closed(),
        }
    }

    /// Feed due arbitration emissions into the overlay and queue them for
    /// the controller.
    fn pump_video(&mut self, now: Instant) {
        while let Some(event) = self.video.poll(now) {
            match event {
                VideoEvent::Change(video) => {
                    self.overlay.on_video_change(video);
                    self.queued_events
                        .push_back(OverlayEvent::VideoChange(EventVideoChange { video }));
                }
                VideoEvent::Removed => {
                    self.overlay.on_video_removed();
                    self.queued_events
                        .push_back(OverlayEvent::VideoRemoved(EventVideoRemoved {}));
                }
            }
        }
    }

    fn dispatch_call(&mut self, call: MethodCall) -> Response {
        let id = call.id;
        match self.handle_call(call) {
            Ok(result) => Response {
                id,
                result: Some(result),
                error: None,
            },
            Err(err) => Response {
                id,
                result: None,
                error: Some(ProtocolError {
                    code: error_code(&err),
                    message: err.to_string(),
                }),
            },
        }
    }

    fn handle_call(&mut self, call: MethodCall) -> Result<serde_json::Value> {
        match call.method.as_ref() {
            MountParams::IDENTIFIER => {
                let params: MountParams = serde_json::from_value(call.params)?;
                let mounted = self.overlay.mount(params.comments)?;
                Ok(serde_json::to_value(MountReturns { mounted })?)
            }
            UnmountParams::IDENTIFIER => {
                self.overlay.unmount();
                Ok(serde_json::to_value(UnmountReturns {})?)
            }
            SeekParams::IDENTIFIER => {
                let params: SeekParams = serde_json::from_value(call.params)?;
                self.overlay.seek(params.time)?;
                Ok(serde_json::to_value(SeekReturns {})?)
            }
            SetVisibleParams::IDENTIFIER => {
                let params: SetVisibleParams = serde_json::from_value(call.params)?;
                if params.visible {
                    self.overlay.show();
                } else {
                    self.overlay.hide();
                }
                Ok(serde_json::to_value(SetVisibleReturns {})?)
            }
            ResizeParams::IDENTIFIER => {
                self.overlay.resize();
                Ok(serde_json::to_value(ResizeReturns {})?)
            }
            UpdateConfigParams::IDENTIFIER => {
                let params: UpdateConfigParams = serde_json::from_value(call.params)?;
                self.overlay.update_config(&params.config);
                Ok(serde_json::to_value(UpdateConfigReturns {})?)
            }
            EnterPictureInPictureParams::IDENTIFIER => {
                self.overlay.enter_picture_in_picture()?;
                Ok(serde_json::to_value(EnterPictureInPictureReturns {})?)
            }
            DetachParams::IDENTIFIER => {
                self.shutdown();
                Ok(serde_json::to_value(crate::protocol::DetachReturns {})?)
            }
            other => Err(OverlayError::Transport(format!("unknown method {other}"))),
        }
    }
}

impl Stream for FrameContext {
    type Item = OverlayEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        loop {
            if !pin.running {
                return Poll::Ready(None);
            }
            let now = Instant::now();

            while let Poll::Ready(Some(msg)) = Pin::new(&mut pin.from_handle).poll_next(cx) {
                match msg {
                    ContextMessage::Call(call, tx) => {
                        let resp = pin.dispatch_call(call);
                        let _ = tx.send(resp);
                    }
                    ContextMessage::Dom(event) => pin.on_dom(event, now),
                    ContextMessage::Stop => {
                        pin.shutdown();
                        return Poll::Ready(None);
                    }
                }
            }

            pin.pump_video(now);
            pin.overlay.poll_geometry(cx);

            match pin.video.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(now);
                    let delay = pin.deadline.get_or_insert_with(|| Delay::new(wait));
                    delay.reset(wait);
                    if Pin::new(delay).poll(cx).is_ready() {
                        // due already, run the emission pass again
                        continue;
                    }
                }
                None => pin.deadline = None,
            }

            return match pin.queued_events.pop_front() {
                Some(event) => Poll::Ready(Some(event)),
                // a detach processed above ends the stream once drained
                None if !pin.running => Poll::Ready(None),
                None => Poll::Pending,
            };
        }
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("video", &self.video)
            .field("overlay", &self.overlay)
            .field("running", &self.running)
            .finish()
    }
}

/// The embedder's way into a [`FrameContext`]: controller requests and
/// platform notifications go in here.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    sender: UnboundedSender<ContextMessage>,
}

impl ContextHandle {
    /// Dispatch a controller request and await its response.
    ///
    /// Protocol level failures are carried inside the [`Response`]; `Err` is
    /// reserved for a torn-down context.
    pub async fn dispatch(&self, call: MethodCall) -> Result<Response> {
        let (tx, rx) = oneshot_channel();
        self.sender
            .unbounded_send(ContextMessage::Call(call, tx))
            .map_err(|_| OverlayError::Stopped)?;
        rx.await.map_err(|_| OverlayError::Stopped)
    }

    /// Forward a platform change notification.
    pub fn dom_event(&self, event: DomEvent) -> Result<()> {
        self.sender
            .unbounded_send(ContextMessage::Dom(event))
            .map_err(|_| OverlayError::Stopped)
    }

    /// Tear the context down; the stream ends.
    pub fn stop(&self) {
        let _ = self.sender.unbounded_send(ContextMessage::Stop);
    }
}

#[derive(Debug)]
enum ContextMessage {
    Call(MethodCall, OneshotSender<Response>),
    Dom(DomEvent),
    Stop,
}

fn error_code(err: &OverlayError) -> i64 {
    match err {
        OverlayError::Transport(_) => -32601,
        OverlayError::Serde(_) => -32602,
        _ => -32000,
    }
}
