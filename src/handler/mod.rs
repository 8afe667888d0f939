use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use futures::channel::mpsc::Receiver;
use futures::channel::oneshot::Sender as OneshotSender;
use futures::future::BoxFuture;
use futures::stream::{Fuse, FuturesUnordered, Stream, StreamExt};
use futures::task::{Context, Poll};
use futures::Future;
use tracing::{debug, warn};

use danmakuoxide_types::{CallId, DocumentId, FrameId, MethodCall};

use crate::bridge::{FrameInfo, HostBridge, Transport};
use crate::cmd::CommandMessage;
use crate::engine::EngineConfig;
use crate::error::{OverlayError, Result};
use crate::handler::frame::{Frame, FrameManager, FrameUpdate};
use crate::handler::job::PeriodicJob;
use crate::protocol::{DetachParams, OverlayEvent};

pub mod frame;
mod job;

/// The controller side of the overlay engine.
///
/// Drives the discovery loop: enumerate the tab's frames on a fixed
/// interval, inject the overlay runtime wherever a live document lacks it,
/// converge the frame directory and route playback-control commands to the
/// active frame. Everything is driven by polling this stream.
#[must_use = "streams do nothing unless polled"]
pub struct Handler {
    bridge: Arc<dyn HostBridge>,
    transport: Arc<dyn Transport>,
    frames: FrameManager,
    from_engine: Fuse<Receiver<HandlerMessage>>,
    /// Events reported back by the injected runtimes
    frame_events: Fuse<Receiver<(FrameId, OverlayEvent)>>,
    poll_job: PeriodicJob,
    /// The in-flight enumeration, at most one per cycle
    enumeration: Option<BoxFuture<'static, Result<Vec<FrameInfo>>>>,
    /// In-flight injections, resolved to the attempt they belong to
    injections: FuturesUnordered<BoxFuture<'static, (FrameId, DocumentId, Result<()>)>>,
    /// In-flight frame requests; each delivers to its oneshot sender itself
    requests: FuturesUnordered<BoxFuture<'static, ()>>,
    queued_events: VecDeque<HandlerEvent>,
    next_call_id: usize,
    running: bool,
}

impl Handler {
    pub(crate) fn new(
        bridge: Arc<dyn HostBridge>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        rx: Receiver<HandlerMessage>,
        frame_events: Receiver<(FrameId, OverlayEvent)>,
    ) -> Self {
        Self {
            bridge,
            transport,
            frames: FrameManager::new(config.denylist),
            from_engine: rx.fuse(),
            frame_events: frame_events.fuse(),
            poll_job: PeriodicJob::new(config.poll_interval),
            enumeration: None,
            injections: Default::default(),
            requests: Default::default(),
            queued_events: Default::default(),
            next_call_id: 0,
            running: true,
        }
    }

    /// Snapshot of the frame directory.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.frames.frames()
    }

    pub fn active_frame(&self) -> Option<FrameId> {
        self.frames.active_frame()
    }

    fn next_call_id(&mut self) -> CallId {
        let id = CallId::new(self.next_call_id);
        self.next_call_id = self.next_call_id.wrapping_add(1);
        id
    }

    /// Resolve the target frame and issue the command over the transport.
    fn submit_command(&mut self, msg: CommandMessage) {
        let frame_id = match msg.frame_id {
            Some(frame_id) => {
                if self.frames.frame(&frame_id).is_none() {
                    let _ = msg.sender.send(Err(OverlayError::NoSuchFrame(frame_id)));
                    return;
                }
                frame_id
            }
            None => match self.frames.active_frame() {
                Some(frame_id) => frame_id,
                None => {
                    let _ = msg.sender.send(Err(OverlayError::NoActiveFrame));
                    return;
                }
            },
        };
        let call = MethodCall {
            id: self.next_call_id(),
            frame_id,
            method: msg.method,
            params: msg.params,
        };
        let fut = self.transport.request(call);
        let tx = msg.sender;
        self.requests.push(Box::pin(async move {
            let _ = tx.send(fut.await);
        }));
    }

    /// Page visibility gates the poll loop; returning to a visible page
    /// runs one cycle immediately.
    fn set_visibility(&mut self, visible: bool) {
        if visible {
            self.poll_job.resume();
        } else {
            debug!("page hidden, suspending frame discovery");
            self.poll_job.pause();
        }
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        // dropping the in-flight futures discards their results
        self.enumeration = None;
        self.injections.clear();
        self.requests.clear();
        self.queued_events.clear();
    }

    fn on_enumeration(&mut self, result: Result<Vec<FrameInfo>>) {
        match result {
            Ok(reported) => {
                let update = self.frames.apply(reported);
                self.process_update(update);
            }
            // not fatal, the next cycle retries
            Err(err) => warn!("frame enumeration failed: {err}"),
        }
    }

    fn process_update(&mut self, update: FrameUpdate) {
        if update.entered_fallback {
            self.queued_events.push_back(HandlerEvent::EnteredFallback);
        }
        if update.left_fallback {
            self.queued_events.push_back(HandlerEvent::LeftFallback);
        }
        for frame_id in update.appeared {
            self.queued_events
                .push_back(HandlerEvent::FrameAppeared(frame_id));
        }
        for frame_id in update.removed {
            // best effort teardown; the document is usually already gone and
            // the transport fails cleanly against it
            let _ = self.transport.notify(
                frame_id,
                DetachParams::IDENTIFIER.into(),
                serde_json::json!({}),
            );
            self.queued_events
                .push_back(HandlerEvent::FrameRemoved(frame_id));
        }
        for (frame_id, document_id) in update.inject {
            debug!(frame = %frame_id, doc = %document_id, "injecting overlay runtime");
            let fut = self.bridge.inject(frame_id);
            self.injections.push(Box::pin(async move {
                (frame_id, document_id, fut.await)
            }));
        }
    }
}

impl Stream for Handler {
    type Item = HandlerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        loop {
            if !pin.running {
                return Poll::Ready(None);
            }

            while let Poll::Ready(Some(msg)) = Pin::new(&mut pin.from_engine).poll_next(cx) {
                match msg {
                    HandlerMessage::Command(cmd) => pin.submit_command(cmd),
                    HandlerMessage::GetFrames(tx) => {
                        let _ = tx.send(pin.frames.frames().cloned().collect());
                    }
                    HandlerMessage::GetActiveFrame(tx) => {
                        let _ = tx.send(pin.frames.active_frame());
                    }
                    HandlerMessage::SetVisibility(visible) => pin.set_visibility(visible),
                    HandlerMessage::Stop => {
                        pin.stop();
                        return Poll::Ready(None);
                    }
                }
            }

            while let Poll::Ready(Some((frame_id, event))) =
                Pin::new(&mut pin.frame_events).poll_next(cx)
            {
                pin.queued_events
                    .push_back(HandlerEvent::FrameEvent { frame_id, event });
            }

            if let Some(mut fut) = pin.enumeration.take() {
                match fut.as_mut().poll(cx) {
                    Poll::Ready(result) => pin.on_enumeration(result),
                    Poll::Pending => pin.enumeration = Some(fut),
                }
            }

            while let Poll::Ready(Some((frame_id, document_id, result))) =
                Pin::new(&mut pin.injections).poll_next(cx)
            {
                match result {
                    Ok(()) => {
                        pin.frames.on_injected(frame_id, &document_id);
                        pin.queued_events
                            .push_back(HandlerEvent::Injected { frame_id });
                    }
                    Err(err) => {
                        warn!(
                            frame = %frame_id,
                            doc = %document_id,
                            "injection failed, retrying next cycle: {err}"
                        );
                        pin.frames.on_injection_failed(frame_id, &document_id);
                        pin.queued_events.push_back(HandlerEvent::InjectionFailed {
                            frame_id,
                            error: err.to_string(),
                        });
                    }
                }
            }

            // frame requests deliver to their oneshot senders themselves
            while let Poll::Ready(Some(())) = Pin::new(&mut pin.requests).poll_next(cx) {}

            if pin.enumeration.is_none() && pin.poll_job.is_ready(cx) {
                pin.enumeration = Some(pin.bridge.list_frames());
                // poll the fresh future within this cycle
                continue;
            }

            return match pin.queued_events.pop_front() {
                Some(event) => Poll::Ready(Some(event)),
                None => Poll::Pending,
            };
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("frames", &self.frames)
            .field("running", &self.running)
            .finish()
    }
}

/// Messages the [`crate::Engine`] sends to its handler.
#[derive(Debug)]
pub(crate) enum HandlerMessage {
    Command(CommandMessage),
    GetFrames(OneshotSender<Vec<Frame>>),
    GetActiveFrame(OneshotSender<Option<FrameId>>),
    SetVisibility(bool),
    Stop,
}

/// What the discovery loop observed, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    FrameAppeared(FrameId),
    FrameRemoved(FrameId),
    Injected {
        frame_id: FrameId,
    },
    /// Logged and retried on the next cycle, never fatal to other frames
    InjectionFailed {
        frame_id: FrameId,
        error: String,
    },
    EnteredFallback,
    LeftFallback,
    /// Forwarded from one injected runtime
    FrameEvent {
        frame_id: FrameId,
        event: OverlayEvent,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::FrameInfo;
    use crate::protocol::SeekParams;
    use crate::testutil::{FakeBridge, FakeTransport};
    use futures::channel::{mpsc, oneshot};
    use futures::SinkExt;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig::builder()
            .poll_interval(Duration::from_millis(20))
            .build()
    }

    struct Rig {
        bridge: Arc<FakeBridge>,
        transport: Arc<FakeTransport>,
        handler: Handler,
        tx: mpsc::Sender<HandlerMessage>,
        _events_tx: mpsc::Sender<(FrameId, OverlayEvent)>,
    }

    fn rig() -> Rig {
        let bridge = FakeBridge::new();
        let transport = FakeTransport::new();
        let (tx, rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(16);
        let handler = Handler::new(
            bridge.clone(),
            transport.clone(),
            config(),
            rx,
            events_rx,
        );
        Rig {
            bridge,
            transport,
            handler,
            tx,
            _events_tx: events_tx,
        }
    }

    fn info(id: i64, doc: &str) -> FrameInfo {
        FrameInfo::new(
            FrameId::new(id),
            format!("https://example.com/f{id}"),
            doc.into(),
        )
    }

    async fn collect(handler: &mut Handler, n: usize) -> Vec<HandlerEvent> {
        let mut events = Vec::new();
        while events.len() < n {
            match handler.next().await {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    #[async_std::test]
    async fn first_cycle_discovers_and_injects() {
        let mut rig = rig();
        rig.bridge.push_listing(vec![info(0, "a"), info(7, "b")]);

        let events = collect(&mut rig.handler, 4).await;
        assert_eq!(
            events,
            vec![
                HandlerEvent::FrameAppeared(FrameId::new(0)),
                HandlerEvent::FrameAppeared(FrameId::new(7)),
                HandlerEvent::Injected {
                    frame_id: FrameId::new(0)
                },
                HandlerEvent::Injected {
                    frame_id: FrameId::new(7)
                },
            ]
        );
        assert_eq!(
            rig.bridge.injections(),
            vec![FrameId::new(0), FrameId::new(7)]
        );
        assert_eq!(rig.handler.active_frame(), Some(FrameId::new(0)));
    }

    #[async_std::test]
    async fn fallback_round_trip() {
        let mut rig = rig();
        rig.bridge.push_listing(vec![]);

        let events = collect(&mut rig.handler, 3).await;
        assert_eq!(events[0], HandlerEvent::EnteredFallback);
        assert_eq!(events[1], HandlerEvent::FrameAppeared(FrameId::TOP));
        assert_eq!(
            events[2],
            HandlerEvent::Injected {
                frame_id: FrameId::TOP
            }
        );

        rig.bridge.push_listing(vec![info(3, "real")]);
        let events = collect(&mut rig.handler, 4).await;
        assert_eq!(
            events,
            vec![
                HandlerEvent::LeftFallback,
                HandlerEvent::FrameAppeared(FrameId::new(3)),
                HandlerEvent::FrameRemoved(FrameId::TOP),
                HandlerEvent::Injected {
                    frame_id: FrameId::new(3)
                },
            ]
        );
    }

    #[async_std::test]
    async fn removal_notifies_the_injected_runtime() {
        let mut rig = rig();
        rig.bridge.push_listing(vec![info(1, "a")]);
        collect(&mut rig.handler, 2).await;

        rig.bridge.push_listing(vec![]);
        let events = collect(&mut rig.handler, 1).await;
        assert_eq!(events, vec![HandlerEvent::FrameRemoved(FrameId::new(1))]);
        assert_eq!(
            rig.transport.notifies(),
            vec![(FrameId::new(1), "Context.detach".to_string())]
        );
        assert_eq!(rig.handler.active_frame(), None);
    }

    #[async_std::test]
    async fn failed_injection_is_reported_and_retried() {
        let mut rig = rig();
        rig.bridge.fail_injection(FrameId::new(1), true);
        rig.bridge.push_listing(vec![info(1, "a")]);

        let events = collect(&mut rig.handler, 2).await;
        assert!(matches!(
            events[1],
            HandlerEvent::InjectionFailed { frame_id, .. } if frame_id == FrameId::new(1)
        ));

        // the next cycle retries against the same document
        rig.bridge.fail_injection(FrameId::new(1), false);
        let events = collect(&mut rig.handler, 1).await;
        assert_eq!(
            events,
            vec![HandlerEvent::Injected {
                frame_id: FrameId::new(1)
            }]
        );
        assert_eq!(rig.bridge.injections().len(), 2);
    }

    #[async_std::test]
    async fn commands_route_to_the_active_frame() {
        let mut rig = rig();
        rig.bridge.push_listing(vec![info(2, "a")]);
        collect(&mut rig.handler, 2).await;

        let (otx, orx) = oneshot::channel();
        let msg = CommandMessage::new(SeekParams::new(42.0), otx).unwrap();
        rig.tx.send(HandlerMessage::Command(msg)).await.unwrap();

        // drive the handler until the response got delivered
        futures::future::poll_fn(|cx| {
            let _ = Pin::new(&mut rig.handler).poll_next(cx);
            Poll::Ready(())
        })
        .await;
        let resp = orx.await.unwrap().unwrap();
        assert!(resp.result.is_some());

        let requests = rig.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].frame_id, FrameId::new(2));
        assert_eq!(requests[0].method, "Overlay.seek");
    }

    #[async_std::test]
    async fn command_without_active_frame_fails_typed() {
        let mut rig = rig();
        rig.bridge.push_listing(vec![info(1, "a")]);
        collect(&mut rig.handler, 2).await;
        rig.bridge.push_listing(vec![]);
        collect(&mut rig.handler, 1).await;

        let (otx, orx) = oneshot::channel();
        let msg = CommandMessage::new(SeekParams::new(1.0), otx).unwrap();
        rig.tx.send(HandlerMessage::Command(msg)).await.unwrap();
        futures::future::poll_fn(|cx| {
            let _ = Pin::new(&mut rig.handler).poll_next(cx);
            Poll::Ready(())
        })
        .await;
        assert!(matches!(
            orx.await.unwrap(),
            Err(OverlayError::NoActiveFrame)
        ));
        assert!(rig.transport.requests().is_empty());
    }

    #[async_std::test]
    async fn hidden_page_suspends_polling_until_resume() {
        let mut rig = rig();
        rig.bridge.push_listing(vec![info(1, "a")]);
        collect(&mut rig.handler, 2).await;
        let calls_before = rig.bridge.list_calls();

        rig.tx
            .send(HandlerMessage::SetVisibility(false))
            .await
            .unwrap();
        futures::future::poll_fn(|cx| {
            let _ = Pin::new(&mut rig.handler).poll_next(cx);
            Poll::Ready(())
        })
        .await;
        async_std::task::sleep(Duration::from_millis(60)).await;
        futures::future::poll_fn(|cx| {
            let _ = Pin::new(&mut rig.handler).poll_next(cx);
            Poll::Ready(())
        })
        .await;
        assert_eq!(rig.bridge.list_calls(), calls_before);

        // resume runs one cycle immediately
        rig.bridge.push_listing(vec![info(1, "a"), info(2, "b")]);
        rig.tx
            .send(HandlerMessage::SetVisibility(true))
            .await
            .unwrap();
        let events = collect(&mut rig.handler, 2).await;
        assert_eq!(
            events,
            vec![
                HandlerEvent::FrameAppeared(FrameId::new(2)),
                HandlerEvent::Injected {
                    frame_id: FrameId::new(2)
                },
            ]
        );
    }

    #[async_std::test]
    async fn stop_ends_the_stream() {
        let mut rig = rig();
        rig.bridge.push_listing(vec![info(1, "a")]);
        collect(&mut rig.handler, 2).await;

        rig.tx.send(HandlerMessage::Stop).await.unwrap();
        assert_eq!(rig.handler.next().await, None);
        assert_eq!(rig.handler.next().await, None);
    }
}
