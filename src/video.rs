use std::sync::Arc;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use tracing::{debug, trace};

use danmakuoxide_types::VideoId;

use crate::dom::{DomMutation, VideoDom, VisibilityProbe};
use crate::error::Result;
use crate::protocol::{EventVideoChange, EventVideoRemoved};
use crate::subscribe::{EventStream, LocalEvent, Subscriptions};
use crate::throttle::{EmitGate, GatedEvent};

/// Minimum spacing between two emissions
pub const EMIT_THROTTLE: Duration = Duration::from_millis(100);
/// Settle time before a removal is published; hosts frequently
/// detach-and-reattach the same element during internal re-renders
pub const REMOVAL_DEBOUNCE: Duration = Duration::from_millis(500);

/// One registered video element of the watched document.
#[derive(Debug)]
struct VideoCandidate {
    playing: bool,
    /// Position in registration order, the final arbitration tie breaker
    order: u64,
}

/// A published arbitration outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoEvent {
    /// The active element changed to this video
    Change(VideoId),
    /// The context no longer has an active video
    Removed,
}

/// Maintains the set of video elements in one document and deterministically
/// selects the single active one.
///
/// Insertion/removal notifications are applied batch-wise in platform
/// delivery order; arbitration runs once per batch so mixed add+remove
/// batches converge to one decision. Emissions go through an [`EmitGate`]
/// before they are published.
pub struct VideoManager {
    dom: Arc<dyn VideoDom>,
    visibility: Box<dyn VisibilityProbe>,
    /// Set while observing; doubles as the running flag
    selector: Option<String>,
    candidates: FnvHashMap<VideoId, VideoCandidate>,
    next_order: u64,
    /// The candidate arbitration currently selects. The published state
    /// trails this through the gate.
    active: Option<VideoId>,
    gate: EmitGate,
    subscriptions: Subscriptions,
}

impl VideoManager {
    pub fn new(dom: Arc<dyn VideoDom>, visibility: Box<dyn VisibilityProbe>) -> Self {
        Self::with_windows(dom, visibility, EMIT_THROTTLE, REMOVAL_DEBOUNCE)
    }

    pub fn with_windows(
        dom: Arc<dyn VideoDom>,
        visibility: Box<dyn VisibilityProbe>,
        throttle: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            dom,
            visibility,
            selector: None,
            candidates: Default::default(),
            next_order: 0,
            active: None,
            gate: EmitGate::new(throttle, debounce),
            subscriptions: Default::default(),
        }
    }

    /// Begin observing the document for insertions/removals matching
    /// `selector`, plus one immediate scan.
    ///
    /// A selector the platform rejects is fatal; there is no fallback.
    pub fn start(&mut self, selector: &str, now: Instant) -> Result<()> {
        if self.selector.is_some() {
            self.stop();
        }
        self.dom.observe(selector)?;
        for video in self.dom.query_all(selector)? {
            self.register(video);
        }
        self.selector = Some(selector.to_string());
        debug!(selector, candidates = self.candidates.len(), "video observation started");
        self.arbitrate(now);
        Ok(())
    }

    /// Synchronously disconnect all observers. Idempotent.
    pub fn stop(&mut self) {
        if self.selector.take().is_none() {
            return;
        }
        self.dom.disconnect();
        self.dom.unwatch_source();
        self.candidates.clear();
        self.active = None;
        self.gate.reset();
        self.subscriptions.clear();
    }

    pub fn is_running(&self) -> bool {
        self.selector.is_some()
    }

    /// The candidate the arbitration rule currently selects.
    pub fn active_video(&self) -> Option<VideoId> {
        self.active
    }

    /// Subscribe to [`EventVideoChange`] / [`EventVideoRemoved`].
    pub fn event_listener<T: LocalEvent>(&mut self) -> EventStream<T> {
        self.subscriptions.listen::<T>()
    }

    /// Apply one notification batch in delivery order, then arbitrate once.
    pub fn on_mutations(&mut self, batch: &[DomMutation], now: Instant) {
        if self.selector.is_none() {
            return;
        }
        for mutation in batch {
            match *mutation {
                DomMutation::Added(video) => self.register(video),
                DomMutation::Removed(video) => {
                    if self.dom.in_picture_in_picture(video) {
                        // the element moved surfaces, it did not go away
                        trace!(%video, "removal is a picture-in-picture relocation");
                        continue;
                    }
                    self.candidates.remove(&video);
                }
            }
        }
        self.arbitrate(now);
    }

    /// A play/pause transition of one registered element.
    pub fn on_playback_changed(&mut self, video: VideoId, playing: bool, now: Instant) {
        if let Some(candidate) = self.candidates.get_mut(&video) {
            candidate.playing = playing;
            self.arbitrate(now);
        }
    }

    /// The source-change sub-observer fired: the active element stayed the
    /// same but now carries different content, so the change is re-raised.
    pub fn on_source_changed(&mut self, video: VideoId, now: Instant) {
        if self.active == Some(video) {
            self.gate.force_change(video, now);
        } else {
            trace!(%video, "source change of a non-active element ignored");
        }
    }

    /// Produce the next due emission, if any.
    pub fn poll(&mut self, now: Instant) -> Option<VideoEvent> {
        match self.gate.poll(now)? {
            GatedEvent::Change(video) => {
                debug!(%video, "active video changed");
                self.subscriptions.publish(EventVideoChange { video });
                Some(VideoEvent::Change(video))
            }
            GatedEvent::Removed => {
                debug!("active video removed");
                self.subscriptions.publish(EventVideoRemoved {});
                Some(VideoEvent::Removed)
            }
        }
    }

    /// When [`VideoManager::poll`] should run next.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.gate.next_deadline()
    }

    fn register(&mut self, video: VideoId) {
        if self.candidates.contains_key(&video) {
            return;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.candidates.insert(
            video,
            VideoCandidate {
                playing: self.dom.is_playing(video),
                order,
            },
        );
    }

    /// Deterministic selection, first matching rule wins: playing and
    /// visible, playing, visible, first-registered.
    fn arbitrate(&mut self, now: Instant) {
        let winner = self
            .candidates
            .iter()
            .map(|(id, candidate)| {
                let rank = match (candidate.playing, self.visibility.is_visible(*id)) {
                    (true, true) => 0u8,
                    (true, false) => 1,
                    (false, true) => 2,
                    (false, false) => 3,
                };
                (rank, candidate.order, *id)
            })
            .min_by_key(|&(rank, order, _)| (rank, order))
            .map(|(_, _, id)| id);

        if winner != self.active {
            match winner {
                Some(video) => self.dom.watch_source(video),
                None => self.dom.unwatch_source(),
            }
            self.active = winner;
            self.gate.submit(winner, now);
        }
    }
}

impl std::fmt::Debug for VideoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoManager")
            .field("selector", &self.selector)
            .field("candidates", &self.candidates.len())
            .field("active", &self.active)
            .finish()
    }
}
