use std::time::{Duration, Instant};

use danmakuoxide_types::VideoId;

/// Outcome of the gate, ready to be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GatedEvent {
    /// The active element changed to this video
    Change(VideoId),
    /// The active element changed to none
    Removed,
}

/// Coalesces arbitration outcomes into throttled emissions.
///
/// At most one emission per throttle window (trailing edge, a suppressed
/// emission fires once the window elapses). A transition to "no video" is
/// additionally held for the debounce window and cancelled entirely when the
/// published element is reinstated before the deadline, since hosts
/// routinely detach-and-reattach the same element during internal
/// re-renders. Pending state always coalesces to the latest submitted
/// outcome.
#[derive(Debug)]
pub(crate) struct EmitGate {
    throttle: Duration,
    debounce: Duration,
    last_emit: Option<Instant>,
    /// The last outcome made public
    published: Option<VideoId>,
    pending: Option<Pending>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    target: Option<VideoId>,
    due: Instant,
    /// Emit even though the target equals the published element
    forced: bool,
}

impl EmitGate {
    pub(crate) fn new(throttle: Duration, debounce: Duration) -> Self {
        Self {
            throttle,
            debounce,
            last_emit: None,
            published: None,
            pending: None,
        }
    }

    /// Submit the latest computed active element.
    pub(crate) fn submit(&mut self, target: Option<VideoId>, now: Instant) {
        if target == self.published {
            // back to the published state before anything was emitted
            if !self.pending.map(|p| p.forced).unwrap_or(false) {
                self.pending = None;
            }
            return;
        }
        let base = if target.is_none() {
            now + self.debounce
        } else {
            now
        };
        self.pending = Some(Pending {
            target,
            due: self.gated(base),
            forced: false,
        });
    }

    /// Queue a fresh change emission for the published element, used when
    /// the element stayed the same but its content did not.
    pub(crate) fn force_change(&mut self, video: VideoId, now: Instant) {
        self.pending = Some(Pending {
            target: Some(video),
            due: self.gated(now),
            forced: true,
        });
    }

    fn gated(&self, base: Instant) -> Instant {
        match self.last_emit {
            Some(last) if last + self.throttle > base => last + self.throttle,
            _ => base,
        }
    }

    /// The instant at which [`EmitGate::poll`] will produce the pending
    /// emission, if one is queued.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due)
    }

    /// Produce the pending emission once it is due.
    pub(crate) fn poll(&mut self, now: Instant) -> Option<GatedEvent> {
        let pending = self.pending?;
        if pending.due > now {
            return None;
        }
        self.pending = None;
        self.last_emit = Some(now);
        self.published = pending.target;
        Some(match pending.target {
            Some(video) => GatedEvent::Change(video),
            None => GatedEvent::Removed,
        })
    }

    pub(crate) fn reset(&mut self) {
        self.last_emit = None;
        self.published = None;
        self.pending = None;
    }
}
