use std::collections::HashSet;

use fnv::FnvHashMap;
use tracing::{debug, warn};
use url::Url;

use danmakuoxide_types::{DocumentId, FrameId};

use crate::bridge::FrameInfo;

/// Document identity given to the synthesized frame while enumeration is
/// broken. Never equals a real document id, so leaving fallback mode always
/// re-injects.
const SYNTHETIC_DOCUMENT: &str = "synthetic-document";
const SYNTHETIC_URL: &str = "about:current";

/// A known browsing context of the tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_id: FrameId,
    pub url: String,
    pub document_id: DocumentId,
    /// Whether the current document was injected successfully
    pub injected: bool,
}

/// Which enumeration source the directory currently trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationMode {
    Normal,
    /// Enumeration reported nothing on the very first poll even though at
    /// least the current document exists; a synthetic frame stands in until
    /// a non-empty report arrives.
    Fallback,
}

/// Work a poll cycle produced for the handler.
#[derive(Debug, Default)]
pub(crate) struct FrameUpdate {
    /// Frames whose current document needs an injection attempt
    pub inject: Vec<(FrameId, DocumentId)>,
    pub removed: Vec<FrameId>,
    pub appeared: Vec<FrameId>,
    pub entered_fallback: bool,
    pub left_fallback: bool,
}

/// Maintains the cross-frame directory: which contexts exist, which document
/// each currently holds, whether that document was injected, and which frame
/// playback-control commands target.
#[derive(Debug)]
pub struct FrameManager {
    frames: FnvHashMap<FrameId, Frame>,
    active: Option<FrameId>,
    /// Document per frame for which injection was last attempted
    attempted: FnvHashMap<FrameId, DocumentId>,
    mode: EnumerationMode,
    polled_once: bool,
    denylist: Vec<String>,
}

impl FrameManager {
    pub fn new(denylist: Vec<String>) -> Self {
        Self {
            frames: Default::default(),
            active: None,
            attempted: Default::default(),
            mode: EnumerationMode::Normal,
            polled_once: false,
            denylist,
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> + '_ {
        self.frames.values()
    }

    pub fn frame(&self, id: &FrameId) -> Option<&Frame> {
        self.frames.get(id)
    }

    pub fn active_frame(&self) -> Option<FrameId> {
        self.active
    }

    pub fn mode(&self) -> EnumerationMode {
        self.mode
    }

    /// Feed one enumeration result into the directory and compute the work
    /// needed to restore its invariants.
    pub(crate) fn apply(&mut self, reported: Vec<FrameInfo>) -> FrameUpdate {
        let raw_empty = reported.is_empty();
        let mut update = FrameUpdate::default();

        if !self.polled_once {
            self.polled_once = true;
            if raw_empty {
                warn!("first enumeration returned no frames, entering fallback mode");
                self.mode = EnumerationMode::Fallback;
                update.entered_fallback = true;
                let synthetic = FrameInfo::new(
                    FrameId::TOP,
                    SYNTHETIC_URL,
                    DocumentId::from(SYNTHETIC_DOCUMENT),
                );
                self.converge(vec![synthetic], &mut update);
                return update;
            }
            let filtered = self.filter_denylisted(reported);
            self.converge(filtered, &mut update);
            return update;
        }

        match self.mode {
            EnumerationMode::Fallback => {
                if raw_empty {
                    // still broken, treat as "no change" to avoid flapping
                    return update;
                }
                debug!("enumeration recovered, leaving fallback mode");
                self.mode = EnumerationMode::Normal;
                update.left_fallback = true;
                let filtered = self.filter_denylisted(reported);
                self.converge(filtered, &mut update);
                update
            }
            EnumerationMode::Normal => {
                let filtered = self.filter_denylisted(reported);
                self.converge(filtered, &mut update);
                update
            }
        }
    }

    /// A pending injection finished successfully.
    pub(crate) fn on_injected(&mut self, frame_id: FrameId, document_id: &DocumentId) {
        if let Some(frame) = self.frames.get_mut(&frame_id) {
            // the document may have changed again while the call was in flight
            if frame.document_id == *document_id {
                frame.injected = true;
            }
        }
    }

    /// A pending injection failed; forget the attempt so the next cycle
    /// retries it.
    pub(crate) fn on_injection_failed(&mut self, frame_id: FrameId, document_id: &DocumentId) {
        if self.attempted.get(&frame_id) == Some(document_id) {
            self.attempted.remove(&frame_id);
        }
    }

    fn filter_denylisted(&self, reported: Vec<FrameInfo>) -> Vec<FrameInfo> {
        reported
            .into_iter()
            .filter(|info| {
                if self.is_denylisted(&info.url) {
                    debug!(frame = %info.frame_id, url = %info.url, "frame url is denylisted");
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    fn is_denylisted(&self, url_str: &str) -> bool {
        if self.denylist.is_empty() {
            return false;
        }
        let host = Url::parse(url_str)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        self.denylist.iter().any(|entry| {
            url_str.starts_with(entry.as_str()) || host.as_deref() == Some(entry.as_str())
        })
    }

    fn converge(&mut self, current: Vec<FrameInfo>, update: &mut FrameUpdate) {
        let current_ids: HashSet<FrameId> = current.iter().map(|info| info.frame_id).collect();
        let removed: Vec<FrameId> = self
            .frames
            .keys()
            .filter(|id| !current_ids.contains(id))
            .copied()
            .collect();
        for frame_id in removed {
            self.frames.remove(&frame_id);
            self.attempted.remove(&frame_id);
            if self.active == Some(frame_id) {
                debug!(frame = %frame_id, "active frame disappeared");
                self.active = None;
            }
            update.removed.push(frame_id);
        }

        for info in current {
            if !self.frames.contains_key(&info.frame_id) {
                update.appeared.push(info.frame_id);
                if self.active.is_none() {
                    self.active = Some(info.frame_id);
                }
            }
            let needs_injection = self.attempted.get(&info.frame_id) != Some(&info.document_id);
            {
                let frame = self
                    .frames
                    .entry(info.frame_id)
                    .or_insert_with(|| Frame {
                        frame_id: info.frame_id,
                        url: String::new(),
                        document_id: info.document_id.clone(),
                        injected: false,
                    });
                if frame.document_id != info.document_id {
                    // reloaded document, the old injection is gone
                    frame.injected = false;
                    frame.document_id = info.document_id.clone();
                }
                frame.url = info.url;
            }
            if needs_injection {
                self.attempted
                    .insert(info.frame_id, info.document_id.clone());
                update.inject.push((info.frame_id, info.document_id));
            }
        }
    }
}
