use danmakuoxide_types::{DocumentId, FrameId};
use thiserror::Error;

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// The injected runtime answered with a protocol level error
    #[error("{0}")]
    Remote(#[from] danmakuoxide_types::Error),
    /// The platform rejected the configured video selector.
    ///
    /// Fatal to `start`, there is no fallback selector.
    #[error("invalid video selector {selector:?}")]
    InvalidSelector { selector: String },
    /// A playback control command was issued while no frame is active
    #[error("no active frame")]
    NoActiveFrame,
    /// An operation required an active video but none is selected
    #[error("no active video in this context")]
    NoActiveVideo,
    #[error("frame {0} is not tracked")]
    NoSuchFrame(FrameId),
    /// Script injection into one frame failed; retried on the next poll cycle
    #[error("injection into frame {frame_id} (document {document_id}) failed: {message}")]
    InjectionFailed {
        frame_id: FrameId,
        document_id: DocumentId,
        message: String,
    },
    /// The channel to a frame was torn down before the response arrived
    #[error("frame {0} is gone")]
    FrameGone(FrameId),
    /// The component was stopped while the call was in flight
    #[error("the overlay engine was stopped")]
    Stopped,
    /// A response arrived with neither payload nor error
    #[error("received no response from the injected runtime")]
    NoResponse,
    #[error("{0}")]
    Transport(String),
}

impl OverlayError {
    /// Whether the failure is scoped to a single frame and must never
    /// propagate to siblings or the controller.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            OverlayError::InjectionFailed { .. }
                | OverlayError::FrameGone(_)
                | OverlayError::NoActiveVideo
        )
    }
}
