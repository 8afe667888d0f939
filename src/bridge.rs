use std::borrow::Cow;

use futures::future::BoxFuture;

use danmakuoxide_types::{DocumentId, FrameId, MethodCall, Response};

use crate::error::Result;

/// One browsing context as reported by the host's frame enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub url: String,
    pub document_id: DocumentId,
}

impl FrameInfo {
    pub fn new(frame_id: FrameId, url: impl Into<String>, document_id: DocumentId) -> Self {
        Self {
            frame_id,
            url: url.into(),
            document_id,
        }
    }
}

/// Host-side services the controller consumes: frame enumeration and script
/// injection.
///
/// `list_frames` may legitimately return an empty list even when frames
/// exist; the caller compensates with fallback mode. `inject` is idempotent
/// from the caller's side.
pub trait HostBridge: Send + Sync {
    fn list_frames(&self) -> BoxFuture<'static, Result<Vec<FrameInfo>>>;

    fn inject(&self, frame_id: FrameId) -> BoxFuture<'static, Result<()>>;
}

/// The cross-context messaging channel.
///
/// Requests are ordered per frame and delivered at most once; a request
/// against a torn-down frame fails cleanly instead of hanging.
pub trait Transport: Send + Sync {
    fn request(&self, call: MethodCall) -> BoxFuture<'static, Result<Response>>;

    /// Fire-and-forget event towards one frame.
    fn notify(
        &self,
        frame_id: FrameId,
        method: Cow<'static, str>,
        params: serde_json::Value,
    ) -> Result<()>;
}
