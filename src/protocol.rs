use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use danmakuoxide_types::{Command, Comment, Event, Method, VideoId};

use crate::subscribe::LocalEvent;

/// Hand the injected runtime a comment set to render.
///
/// Mounting while no video is active buffers the set; the overlay mounts by
/// itself once a video becomes active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountParams {
    pub comments: Vec<Comment>,
}

impl MountParams {
    pub const IDENTIFIER: &'static str = "Overlay.mount";

    pub fn new(comments: Vec<Comment>) -> Self {
        Self { comments }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountReturns {
    /// Whether the engine instance was actually mounted, `false` when the
    /// comment set was buffered awaiting a video.
    pub mounted: bool,
}

impl Method for MountParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for MountParams {
    type Response = MountReturns;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnmountParams {}

impl UnmountParams {
    pub const IDENTIFIER: &'static str = "Overlay.unmount";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmountReturns {}

impl Method for UnmountParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for UnmountParams {
    type Response = UnmountReturns;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekParams {
    /// Target playback position in seconds
    pub time: f64,
}

impl SeekParams {
    pub const IDENTIFIER: &'static str = "Overlay.seek";

    pub fn new(time: f64) -> Self {
        Self { time }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekReturns {}

impl Method for SeekParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for SeekParams {
    type Response = SeekReturns;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVisibleParams {
    pub visible: bool,
}

impl SetVisibleParams {
    pub const IDENTIFIER: &'static str = "Overlay.setVisible";

    pub fn new(visible: bool) -> Self {
        Self { visible }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVisibleReturns {}

impl Method for SetVisibleParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for SetVisibleParams {
    type Response = SetVisibleReturns;
}

/// Force a geometry re-check against the tracked video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResizeParams {}

impl ResizeParams {
    pub const IDENTIFIER: &'static str = "Overlay.resize";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeReturns {}

impl Method for ResizeParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for ResizeParams {
    type Response = ResizeReturns;
}

/// Partial configuration update passed through to the rendering engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfigParams {
    pub config: serde_json::Value,
}

impl UpdateConfigParams {
    pub const IDENTIFIER: &'static str = "Overlay.updateConfig";

    pub fn new(config: serde_json::Value) -> Self {
        Self { config }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfigReturns {}

impl Method for UpdateConfigParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for UpdateConfigParams {
    type Response = UpdateConfigReturns;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnterPictureInPictureParams {}

impl EnterPictureInPictureParams {
    pub const IDENTIFIER: &'static str = "Overlay.enterPictureInPicture";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnterPictureInPictureReturns {}

impl Method for EnterPictureInPictureParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for EnterPictureInPictureParams {
    type Response = EnterPictureInPictureReturns;
}

/// Tear the injected runtime down, sent before the controller forgets a
/// frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetachParams {}

impl DetachParams {
    pub const IDENTIFIER: &'static str = "Context.detach";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachReturns {}

impl Method for DetachParams {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Command for DetachParams {
    type Response = DetachReturns;
}

/// The computed active element of one context changed to a video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventVideoChange {
    pub video: VideoId,
}

impl EventVideoChange {
    pub const IDENTIFIER: &'static str = "Overlay.videoChange";
}

impl Method for EventVideoChange {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Event for EventVideoChange {}

impl LocalEvent for EventVideoChange {}

/// The computed active element of one context changed to none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EventVideoRemoved {}

impl EventVideoRemoved {
    pub const IDENTIFIER: &'static str = "Overlay.videoRemoved";
}

impl Method for EventVideoRemoved {
    fn identifier(&self) -> Cow<'static, str> {
        Self::IDENTIFIER.into()
    }
}

impl Event for EventVideoRemoved {}

impl LocalEvent for EventVideoRemoved {}

/// All events the injected runtime reports back to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum OverlayEvent {
    #[serde(rename = "Overlay.videoChange")]
    VideoChange(EventVideoChange),
    #[serde(rename = "Overlay.videoRemoved")]
    VideoRemoved(EventVideoRemoved),
}

impl Method for OverlayEvent {
    fn identifier(&self) -> Cow<'static, str> {
        match self {
            OverlayEvent::VideoChange(_) => EventVideoChange::IDENTIFIER.into(),
            OverlayEvent::VideoRemoved(_) => EventVideoRemoved::IDENTIFIER.into(),
        }
    }
}
