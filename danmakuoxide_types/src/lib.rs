use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Identifier of one browsing context (top document or nested iframe).
///
/// Stable for the lifetime of the context; a reload keeps the `FrameId` but
/// changes the [`DocumentId`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(i64);

impl FrameId {
    /// The top-level document of a tab.
    pub const TOP: FrameId = FrameId(0);

    pub const fn new(id: i64) -> Self {
        FrameId(id)
    }

    pub const fn inner(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

impl From<i64> for FrameId {
    fn from(id: i64) -> Self {
        FrameId(id)
    }
}

/// Opaque identity of the document currently loaded in a frame.
///
/// Changes on every navigation, even when the [`FrameId`] stays the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        DocumentId(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId(id.to_string())
    }
}

/// Platform issued handle standing in for the identity of one video element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoId(u64);

impl VideoId {
    pub const fn new(id: u64) -> Self {
        VideoId(id)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VideoId({})", self.0)
    }
}

/// Platform issued handle of the positioned overlay layer node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(u64);

impl LayerId {
    pub const fn new(id: u64) -> Self {
        LayerId(id)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerId({})", self.0)
    }
}

/// Axis aligned bounding rectangle in page coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle with no rendered area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0. || self.height <= 0.
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// One scrolling comment as handed to the rendering engine.
///
/// Parsing and formatting of comments happens upstream; this is an opaque
/// payload as far as the overlay engine is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Playback offset in seconds at which the comment enters.
    pub time: f64,
    pub text: String,
}

impl Comment {
    pub fn new(time: f64, text: impl Into<String>) -> Self {
        Self {
            time,
            text: text.into(),
        }
    }
}

/// A request sent to the runtime injected into one frame
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct MethodCall {
    /// Identifier for this method call
    ///
    /// [`MethodCall`] id's must be unique per connection
    pub id: CallId,
    #[serde(rename = "frameId")]
    pub frame_id: FrameId,
    pub method: Cow<'static, str>,
    pub params: serde_json::Value,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(usize);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

impl CallId {
    pub fn new(id: usize) -> Self {
        CallId(id)
    }
}

pub trait Command: serde::ser::Serialize + Method {
    type Response: serde::de::DeserializeOwned + fmt::Debug;
}

#[derive(Debug)]
pub struct CommandResponse<T>
where
    T: fmt::Debug,
{
    pub id: CallId,
    pub result: T,
    pub method: Cow<'static, str>,
}

pub type CommandResult<T> = Result<CommandResponse<T>, Error>;

impl<T: fmt::Debug> Deref for CommandResponse<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.result
    }
}

pub trait Event: Method + DeserializeOwned {}

pub trait Method {
    /// The whole string identifier for this method like: `Overlay.mount`
    fn identifier(&self) -> Cow<'static, str>;

    /// The name of the domain this method belongs to: `Overlay`
    fn domain_name(&self) -> Cow<'static, str> {
        self.split().0
    }

    /// The standalone identifier of the method inside the domain: `mount`
    fn method_name(&self) -> Cow<'static, str> {
        self.split().1
    }

    /// Tuple of (`domain_name`, `method_name`) : (`Overlay`, `mount`)
    fn split(&self) -> (Cow<'static, str>, Cow<'static, str>) {
        match self.identifier() {
            Cow::Borrowed(id) => {
                let mut iter = id.split('.');
                (iter.next().unwrap().into(), iter.next().unwrap().into())
            }
            Cow::Owned(id) => {
                let mut iter = id.split('.');
                (
                    Cow::Owned(iter.next().unwrap().into()),
                    Cow::Owned(iter.next().unwrap().into()),
                )
            }
        }
    }
}

/// A response to a [`MethodCall`] from the injected runtime
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Response {
    /// Numeric identifier for the exact request
    pub id: CallId,
    /// The response payload
    pub result: Option<serde_json::Value>,
    /// The reason why the [`MethodCall`] failed.
    pub error: Option<Error>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
pub enum Message<T> {
    Response(Response),
    Event(T),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
    /// Error code
    pub code: i64,
    /// Error Message
    pub message: String,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}
