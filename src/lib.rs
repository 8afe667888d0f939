//! Keeps a danmaku comment overlay attached to live video across the
//! nested browsing contexts of a tab.
//!
//! The host platform exposes no reliable "list every frame and every video
//! and notify me instantly" primitive, so the engine reconstructs that state
//! itself: a controller-side [`Handler`] polls the frame enumeration,
//! injects the overlay runtime into live documents and keeps a frame
//! directory converged, while a [`FrameContext`] inside every injected
//! document arbitrates between its video elements and keeps the rendering
//! layer mounted, sized and populated for whichever one is active.
//!
//! All platform access goes through the trait seams in [`bridge`] and
//! [`dom`]; the two sides only ever talk through the [`bridge::Transport`]
//! collaborator, no shared memory crosses a frame boundary.

pub use danmakuoxide_types as types;

pub mod bridge;
mod cmd;
pub mod context;
pub mod dom;
pub mod engine;
pub mod error;
pub mod handler;
pub mod overlay;
pub mod protocol;
pub mod subscribe;
#[cfg(test)]
pub(crate) mod testutil;
mod throttle;
pub mod video;

pub use crate::context::{ContextHandle, FrameContext};
pub use crate::engine::{Engine, EngineConfig};
pub use crate::error::{OverlayError, Result};
pub use crate::handler::{Handler, HandlerEvent};
pub use crate::overlay::OverlayManager;
pub use crate::video::{VideoEvent, VideoManager};
