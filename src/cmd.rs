use std::borrow::Cow;

use futures::channel::oneshot::Sender as OneshotSender;

use danmakuoxide_types::{Command, CommandResponse, FrameId, Method, Response};

use crate::error::{OverlayError, Result};

/// A typed command on its way from the [`crate::Engine`] to the
/// [`crate::Handler`], which resolves the target frame and issues it over
/// the transport.
#[derive(Debug)]
pub(crate) struct CommandMessage {
    pub method: Cow<'static, str>,
    pub params: serde_json::Value,
    /// Explicit target frame; `None` routes to the active frame
    pub frame_id: Option<FrameId>,
    pub sender: OneshotSender<Result<Response>>,
}

impl CommandMessage {
    /// A command routed to the currently active frame.
    pub fn new<C: Command>(cmd: C, sender: OneshotSender<Result<Response>>) -> Result<Self> {
        Ok(Self {
            method: cmd.identifier(),
            params: serde_json::to_value(cmd)?,
            frame_id: None,
            sender,
        })
    }

    /// A command pinned to a specific frame.
    pub fn with_frame<C: Command>(
        cmd: C,
        frame_id: FrameId,
        sender: OneshotSender<Result<Response>>,
    ) -> Result<Self> {
        Ok(Self {
            method: cmd.identifier(),
            params: serde_json::to_value(cmd)?,
            frame_id: Some(frame_id),
            sender,
        })
    }
}

/// Deserialize a raw [`Response`] into the command's typed response.
pub(crate) fn to_command_response<T: Command>(
    resp: Response,
    method: Cow<'static, str>,
) -> Result<CommandResponse<T::Response>> {
    if let Some(result) = resp.result {
        let result = serde_json::from_value(result)?;
        Ok(CommandResponse {
            id: resp.id,
            result,
            method,
        })
    } else if let Some(error) = resp.error {
        Err(error.into())
    } else {
        Err(OverlayError::NoResponse)
    }
}
