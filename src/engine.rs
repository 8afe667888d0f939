use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::channel::oneshot::channel as oneshot_channel;
use futures::SinkExt;

use danmakuoxide_types::{Command, CommandResponse, Comment, FrameId, Method};

use crate::bridge::{HostBridge, Transport};
use crate::cmd::{to_command_response, CommandMessage};
use crate::error::{OverlayError, Result};
use crate::handler::frame::Frame;
use crate::handler::{Handler, HandlerMessage};
use crate::protocol::{
    EnterPictureInPictureParams, MountParams, OverlayEvent, ResizeParams, SeekParams,
    SetVisibleParams, UnmountParams, UpdateConfigParams,
};

/// Default interval between two discovery cycles
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Frame urls that never host the overlay
pub const DEFAULT_DENYLIST: &[&str] = &["about:blank"];
/// Default selector the injected contexts observe
pub const DEFAULT_SELECTOR: &str = "video";

/// The controller-side front end of the overlay engine.
///
/// [`Engine::launch`] returns the engine together with its [`Handler`]; the
/// handler is a stream the embedder must drive, the engine talks to it over
/// a channel. Playback-control commands are routed to the currently active
/// frame.
#[derive(Debug, Clone)]
pub struct Engine {
    sender: Sender<HandlerMessage>,
    config: EngineConfig,
}

impl Engine {
    pub fn launch(
        config: EngineConfig,
        bridge: Arc<dyn HostBridge>,
        transport: Arc<dyn Transport>,
        frame_events: Receiver<(FrameId, OverlayEvent)>,
    ) -> (Self, Handler) {
        let (tx, rx) = channel(1);
        let handler = Handler::new(bridge, transport, config.clone(), rx, frame_events);
        (
            Self {
                sender: tx,
                config,
            },
            handler,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the frame directory.
    pub async fn frames(&self) -> Result<Vec<Frame>> {
        let (tx, rx) = oneshot_channel();
        self.send(HandlerMessage::GetFrames(tx)).await?;
        rx.await.map_err(|_| OverlayError::Stopped)
    }

    /// The frame playback-control commands currently target.
    pub async fn active_frame(&self) -> Result<Option<FrameId>> {
        let (tx, rx) = oneshot_channel();
        self.send(HandlerMessage::GetActiveFrame(tx)).await?;
        rx.await.map_err(|_| OverlayError::Stopped)
    }

    /// Execute a typed command against the active frame.
    pub async fn execute<T: Command>(&self, cmd: T) -> Result<CommandResponse<T::Response>> {
        let (tx, rx) = oneshot_channel();
        let method = cmd.identifier();
        let msg = CommandMessage::new(cmd, tx)?;
        self.send(HandlerMessage::Command(msg)).await?;
        let resp = rx.await.map_err(|_| OverlayError::Stopped)??;
        to_command_response::<T>(resp, method)
    }

    /// Execute a typed command against a specific frame.
    pub async fn execute_on<T: Command>(
        &self,
        frame_id: FrameId,
        cmd: T,
    ) -> Result<CommandResponse<T::Response>> {
        let (tx, rx) = oneshot_channel();
        let method = cmd.identifier();
        let msg = CommandMessage::with_frame(cmd, frame_id, tx)?;
        self.send(HandlerMessage::Command(msg)).await?;
        let resp = rx.await.map_err(|_| OverlayError::Stopped)??;
        to_command_response::<T>(resp, method)
    }

    /// Hand the active frame a comment set; returns whether the overlay
    /// actually mounted (`false` means buffered awaiting a video).
    pub async fn mount(&self, comments: Vec<Comment>) -> Result<bool> {
        Ok(self.execute(MountParams::new(comments)).await?.result.mounted)
    }

    pub async fn unmount(&self) -> Result<()> {
        self.execute(UnmountParams::default()).await?;
        Ok(())
    }

    pub async fn seek(&self, time: f64) -> Result<()> {
        self.execute(SeekParams::new(time)).await?;
        Ok(())
    }

    pub async fn show(&self) -> Result<()> {
        self.execute(SetVisibleParams::new(true)).await?;
        Ok(())
    }

    pub async fn hide(&self) -> Result<()> {
        self.execute(SetVisibleParams::new(false)).await?;
        Ok(())
    }

    /// Force a geometry re-check in the active frame.
    pub async fn resize(&self) -> Result<()> {
        self.execute(ResizeParams::default()).await?;
        Ok(())
    }

    /// Pass a partial renderer configuration update through.
    pub async fn update_config(&self, config: serde_json::Value) -> Result<()> {
        self.execute(UpdateConfigParams::new(config)).await?;
        Ok(())
    }

    pub async fn enter_picture_in_picture(&self) -> Result<()> {
        self.execute(EnterPictureInPictureParams::default()).await?;
        Ok(())
    }

    /// Page visibility gates the discovery loop: hiding the page suspends
    /// polling, showing it resumes with one immediate cycle.
    pub async fn set_visibility(&self, visible: bool) -> Result<()> {
        self.send(HandlerMessage::SetVisibility(visible)).await
    }

    /// Stop the discovery loop; the handler stream ends. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.send(HandlerMessage::Stop).await
    }

    async fn send(&self, msg: HandlerMessage) -> Result<()> {
        self.sender
            .clone()
            .send(msg)
            .await
            .map_err(|_| OverlayError::Stopped)
    }
}

/// How the discovery loop is configured.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between two frame enumeration cycles.
    pub poll_interval: Duration,
    /// Known-bad frame urls, matched by prefix or by host.
    pub denylist: Vec<String>,
    /// Video element selector the injected contexts observe.
    pub selector: String,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::builder().build()
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    poll_interval: Duration,
    denylist: Vec<String>,
    selector: String,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            selector: DEFAULT_SELECTOR.to_string(),
        }
    }
}

impl EngineConfigBuilder {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Add one denylist entry.
    pub fn deny(mut self, entry: impl Into<String>) -> Self {
        self.denylist.push(entry.into());
        self
    }

    /// Replace the denylist.
    pub fn denylist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denylist = entries.into_iter().map(Into::into).collect();
        self
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    pub fn build(self) -> EngineConfig {
        EngineConfig {
            poll_interval: self.poll_interval,
            denylist: self.denylist,
            selector: self.selector,
        }
    }
}
