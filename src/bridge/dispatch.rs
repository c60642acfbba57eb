//! Ground command dispatch.
//!
//! Each command runs in its own task under a timeout, so a stalled
//! collaborator never reaches the link reader. Failures are logged and
//! counted; nothing here is fatal.

use log::{info, warn};
use tokio::task::JoinHandle;

use super::BridgeContext;
use crate::error::ServiceError;
use crate::metrics;
use crate::services::bounded;
use crate::wire::Command;

#[derive(Clone)]
pub struct Dispatcher {
    ctx: BridgeContext,
}

impl Dispatcher {
    pub fn new(ctx: BridgeContext) -> Self {
        Self { ctx }
    }

    /// Run `command` in the background.
    pub fn dispatch(&self, command: Command) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let label = command.encode();
            if let Err(e) = this.execute(command).await {
                metrics::inc_commands_failed();
                warn!("Command {} failed: {}", label, e);
            }
        })
    }

    /// Execute one command and wait for its collaborator call.
    ///
    /// Thumbnail requests only start the transfer; the transfer itself runs
    /// detached and reports through the log.
    pub async fn execute(&self, command: Command) -> Result<(), ServiceError> {
        let t = &self.ctx.timeouts;
        let capture = &self.ctx.services.capture;
        let detector = &self.ctx.services.detector;
        match command {
            Command::StartRecording => {
                metrics::inc_commands_dispatched();
                bounded(t.command, capture.start_recording()).await?;
                info!("Recording started");
            }
            Command::StopRecording => {
                metrics::inc_commands_dispatched();
                bounded(t.command, capture.stop_recording()).await?;
                info!("Recording stopped");
            }
            Command::SetConfidence(threshold) => {
                metrics::inc_commands_dispatched();
                bounded(t.command, detector.set_confidence(threshold)).await?;
                info!("Detector confidence set to {:.2}", threshold);
            }
            Command::SetImageSize(pixels) => {
                metrics::inc_commands_dispatched();
                bounded(t.command, detector.set_image_size(pixels)).await?;
                info!("Detector image size set to {}", pixels);
            }
            Command::SetModel(name) => {
                metrics::inc_commands_dispatched();
                bounded(t.model_switch, detector.set_model(&name)).await?;
                info!("Detector model switched to {}", name);
            }
            Command::RequestThumbnail(track_id) => {
                metrics::inc_commands_dispatched();
                let ctx = self.ctx.clone();
                tokio::spawn(async move {
                    ctx.images.run(&ctx, track_id).await;
                });
            }
            Command::Malformed { name, arg } => {
                metrics::inc_commands_unknown();
                warn!("Ignoring {} with bad argument '{}'", name, arg);
            }
            Command::Unknown(raw) => {
                metrics::inc_commands_unknown();
                warn!("Ignoring unknown command '{}'", raw);
            }
        }
        Ok(())
    }
}
