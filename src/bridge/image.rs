//! On-demand thumbnail transfer.
//!
//! Fetch the detection crop, shrink it to a tiny low-quality JPEG, then stream
//! it as paced `IMG:` chunks. The pause after every chunk has to cover the
//! radio's airtime for one chunk or the field unit's buffer overruns.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use log::{info, warn};
use std::time::Duration;
use tokio::sync::Mutex;

use super::BridgeContext;
use crate::config::ImageConfig;
use crate::metrics;
use crate::services::bounded;
use crate::state::OutboundKind;
use crate::wire::ImageTransferJob;

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub chunk_bytes: usize,
    pub pacing: Duration,
}

impl From<&ImageConfig> for ImageSettings {
    fn from(c: &ImageConfig) -> Self {
        Self {
            width: c.width,
            height: c.height,
            quality: c.quality,
            chunk_bytes: c.chunk_bytes,
            pacing: Duration::from_millis(c.chunk_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { chunks: usize, bytes: usize },
    Aborted(String),
}

/// Decode, downscale to exactly `width`x`height` and re-encode as JPEG.
pub fn compress_thumbnail(
    source: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(source)?;
    let small = decoded.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&small)?;
    Ok(out)
}

/// Serializes transfers: one thumbnail on the air at a time.
pub struct ImageTransfer {
    settings: ImageSettings,
    busy: Mutex<()>,
}

impl ImageTransfer {
    pub fn new(settings: ImageSettings) -> Self {
        Self {
            settings,
            busy: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    pub async fn run(&self, ctx: &BridgeContext, track_id: u64) -> TransferOutcome {
        let outcome = self.transfer(ctx, track_id).await;
        match &outcome {
            TransferOutcome::Completed { chunks, bytes } => {
                metrics::inc_transfers_completed();
                info!("GET_IMG {}: sent {} bytes in {} chunks", track_id, bytes, chunks);
            }
            TransferOutcome::Aborted(reason) => {
                metrics::inc_transfers_aborted();
                warn!("GET_IMG {}: aborted: {}", track_id, reason);
            }
        }
        outcome
    }

    async fn transfer(&self, ctx: &BridgeContext, track_id: u64) -> TransferOutcome {
        let _turn = self.busy.lock().await;

        let source = match bounded(
            ctx.timeouts.image_fetch,
            ctx.services.detector.thumbnail_source(track_id),
        )
        .await
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return TransferOutcome::Aborted("no image for track".into()),
            Err(e) => return TransferOutcome::Aborted(format!("fetch failed: {}", e)),
        };

        let s = self.settings.clone();
        let compressed = tokio::task::spawn_blocking(move || {
            compress_thumbnail(&source, s.width, s.height, s.quality)
        })
        .await;
        let data = match compressed {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => return TransferOutcome::Aborted(format!("recompress failed: {}", e)),
            Err(e) => return TransferOutcome::Aborted(format!("recompress task failed: {}", e)),
        };

        let Some(job) = ImageTransferJob::plan(
            track_id,
            data.len(),
            self.settings.chunk_bytes,
            ctx.transport.max_payload(),
            self.settings.pacing,
        ) else {
            return TransferOutcome::Aborted("payload budget too small for a chunk".into());
        };
        info!(
            "GET_IMG {}: {} bytes -> {} chunks of {} (eta {:?})",
            track_id,
            data.len(),
            job.total_chunks,
            job.chunk_size,
            job.eta()
        );

        for (index, line) in job.lines(&data).into_iter().enumerate() {
            if let Err(e) = ctx.send_line(line, OutboundKind::Image).await {
                return TransferOutcome::Aborted(format!(
                    "chunk {}/{} not sent: {}",
                    index, job.total_chunks, e
                ));
            }
            tokio::time::sleep(job.pacing).await;
        }
        TransferOutcome::Completed {
            chunks: job.total_chunks,
            bytes: data.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&img)
            .unwrap();
        out
    }

    #[test]
    fn thumbnail_has_target_dimensions_and_shrinks() {
        let source = sample_jpeg(640, 480);
        let thumb = compress_thumbnail(&source, 120, 90, 15).unwrap();
        assert!(thumb.len() < source.len());
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 90));
    }

    #[test]
    fn garbage_source_is_an_error() {
        assert!(compress_thumbnail(b"not a jpeg", 120, 90, 15).is_err());
    }
}
