//! Frame capture and the dedupe predicate.
//!
//! Capture is backed by GStreamer, decoding whatever the camera produces
//! down to raw RGB at the ingestor's target resolution — the same appsink
//! pattern the teacher uses for its MPEG-TS segment pipeline, retargeted at
//! a `videoconvert ! videoscale` chain instead of a muxer.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{Result, VideoMemoryError};

pub const TARGET_WIDTH: u32 = 640;
pub const TARGET_HEIGHT: u32 = 480;

/// One decoded, resized frame ready for dedupe comparison and VLM encoding.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Interleaved RGB8, `width * height * 3` bytes.
    pub rgb: Vec<u8>,
}

impl Frame {
    pub fn black(width: u32, height: u32) -> Self {
        Self { width, height, rgb: vec![0u8; (width * height * 3) as usize] }
    }

    /// Mean absolute per-channel difference against `other`. Shape mismatch
    /// is reported as `None`, which the caller treats as "not a duplicate".
    pub fn mean_abs_diff(&self, other: &Frame) -> Option<f64> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        let n = self.rgb.len();
        if n == 0 {
            return Some(0.0);
        }
        let sum: u64 = self
            .rgb
            .iter()
            .zip(other.rgb.iter())
            .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs() as u64)
            .sum();
        Some(sum as f64 / n as f64)
    }

    /// Encode as JPEG and base64-wrap it for a `ModelProvider` call.
    pub fn to_jpeg_base64(&self) -> Result<String> {
        let buf = image::RgbImage::from_raw(self.width, self.height, self.rgb.clone())
            .ok_or_else(|| VideoMemoryError::Device("frame buffer size mismatch".to_string()))?;
        let mut bytes: Vec<u8> = Vec::new();
        image::DynamicImage::ImageRgb8(buf)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .map_err(|e| VideoMemoryError::Device(format!("jpeg encode: {e}")))?;
        Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes))
    }
}

/// A source of frames for one camera. Implementors own the capture handle
/// exclusively for the lifetime of the ingestor.
pub trait FrameSource: Send {
    /// Open the capture handle. Called once per `OPENING` state transition.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame, already resized to the target resolution.
    /// Returns `Ok(None)` on a benign timeout (no frame ready yet, not a
    /// failure); `Err` counts as a read failure toward the reconnect
    /// threshold.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    fn close(&mut self);
}

/// GStreamer-backed capture for a local (`v4l2src`) or network (`rtspsrc`)
/// camera, decoded and scaled to the ingestor's target resolution.
pub struct GstFrameSource {
    io_id: String,
    pipeline_desc: String,
    pipeline: Option<gstreamer::Pipeline>,
    rx: Option<std::sync::mpsc::Receiver<Vec<u8>>>,
}

impl GstFrameSource {
    /// `camera_source` is the numeric V4L2 index for local devices, or the
    /// `pull_url` for network devices (per §4.6's "camera_source = url for
    /// network else numeric index").
    pub fn local(io_id: String, numeric_index: u32) -> Self {
        let pipeline_desc = format!(
            "v4l2src device=/dev/video{idx} ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={w},height={h} ! \
             appsink name=sink emit-signals=true max-buffers=2 drop=true sync=false",
            idx = numeric_index,
            w = TARGET_WIDTH,
            h = TARGET_HEIGHT,
        );
        Self { io_id, pipeline_desc, pipeline: None, rx: None }
    }

    pub fn network(io_id: String, pull_url: String) -> Self {
        let pipeline_desc = format!(
            "rtspsrc location={url} latency=200 protocols=tcp ! decodebin ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={w},height={h} ! \
             appsink name=sink emit-signals=true max-buffers=2 drop=true sync=false",
            url = pull_url,
            w = TARGET_WIDTH,
            h = TARGET_HEIGHT,
        );
        Self { io_id, pipeline_desc, pipeline: None, rx: None }
    }
}

impl FrameSource for GstFrameSource {
    fn open(&mut self) -> Result<()> {
        use gstreamer::prelude::*;

        if self.pipeline.is_some() {
            self.close();
        }

        gstreamer::init().map_err(|e| VideoMemoryError::Device(format!("gst::init: {e}")))?;

        let pipeline = gstreamer::parse::launch(&self.pipeline_desc)
            .map_err(|e| VideoMemoryError::CameraConnection { io_id: self.io_id.clone(), reason: e.to_string() })?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| VideoMemoryError::CameraConnection { io_id: self.io_id.clone(), reason: "not a pipeline".into() })?;

        let appsink: gstreamer_app::AppSink = pipeline
            .by_name("sink")
            .ok_or_else(|| VideoMemoryError::CameraConnection { io_id: self.io_id.clone(), reason: "appsink missing".into() })?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| VideoMemoryError::CameraConnection { io_id: self.io_id.clone(), reason: "cast to AppSink failed".into() })?;

        let (tx, rx) = std::sync::mpsc::sync_channel::<Vec<u8>>(2);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gstreamer::FlowError::Error)?;
                    let buf = sample.buffer().ok_or(gstreamer::FlowError::Error)?;
                    let map = buf.map_readable().map_err(|_| gstreamer::FlowError::Error)?;
                    let _ = tx.try_send(map.as_slice().to_vec());
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| VideoMemoryError::CameraConnection { io_id: self.io_id.clone(), reason: e.to_string() })?;

        info!(io_id = self.io_id, "Capture pipeline started");
        self.pipeline = Some(pipeline);
        self.rx = Some(rx);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| VideoMemoryError::Device("read before open".to_string()))?;
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(raw) => {
                if raw.len() != (TARGET_WIDTH * TARGET_HEIGHT * 3) as usize {
                    warn!(io_id = self.io_id, len = raw.len(), "Discarding frame with unexpected size");
                    return Ok(None);
                }
                Ok(Some(Frame { width: TARGET_WIDTH, height: TARGET_HEIGHT, rgb: raw }))
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(VideoMemoryError::CameraConnection { io_id: self.io_id.clone(), reason: "pipeline closed".into() })
            }
        }
    }

    fn close(&mut self) {
        use gstreamer::prelude::*;
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gstreamer::State::Null);
            info!(io_id = self.io_id, "Capture pipeline stopped");
        }
        self.rx = None;
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_frames_have_zero_diff() {
        let a = Frame::black(4, 4);
        let b = Frame::black(4, 4);
        assert_eq!(a.mean_abs_diff(&b), Some(0.0));
    }

    #[test]
    fn shape_mismatch_is_not_a_duplicate() {
        let a = Frame::black(4, 4);
        let b = Frame::black(2, 2);
        assert_eq!(a.mean_abs_diff(&b), None);
    }

    #[test]
    fn differing_frames_cross_threshold() {
        let a = Frame::black(2, 2);
        let mut b = Frame::black(2, 2);
        for px in b.rgb.iter_mut() {
            *px = 10;
        }
        let diff = a.mean_abs_diff(&b).unwrap();
        assert!(diff >= 3.0, "diff {diff} should be >= dedupe_threshold");
    }

    #[test]
    fn frame_below_threshold_counts_as_duplicate() {
        let a = Frame::black(2, 2);
        let mut b = Frame::black(2, 2);
        b.rgb[0] = 1;
        let diff = a.mean_abs_diff(&b).unwrap();
        assert!(diff < 3.0);
    }
}
