//! Frame payload production.
//!
//! Captures the primary display, downscales to MAX_CAPTURE_WIDTH,
//! JPEG-compresses, and hands payloads to a channel for transport. The
//! producing device runs at its own cadence; a bounded channel (capacity 2)
//! with `try_send` drops frames the consumer can't keep up with.

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use scrap::{Capturer, Display};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::endpoint::FrameSource;

/// Max width of produced frames; larger displays are downscaled to fit,
/// preserving aspect ratio.
pub const MAX_CAPTURE_WIDTH: u32 = 1280;
/// Target frames per second.
pub const TARGET_FPS: u32 = 10;
/// JPEG quality (1-100).
pub const JPEG_QUALITY: u8 = 80;

/// Capture pipeline — runs in a dedicated thread.
pub struct FrameCapture {
    running: Arc<AtomicBool>,
    frame_rx: Option<mpsc::Receiver<Vec<u8>>>,
}

impl FrameCapture {
    /// Start capturing the primary display. Returns the capture handle with
    /// a channel of JPEG payloads.
    pub fn start() -> Result<Self> {
        // Verify a display exists before spawning the thread
        let display = Display::primary().map_err(|e| anyhow::anyhow!("No display found: {}", e))?;
        drop(display); // Capturer is not Send on X11 — create it in the thread

        let running = Arc::new(AtomicBool::new(true));
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(2);

        let running_clone = running.clone();
        std::thread::spawn(move || {
            let display = match Display::primary() {
                Ok(d) => d,
                Err(e) => {
                    eprintln!("Frame capture: no display: {}", e);
                    return;
                }
            };
            let w = display.width();
            let h = display.height();
            let capturer = match Capturer::new(display) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Frame capture: failed to start: {}", e);
                    return;
                }
            };
            capture_loop(capturer, w, h, frame_tx, running_clone);
        });

        Ok(Self {
            running,
            frame_rx: Some(frame_rx),
        })
    }

    /// Take the payload receiver (can only be called once)
    pub fn take_frame_rx(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.frame_rx.take()
    }

    /// Stop capturing
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for FrameCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`FrameSource`] over the display capture: each subscription starts a
/// fresh capture thread, unsubscribing stops it.
#[derive(Default)]
pub struct CaptureSource {
    capture: Option<FrameCapture>,
}

impl CaptureSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for CaptureSource {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        self.unsubscribe();
        let mut capture = FrameCapture::start()?;
        let rx = capture
            .take_frame_rx()
            .ok_or_else(|| anyhow::anyhow!("capture channel already taken"))?;
        self.capture = Some(capture);
        Ok(rx)
    }

    fn unsubscribe(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
    }
}

fn capture_loop(
    mut capturer: Capturer,
    src_w: usize,
    src_h: usize,
    tx: mpsc::Sender<Vec<u8>>,
    running: Arc<AtomicBool>,
) {
    let frame_interval = Duration::from_millis(1000 / TARGET_FPS as u64);

    let (out_w, out_h) = if src_w as u32 > MAX_CAPTURE_WIDTH {
        let scale = MAX_CAPTURE_WIDTH as f64 / src_w as f64;
        (MAX_CAPTURE_WIDTH, (src_h as f64 * scale) as u32)
    } else {
        (src_w as u32, src_h as u32)
    };

    while running.load(Ordering::Relaxed) {
        let frame_start = Instant::now();

        match capturer.frame() {
            Ok(frame) => {
                // scrap yields BGRA pixels; stride may include padding
                let stride = frame.len() / src_h;
                let rgb = bgra_to_rgb_scaled(&frame, src_w, src_h, stride, out_w, out_h);

                if let Ok(jpeg) = jpeg_encode(&rgb, out_w, out_h) {
                    match tx.try_send(jpeg) {
                        Ok(_) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Consumer can't keep up — skip this frame
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // Frame not ready yet
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            Err(_) => {
                // Capture error — retry after a short delay
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }
}

/// Convert BGRA buffer to RGB, optionally downscaling via nearest-neighbor
fn bgra_to_rgb_scaled(
    bgra: &[u8],
    src_w: usize,
    src_h: usize,
    stride: usize,
    dst_w: u32,
    dst_h: u32,
) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((dst_w * dst_h * 3) as usize);

    for y in 0..dst_h {
        let src_y = (y as usize * src_h) / dst_h as usize;
        for x in 0..dst_w {
            let src_x = (x as usize * src_w) / dst_w as usize;
            let offset = src_y * stride + src_x * 4;
            if offset + 2 < bgra.len() {
                rgb.push(bgra[offset + 2]); // R
                rgb.push(bgra[offset + 1]); // G
                rgb.push(bgra[offset]); // B
            } else {
                rgb.extend_from_slice(&[0, 0, 0]);
            }
        }
    }

    rgb
}

/// JPEG encode an RGB buffer
fn jpeg_encode(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb.to_vec())
        .ok_or_else(|| anyhow::anyhow!("Invalid image dimensions"))?;

    img.write_with_encoder(encoder)
        .map_err(|e| anyhow::anyhow!("JPEG encode failed: {}", e))?;

    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_conversion_swaps_channels() {
        // One blue-ish pixel: B=10 G=20 R=30 A=255
        let bgra = [10u8, 20, 30, 255];
        let rgb = bgra_to_rgb_scaled(&bgra, 1, 1, 4, 1, 1);
        assert_eq!(rgb, vec![30, 20, 10]);
    }

    #[test]
    fn test_downscale_halves_dimensions() {
        let bgra = vec![0u8; 4 * 4 * 4]; // 4x4 BGRA
        let rgb = bgra_to_rgb_scaled(&bgra, 4, 4, 16, 2, 2);
        assert_eq!(rgb.len(), 2 * 2 * 3);
    }

    #[test]
    fn test_jpeg_encode_produces_jpeg_magic() {
        let rgb = vec![128u8; 8 * 8 * 3];
        let jpeg = jpeg_encode(&rgb, 8, 8).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
