//! The anomaly worker: assembles one merged video per anomaly event.
//!
//! The worker runs on its own thread while the capture loop keeps ticking.
//! It stitches the pre-event window from the frame store in front of live
//! post-event footage sampled directly from the camera, then finalizes a
//! single AVI named after the trigger temperature and time.

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use avi_writer::AviWriter;
use thermal_cam_types::AnomalyEvent;

use crate::controller::Controller;
use crate::recording::RecordingGuard;

/// Post-event sampling rate, frames per second.
pub const SAMPLE_FPS: u32 = 32;

/// Dimensions of the last good frame, the reference for every video file.
pub(crate) fn frame_dimensions(ctrl: &Controller) -> Option<(u32, u32)> {
    let shared = ctrl.shared.lock();
    shared.last_frame.as_ref().map(|f| (f.width, f.height))
}

/// Spawn the assembly thread for one event. The guard rides along and is
/// released when the thread exits, however it exits.
pub(crate) fn spawn(
    ctrl: Arc<Controller>,
    guard: RecordingGuard,
    event: AnomalyEvent,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("anomaly-worker".to_string())
        .spawn(move || {
            let _guard = guard;
            assemble_video(&ctrl, &event);
        })
}

fn assemble_video(ctrl: &Arc<Controller>, event: &AnomalyEvent) {
    let (pre, post, min_record, save_dir) = {
        let shared = ctrl.shared.lock();
        (
            shared.settings.pre_event,
            shared.settings.post_event,
            shared.settings.min_record,
            shared.settings.save_dir.clone(),
        )
    };
    // The pre-event window counts toward the minimum recording time; stretch
    // the live tail when the configured windows fall short of it.
    let post = post.max(min_record.saturating_sub(pre));

    let ts = event.raised_at.format("%Y%m%d_%H%M%S");
    let path = save_dir.join(format!(
        "merged_anomaly_temp{}_{ts}.avi",
        event.temperature as i64
    ));

    let pre_frames = ctrl.store.frames_in_window(pre.as_secs_f64());
    tracing::info!(
        "anomaly at {:.1}C, {} pre-event frames, {:.1}s post-event",
        event.temperature,
        pre_frames.len(),
        post.as_secs_f64()
    );

    let dims = frame_dimensions(ctrl);
    let (width, height) = match dims {
        Some(d) => d,
        None => {
            ctrl.errors
                .push("anomaly video aborted: no frame dimensions known");
            return;
        }
    };

    let file = match File::create(&path) {
        Ok(f) => f,
        Err(e) => {
            ctrl.errors
                .push(format!("cannot create \"{}\": {e}", path.display()));
            return;
        }
    };
    let mut writer = match AviWriter::new(BufWriter::new(file), width, height, SAMPLE_FPS) {
        Ok(w) => w,
        Err(e) => {
            ctrl.errors
                .push(format!("video writer init failed for \"{}\": {e}", path.display()));
            return;
        }
    };

    let mut frames = 0usize;
    for record in &pre_frames {
        if record.image.is_empty() {
            continue;
        }
        if let Err(e) = writer.write_frame(&record.image) {
            ctrl.errors
                .push(format!("video write to \"{}\" failed: {e}", path.display()));
            return;
        }
        frames += 1;
    }

    let frame_interval = Duration::from_secs_f64(1.0 / SAMPLE_FPS as f64);
    let deadline = Instant::now() + post;
    while Instant::now() < deadline && !ctrl.is_shutdown() {
        let capture = match ctrl.camera.lock().grab() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("post-event frame grab failed: {e}");
                std::thread::sleep(frame_interval);
                continue;
            }
        };
        if !capture.jpeg.is_empty() {
            if let Err(e) = writer.write_frame(&capture.jpeg) {
                ctrl.errors
                    .push(format!("video write to \"{}\" failed: {e}", path.display()));
                return;
            }
            frames += 1;
        }
        std::thread::sleep(frame_interval);
    }

    match writer.finish() {
        Ok(_) => tracing::info!(
            "anomaly video saved as \"{}\" ({frames} frames)",
            path.display()
        ),
        Err(e) => ctrl
            .errors
            .push(format!("video finalize of \"{}\" failed: {e}", path.display())),
    }
}
