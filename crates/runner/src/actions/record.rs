//! record / stopRecord: background frame capture assembled with ffmpeg

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use docrun_common::step::RecordStep;

use super::{ActionContext, StepOutcome};
use crate::driver::Driver;
use crate::error::{RunnerError, RunnerResult};

const FRAMES_PER_SECOND: u64 = 5;

/// An in-progress recording owned by one context
pub struct Recording {
    target: PathBuf,
    frames_dir: PathBuf,
    stop: Arc<AtomicBool>,
    task: JoinHandle<RunnerResult<usize>>,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("target", &self.target)
            .field("frames_dir", &self.frames_dir)
            .finish()
    }
}

impl Recording {
    fn spawn(driver: Arc<dyn Driver>, target: PathBuf, frames_dir: PathBuf) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let dir = frames_dir.clone();

        let task = tokio::spawn(async move {
            let interval = Duration::from_millis(1000 / FRAMES_PER_SECOND);
            let mut frames = 0usize;
            while !flag.load(Ordering::Relaxed) {
                match driver.screenshot().await {
                    Ok(png) => {
                        tokio::fs::write(dir.join(format!("frame_{:05}.png", frames)), png).await?;
                        frames += 1;
                    }
                    Err(e) => debug!("Frame capture failed: {}", e),
                }
                tokio::time::sleep(interval).await;
            }
            Ok::<_, RunnerError>(frames)
        });

        Self {
            target,
            frames_dir,
            stop,
            task,
        }
    }

    /// Stop capturing and write the output. Returns the path written and
    /// the frame count.
    async fn finish(self) -> RunnerResult<(PathBuf, usize)> {
        self.stop.store(true, Ordering::Relaxed);
        let frames = self
            .task
            .await
            .map_err(|e| RunnerError::Driver(format!("recording task failed: {}", e)))??;

        let Ok(ffmpeg) = which::which("ffmpeg") else {
            warn!("ffmpeg not found; keeping frames in {}", self.frames_dir.display());
            return Ok((self.frames_dir, frames));
        };

        let status = Command::new(ffmpeg)
            .arg("-y")
            .args(["-framerate", &FRAMES_PER_SECOND.to_string()])
            .arg("-i")
            .arg(self.frames_dir.join("frame_%05d.png"))
            .args(["-pix_fmt", "yuv420p"])
            .arg(&self.target)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;

        if !status.success() {
            warn!("ffmpeg exited with {}; keeping frames", status);
            return Ok((self.frames_dir, frames));
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.frames_dir).await {
            debug!("Failed to remove {}: {}", self.frames_dir.display(), e);
        }
        Ok((self.target, frames))
    }
}

pub(super) async fn start(step: &RecordStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;
    if ctx.recording.is_some() {
        return Ok(StepOutcome::fail("A recording is already in progress."));
    }

    let default_name = format!("{}.mp4", ctx.step_id);
    let target = ctx.output_path(step.path.as_deref(), step.directory.as_deref(), &default_name);
    if target.exists() && !step.overwrite {
        return Ok(StepOutcome::skipped(format!(
            "{} already exists. Set overwrite to replace it.",
            target.display()
        )));
    }

    let frames_dir = frames_dir_for(&target);
    tokio::fs::create_dir_all(&frames_dir).await?;

    info!("Recording to {}", target.display());
    *ctx.recording = Some(Recording::spawn(driver, target.clone(), frames_dir));
    Ok(StepOutcome::pass(format!("Started recording to {}.", target.display()))
        .with_outputs(json!({ "recordingPath": target })))
}

pub(super) async fn stop(ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let Some(recording) = ctx.recording.take() else {
        return Ok(StepOutcome::skipped("No recording in progress."));
    };

    let (path, frames) = recording.finish().await?;
    ctx.changed_files.record(&path);
    Ok(
        StepOutcome::pass(format!("Stopped recording. Wrote {} frame(s) to {}.", frames, path.display()))
            .with_outputs(json!({ "recordingPath": path, "frames": frames })),
    )
}

fn frames_dir_for(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    target.with_file_name(format!("{}_frames", stem))
}
