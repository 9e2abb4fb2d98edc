use crate::logi;
use crate::pipeline::Renderer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

pub const OUTPUT_WIDTH: u32 = 1080;
pub const OUTPUT_HEIGHT: u32 = 1920;
/// Silence kept after the narration ends.
const TAIL_SECONDS: f64 = 0.5;

async fn run_cmd(args: &[String]) -> Result<()> {
    let Some((program, rest)) = args.split_first() else {
        return Ok(());
    };

    let output = Command::new(program)
        .args(rest)
        .output()
        .await
        .with_context(|| format!("Failed to launch {}", program))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} failed: {}", program, stderr.trim());
    }
    Ok(())
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        anyhow::bail!("ffprobe failed for {}", path.display());
    }
    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(text: &str) -> Result<f64> {
    let duration: f64 = text
        .trim()
        .parse()
        .with_context(|| format!("Unparseable duration {:?}", text.trim()))?;
    if duration <= 0.1 {
        anyhow::bail!("Invalid duration {}", duration);
    }
    Ok(duration)
}

/// Arguments for a vertical render: the footage loops (or is cut) to the
/// narration length, scaled and center-cropped to 1080x1920.
pub fn render_args(footage: &Path, narration: &Path, out_mp4: &Path, seconds: f64) -> Vec<String> {
    let filter = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps=30[v]",
        w = OUTPUT_WIDTH,
        h = OUTPUT_HEIGHT
    );

    vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        footage.display().to_string(),
        "-i".to_string(),
        narration.display().to_string(),
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
        "-t".to_string(),
        format!("{:.3}", seconds),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ]
}

pub struct FfmpegRenderer;

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(&self, footage: &Path, narration: &Path, out_mp4: &Path) -> Result<()> {
        let narration_secs = ffprobe_duration_seconds(narration).await?;
        let seconds = narration_secs + TAIL_SECONDS;
        logi(format!("Rendering {:.1}s short to {}", seconds, out_mp4.display()));

        if let Some(parent) = out_mp4.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        run_cmd(&render_args(footage, narration, out_mp4, seconds)).await?;

        if !out_mp4.exists() {
            anyhow::bail!("ffmpeg produced no output at {}", out_mp4.display());
        }
        Ok(())
    }
}
