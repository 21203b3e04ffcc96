//! Media handling: temp-file downloads of uploaded assets and the
//! image+audio → video synthesis boundary (ffmpeg subprocess).
//!
//! Files captured mid-wizard outlive a single handler call, so they are kept
//! on disk deliberately and removed by `cleanup_draft_media` on every cancel
//! or abort path. A successfully committed dish keeps its files as the
//! stored media references.

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use teloxide::prelude::*;
use tracing::{debug, error};

use crate::dialogue::DishDraft;

/// Download a Telegram file into a kept temp file and return its path
pub async fn download_to_temp(
    bot: &Bot,
    file_id: teloxide::types::FileId,
    suffix: &str,
) -> Result<String> {
    let file = bot.get_file(file_id).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );

    let response = reqwest::get(&url).await?;
    let bytes = response.bytes().await?;

    let mut temp_file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .context("Failed to create temp file for media download")?;
    temp_file.as_file_mut().write_all(&bytes)?;

    // The draft references this path across dialogue turns; persist it and
    // let the flow's exit paths decide when it goes away
    let path = temp_file
        .into_temp_path()
        .keep()
        .context("Failed to persist downloaded media file")?;

    Ok(path.to_string_lossy().to_string())
}

/// Remove one media file, logging instead of failing the interaction
pub fn remove_media_file(path: &str) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path, "Removed media file"),
        Err(e) => error!(path = %path, error = %e, "Failed to remove media file"),
    }
}

/// Remove every temp file a cancelled or aborted draft has accumulated
pub fn cleanup_draft_media(draft: &DishDraft) {
    for path in [&draft.ingredients_photo_path, &draft.ready_photo_path]
        .into_iter()
        .flatten()
    {
        remove_media_file(path);
    }
}

/// Argument list for the synthesis subprocess. Output duration follows the
/// audio track; frame rate is fixed.
fn ffmpeg_args(image_path: &str, audio_path: &str, output_path: &str) -> Vec<String> {
    [
        "-y",
        "-loop", "1",
        "-i", image_path,
        "-i", audio_path,
        "-c:v", "libx264",
        "-tune", "stillimage",
        "-pix_fmt", "yuv420p",
        "-c:a", "aac",
        "-shortest",
        "-r", "24",
        output_path,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Synthesize a video from a still image and an audio track.
///
/// Runs ffmpeg as a child process; the await never blocks other callers'
/// interactions. Returns the path of the generated mp4.
pub async fn synthesize_video(image_path: &str, audio_path: &str) -> Result<String> {
    let output_path = tempfile::Builder::new()
        .suffix(".mp4")
        .tempfile()
        .context("Failed to create temp file for video output")?
        .into_temp_path()
        .keep()
        .context("Failed to persist video output path")?
        .to_string_lossy()
        .to_string();

    let status = tokio::process::Command::new("ffmpeg")
        .args(ffmpeg_args(image_path, audio_path, &output_path))
        .output()
        .await
        .context("Failed to launch ffmpeg")?;

    if !status.status.success() {
        remove_media_file(&output_path);
        let stderr = String::from_utf8_lossy(&status.stderr);
        return Err(anyhow!("ffmpeg failed: {}", stderr.trim()));
    }

    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args_reference_inputs_and_output() {
        let args = ffmpeg_args("/tmp/in.jpg", "/tmp/voice.mp3", "/tmp/out.mp4");

        assert!(args.contains(&"/tmp/in.jpg".to_string()));
        assert!(args.contains(&"/tmp/voice.mp3".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");

        // Duration follows the audio track; frame rate is fixed
        assert!(args.contains(&"-shortest".to_string()));
        let r_pos = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r_pos + 1], "24");
    }

    #[test]
    fn test_cleanup_draft_media_removes_kept_files() {
        let photo = tempfile::NamedTempFile::new().unwrap();
        let photo_path = photo.into_temp_path().keep().unwrap();

        let draft = DishDraft {
            ingredients_photo_path: Some(photo_path.to_string_lossy().to_string()),
            ready_photo_path: None,
            ..Default::default()
        };

        assert!(photo_path.exists());
        cleanup_draft_media(&draft);
        assert!(!photo_path.exists());
    }

    #[test]
    fn test_remove_media_file_tolerates_missing_file() {
        // No panic, no error surfaced to the interaction
        remove_media_file("/tmp/menubot-definitely-missing-file.jpg");
    }
}
