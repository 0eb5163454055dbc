use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::SystemTime,
};

use anyhow::Context as _;

use crate::{
    error::{AnimathError, AnimathResult},
    script::ensure_parent_dir,
};

/// manim keeps per-animation fragments here; they are never the final video.
const PARTIAL_DIR: &str = "partial_movie_files";

#[derive(Clone, Debug)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_sec: f64,
}

#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub png_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub time_sec: f64,
}

/// Newest `.mp4` under `media_dir`, by modification time. A missing directory yields `None`.
pub fn find_latest_video(media_dir: &Path) -> AnimathResult<Option<PathBuf>> {
    if !media_dir.exists() {
        return Ok(None);
    }

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in walkdir::WalkDir::new(media_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("scan '{}'", media_dir.display()))?;
        if !entry.file_type().is_file() || !is_final_video(entry.path()) {
            continue;
        }
        let modified = entry
            .metadata()
            .with_context(|| format!("stat '{}'", entry.path().display()))?
            .modified()
            .with_context(|| format!("mtime of '{}'", entry.path().display()))?;

        let candidate = (modified, entry.into_path());
        if newest.as_ref().is_none_or(|best| candidate > *best) {
            newest = Some(candidate);
        }
    }
    Ok(newest.map(|(_, p)| p))
}

fn is_final_video(path: &Path) -> bool {
    let is_mp4 = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp4"));
    is_mp4 && !path.components().any(|c| c.as_os_str() == PARTIAL_DIR)
}

pub fn is_ffmpeg_on_path() -> bool {
    tool_available("ffmpeg") && tool_available("ffprobe")
}

fn tool_available(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn probe_video(path: &Path) -> AnimathResult<VideoInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        #[serde(default)]
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|e| AnimathError::preview(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(AnimathError::preview(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| AnimathError::serde(format!("ffprobe json parse failed: {e}")))?;
    let stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| AnimathError::preview("no video stream found"))?;
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(AnimathError::preview("missing video dimensions from ffprobe"));
    };
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        path: path.to_path_buf(),
        width,
        height,
        duration_sec,
    })
}

/// Midpoint of the clip, or its start when the duration is unknown.
pub fn default_preview_time(duration_sec: f64) -> f64 {
    if duration_sec.is_finite() && duration_sec > 0.0 {
        duration_sec / 2.0
    } else {
        0.0
    }
}

pub fn decode_frame_rgba8(info: &VideoInfo, time_sec: f64) -> AnimathResult<Vec<u8>> {
    let out = Command::new("ffmpeg")
        .args(["-v", "error", "-ss", &format!("{time_sec:.3}")])
        .arg("-i")
        .arg(&info.path)
        .args(["-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
        .output()
        .map_err(|e| AnimathError::preview(format!("failed to run ffmpeg for frame decode: {e}")))?;

    if !out.status.success() {
        return Err(AnimathError::preview(format!(
            "ffmpeg frame decode failed for '{}': {}",
            info.path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let expected_len = info.width as usize * info.height as usize * 4;
    if expected_len == 0 {
        return Err(AnimathError::preview("video has zero-sized frames"));
    }
    if out.stdout.len() < expected_len {
        return Err(AnimathError::preview(format!(
            "decoded frame is truncated: got {} bytes, expected {expected_len}",
            out.stdout.len()
        )));
    }

    let mut frame = out.stdout;
    frame.truncate(expected_len);
    Ok(frame)
}

/// Decodes one frame of `video` and writes it to `png_path`.
#[tracing::instrument(skip_all, fields(video = %video.display()))]
pub fn extract_frame_png(
    video: &Path,
    png_path: &Path,
    time_sec: Option<f64>,
) -> AnimathResult<PreviewFrame> {
    let info = probe_video(video)?;
    let time_sec = time_sec.unwrap_or_else(|| default_preview_time(info.duration_sec));
    let rgba = decode_frame_rgba8(&info, time_sec)?;

    ensure_parent_dir(png_path)?;
    image::save_buffer_with_format(
        png_path,
        &rgba,
        info.width,
        info.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", png_path.display()))?;
    tracing::info!(png = %png_path.display(), time_sec, "wrote preview frame");

    Ok(PreviewFrame {
        png_path: png_path.to_path_buf(),
        width: info.width,
        height: info.height,
        time_sec,
    })
}

fn opener_command(path: &Path) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", ""]).arg(path);
        cmd
    } else if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        cmd
    }
}

/// Hands `path` to the platform's default application.
pub fn open_in_default_player(path: &Path) -> AnimathResult<()> {
    if !path.is_file() {
        return Err(AnimathError::preview(format!(
            "video '{}' does not exist",
            path.display()
        )));
    }
    let mut cmd = opener_command(path);
    let program = cmd.get_program().to_string_lossy().into_owned();
    let status = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| AnimathError::preview(format!("failed to run {program}: {e}")))?;
    if !status.success() {
        return Err(AnimathError::preview(format!(
            "{program} exited with status {status}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs::File, time::Duration};

    use super::*;

    fn touch(path: &Path, modified: SystemTime) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let f = File::create(path).unwrap();
        f.set_modified(modified).unwrap();
    }

    #[test]
    fn missing_media_dir_has_no_video() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_latest_video(&dir.path().join("media")).unwrap().is_none());
    }

    #[test]
    fn newest_final_video_wins() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        let videos = dir.path().join("videos");

        let old = videos.join("a").join("480p15").join("AutoScene.mp4");
        let new = videos.join("b").join("720p30").join("AutoScene.MP4");
        let partial = videos
            .join("b")
            .join("720p30")
            .join(PARTIAL_DIR)
            .join("AutoScene")
            .join("0001.mp4");
        let not_video = videos.join("b").join("notes.txt");

        touch(&old, base);
        touch(&new, base + Duration::from_secs(60));
        touch(&partial, base + Duration::from_secs(120));
        touch(&not_video, base + Duration::from_secs(180));

        assert_eq!(find_latest_video(dir.path()).unwrap(), Some(new));
    }

    #[test]
    fn preview_time_defaults_to_midpoint() {
        assert_eq!(default_preview_time(4.0), 2.0);
        assert_eq!(default_preview_time(0.0), 0.0);
        assert_eq!(default_preview_time(f64::NAN), 0.0);
    }

    #[test]
    fn opening_a_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_in_default_player(&dir.path().join("nope.mp4")).unwrap_err();
        assert!(matches!(err, AnimathError::Preview(_)));
    }

    #[test]
    fn frame_extraction_writes_png() {
        if !is_ffmpeg_on_path() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        let status = Command::new("ffmpeg")
            .args([
                "-v",
                "error",
                "-y",
                "-f",
                "lavfi",
                "-i",
                "testsrc=size=64x48:rate=15",
                "-t",
                "1",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(&video)
            .status()
            .unwrap();
        assert!(status.success());

        let png = dir.path().join("preview").join("frame.png");
        let frame = extract_frame_png(&video, &png, None).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert!(frame.time_sec > 0.0);

        let img = image::open(&png).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }
}
