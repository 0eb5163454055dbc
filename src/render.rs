use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::SystemTime,
};

use crate::{
    config::{PipelineConfig, Quality},
    error::{AnimathError, AnimathResult},
    preview::find_latest_video,
};

const STDERR_TAIL_LINES: usize = 20;

/// One `manim` invocation against a script on disk.
#[derive(Clone, Debug)]
pub struct ManimRender {
    pub program: PathBuf,
    pub script_path: PathBuf,
    pub scene_name: String,
    pub quality: Quality,
    pub preview: bool,
    pub media_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct RenderOutput {
    pub video_path: PathBuf,
}

impl ManimRender {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            program: cfg.manim_program.clone(),
            script_path: cfg.script_path.clone(),
            scene_name: cfg.scene_name.clone(),
            quality: cfg.quality,
            preview: cfg.preview,
            media_dir: cfg.media_dir.clone(),
        }
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(6);
        if self.preview {
            args.push("-p".into());
        }
        args.push(self.quality.flag().into());
        args.push("--media_dir".into());
        args.push(self.media_dir.clone().into_os_string());
        args.push(self.script_path.clone().into_os_string());
        args.push(self.scene_name.clone().into());
        args
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Where manim places the video for this script, scene and quality.
    pub fn expected_video_path(&self) -> PathBuf {
        let stem = self
            .script_path
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        self.media_dir
            .join("videos")
            .join(stem)
            .join(self.quality.output_dir_name())
            .join(format!("{}.mp4", self.scene_name))
    }

    #[tracing::instrument(skip(self), fields(script = %self.script_path.display(), scene = %self.scene_name))]
    pub fn run(&self) -> AnimathResult<RenderOutput> {
        if !self.script_path.is_file() {
            return Err(AnimathError::validation(format!(
                "script '{}' does not exist",
                self.script_path.display()
            )));
        }

        tracing::info!(program = %self.program.display(), args = ?self.args(), "running manim");
        let started = SystemTime::now();
        let output = self.command().output().map_err(|e| {
            AnimathError::render(format!(
                "failed to spawn '{}' (is it installed and on PATH?): {e}",
                self.program.display()
            ))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!(stdout = %tail_lines(&stdout, STDERR_TAIL_LINES), "manim output");
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnimathError::render(format!(
                "manim exited with status {}: {}",
                output.status,
                tail_lines(&stderr, STDERR_TAIL_LINES)
            )));
        }

        let video_path = self.locate_video(started)?;
        tracing::info!(video = %video_path.display(), "render finished");
        Ok(RenderOutput { video_path })
    }

    /// Only videos written at or after `started` count as this run's output.
    fn locate_video(&self, started: SystemTime) -> AnimathResult<PathBuf> {
        let expected = self.expected_video_path();
        if expected.is_file() {
            return Ok(expected);
        }
        tracing::debug!(expected = %expected.display(), "expected video missing, scanning media dir");
        let fresh = find_latest_video(&self.media_dir)?.filter(|path| {
            let modified = std::fs::metadata(path).and_then(|m| m.modified());
            match modified {
                Ok(t) if t >= started => true,
                _ => {
                    tracing::debug!(video = %path.display(), "ignoring video from an earlier run");
                    false
                }
            }
        });
        fresh.ok_or_else(|| {
            AnimathError::render(format!(
                "manim reported success but no video was found under '{}'",
                self.media_dir.display()
            ))
        })
    }
}

pub fn is_manim_on_path(program: &Path) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &Path) -> ManimRender {
        ManimRender {
            program: PathBuf::from("manim"),
            script_path: dir.join("generated_manim.py"),
            scene_name: "AutoScene".to_string(),
            quality: Quality::Low,
            preview: true,
            media_dir: dir.join("media"),
        }
    }

    #[test]
    fn args_follow_flag_then_file_then_scene_order() {
        let r = ManimRender {
            script_path: PathBuf::from("generated_manim.py"),
            media_dir: PathBuf::from("media"),
            ..sample(Path::new("."))
        };
        let args: Vec<String> = r
            .args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-p",
                "-ql",
                "--media_dir",
                "media",
                "generated_manim.py",
                "AutoScene"
            ]
        );
    }

    #[test]
    fn preview_flag_is_optional() {
        let r = ManimRender {
            preview: false,
            quality: Quality::High,
            ..sample(Path::new("."))
        };
        let args = r.args();
        assert_eq!(args[0], "-qh");
        assert!(!args.iter().any(|a| a == "-p"));
    }

    #[test]
    fn expected_path_uses_stem_and_quality_dir() {
        let r = ManimRender {
            quality: Quality::Medium,
            ..sample(Path::new("out"))
        };
        assert_eq!(
            r.expected_video_path(),
            PathBuf::from("out/media/videos/generated_manim/720p30/AutoScene.mp4")
        );
    }

    #[test]
    fn missing_script_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let err = sample(dir.path()).run().unwrap_err();
        assert!(matches!(err, AnimathError::Validation(_)));
    }

    #[test]
    fn missing_program_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = ManimRender {
            program: dir.path().join("no-such-manim"),
            ..sample(dir.path())
        };
        std::fs::write(&r.script_path, "class AutoScene: pass\n").unwrap();
        let err = r.run().unwrap_err();
        assert!(matches!(err, AnimathError::Render(_)));
        assert!(!is_manim_on_path(&r.program));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let r = ManimRender {
            program: PathBuf::from("false"),
            ..sample(dir.path())
        };
        std::fs::write(&r.script_path, "class AutoScene: pass\n").unwrap();
        let err = r.run().unwrap_err();
        assert!(err.to_string().contains("manim exited with status"));
    }

    #[cfg(unix)]
    #[test]
    fn success_without_video_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let r = ManimRender {
            program: PathBuf::from("true"),
            ..sample(dir.path())
        };
        std::fs::write(&r.script_path, "class AutoScene: pass\n").unwrap();
        let err = r.run().unwrap_err();
        assert!(err.to_string().contains("no video was found"));
    }

    #[cfg(unix)]
    #[test]
    fn success_picks_up_expected_video() {
        let dir = tempfile::tempdir().unwrap();
        let r = ManimRender {
            program: PathBuf::from("true"),
            ..sample(dir.path())
        };
        std::fs::write(&r.script_path, "class AutoScene: pass\n").unwrap();
        let expected = r.expected_video_path();
        std::fs::create_dir_all(expected.parent().unwrap()).unwrap();
        std::fs::write(&expected, b"not really an mp4").unwrap();

        let out = r.run().unwrap();
        assert_eq!(out.video_path, expected);
    }

    #[cfg(unix)]
    #[test]
    fn video_from_an_earlier_run_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let r = ManimRender {
            program: PathBuf::from("true"),
            ..sample(dir.path())
        };
        std::fs::write(&r.script_path, "print('no scene here')\n").unwrap();

        let old = dir.path().join("media/videos/old_run/480p15/Yesterday.mp4");
        std::fs::create_dir_all(old.parent().unwrap()).unwrap();
        std::fs::write(&old, b"old render").unwrap();
        let day_ago = SystemTime::now() - std::time::Duration::from_secs(24 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(day_ago)
            .unwrap();

        let err = r.run().unwrap_err();
        assert!(err.to_string().contains("no video was found"), "{err}");
    }

    #[test]
    fn fallback_accepts_video_written_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let r = sample(dir.path());
        let started = SystemTime::now() - std::time::Duration::from_secs(5);

        let other = dir.path().join("media/videos/other/480p15/Renamed.mp4");
        std::fs::create_dir_all(other.parent().unwrap()).unwrap();
        std::fs::write(&other, b"fresh render").unwrap();

        assert_eq!(r.locate_video(started).unwrap(), other);
    }

    #[test]
    fn tail_keeps_last_lines() {
        let text = (0..30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&text, 3);
        assert_eq!(tail, "27\n28\n29");
    }
}
