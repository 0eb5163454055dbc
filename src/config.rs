use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;

use crate::error::{AnimathError, AnimathResult};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SCRIPT_PATH: &str = "generated_manim.py";
pub const DEFAULT_SCENE_NAME: &str = "AutoScene";
pub const DEFAULT_MEDIA_DIR: &str = "media";

/// Manim render quality preset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Low,
    Medium,
    High,
    Production,
    FourK,
}

impl Quality {
    pub fn flag(self) -> &'static str {
        match self {
            Quality::Low => "-ql",
            Quality::Medium => "-qm",
            Quality::High => "-qh",
            Quality::Production => "-qp",
            Quality::FourK => "-qk",
        }
    }

    /// Directory manim writes videos of this quality into.
    pub fn output_dir_name(self) -> &'static str {
        match self {
            Quality::Low => "480p15",
            Quality::Medium => "720p30",
            Quality::High => "1080p60",
            Quality::Production => "1440p60",
            Quality::FourK => "2160p60",
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: String,
    pub api_base_url: String,
    pub script_path: PathBuf,
    pub scene_name: String,
    pub quality: Quality,
    /// Pass `-p` so manim opens the finished video itself.
    pub preview: bool,
    pub media_dir: PathBuf,
    pub manim_program: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            script_path: PathBuf::from(DEFAULT_SCRIPT_PATH),
            scene_name: DEFAULT_SCENE_NAME.to_string(),
            quality: Quality::Low,
            preview: true,
            media_dir: PathBuf::from(DEFAULT_MEDIA_DIR),
            manim_program: PathBuf::from("manim"),
            request_timeout_secs: 120,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> AnimathResult<Self> {
        let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
        let cfg: PipelineConfig = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| AnimathError::serde(format!("parse config '{}': {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AnimathResult<()> {
        if self.model.trim().is_empty() {
            return Err(AnimathError::validation("model name must be non-empty"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(AnimathError::validation("api base url must be non-empty"));
        }
        if !is_python_identifier(&self.scene_name) {
            return Err(AnimathError::validation(format!(
                "scene name '{}' is not a valid Python class name",
                self.scene_name
            )));
        }
        if self.script_path.extension().and_then(|e| e.to_str()) != Some("py") {
            return Err(AnimathError::validation(format!(
                "script path '{}' must end in .py",
                self.script_path.display()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(AnimathError::validation("request timeout must be non-zero"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn is_python_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
