use std::path::Path;

use anyhow::Context as _;

use crate::error::{AnimathError, AnimathResult};

const FENCE: &str = "```";
// Longest first so `python3` is not read as `py` + `thon3`.
const LANGUAGE_TAGS: &[&str] = &["python3", "python", "py"];

/// Removes a leading code fence (with optional language tag) and a trailing fence.
///
/// Text without fences comes back trimmed and otherwise unchanged.
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix(FENCE) {
        body = strip_language_tag(rest);
    }
    if let Some(rest) = body.strip_suffix(FENCE) {
        body = rest;
    }

    body.trim()
}

fn strip_language_tag(s: &str) -> &str {
    for tag in LANGUAGE_TAGS {
        if let Some(rest) = s.strip_prefix(tag)
            && rest.chars().next().is_none_or(char::is_whitespace)
        {
            return rest;
        }
    }
    s
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedScript {
    /// Response text exactly as the service returned it.
    pub raw: String,
    pub code: String,
}

impl GeneratedScript {
    pub fn from_response(raw: impl Into<String>) -> AnimathResult<Self> {
        let raw = raw.into();
        let code = strip_code_fence(&raw).to_string();
        if code.is_empty() {
            return Err(AnimathError::generation(
                "generated script is empty after removing code fences",
            ));
        }
        Ok(Self { raw, code })
    }

    /// Cheap textual check; the script itself is never parsed.
    pub fn defines_scene(&self, scene_name: &str) -> bool {
        self.code.lines().any(|line| {
            line.trim_start()
                .strip_prefix("class ")
                .and_then(|rest| rest.trim_start().strip_prefix(scene_name))
                .is_some_and(|rest| rest.starts_with('(') || rest.starts_with(':'))
        })
    }
}

pub fn ensure_parent_dir(path: &Path) -> AnimathResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Overwrites `path` with `code`.
pub fn write_script(path: &Path, code: &str) -> AnimathResult<()> {
    ensure_parent_dir(path)?;
    std::fs::write(path, code)
        .with_context(|| format!("failed to write script '{}'", path.display()))?;
    tracing::info!(path = %path.display(), bytes = code.len(), "saved manim script");
    Ok(())
}

pub fn read_script(path: &Path) -> AnimathResult<String> {
    let code = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script '{}'", path.display()))?;
    Ok(code)
}
