use std::{fmt, path::PathBuf};

use crate::{
    config::PipelineConfig,
    error::AnimathResult,
    llm::TextGenerator,
    prompt::{generate_script, refine_prompt},
    render::ManimRender,
    script::{GeneratedScript, write_script},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Refine,
    Generate,
    Save,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Refine => "refining prompt",
            Stage::Generate => "generating Manim code",
            Stage::Save => "saving script",
            Stage::Render => "rendering video",
        })
    }
}

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    StageStarted(Stage),
    PromptRefined(String),
    ScriptGenerated(String),
    ScriptSaved(PathBuf),
    Rendered(PathBuf),
    Failed { stage: Stage, message: String },
}

impl PipelineEvent {
    /// One-line status for a front end.
    pub fn status_line(&self) -> String {
        match self {
            PipelineEvent::StageStarted(stage) => {
                let mut s = stage.to_string();
                if let Some(first) = s.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                format!("{s}...")
            }
            PipelineEvent::PromptRefined(p) => format!("Refined prompt ready ({} chars)", p.len()),
            PipelineEvent::ScriptGenerated(code) => {
                format!("Generated script ({} lines)", code.lines().count())
            }
            PipelineEvent::ScriptSaved(path) => format!("Saved script to {}", path.display()),
            PipelineEvent::Rendered(path) => format!("Video ready: {}", path.display()),
            PipelineEvent::Failed { stage, message } => format!("Error while {stage}: {message}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub refined_prompt: String,
    pub script: GeneratedScript,
    pub script_path: PathBuf,
    /// `None` when rendering was skipped.
    pub video_path: Option<PathBuf>,
}

pub struct Pipeline<G> {
    generator: G,
    config: PipelineConfig,
    render: bool,
}

impl<G: TextGenerator> Pipeline<G> {
    pub fn new(generator: G, config: PipelineConfig) -> AnimathResult<Self> {
        config.validate()?;
        Ok(Self {
            generator,
            config,
            render: true,
        })
    }

    /// Stop after the script is written.
    pub fn without_render(mut self) -> Self {
        self.render = false;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Runs every stage in order and stops at the first failure.
    ///
    /// Artifacts from completed stages (the written script in particular) are left on disk.
    #[tracing::instrument(skip_all, fields(generator = self.generator.name()))]
    pub fn run(
        &self,
        user_input: &str,
        on_event: &mut dyn FnMut(PipelineEvent),
    ) -> AnimathResult<RunReport> {
        let cfg = &self.config;

        let refined_prompt = stage(Stage::Refine, on_event, || {
            refine_prompt(&self.generator, user_input)
        })?;
        tracing::debug!(refined = %refined_prompt, "prompt refined");
        on_event(PipelineEvent::PromptRefined(refined_prompt.clone()));

        let script = stage(Stage::Generate, on_event, || {
            let raw = generate_script(&self.generator, &refined_prompt, &cfg.scene_name)?;
            GeneratedScript::from_response(raw)
        })?;
        if !script.defines_scene(&cfg.scene_name) {
            tracing::warn!(scene = %cfg.scene_name, "generated script does not appear to define the scene class");
        }
        on_event(PipelineEvent::ScriptGenerated(script.code.clone()));

        stage(Stage::Save, on_event, || {
            write_script(&cfg.script_path, &script.code)
        })?;
        on_event(PipelineEvent::ScriptSaved(cfg.script_path.clone()));

        let video_path = if self.render {
            let out = stage(Stage::Render, on_event, || {
                ManimRender::from_config(cfg).run()
            })?;
            on_event(PipelineEvent::Rendered(out.video_path.clone()));
            Some(out.video_path)
        } else {
            None
        };

        Ok(RunReport {
            refined_prompt,
            script,
            script_path: cfg.script_path.clone(),
            video_path,
        })
    }
}

fn stage<T>(
    stage: Stage,
    on_event: &mut dyn FnMut(PipelineEvent),
    f: impl FnOnce() -> AnimathResult<T>,
) -> AnimathResult<T> {
    on_event(PipelineEvent::StageStarted(stage));
    f().inspect_err(|e| {
        tracing::error!(%stage, error = %e, "pipeline stage failed");
        on_event(PipelineEvent::Failed {
            stage,
            message: e.to_string(),
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_are_human_readable() {
        assert_eq!(
            PipelineEvent::StageStarted(Stage::Refine).status_line(),
            "Refining prompt..."
        );
        assert_eq!(
            PipelineEvent::ScriptGenerated("a\nb\nc".into()).status_line(),
            "Generated script (3 lines)"
        );
        assert_eq!(
            PipelineEvent::Failed {
                stage: Stage::Render,
                message: "boom".into()
            }
            .status_line(),
            "Error while rendering video: boom"
        );
    }
}
