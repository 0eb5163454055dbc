#![forbid(unsafe_code)]

//! Turn a plain-language math concept into a Manim animation.
//!
//! The flow is linear: [`prompt::refine_prompt`] asks the text service for a better prompt,
//! [`prompt::generate_script`] asks it for a Manim script, [`script`] strips code fences and
//! writes the file, [`render::ManimRender`] shells out to `manim`, and [`preview`] pulls a
//! still frame out of the result with `ffmpeg`. [`pipeline::Pipeline`] chains the steps;
//! [`session::Session`] runs them on a worker thread for interactive use.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod preview;
pub mod prompt;
pub mod render;
pub mod script;
pub mod session;

pub use config::{PipelineConfig, Quality};
pub use error::{AnimathError, AnimathResult};
pub use llm::{GeminiClient, GeminiConfig, TextGenerator};
pub use pipeline::{Pipeline, PipelineEvent, RunReport, Stage};
pub use preview::{PreviewFrame, extract_frame_png, find_latest_video, open_in_default_player};
pub use render::{ManimRender, RenderOutput, is_manim_on_path};
pub use script::{GeneratedScript, strip_code_fence, write_script};
pub use session::{Job, JobMessage, Session};
