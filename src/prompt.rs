//! Instruction templates for the two requests made per run.

use crate::{
    error::{AnimathError, AnimathResult},
    llm::TextGenerator,
};

pub const REFINE_INSTRUCTION: &str = "You are an AI that helps generate precise prompts for AI code generation. \
Given a user's math concept description, refine it into a well-structured prompt \
that asks for a Manim script to visualize the concept. \
Do NOT generate code, only output the improved prompt.";

const CODEGEN_OUTPUT_RULE: &str =
    "Output only the Python Manim script. Do not add explanations or extra text.";

const CODEGEN_LAYOUT_RULES: &[&str] = &[
    "Ensure that text elements are well-aligned and old text disappears before new text appears.",
    "Ensure proper alignment, remove previous text before adding new text, and include smooth transitions.",
    "Take note of frame space and don't overflow out of frame.",
    "Try to utilize all the frame area without overlapping.",
];

pub fn refine_request(user_input: &str) -> String {
    format!("{REFINE_INSTRUCTION}\nUser Input: {user_input}")
}

pub fn codegen_request(refined_prompt: &str, scene_name: &str) -> String {
    let mut out = format!(
        "{refined_prompt}\n\n{CODEGEN_OUTPUT_RULE} The script should define a Manim class called '{scene_name}'."
    );
    for rule in CODEGEN_LAYOUT_RULES {
        out.push(' ');
        out.push_str(rule);
    }
    out
}

#[tracing::instrument(skip(generator, user_input), fields(generator = generator.name()))]
pub fn refine_prompt(generator: &dyn TextGenerator, user_input: &str) -> AnimathResult<String> {
    let user_input = user_input.trim();
    if user_input.is_empty() {
        return Err(AnimathError::validation("concept description is empty"));
    }

    let refined = generator.generate(&refine_request(user_input))?;
    non_empty(refined, "refined prompt")
}

/// Returns the raw response; fence stripping happens in [`crate::script`].
#[tracing::instrument(skip(generator, refined_prompt), fields(generator = generator.name()))]
pub fn generate_script(
    generator: &dyn TextGenerator,
    refined_prompt: &str,
    scene_name: &str,
) -> AnimathResult<String> {
    let raw = generator.generate(&codegen_request(refined_prompt, scene_name))?;
    non_empty(raw, "generated script")
}

fn non_empty(text: String, what: &str) -> AnimathResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AnimathError::generation(format!("{what} is empty")));
    }
    Ok(trimmed.to_string())
}
