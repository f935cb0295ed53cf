use serde::{Deserialize, Serialize};

use crate::backend::GenerativeBackend;
use crate::error::RefineError;

/// Preset stylistic filters. Each one is just a canned instruction fed
/// through the same refinement path as free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleFilter {
    Cinematic,
    Vintage,
    Minimalist,
    Vibrant,
    Dreamy,
    Noir,
}

impl StyleFilter {
    pub const ALL: [StyleFilter; 6] = [
        StyleFilter::Cinematic,
        StyleFilter::Vintage,
        StyleFilter::Minimalist,
        StyleFilter::Vibrant,
        StyleFilter::Dreamy,
        StyleFilter::Noir,
    ];

    pub fn instruction(self) -> &'static str {
        match self {
            StyleFilter::Cinematic => {
                "Rewrite it as a cinematic scene: dramatic lighting, anamorphic framing, film grain."
            }
            StyleFilter::Vintage => {
                "Rewrite it with a vintage feel: faded colors, analog film texture, nostalgic mood."
            }
            StyleFilter::Minimalist => {
                "Rewrite it as minimalist: clean negative space, few elements, muted palette."
            }
            StyleFilter::Vibrant => {
                "Rewrite it as vibrant and saturated: bold colors, high contrast, energetic mood."
            }
            StyleFilter::Dreamy => {
                "Rewrite it as dreamy and ethereal: soft focus, pastel haze, floating light."
            }
            StyleFilter::Noir => {
                "Rewrite it as film noir: black and white, hard shadows, moody atmosphere."
            }
        }
    }
}

fn refinement_prompt(original: &str, instruction: &str) -> String {
    format!(
        "Modify the following image description according to the instruction. \
Respond with the modified description only, in English, no preamble.\n\n\
Description: {original}\n\nInstruction: {instruction}"
    )
}

/// Merges an instruction into the current description via one remote
/// text call. Empty remote output is a silent no-op: the original text
/// comes back unchanged. Only a transport-level failure is an error,
/// and the caller must leave the current description untouched then.
pub async fn refine_description(
    backend: &dyn GenerativeBackend,
    original: &str,
    instruction: &str,
) -> Result<String, RefineError> {
    let reply = backend
        .generate_text(&refinement_prompt(original, instruction), None)
        .await?;

    match reply {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => {
            tracing::warn!("refinement returned no text, keeping description");
            Ok(original.to_string())
        }
    }
}
