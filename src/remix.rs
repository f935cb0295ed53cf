use crate::backend::GenerativeBackend;
use crate::error::RemixError;
use crate::image_data::ImagePayload;

const DESCRIBE_PROMPT: &str =
    "Briefly describe the main subject and composition of this image in English.";
const FALLBACK_DESCRIPTION: &str = "a creative composition";

fn direct_prompt(style: &str) -> String {
    format!(
        "Transform this image strictly into the following style while preserving \
the main subject: {style}."
    )
}

fn regenerate_prompt(description: &str, style: &str) -> String {
    format!("Generate an image of {description}, rendered strictly in the style: {style}.")
}

/// Restyles the image in two tiers. The direct image-to-image transform
/// is tried first; when it errors or yields no image part, the pipeline
/// degrades to describe-then-generate, which trades fidelity to the
/// original pixels for a far lower refusal rate. Every failure exit
/// carries the primary attempt's cause.
pub async fn remix_image(
    backend: &dyn GenerativeBackend,
    image: &ImagePayload,
    style: &str,
) -> Result<ImagePayload, RemixError> {
    let primary_cause = match backend.generate_image(&direct_prompt(style), Some(image)).await {
        Ok(Some(remixed)) => return Ok(remixed),
        Ok(None) => "direct transform produced no image".to_string(),
        Err(e) => e.to_string(),
    };
    tracing::warn!(%primary_cause, "direct transform failed, degrading to describe-then-generate");

    // Empty description text degrades to a generic one; an outright
    // error here ends the pipeline, still citing the primary cause.
    let description = match backend.generate_text(DESCRIBE_PROMPT, Some(image)).await {
        Ok(Some(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => FALLBACK_DESCRIPTION.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "fallback description failed");
            return Err(RemixError { primary_cause });
        }
    };

    match backend
        .generate_image(&regenerate_prompt(&description, style), None)
        .await
    {
        Ok(Some(remixed)) => Ok(remixed),
        Ok(None) => Err(RemixError { primary_cause }),
        Err(e) => {
            tracing::warn!(error = %e, "fallback generation failed");
            Err(RemixError { primary_cause })
        }
    }
}
