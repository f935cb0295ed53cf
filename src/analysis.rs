use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::GenerativeBackend;
use crate::error::AnalysisError;
use crate::image_data::ImagePayload;

const ANALYSIS_PROMPT: &str = "Analyze this image. Report its dominant colors as hex codes, \
its artistic style, its layout and composition, the camera viewpoint, the main objects it \
contains, and a detailed one-paragraph caption suitable as an image generation prompt.";

/// The typed analysis record. Decoded once per upload and immutable for
/// the lifetime of the results view; only `prompt` escapes it, as the
/// seed for the editable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    pub colors: Vec<String>,
    pub style: String,
    pub layout: String,
    pub layout_detail: Option<String>,
    pub view: String,
    pub view_detail: Option<String>,
    pub objects: Vec<String>,
    pub prompt: String,
}

/// Response schema sent with the structured-output call. All eight
/// fields are required on the wire; the detail fields only become
/// optional in the Rust type.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "colors": { "type": "ARRAY", "items": { "type": "STRING" } },
            "style": { "type": "STRING" },
            "layout": { "type": "STRING" },
            "layoutDetail": { "type": "STRING" },
            "view": { "type": "STRING" },
            "viewDetail": { "type": "STRING" },
            "objects": { "type": "ARRAY", "items": { "type": "STRING" } },
            "prompt": { "type": "STRING" },
        },
        "required": [
            "colors", "style", "layout", "layoutDetail",
            "view", "viewDetail", "objects", "prompt",
        ],
    })
}

/// Issues the structured analysis call and decodes the JSON text into
/// an [`ImageAnalysis`]. No retry; the caller reverts the session on
/// any failure.
pub async fn analyze_image(
    backend: &dyn GenerativeBackend,
    image: &ImagePayload,
) -> Result<ImageAnalysis, AnalysisError> {
    let text = backend
        .generate_structured(ANALYSIS_PROMPT, image, &response_schema())
        .await?;

    let text = match text {
        Some(text) if !text.trim().is_empty() => text,
        _ => return Err(AnalysisError::Empty),
    };

    let analysis: ImageAnalysis = serde_json::from_str(&text)?;
    tracing::info!(style = %analysis.style, objects = analysis.objects.len(), "image analyzed");
    Ok(analysis)
}
