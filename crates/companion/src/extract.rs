use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::{GenerateRequest, GenerativeBackend, Part, Role, Turn};
use crate::error::ExtractionError;
use crate::locale;
use crate::schema::{PlantData, PLANT_DATA_SCHEMA, QUICK_TIPS_HINT};

/// Payloads are always tagged as JPEG; the model sniffs the actual format.
const IMAGE_MIME: &str = "image/jpeg";

/// One-shot structured identification of a plant photo.
pub struct PlantAnalyzer {
    backend: Arc<dyn GenerativeBackend>,
}

impl PlantAnalyzer {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self { backend }
    }

    /// Identify the plant in a base64 image payload (no `data:` prefix).
    /// No retry; the caller decides whether to ask for another image.
    pub async fn analyze(&self, image_base64: &str) -> Result<PlantData, ExtractionError> {
        let request = build_request(image_base64);
        let text = self
            .backend
            .generate(&request)
            .await?
            .filter(|t| !t.trim().is_empty())
            .ok_or(ExtractionError::EmptyResponse)?;

        let plant = PlantData::from_json(&text)
            .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

        if !plant.tips_within_hint() {
            warn!(
                tips = plant.quick_tips.len(),
                expected = ?QUICK_TIPS_HINT,
                "Tip count outside the requested range"
            );
        }
        info!(name = %plant.name, scientific_name = %plant.scientific_name, "Plant identified");
        Ok(plant)
    }
}

fn build_request(image_base64: &str) -> GenerateRequest {
    GenerateRequest {
        system_instruction: Some(locale::BOTANIST_PERSONA.into()),
        contents: vec![Turn {
            role: Role::User,
            parts: vec![
                Part::InlineData {
                    mime_type: IMAGE_MIME.into(),
                    data: image_base64.into(),
                },
                Part::Text(locale::IDENTIFY_INSTRUCTION.into()),
            ],
        }],
        response_schema: Some(PLANT_DATA_SCHEMA.clone()),
    }
}
