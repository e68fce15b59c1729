//! Structured plant-care result and the JSON schema that constrains the model's
//! output. The two are versioned together: `tests::schema_matches_type` fails
//! whenever a field is added to one and not the other.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Advisory bounds for `quick_tips`. Only logged, never enforced.
pub const QUICK_TIPS_HINT: std::ops::RangeInclusive<usize> = 3..=5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantData {
    pub name: String,
    pub scientific_name: String,
    pub description: String,
    pub care: CareProfile,
    pub quick_tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareProfile {
    pub light: String,
    pub water: String,
    pub soil: String,
    pub humidity: String,
    pub temperature: String,
    pub toxicity: String,
}

/// `responseSchema` for the extraction request, in Gemini's OpenAPI subset.
pub static PLANT_DATA_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING", "description": "Common name of the plant in Hebrew" },
            "scientificName": { "type": "STRING", "description": "Scientific name of the plant (Latin)" },
            "description": {
                "type": "STRING",
                "description": "A brief description of the plant's appearance and origin in Hebrew"
            },
            "care": {
                "type": "OBJECT",
                "properties": {
                    "light": {
                        "type": "STRING",
                        "description": "Light requirements in Hebrew (e.g., 'אור מלא', 'צל חלקי')"
                    },
                    "water": { "type": "STRING", "description": "Watering schedule and needs in Hebrew" },
                    "soil": { "type": "STRING", "description": "Soil type recommendations in Hebrew" },
                    "humidity": { "type": "STRING", "description": "Humidity preferences in Hebrew" },
                    "temperature": {
                        "type": "STRING",
                        "description": "Ideal temperature range in Hebrew (Celsius)"
                    },
                    "toxicity": { "type": "STRING", "description": "Toxicity info for pets/humans in Hebrew" }
                },
                "required": ["light", "water", "soil", "humidity", "temperature", "toxicity"]
            },
            "quickTips": {
                "type": "ARRAY",
                "items": { "type": "STRING" },
                "description": "List of 3-5 quick actionable tips for success in Hebrew"
            }
        },
        "required": ["name", "scientificName", "description", "care", "quickTips"]
    })
});

impl PlantData {
    /// Parse the model's raw text. Missing or null required fields fail here;
    /// there is no partially populated result.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn tips_within_hint(&self) -> bool {
        QUICK_TIPS_HINT.contains(&self.quick_tips.len())
    }
}

#[cfg(test)]
pub(crate) fn sample_plant() -> PlantData {
    PlantData {
        name: "פיקוס כינורי".into(),
        scientific_name: "Ficus lyrata".into(),
        description: "עץ נוי עם עלים גדולים בצורת כינור, מקורו במערב אפריקה.".into(),
        care: CareProfile {
            light: "אור בהיר עקיף".into(),
            water: "להשקות כשהשכבה העליונה יבשה".into(),
            soil: "מצע מנוקז היטב".into(),
            humidity: "לחות בינונית עד גבוהה".into(),
            temperature: "18-27 מעלות".into(),
            toxicity: "רעיל לחיות מחמד".into(),
        },
        quick_tips: vec![
            "לסובב את העציץ פעם בחודש".into(),
            "לנגב אבק מהעלים".into(),
            "להימנע ממקומות עם רוח".into(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;

    fn keys(value: &Value) -> BTreeSet<String> {
        value.as_object().unwrap().keys().cloned().collect()
    }

    fn required(schema: &Value) -> BTreeSet<String> {
        schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn schema_matches_type() {
        let serialized = serde_json::to_value(sample_plant()).unwrap();
        let schema = &*PLANT_DATA_SCHEMA;

        assert_eq!(keys(&schema["properties"]), keys(&serialized));
        assert_eq!(required(schema), keys(&serialized));

        let care_schema = &schema["properties"]["care"];
        assert_eq!(keys(&care_schema["properties"]), keys(&serialized["care"]));
        assert_eq!(required(care_schema), keys(&serialized["care"]));
    }

    #[test]
    fn round_trips_through_json() {
        let plant = sample_plant();
        let text = serde_json::to_string(&plant).unwrap();
        assert!(text.contains("\"scientificName\""));
        assert!(text.contains("\"quickTips\""));
        assert_eq!(PlantData::from_json(&text).unwrap(), plant);
    }

    #[test]
    fn missing_care_field_is_rejected() {
        let mut value = serde_json::to_value(sample_plant()).unwrap();
        value["care"].as_object_mut().unwrap().remove("toxicity");
        let err = PlantData::from_json(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("toxicity"));
    }

    #[test]
    fn null_top_level_field_is_rejected() {
        let mut value = serde_json::to_value(sample_plant()).unwrap();
        value["description"] = Value::Null;
        assert!(PlantData::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn tip_count_outside_hint_still_parses() {
        let mut plant = sample_plant();
        plant.quick_tips.truncate(1);
        let parsed = PlantData::from_json(&serde_json::to_string(&plant).unwrap()).unwrap();
        assert!(!parsed.tips_within_hint());
        assert!(sample_plant().tips_within_hint());
    }
}
