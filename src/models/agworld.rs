use serde::{Deserialize, Serialize};

// Flat record shapes extracted from Agworld JSON:API documents.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: String,
    pub name: Option<String>,
    pub area: Option<f64>,
    pub farm_id: Option<String>,
    pub description: Option<String>,
    pub cropping_method: Option<String>,
    #[serde(default)]
    pub crops: Vec<CropEntry>,
    pub chemical_cost: Option<f64>,
    pub fertilizer_cost: Option<f64>,
    pub seed_cost: Option<f64>,
    pub harvested_area: Option<f64>,
    pub planting_date: Option<String>,
    pub harvest_date: Option<String>,
    pub updated_at: Option<String>,
}

/// A crop as listed inside a field's seasonal attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropEntry {
    pub crop_name: Option<String>,
    pub variety_name: Option<String>,
    pub crop_grade: Option<String>,
    pub crop_use: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: String,
    pub title: Option<String>,
    pub activity_type: Option<String>,
    pub activity_category: Option<String>,
    pub approved: Option<bool>,
    pub completed: Option<bool>,
    pub area: Option<f64>,
    pub total_cost: Option<f64>,
    pub due_at: Option<String>,
    pub completed_at: Option<String>,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    #[serde(default)]
    pub field_ids: Vec<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropRecord {
    pub id: String,
    pub crop_type: String,
    pub variety: Option<String>,
    pub field_id: String,
    pub crop_grade: Option<String>,
    pub crop_use: Option<String>,
    pub planting_date: Option<String>,
    pub harvest_date: Option<String>,
}
