//! Turns extracted Agworld records into report-ready summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::external::data_source::ResourceType;
use crate::models::{ActivityRecord, CropRecord, FieldRecord};

/// One record reduced to what reports show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub id: String,
    pub data_type: String,
    pub summary: String,
    pub area: Option<f64>,
    pub cost: Option<f64>,
}

/// Processed view of one resource as the pollers cache it under
/// `agworld:<resource>:latest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub data_type: String,
    pub processed_at: DateTime<Utc>,
    pub records: Vec<ProcessedRecord>,
    /// Items in the payload that did not match the resource's shape.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedData {
    pub total_records: usize,
    pub data_types: BTreeMap<String, usize>,
    pub total_area: f64,
    pub total_cost: f64,
    pub summaries: Vec<String>,
    pub aggregated_at: DateTime<Utc>,
}

fn data_type(resource: ResourceType) -> &'static str {
    match resource {
        ResourceType::Fields => "field",
        ResourceType::Activities => "activity",
        ResourceType::Crops => "crop",
    }
}

fn or_na<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn sum_costs(costs: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = costs.iter().flatten().copied().collect();
    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum())
    }
}

fn process_field(field: FieldRecord) -> ProcessedRecord {
    ProcessedRecord {
        summary: format!(
            "Field: {} - Area: {} - Farm: {}",
            field.name.as_deref().unwrap_or("Unknown"),
            or_na(&field.area),
            or_na(&field.farm_id)
        ),
        cost: sum_costs(&[field.chemical_cost, field.fertilizer_cost, field.seed_cost]),
        area: field.area,
        data_type: "field".into(),
        id: field.id,
    }
}

fn process_activity(activity: ActivityRecord) -> ProcessedRecord {
    let status = if activity.completed.unwrap_or(false) { "Completed" } else { "Pending" };
    ProcessedRecord {
        summary: format!(
            "Activity: {} - Type: {} - Status: {}",
            activity.title.as_deref().unwrap_or("Unknown"),
            or_na(&activity.activity_type),
            status
        ),
        cost: activity.total_cost,
        area: activity.area,
        data_type: "activity".into(),
        id: activity.id,
    }
}

fn process_crop(crop: CropRecord) -> ProcessedRecord {
    ProcessedRecord {
        summary: format!(
            "Crop: {} - Variety: {} - Field: {}",
            crop.crop_type,
            or_na(&crop.variety),
            crop.field_id
        ),
        cost: None,
        area: None,
        data_type: "crop".into(),
        id: crop.id,
    }
}

/// Process a fetched payload: a JSON array of one resource's records.
///
/// Items that do not deserialize as the resource's record are counted in
/// `skipped` rather than failing the whole batch.
pub fn process_records(resource: ResourceType, payload: &Value) -> ResourceSnapshot {
    let items = payload.as_array().map(Vec::as_slice).unwrap_or_default();
    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0;

    for item in items {
        let processed = match resource {
            ResourceType::Fields => serde_json::from_value(item.clone()).map(process_field),
            ResourceType::Activities => serde_json::from_value(item.clone()).map(process_activity),
            ResourceType::Crops => serde_json::from_value(item.clone()).map(process_crop),
        };
        match processed {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!("Skipping malformed {} record: {}", data_type(resource), e);
            }
        }
    }

    info!("⚙️  Processed {} {} records ({} skipped)", records.len(), data_type(resource), skipped);

    ResourceSnapshot {
        data_type: data_type(resource).to_string(),
        processed_at: Utc::now(),
        records,
        skipped,
    }
}

pub fn aggregate(snapshots: &[ResourceSnapshot]) -> AggregatedData {
    let mut data_types = BTreeMap::new();
    let mut summaries = Vec::new();
    let mut total_area = 0.0;
    let mut total_cost = 0.0;

    for snapshot in snapshots {
        for record in &snapshot.records {
            *data_types.entry(record.data_type.clone()).or_insert(0) += 1;
            total_area += record.area.unwrap_or(0.0);
            total_cost += record.cost.unwrap_or(0.0);
            summaries.push(record.summary.clone());
        }
    }

    AggregatedData {
        total_records: summaries.len(),
        data_types,
        total_area,
        total_cost,
        summaries,
        aggregated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_process_fields_builds_summaries_and_costs() {
        let payload = json!([
            {"id": "f1", "name": "North", "area": 10.0, "farm_id": "farm-1", "chemical_cost": 5.0, "seed_cost": 2.5},
            {"id": "f2"}
        ]);

        let snapshot = process_records(ResourceType::Fields, &payload);
        assert_eq!(snapshot.data_type, "field");
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[0].summary, "Field: North - Area: 10 - Farm: farm-1");
        assert_eq!(snapshot.records[0].cost, Some(7.5));
        assert_eq!(snapshot.records[1].summary, "Field: Unknown - Area: N/A - Farm: N/A");
        assert_eq!(snapshot.records[1].cost, None);
    }

    #[test]
    fn test_malformed_items_are_skipped() {
        let payload = json!([{"id": "a1", "title": "Spray", "completed": true}, "garbage", {"no_id": 1}]);
        let snapshot = process_records(ResourceType::Activities, &payload);
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.skipped, 2);
        assert_eq!(snapshot.records[0].summary, "Activity: Spray - Type: N/A - Status: Completed");
    }

    #[test]
    fn test_non_array_payload_is_empty() {
        let snapshot = process_records(ResourceType::Crops, &json!({"data": []}));
        assert!(snapshot.records.is_empty());
    }

    #[test]
    fn test_aggregate_counts_per_type() {
        let fields = process_records(ResourceType::Fields, &json!([{"id": "f1", "area": 4.0}, {"id": "f2", "area": 6.0}]));
        let crops = process_records(ResourceType::Crops, &json!([{"id": "c1", "crop_type": "Wheat", "field_id": "f1"}]));

        let aggregated = aggregate(&[fields, crops]);
        assert_eq!(aggregated.total_records, 3);
        assert_eq!(aggregated.data_types["field"], 2);
        assert_eq!(aggregated.data_types["crop"], 1);
        assert_eq!(aggregated.total_area, 10.0);
        assert_eq!(aggregated.summaries[2], "Crop: Wheat - Variety: N/A - Field: f1");
    }
}
