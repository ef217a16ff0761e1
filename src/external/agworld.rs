use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{env_parse, env_string, ConfigError, EnvLookup};
use crate::external::data_source::{DataSource, DataSourceError, ResourceType};
use crate::models::{ActivityRecord, CropEntry, CropRecord, FieldRecord, JobParams};
use crate::services::rate_limiter::RateLimiter;

const JSON_API: &str = "application/vnd.api+json";
const DEFAULT_BASE_URL: &str = "https://us.agworld.co/user_api/v1";

#[derive(Debug, Clone)]
pub struct AgworldConfig {
    pub api_key: String,
    /// US by default; AU is `https://my.agworld.com.au/user_api/v1`, NZ `https://nz.agworld.co/user_api/v1`.
    pub base_url: String,
    pub request_timeout: Duration,
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
    pub page_size: u32,
    pub max_pages: u32,
}

impl AgworldConfig {
    pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: env_string(lookup, "AGWORLD_API_KEY", ""),
            base_url: env_string(lookup, "AGWORLD_API_BASE_URL", DEFAULT_BASE_URL),
            request_timeout: Duration::from_secs(env_parse(lookup, "AGWORLD_REQUEST_TIMEOUT_SECS", 30)?),
            requests_per_minute: env_parse(lookup, "AGWORLD_REQUESTS_PER_MINUTE", 60)?,
            max_concurrent: env_parse(lookup, "AGWORLD_MAX_CONCURRENT", 2)?,
            page_size: env_parse(lookup, "AGWORLD_PAGE_SIZE", 100)?,
            max_pages: env_parse(lookup, "AGWORLD_MAX_PAGES", 50)?,
        })
    }
}

/// JSON:API client for the Agworld user API.
pub struct AgworldClient {
    client: reqwest::Client,
    config: AgworldConfig,
    rate_limiter: RateLimiter,
}

impl AgworldClient {
    pub fn new(config: AgworldConfig) -> Result<Self, DataSourceError> {
        if config.api_key.is_empty() {
            warn!("⚠️  AGWORLD_API_KEY is not set, upstream requests will be rejected");
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("agworld-reporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataSourceError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let rate_limiter = RateLimiter::new(config.max_concurrent, config.requests_per_minute);

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    async fn get_page(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        page: u32,
    ) -> Result<Value, DataSourceError> {
        let _guard = self
            .rate_limiter
            .acquire()
            .await
            .ok_or_else(|| DataSourceError::Network("rate limiter closed".into()))?;

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint);
        debug!("🌾 GET {} page {}", url, page);

        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, JSON_API)
            .header(CONTENT_TYPE, JSON_API)
            .query(query)
            .query(&[
                ("page[number]", page.to_string()),
                ("page[size]", self.config.page_size.to_string()),
            ]);
        if !self.config.api_key.is_empty() {
            request = request.query(&[("api_token", self.config.api_key.as_str())]);
        }

        let resp = request.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();

        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                self.rate_limiter.penalize();
            }
            return Err(classify_status(status.as_u16(), retry_after, &body));
        }

        self.rate_limiter.reset();
        resp.json::<Value>()
            .await
            .map_err(|e| DataSourceError::Parse(e.to_string()))
    }

    /// Collect the `data` items of every page of an endpoint.
    async fn get_all(&self, endpoint: &str, query: &[(String, String)]) -> Result<Vec<Value>, DataSourceError> {
        let mut items = Vec::new();

        for page in 1..=self.config.max_pages.max(1) {
            let doc = self.get_page(endpoint, query, page).await?;
            let data = doc
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| DataSourceError::BadResponse(format!("{} response has no data array", endpoint)))?;

            let page_len = data.len();
            items.extend(data.iter().cloned());

            let has_next = match doc.pointer("/links/next") {
                Some(Value::Null) => false,
                Some(_) => true,
                None => page_len as u32 >= self.config.page_size,
            };
            if page_len == 0 || !has_next {
                break;
            }
            if page == self.config.max_pages {
                warn!("⚠️  Stopped paging {} after {} pages", endpoint, page);
            }
        }

        Ok(items)
    }

    pub async fn fetch_fields(&self, params: &JobParams) -> Result<Vec<FieldRecord>, DataSourceError> {
        let mut query = Vec::new();
        if let Some(farm_id) = params.get("farm_id") {
            query.push(("filter[farm_id]".to_string(), farm_id.to_string()));
        }
        if let Some(season_id) = params.get("season_id") {
            query.push(("season_id".to_string(), season_id.to_string()));
        }

        let items = self.get_all("fields", &query).await?;
        let fields: Vec<FieldRecord> = items.iter().filter_map(extract_field).collect();
        info!("🌾 Fetched {} fields from Agworld", fields.len());
        Ok(fields)
    }

    pub async fn fetch_activities(&self, params: &JobParams) -> Result<Vec<ActivityRecord>, DataSourceError> {
        let mut query = Vec::new();
        if let Some(company_id) = params.get("company_id") {
            query.push(("filter[company_id]".to_string(), company_id.to_string()));
        }
        if let Some(activity_type) = params.get("activity_type") {
            query.push(("filter[activity_type]".to_string(), activity_type.to_string()));
        }
        if let Some(updated_since) = params.get("updated_since") {
            query.push(("filter[updated_at]".to_string(), updated_since.to_string()));
        }

        let field_id = params.get("field_id").map(|v| v.to_string());
        let items = self.get_all("activities", &query).await?;
        let activities: Vec<ActivityRecord> = items
            .iter()
            .filter_map(extract_activity)
            .filter(|a| match &field_id {
                Some(id) => a.field_ids.iter().any(|f| f == id),
                None => true,
            })
            .collect();
        info!("🚜 Fetched {} activities from Agworld", activities.len());
        Ok(activities)
    }

    /// Crops have no endpoint of their own; they come from seasonal field data.
    pub async fn fetch_crops(&self, params: &JobParams) -> Result<Vec<CropRecord>, DataSourceError> {
        let mut field_params = JobParams::new();
        if let Some(season_id) = params.get("season_id") {
            field_params.insert("season_id".into(), season_id.clone());
        }
        let fields = self.fetch_fields(&field_params).await?;
        let field_id = params.get("field_id").map(|v| v.to_string());
        let crops = derive_crops(&fields, field_id.as_deref());
        info!("🌱 Derived {} crops from {} fields", crops.len(), fields.len());
        Ok(crops)
    }
}

#[async_trait]
impl DataSource for AgworldClient {
    async fn fetch(&self, resource: ResourceType, params: &JobParams) -> Result<Value, DataSourceError> {
        let value = match resource {
            ResourceType::Fields => serde_json::to_value(self.fetch_fields(params).await?),
            ResourceType::Activities => serde_json::to_value(self.fetch_activities(params).await?),
            ResourceType::Crops => serde_json::to_value(self.fetch_crops(params).await?),
        };
        value.map_err(|e| DataSourceError::Parse(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> DataSourceError {
    if e.is_timeout() {
        DataSourceError::Timeout
    } else if e.is_decode() {
        DataSourceError::Parse(e.to_string())
    } else {
        DataSourceError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> DataSourceError {
    let message: String = body.chars().take(200).collect();
    match status {
        429 => DataSourceError::RateLimited { retry_after },
        401 | 403 => DataSourceError::Auth(format!("HTTP {}", status)),
        408 => DataSourceError::Timeout,
        500..=599 => DataSourceError::Server { status, message },
        _ => DataSourceError::BadResponse(format!("HTTP {}: {}", status, message)),
    }
}

fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn resource_id(item: &Value) -> Option<String> {
    lenient_string(item.get("id"))
}

pub fn extract_field(item: &Value) -> Option<FieldRecord> {
    if item.get("type").and_then(Value::as_str) != Some("fields") {
        return None;
    }
    let attrs = item.get("attributes").cloned().unwrap_or(Value::Null);

    let crops = attrs
        .get("crops")
        .and_then(Value::as_array)
        .map(|crops| {
            crops
                .iter()
                .map(|c| CropEntry {
                    crop_name: lenient_string(c.get("crop_name")),
                    variety_name: lenient_string(c.get("variety_name")),
                    crop_grade: lenient_string(c.get("crop_grade")),
                    crop_use: lenient_string(c.get("crop_use")),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(FieldRecord {
        id: resource_id(item)?,
        name: lenient_string(attrs.get("name")),
        area: lenient_f64(attrs.get("area")),
        farm_id: lenient_string(attrs.get("farm_id")),
        description: lenient_string(attrs.get("description")),
        cropping_method: lenient_string(attrs.get("cropping_method")),
        crops,
        chemical_cost: lenient_f64(attrs.get("chemical_cost")),
        fertilizer_cost: lenient_f64(attrs.get("fertilizer_cost")),
        seed_cost: lenient_f64(attrs.get("seed_cost")),
        harvested_area: lenient_f64(attrs.get("harvested_area")),
        planting_date: lenient_string(attrs.get("planting_date")),
        harvest_date: lenient_string(attrs.get("harvest_date")),
        updated_at: lenient_string(attrs.get("updated_at")),
    })
}

pub fn extract_activity(item: &Value) -> Option<ActivityRecord> {
    if item.get("type").and_then(Value::as_str) != Some("activities") {
        return None;
    }
    let attrs = item.get("attributes").cloned().unwrap_or(Value::Null);

    let field_ids = attrs
        .get("activity_fields")
        .and_then(Value::as_array)
        .map(|fields| fields.iter().filter_map(|f| lenient_string(f.get("field_id"))).collect())
        .unwrap_or_default();

    Some(ActivityRecord {
        id: resource_id(item)?,
        title: lenient_string(attrs.get("title")),
        activity_type: lenient_string(attrs.get("activity_type")),
        activity_category: lenient_string(attrs.get("activity_category")),
        approved: attrs.get("approved").and_then(Value::as_bool),
        completed: attrs.get("completed").and_then(Value::as_bool),
        area: lenient_f64(attrs.get("area")),
        total_cost: lenient_f64(attrs.get("total_cost")),
        due_at: lenient_string(attrs.get("due_at")),
        completed_at: lenient_string(attrs.get("completed_at")),
        company_id: lenient_string(attrs.get("company_id")),
        company_name: lenient_string(attrs.get("company_name")),
        field_ids,
        updated_at: lenient_string(attrs.get("updated_at")),
    })
}

/// One crop record per crop listed on a field, or an `Unknown` placeholder
/// for fields without seasonal crop data.
pub fn derive_crops(fields: &[FieldRecord], field_id: Option<&str>) -> Vec<CropRecord> {
    let mut crops = Vec::new();

    for field in fields {
        if field_id.is_some_and(|id| id != field.id) {
            continue;
        }

        if field.crops.is_empty() {
            crops.push(CropRecord {
                id: format!("{}_crop_unknown", field.id),
                crop_type: "Unknown".to_string(),
                variety: None,
                field_id: field.id.clone(),
                crop_grade: None,
                crop_use: None,
                planting_date: field.planting_date.clone(),
                harvest_date: field.harvest_date.clone(),
            });
            continue;
        }

        for (idx, crop) in field.crops.iter().enumerate() {
            crops.push(CropRecord {
                id: format!("{}_crop_{}", field.id, idx),
                crop_type: crop.crop_name.clone().unwrap_or_else(|| "Unknown".to_string()),
                variety: crop.variety_name.clone(),
                field_id: field.id.clone(),
                crop_grade: crop.crop_grade.clone(),
                crop_use: crop.crop_use.clone(),
                planting_date: field.planting_date.clone(),
                harvest_date: field.harvest_date.clone(),
            });
        }
    }

    crops
}
