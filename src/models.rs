use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Buy,
    Sell,
}

/// Immutable submitted query. A new submission replaces the whole value,
/// it is never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub mode: Mode,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, mode: Mode) -> Self {
        Self {
            text: text.into(),
            mode,
        }
    }
}

/// One AI-inferred attribute parameter: a key, a display name, and a finite
/// option set the user picks from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductField {
    pub name: String,
    pub key: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Clarification parameters returned by the refinement check. Exists only
/// between "needs refinement" and the clarification submit/skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementRequest {
    pub base_query: String,
    pub fields: Vec<ProductField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefinementCheck {
    pub needs_refinement: bool,
    #[serde(default)]
    pub fields: Vec<ProductField>,
}

/// Attribute key -> chosen value. `BTreeMap` keeps iteration deterministic.
pub type AttributeMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DealItem {
    pub title: String,
    pub price: f64,
    pub image: String,
    pub url: String,
    pub status: String,
    pub discount_pct: f64,
    pub fair_value: f64,
    pub flip_profit: f64,
    pub flip_roi: f64,
    #[serde(default)]
    pub condition_rating: Option<u8>,
    #[serde(default)]
    pub condition_label: Option<String>,
    #[serde(default)]
    pub condition_notes: Option<String>,
    #[serde(default)]
    pub condition_adjusted_discount: Option<f64>,
    /// "top_pick" | "fair_warning" | absent.
    #[serde(default)]
    pub condition_flag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilteredItem {
    pub title: String,
    pub price: f64,
    pub url: String,
    pub image: String,
    pub reason: String,
    /// "scam" | "mismatch" | "poor_condition".
    pub filter_type: String,
}

/// Buy-side analytics for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuyAnalysis {
    pub query: String,
    pub fair_value: f64,
    pub mean_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub sample_size: u32,
    pub std_dev: f64,
    pub confidence: String,
    pub deals: Vec<DealItem>,
    pub total_active: u32,
    pub deals_eliminated: u32,
    #[serde(default)]
    pub filtered_items: Vec<FilteredItem>,
    #[serde(default)]
    pub manufacturer_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceTier {
    pub name: String,
    pub list_price: f64,
    pub ebay_fee: f64,
    pub shipping: f64,
    pub net_payout: f64,
}

/// Sell-side pricing advice: sold-history stats plus listing tiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SellAdvice {
    pub query: String,
    pub fair_value: f64,
    pub mean_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub sample_size: u32,
    pub std_dev: f64,
    pub confidence: String,
    pub tiers: Vec<PriceTier>,
    #[serde(default)]
    pub recommended_tier: Option<String>,
}

/// Structured result of the image condition scorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAnalysis {
    pub rating: u8,
    pub label: String,
    pub notes: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub detected_product: Option<String>,
    #[serde(default)]
    pub detected_attributes: Option<AttributeMap>,
}

/// Raw image bytes handed to the facade for condition scoring.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            file_name: "upload".to_string(),
        }
    }

    /// Data URL used for the preview thumbnail, same encoding the backend
    /// applies before handing the image to the vision model.
    pub fn data_url(&self) -> String {
        use base64::Engine as _;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.content_type, b64)
    }
}
