use serde::{Deserialize, Serialize};

/// One listed shop. Base fields come from the listing card at discovery;
/// the remaining fields start empty and are filled only by detail-page
/// enrichment. `id` is assigned once and never changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Shop {
    pub id: String,
    pub name: String,
    pub address: String,
    pub category: String,
    pub price_info: String,
    pub payment_ratio: String,
    pub link: String,
    pub phone: String,
    pub hours: String,
    pub description: String,
    pub address_detail: String,
    pub payment_methods: Vec<String>,
}

impl Shop {
    /// The three detail-page staples are what `--skip-enriched` gates on;
    /// addressDetail and paymentMethods are too sparse on the source site.
    pub fn fully_enriched(&self) -> bool {
        !self.phone.is_empty() && !self.hours.is_empty() && !self.description.is_empty()
    }
}

/// The attributes one detail page yielded. Anything the extractor could not
/// confidently resolve stays empty rather than guessed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShopDetail {
    pub phone: String,
    pub hours: String,
    pub description: String,
    pub address_detail: String,
    pub price_info: String,
    pub payment_methods: Vec<String>,
}
