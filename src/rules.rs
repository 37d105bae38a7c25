use std::path::Path;

use anyhow::{Context, Result};
use config::Config;
use serde::Deserialize;

/// Keyword sets driving the attribute extractor. These are site-specific
/// data, not logic: the built-in defaults mirror the original target
/// directory and a `rules.toml` can override any subset of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractRules {
    /// A line containing one of these is taken as the opening-hours line.
    pub hours_keywords: Vec<String>,
    /// Seeing one of these marks the start of the free-text introduction.
    pub intro_anchors: Vec<String>,
    /// A collected line containing one of these ends collection; its next
    /// line is captured as price info.
    pub price_markers: Vec<String>,
    /// Same cutoff role as `price_markers`, but the next line is appended to
    /// payment methods.
    pub ratio_markers: Vec<String>,
    /// Site chrome and branding tokens excluded from descriptions.
    pub skip_tokens: Vec<String>,
    /// A line containing one of these is taken as the detail-page address.
    pub region_tokens: Vec<String>,
}

impl Default for ExtractRules {
    fn default() -> Self {
        Self {
            hours_keywords: svec(&["영업시간", "운영시간", "Hours", "오픈"]),
            intro_anchors: svec(&[
                "오리불고기",
                "오리주물럭",
                "오리탕",
                "점심특선",
                "쌈밥",
                "신선한야채",
                "건강밥상",
                "결제",
                "베리",
            ]),
            price_markers: svec(&["VERY 단가", "VERY단가"]),
            ratio_markers: svec(&["결제비율", "결제 비율"]),
            skip_tokens: svec(&[
                "KR", "verypay", "verychain", "verychat", "veryads", "VeryPay", "Logo",
            ]),
            region_tokens: svec(&["광주"]),
        }
    }
}

impl ExtractRules {
    /// Built-in defaults, or the defaults overlaid with a TOML file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let cfg = Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()
            .with_context(|| format!("could not read extraction rules from {}", path.display()))?;
        cfg.try_deserialize()
            .with_context(|| format!("invalid extraction rules in {}", path.display()))
    }
}

fn svec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
