use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::model::Shop;
use crate::renderer::{RenderError, Renderer};

static CARD_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href^="/shops/"]"#).unwrap());
static CARD_FALLBACK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/shops/"]"#).unwrap());
static NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());
static ADDRESS_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.truncate").unwrap());
static ADDRESS_FALLBACK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static CATEGORY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.text-xs").unwrap());
static SPAN_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());

const PRICE_LABELS: &[&str] = &["VERY 단가", "VERY단가"];
const RATIO_LABELS: &[&str] = &["결제 비율", "결제비율"];

/// Discovery cannot produce a usable partial listing; the run aborts before
/// anything is written.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid base url {url}: {source}")]
    BadUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("could not load listing {url}: {source}")]
    Load {
        url: String,
        #[source]
        source: RenderError,
    },
    #[error("pagination broke after {advances} advances: {source}")]
    Pagination {
        advances: u32,
        #[source]
        source: RenderError,
    },
}

/// Load the listing, advance the load-more control until it is exhausted,
/// then parse the fully-loaded document exactly once.
pub async fn harvest(
    session: &dyn Renderer,
    base_url: &str,
    settle: Duration,
) -> Result<Vec<Shop>, DiscoveryError> {
    let base = Url::parse(base_url).map_err(|source| DiscoveryError::BadUrl {
        url: base_url.to_string(),
        source,
    })?;

    session
        .render(base_url)
        .await
        .map_err(|source| DiscoveryError::Load {
            url: base_url.to_string(),
            source,
        })?;

    let mut advances = 0u32;
    loop {
        match session.advance_pagination().await {
            Ok(true) => {
                advances += 1;
                debug!(advances, "advanced listing pagination");
                tokio::time::sleep(settle).await;
            }
            // Control absent: the listing is exhausted, not broken.
            Ok(false) => break,
            Err(RenderError::Timeout(_)) => break,
            Err(source) => return Err(DiscoveryError::Pagination { advances, source }),
        }
    }
    info!(advances, "listing fully loaded");

    let html = session
        .document()
        .await
        .map_err(|source| DiscoveryError::Load {
            url: base_url.to_string(),
            source,
        })?;
    Ok(parse_listing(&html, &base))
}

/// One entity per listing anchor. Cards without a readable name or address
/// are still emitted with empty fields; dropping them would break the 1:1
/// mapping between rendered cards and entities.
pub fn parse_listing(html: &str, base: &Url) -> Vec<Shop> {
    let doc = Html::parse_document(html);

    let mut cards: Vec<ElementRef> = doc.select(&CARD_SEL).collect();
    if cards.is_empty() {
        cards = doc.select(&CARD_FALLBACK_SEL).collect();
    }

    let mut shops = Vec::with_capacity(cards.len());
    let mut seen: HashSet<String> = HashSet::new();

    for card in cards {
        let Some(href) = card.value().attr("href") else { continue };
        let Ok(link) = base.join(href) else {
            warn!(href, "unparsable card link");
            continue;
        };
        let Some(id) = shop_id(&link) else { continue };
        if !seen.insert(id.clone()) {
            continue;
        }

        let (price_info, payment_ratio) = labeled_spans(card);

        shops.push(Shop {
            id,
            name: first_text(card, &NAME_SEL),
            address: {
                let addr = first_text(card, &ADDRESS_SEL);
                if addr.is_empty() {
                    first_text(card, &ADDRESS_FALLBACK_SEL)
                } else {
                    addr
                }
            },
            category: first_text(card, &CATEGORY_SEL),
            price_info,
            payment_ratio,
            link: link.to_string(),
            ..Shop::default()
        });
    }

    info!(count = shops.len(), "parsed listing cards");
    shops
}

/// Stable identity: the detail-page path's last segment.
fn shop_id(link: &Url) -> Option<String> {
    let id = link.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if id == "shops" {
        return None;
    }
    Some(id.to_string())
}

fn first_text(card: ElementRef, selector: &Selector) -> String {
    card.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// The card prints "VERY 단가" / "결제 비율" labels with the value in the
/// span that follows each label.
fn labeled_spans(card: ElementRef) -> (String, String) {
    let texts: Vec<String> = card
        .select(&SPAN_SEL)
        .map(|s| s.text().collect::<String>().trim().to_string())
        .collect();

    let mut price_info = String::new();
    let mut payment_ratio = String::new();
    for (i, text) in texts.iter().enumerate() {
        if PRICE_LABELS.iter().any(|l| text.contains(l)) {
            if let Some(value) = texts.get(i + 1) {
                price_info = value.clone();
            }
        } else if RATIO_LABELS.iter().any(|l| text.contains(l)) {
            if let Some(value) = texts.get(i + 1) {
                payment_ratio = value.clone();
            }
        }
    }
    (price_info, payment_ratio)
}

// ── Tests ──
