use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::{Shop, ShopDetail};

/// Merge one detail-page record onto a shop. Pure and deterministic:
/// non-empty fields are never overwritten or cleared, empty fields adopt
/// the partial value, and payment methods append set-like in first-seen
/// order. Applying the same record twice is a no-op.
pub fn merge(shop: &Shop, detail: &ShopDetail) -> Shop {
    let mut merged = shop.clone();
    fill_empty(&mut merged.phone, &detail.phone);
    fill_empty(&mut merged.hours, &detail.hours);
    fill_empty(&mut merged.description, &detail.description);
    fill_empty(&mut merged.address_detail, &detail.address_detail);
    fill_empty(&mut merged.price_info, &detail.price_info);
    for method in &detail.payment_methods {
        if !method.is_empty() && !merged.payment_methods.contains(method) {
            merged.payment_methods.push(method.clone());
        }
    }
    merged
}

fn fill_empty(slot: &mut String, candidate: &str) {
    if slot.is_empty() && !candidate.is_empty() {
        *slot = candidate.to_string();
    }
}

/// The canonical in-memory dataset: shops in discovery order, keyed by id.
/// Only one task mutates this at a time; workers hand back immutable
/// partial records.
#[derive(Default)]
pub struct Dataset {
    shops: Vec<Shop>,
    index: HashMap<String, usize>,
}

impl Dataset {
    /// Read an existing dataset; a missing file is an empty dataset.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes =
            fs::read(path).with_context(|| format!("could not read {}", path.display()))?;
        let shops: Vec<Shop> = serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid dataset in {}", path.display()))?;

        let mut dataset = Self::default();
        for shop in shops {
            if dataset.index.contains_key(&shop.id) {
                warn!(id = %shop.id, "duplicate id in stored dataset, keeping first");
                continue;
            }
            dataset.index.insert(shop.id.clone(), dataset.shops.len());
            dataset.shops.push(shop);
        }
        Ok(dataset)
    }

    /// Fold freshly discovered entities in: new ids append in listing order,
    /// known ids only have empty base fields filled (enrichment survives a
    /// re-harvest untouched). Returns (added, already known).
    pub fn absorb(&mut self, discovered: Vec<Shop>) -> (usize, usize) {
        let mut added = 0;
        let mut known = 0;
        for shop in discovered {
            match self.index.get(&shop.id) {
                Some(&i) => {
                    known += 1;
                    let existing = &mut self.shops[i];
                    fill_empty(&mut existing.name, &shop.name);
                    fill_empty(&mut existing.address, &shop.address);
                    fill_empty(&mut existing.category, &shop.category);
                    fill_empty(&mut existing.price_info, &shop.price_info);
                    fill_empty(&mut existing.payment_ratio, &shop.payment_ratio);
                    fill_empty(&mut existing.link, &shop.link);
                }
                None => {
                    added += 1;
                    self.index.insert(shop.id.clone(), self.shops.len());
                    self.shops.push(shop);
                }
            }
        }
        (added, known)
    }

    /// Apply one enrichment result. Returns false for an unknown id.
    pub fn apply(&mut self, id: &str, detail: &ShopDetail) -> bool {
        let Some(&i) = self.index.get(id) else {
            return false;
        };
        self.shops[i] = merge(&self.shops[i], detail);
        true
    }

    /// (id, link) pairs eligible for enrichment. Shops without a link are
    /// never submitted.
    pub fn enrich_targets(&self, skip_enriched: bool, limit: Option<usize>) -> Vec<(String, String)> {
        let targets = self
            .shops
            .iter()
            .filter(|s| !s.link.is_empty())
            .filter(|s| !(skip_enriched && s.fully_enriched()))
            .map(|s| (s.id.clone(), s.link.clone()));
        match limit {
            Some(n) => targets.take(n).collect(),
            None => targets.collect(),
        }
    }

    /// Serialize the full dataset as pretty JSON, atomically: the bytes land
    /// in a sibling temp file first and are renamed over the target, so a
    /// reader never observes a half-written file.
    pub fn commit(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("could not create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_vec_pretty(&self.shops).context("could not serialize dataset")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json).with_context(|| format!("could not write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("could not move dataset into {}", path.display()))?;
        Ok(())
    }

    pub fn shops(&self) -> &[Shop] {
        &self.shops
    }

    pub fn len(&self) -> usize {
        self.shops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shops.is_empty()
    }

    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            total: self.shops.len(),
            with_link: self.shops.iter().filter(|s| !s.link.is_empty()).count(),
            with_phone: self.shops.iter().filter(|s| !s.phone.is_empty()).count(),
            with_hours: self.shops.iter().filter(|s| !s.hours.is_empty()).count(),
            with_description: self
                .shops
                .iter()
                .filter(|s| !s.description.is_empty())
                .count(),
            fully_enriched: self.shops.iter().filter(|s| s.fully_enriched()).count(),
            payment_method_entries: self.shops.iter().map(|s| s.payment_methods.len()).sum(),
        }
    }
}

pub struct DatasetStats {
    pub total: usize,
    pub with_link: usize,
    pub with_phone: usize,
    pub with_hours: usize,
    pub with_description: usize,
    pub fully_enriched: usize,
    pub payment_method_entries: usize,
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered(id: &str) -> Shop {
        Shop {
            id: id.to_string(),
            name: "오리궁뎅이".into(),
            address: "광주 남구".into(),
            link: format!("https://pay.verychat.io/shops/{id}"),
            ..Shop::default()
        }
    }

    fn detail() -> ShopDetail {
        ShopDetail {
            phone: "010-1234-5678".into(),
            hours: "영업시간 11:00 - 21:00".into(),
            description: "점심특선 쌈밥정식".into(),
            payment_methods: vec!["100%".into()],
            ..ShopDetail::default()
        }
    }

    #[test]
    fn merge_fills_only_empty_fields() {
        let mut shop = discovered("a");
        shop.phone = "02-111-2222".into();
        let merged = merge(&shop, &detail());
        assert_eq!(merged.phone, "02-111-2222");
        assert_eq!(merged.hours, "영업시간 11:00 - 21:00");
    }

    #[test]
    fn merge_is_monotonic() {
        let shop = discovered("a");
        let merged = merge(&shop, &detail());
        let emptied = merge(&merged, &ShopDetail::default());
        // No field that was non-empty before a merge may come out empty.
        assert_eq!(emptied, merged);
    }

    #[test]
    fn merge_is_idempotent() {
        let shop = discovered("a");
        let d = detail();
        let once = merge(&shop, &d);
        let twice = merge(&once, &d);
        assert_eq!(once, twice);
    }

    #[test]
    fn payment_methods_append_without_duplicates() {
        let shop = discovered("a");
        let once = merge(&shop, &detail());
        let more = ShopDetail {
            payment_methods: vec!["100%".into(), "50%".into()],
            ..ShopDetail::default()
        };
        let merged = merge(&once, &more);
        assert_eq!(merged.payment_methods, vec!["100%".to_string(), "50%".to_string()]);
    }

    #[test]
    fn absorb_keeps_enrichment_on_reharvest() {
        let mut dataset = Dataset::default();
        dataset.absorb(vec![discovered("a")]);
        assert!(dataset.apply("a", &detail()));

        let mut fresh = discovered("a");
        fresh.category = "한식".into();
        let (added, known) = dataset.absorb(vec![fresh, discovered("b")]);
        assert_eq!((added, known), (1, 1));
        assert_eq!(dataset.shops()[0].phone, "010-1234-5678");
        assert_eq!(dataset.shops()[0].category, "한식");
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn apply_to_unknown_id_is_rejected() {
        let mut dataset = Dataset::default();
        assert!(!dataset.apply("ghost", &detail()));
    }

    #[test]
    fn targets_respect_links_skip_and_limit() {
        let mut dataset = Dataset::default();
        let mut unlinked = discovered("a");
        unlinked.link.clear();
        let mut enriched = discovered("b");
        enriched.phone = "010-1111-2222".into();
        enriched.hours = "영업시간".into();
        enriched.description = "소개".into();
        dataset.absorb(vec![unlinked, enriched, discovered("c"), discovered("d")]);

        assert_eq!(dataset.enrich_targets(false, None).len(), 3);
        let skipped: Vec<_> = dataset.enrich_targets(true, None);
        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().all(|(id, _)| id != "b"));
        assert_eq!(dataset.enrich_targets(true, Some(1)).len(), 1);
    }

    #[test]
    fn commit_is_atomic_and_reloadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("shops.json");

        let mut dataset = Dataset::default();
        dataset.absorb(vec![discovered("a"), discovered("b")]);
        dataset.apply("a", &detail());
        dataset.commit(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let reloaded = Dataset::load(&path).unwrap();
        assert_eq!(reloaded.shops(), dataset.shops());
    }

    #[test]
    fn commit_twice_yields_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shops.json");

        let mut dataset = Dataset::default();
        dataset.absorb(vec![discovered("a")]);
        dataset.commit(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        dataset.commit(&path).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dataset = Dataset::load(Path::new("no/such/shops.json")).unwrap();
        assert!(dataset.is_empty());
    }
}
