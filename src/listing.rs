use std::collections::BTreeMap;

use crate::error::RefgenError;
use crate::registry::{Asset, Document};

impl Document {
    pub fn genomes_list(&self) -> Vec<String> {
        self.genomes.keys().cloned().collect()
    }

    pub fn genomes_str(&self) -> String {
        self.genomes_list().join(", ")
    }

    /// Collection name to sorted asset names, or to sorted
    /// `asset[.seek_key]:tag` entries when `include_tags` is set.
    pub fn assets_dict(
        &self,
        filter: Option<&[String]>,
        include_tags: bool,
    ) -> BTreeMap<String, Vec<String>> {
        select_genomes(self.genomes.keys(), filter)
            .into_iter()
            .filter_map(|name| {
                let collection = self.genomes.get(&name)?;
                let assets = if include_tags {
                    asset_tags_product(&collection.assets)
                } else {
                    collection.assets.keys().cloned().collect()
                };
                Some((name, assets))
            })
            .collect()
    }

    pub fn assets_str(&self, filter: Option<&[String]>) -> String {
        self.assets_dict(filter, true)
            .iter()
            .map(|(name, assets)| format!("{name:>20}/   {}", assets.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text listing of local collections and their tagged assets. Every
    /// requested collection must exist.
    pub fn list_local(&self, filter: Option<&[String]>) -> Result<(String, String), RefgenError> {
        if let Some(filter) = filter {
            for name in filter {
                self.collection(name)?;
            }
        }
        let genomes = match filter {
            Some(_) => select_genomes(self.genomes.keys(), filter).join(", "),
            None => self.genomes_str(),
        };
        Ok((genomes, self.assets_str(filter)))
    }

    /// Sorted collections that carry `asset`.
    pub fn genomes_with_asset(&self, asset: &str) -> Vec<String> {
        self.genomes
            .iter()
            .filter(|(_, collection)| collection.assets.contains_key(asset))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Asset name to the sorted collections that carry it.
    pub fn genomes_by_asset(&self) -> BTreeMap<String, Vec<String>> {
        let mut inverted: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, collection) in &self.genomes {
            for asset in collection.assets.keys() {
                inverted.entry(asset.clone()).or_default().push(name.clone());
            }
        }
        inverted
    }
}

/// Requested names that are present, in sorted order; everything when no
/// filter is given.
pub fn select_genomes<'a>(
    available: impl IntoIterator<Item = &'a String>,
    filter: Option<&[String]>,
) -> Vec<String> {
    let mut selected: Vec<String> = available
        .into_iter()
        .filter(|name| filter.is_none_or(|wanted| wanted.contains(*name)))
        .cloned()
        .collect();
    selected.sort();
    selected
}

/// Expands complete tags into `asset[.seek_key]:tag` entries. A seek-key
/// named like its asset is shown as the bare asset name.
fn asset_tags_product(assets: &BTreeMap<String, Asset>) -> Vec<String> {
    let mut tagged = Vec::new();
    for (asset_name, asset) in assets {
        for (tag_name, tag) in &asset.tags {
            let Some(seek_keys) = &tag.seek_keys else {
                continue;
            };
            for seek_key in seek_keys.keys() {
                if seek_key == asset_name {
                    tagged.push(format!("{asset_name}:{tag_name}"));
                } else {
                    tagged.push(format!("{asset_name}.{seek_key}:{tag_name}"));
                }
            }
        }
    }
    tagged.sort();
    tagged
}
