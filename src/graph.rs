//! Mutations of the asset graph.
//!
//! All structural edits of a [`Document`] go through the methods in this
//! module. Parent/child edges are stored on both ends as `asset:tag`
//! references relative to the owning collection; [`Document::retag`] is the
//! only operation that rewrites edges owned by *other* tags.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml_ng::{Mapping, Value};

use crate::domain::AssetRef;
use crate::error::RefgenError;
use crate::prompt::Confirm;
use crate::registry::{DEFAULT_TAG, Document};

/// Result of a best-effort default tag lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultTag {
    pub tag: String,
    pub warning: Option<String>,
}

impl DefaultTag {
    fn recorded(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            warning: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetagOutcome {
    Retagged,
    /// The user declined an overwrite or relationship update.
    Declined,
    /// Old and new names are the same.
    Unchanged,
}

/// Which edge list of a tag entry an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Parents,
    Children,
}

impl Relation {
    fn key(self) -> &'static str {
        match self {
            Relation::Parents => "asset_parents",
            Relation::Children => "asset_children",
        }
    }
}

impl Document {
    /// Checks that the collection, and optionally the asset and tag, exist.
    /// Unless `allow_incomplete`, a tag must also carry a seek-key map.
    pub fn assert_exists(
        &self,
        collection: &str,
        asset: Option<&str>,
        tag: Option<&str>,
        allow_incomplete: bool,
    ) -> Result<(), RefgenError> {
        tracing::debug!(
            "checking existence of: {collection}/{}:{}",
            asset.unwrap_or("-"),
            tag.unwrap_or("-")
        );
        self.collection(collection)?;
        let Some(asset) = asset else {
            return Ok(());
        };
        self.asset(collection, asset)?;
        let Some(tag) = tag else {
            return Ok(());
        };
        let entry = self.tag(collection, asset, tag)?;
        if !allow_incomplete && !entry.is_complete() {
            return Err(RefgenError::MissingSeekKey(format!(
                "asset incomplete: no seek keys are defined for '{collection}/{asset}:{tag}'; \
                 build or pull the asset again"
            )));
        }
        Ok(())
    }

    pub fn is_asset_complete(
        &self,
        collection: &str,
        asset: &str,
        tag: &str,
    ) -> Result<bool, RefgenError> {
        Ok(self.tag(collection, asset, tag)?.is_complete())
    }

    /// Free-form collection attributes (description, digest, ...), without
    /// the asset map.
    pub fn collection_attributes(
        &self,
        collection: &str,
    ) -> Result<&BTreeMap<String, Value>, RefgenError> {
        Ok(&self.collection(collection)?.attributes)
    }

    /// Creates whichever of collection, asset and tag are missing, then
    /// merges `data` into the deepest level named.
    pub fn ensure_path(
        &mut self,
        collection: &str,
        asset: Option<&str>,
        tag: Option<&str>,
        data: Option<&Mapping>,
    ) -> Result<(), RefgenError> {
        check_name(collection, "genome")?;
        if let Some(asset) = asset {
            check_name(asset, "asset")?;
        }
        if let Some(tag) = tag {
            if asset.is_none() {
                return Err(RefgenError::InvalidInsertData(format!(
                    "tag '{tag}' given without an asset"
                )));
            }
            check_name(tag, "tag")?;
        }

        let collection_entry = self.genomes.entry(collection.to_string()).or_default();
        let Some(asset) = asset else {
            return match data {
                Some(data) => merge_into(collection_entry, data, "genome"),
                None => Ok(()),
            };
        };
        let asset_entry = collection_entry.assets.entry(asset.to_string()).or_default();
        let Some(tag) = tag else {
            return match data {
                Some(data) => merge_into(asset_entry, data, "asset"),
                None => Ok(()),
            };
        };
        let tag_entry = asset_entry.tags.entry(tag.to_string()).or_default();
        match data {
            Some(data) => merge_into(tag_entry, data, "tag"),
            None => Ok(()),
        }
    }

    pub fn update_collection(
        &mut self,
        collection: &str,
        data: Option<&Mapping>,
    ) -> Result<(), RefgenError> {
        self.ensure_path(collection, None, None, data)
    }

    /// Merges seek-keys into a tag, creating the map and thereby marking the
    /// tag complete.
    pub fn update_seek_keys(
        &mut self,
        collection: &str,
        asset: &str,
        tag: &str,
        keys: &BTreeMap<String, String>,
    ) -> Result<(), RefgenError> {
        self.ensure_path(collection, Some(asset), Some(tag), None)?;
        let entry = self.tag_mut(collection, asset, tag)?;
        entry
            .seek_keys
            .get_or_insert_with(BTreeMap::new)
            .extend(keys.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(())
    }

    /// Appends references to a tag's parent or child list, skipping ones
    /// already recorded.
    pub fn update_relatives(
        &mut self,
        collection: &str,
        asset: &str,
        tag: &str,
        references: &[AssetRef],
        relation: Relation,
    ) -> Result<(), RefgenError> {
        self.ensure_path(collection, Some(asset), Some(tag), None)?;
        let entry = self.tag_mut(collection, asset, tag)?;
        let list = match relation {
            Relation::Parents => &mut entry.asset_parents,
            Relation::Children => &mut entry.asset_children,
        };
        for reference in references {
            if !list.contains(reference) {
                list.push(reference.clone());
            }
        }
        Ok(())
    }

    /// Points the asset's default at `tag`. An existing non-empty default is
    /// kept unless `force`. Returns whether the pointer changed.
    pub fn set_default_tag(
        &mut self,
        collection: &str,
        asset: &str,
        tag: &str,
        force: bool,
    ) -> Result<bool, RefgenError> {
        self.assert_exists(collection, Some(asset), Some(tag), true)?;
        let entry = self.asset_mut(collection, asset)?;
        let has_default = entry
            .default_tag
            .as_deref()
            .is_some_and(|current| !current.is_empty());
        if has_default && !force {
            return Ok(false);
        }
        entry.default_tag = Some(tag.to_string());
        tracing::info!("Default tag for '{collection}/{asset}' set to: {tag}");
        Ok(true)
    }

    /// Resolves the tag to use when none is given.
    ///
    /// Falls back, with a warning, to the lexicographically first tag when
    /// `use_existing` is set, else to [`DEFAULT_TAG`]. An unknown asset yields
    /// [`DEFAULT_TAG`] without a warning.
    pub fn get_default_tag(&self, collection: &str, asset: &str, use_existing: bool) -> DefaultTag {
        let entry = match self.asset(collection, asset) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::info!("{err}: using '{DEFAULT_TAG}' as the default tag");
                return DefaultTag::recorded(DEFAULT_TAG);
            }
        };
        if let Some(tag) = entry.default_tag.as_deref().filter(|tag| !tag.is_empty()) {
            return DefaultTag::recorded(tag);
        }
        let first = use_existing
            .then(|| entry.tags.keys().next().cloned())
            .flatten();
        let warning = match &first {
            Some(tag) if tag != DEFAULT_TAG => format!(
                "could not find the 'default_tag' key for asset '{collection}/{asset}'; \
                 used the first one in the config instead: '{tag}'"
            ),
            _ => format!(
                "could not find the 'default_tag' key for asset '{collection}/{asset}'; \
                 returning '{DEFAULT_TAG}' instead"
            ),
        };
        tracing::warn!("{warning}");
        DefaultTag {
            tag: first.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            warning: Some(warning),
        }
    }

    /// Deletes a tag (the default one if `tag` is `None`). Empty assets and
    /// collections are removed with it. Returns the removed tag name.
    pub fn remove_tag(
        &mut self,
        collection: &str,
        asset: &str,
        tag: Option<&str>,
    ) -> Result<String, RefgenError> {
        let tag = match tag {
            Some(tag) => tag.to_string(),
            None => self.get_default_tag(collection, asset, true).tag,
        };
        self.assert_exists(collection, Some(asset), Some(&tag), true)?;

        let collection_emptied = {
            let collection_entry = self.collection_mut(collection)?;
            let asset_emptied = match collection_entry.assets.get_mut(asset) {
                Some(asset_entry) => {
                    asset_entry.tags.remove(&tag);
                    if asset_entry.default_tag.as_deref() == Some(tag.as_str()) {
                        asset_entry.default_tag = None;
                    }
                    asset_entry.tags.is_empty()
                }
                None => false,
            };
            if asset_emptied {
                collection_entry.assets.remove(asset);
                tracing::debug!("Removed empty asset: {collection}/{asset}");
            }
            collection_entry.assets.is_empty()
        };
        if collection_emptied {
            self.genomes.remove(collection);
            tracing::debug!("Removed empty genome: {collection}");
        }
        tracing::info!("Removed tag: {collection}/{asset}:{tag}");
        Ok(tag)
    }

    /// Renames `old_tag` to `new_tag`, rewriting every edge that points at
    /// `asset:old_tag` from the old tag's parents and children.
    pub fn retag(
        &mut self,
        collection: &str,
        asset: &str,
        old_tag: &str,
        new_tag: &str,
        confirm: &dyn Confirm,
    ) -> Result<RetagOutcome, RefgenError> {
        self.assert_exists(collection, Some(asset), Some(old_tag), true)?;
        check_name(new_tag, "tag")?;
        if old_tag == new_tag {
            return Ok(RetagOutcome::Unchanged);
        }

        let asset_entry = self.asset(collection, asset)?;
        if asset_entry.tags.contains_key(new_tag)
            && !confirm.confirm(
                &format!(
                    "You already have a '{asset}' asset tagged as '{new_tag}', do you wish to override?"
                ),
                false,
            )
        {
            tracing::info!("Tag action aborted by the user");
            return Ok(RetagOutcome::Declined);
        }

        let old_entry = self.tag(collection, asset, old_tag)?;
        let children = old_entry.asset_children.clone();
        let parents = old_entry.asset_parents.clone();
        if !children.is_empty() || !parents.is_empty() {
            let question = format!(
                "The asset '{collection}/{asset}:{old_tag}' has {} children and {} parents. \
                 The relationship data will be updated. Do you want to proceed?",
                children.len(),
                parents.len()
            );
            if !confirm.confirm(&question, false) {
                tracing::info!("Tag action aborted by the user");
                return Ok(RetagOutcome::Declined);
            }
            let from = AssetRef::new(asset, old_tag);
            let to = AssetRef::new(asset, new_tag);
            self.rewrite_relatives(collection, &children, Relation::Parents, &from, &to);
            self.rewrite_relatives(collection, &parents, Relation::Children, &from, &to);
        }

        let asset_entry = self.asset_mut(collection, asset)?;
        let payload = asset_entry
            .tags
            .get(old_tag)
            .cloned()
            .ok_or_else(|| RefgenError::missing_tag(collection, asset, old_tag))?;
        asset_entry.tags.insert(new_tag.to_string(), payload);
        let was_default = asset_entry.default_tag.as_deref() == Some(old_tag);
        if was_default {
            self.set_default_tag(collection, asset, new_tag, true)?;
        }
        self.remove_tag(collection, asset, Some(old_tag))?;
        tracing::info!("Retagged '{collection}/{asset}:{old_tag}' as '{new_tag}'");
        Ok(RetagOutcome::Retagged)
    }

    /// In each relative's `relation` list, replaces `from` with `to`.
    /// Relatives missing from the document are logged and skipped.
    fn rewrite_relatives(
        &mut self,
        collection: &str,
        relatives: &[AssetRef],
        relation: Relation,
        from: &AssetRef,
        to: &AssetRef,
    ) {
        for relative in relatives {
            tracing::debug!("updating {} in '{relative}'", relation.key());
            let entry = match self.tag_mut(collection, relative.asset(), relative.tag()) {
                Ok(entry) => entry,
                Err(_) => {
                    let role = match relation {
                        Relation::Parents => "child",
                        Relation::Children => "parent",
                    };
                    tracing::warn!(
                        "The {role} asset of '{collection}/{from}' does not exist: {relative}"
                    );
                    continue;
                }
            };
            let list = match relation {
                Relation::Parents => &mut entry.asset_parents,
                Relation::Children => &mut entry.asset_children,
            };
            let mut updated: Vec<AssetRef> = Vec::with_capacity(list.len());
            for reference in list.drain(..) {
                let reference = if &reference == from {
                    to.clone()
                } else {
                    reference
                };
                if !updated.contains(&reference) {
                    updated.push(reference);
                }
            }
            *list = updated;
        }
    }
}

fn check_name(name: &str, kind: &str) -> Result<(), RefgenError> {
    if name.trim().is_empty() {
        return Err(RefgenError::InvalidInsertData(format!(
            "{kind} name must be a non-empty string"
        )));
    }
    Ok(())
}

fn merge_into<T>(target: &mut T, data: &Mapping, level: &str) -> Result<(), RefgenError>
where
    T: Serialize + DeserializeOwned,
{
    if let Some(key) = data.keys().find(|key| !key.is_string()) {
        return Err(RefgenError::InvalidInsertData(format!(
            "{level} data keys must be strings, got {key:?}"
        )));
    }
    let mut current = serde_yaml_ng::to_value(&*target)
        .map_err(|err| RefgenError::MalformedRegistryStructure(err.to_string()))?;
    let mapping = current.as_mapping_mut().ok_or_else(|| {
        RefgenError::MalformedRegistryStructure(format!("{level} entry is not a mapping"))
    })?;
    for (key, value) in data {
        mapping.insert(key.clone(), value.clone());
    }
    *target = serde_yaml_ng::from_value(current)
        .map_err(|err| RefgenError::InvalidInsertData(format!("{level} data: {err}")))?;
    Ok(())
}
