use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RefgenError;

/// A dependency edge endpoint, `asset:tag`, always relative to the collection
/// that records it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetRef {
    asset: String,
    tag: String,
}

impl AssetRef {
    pub fn new(asset: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            tag: tag.into(),
        }
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset, self.tag)
    }
}

impl FromStr for AssetRef {
    type Err = RefgenError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (asset, tag) = trimmed
            .split_once(':')
            .ok_or_else(|| RefgenError::InvalidAssetReference(value.to_string()))?;
        let is_valid = !asset.is_empty() && !tag.is_empty() && !tag.contains(':');
        if !is_valid {
            return Err(RefgenError::InvalidAssetReference(value.to_string()));
        }
        Ok(Self::new(asset, tag))
    }
}

impl TryFrom<String> for AssetRef {
    type Error = RefgenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetRef> for String {
    fn from(value: AssetRef) -> Self {
        value.to_string()
    }
}

/// Command-line address of an asset: `collection/asset[.seek_key][:tag]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryPath {
    pub collection: String,
    pub asset: String,
    pub seek_key: Option<String>,
    pub tag: Option<String>,
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.asset)?;
        if let Some(seek_key) = &self.seek_key {
            write!(f, ".{seek_key}")?;
        }
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}

impl FromStr for RegistryPath {
    type Err = RefgenError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || RefgenError::InvalidRegistryPath(value.to_string());
        let trimmed = value.trim();
        let (collection, rest) = trimmed.split_once('/').ok_or_else(invalid)?;
        let (item, tag) = match rest.split_once(':') {
            Some((item, tag)) => (item, Some(tag)),
            None => (rest, None),
        };
        let (asset, seek_key) = match item.split_once('.') {
            Some((asset, seek_key)) => (asset, Some(seek_key)),
            None => (item, None),
        };
        let empty_part = collection.is_empty()
            || asset.is_empty()
            || seek_key.is_some_and(str::is_empty)
            || tag.is_some_and(|tag| tag.is_empty() || tag.contains(':'));
        if empty_part || asset.contains('/') {
            return Err(invalid());
        }
        Ok(Self {
            collection: collection.to_string(),
            asset: asset.to_string(),
            seek_key: seek_key.map(str::to_string),
            tag: tag.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
}

/// Human readable archive size as published by the catalog, e.g. `15.4GB`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveSize {
    pub value: f64,
    pub unit: SizeUnit,
}

impl ArchiveSize {
    pub const LARGE_GIGABYTES: f64 = 5.0;

    /// Archives that must be confirmed before download.
    pub fn is_large(&self) -> bool {
        match self.unit {
            SizeUnit::Terabytes => true,
            SizeUnit::Gigabytes => self.value >= Self::LARGE_GIGABYTES,
            _ => false,
        }
    }
}

impl fmt::Display for ArchiveSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            SizeUnit::Bytes => "B",
            SizeUnit::Kilobytes => "KB",
            SizeUnit::Megabytes => "MB",
            SizeUnit::Gigabytes => "GB",
            SizeUnit::Terabytes => "TB",
        };
        write!(f, "{}{unit}", self.value)
    }
}

impl FromStr for ArchiveSize {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        let split = normalized
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(normalized.len());
        let (number, unit) = normalized.split_at(split);
        let unit = match unit.trim() {
            "" | "B" => SizeUnit::Bytes,
            "KB" | "K" => SizeUnit::Kilobytes,
            "MB" | "M" => SizeUnit::Megabytes,
            "GB" | "G" => SizeUnit::Gigabytes,
            "TB" | "T" => SizeUnit::Terabytes,
            other => return Err(format!("unknown size unit: {other}")),
        };
        let value = number
            .parse::<f64>()
            .map_err(|_| format!("invalid size: {value}"))?;
        Ok(Self { value, unit })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_asset_ref() {
        let reference: AssetRef = "fasta:default".parse().unwrap();
        assert_eq!(reference.asset(), "fasta");
        assert_eq!(reference.tag(), "default");
        assert_eq!(reference.to_string(), "fasta:default");
    }

    #[test]
    fn parse_asset_ref_without_tag() {
        let err = "fasta".parse::<AssetRef>().unwrap_err();
        assert_matches!(err, RefgenError::InvalidAssetReference(_));
    }

    #[test]
    fn parse_registry_path_full() {
        let path: RegistryPath = "hg38/fasta.chrom_sizes:v1".parse().unwrap();
        assert_eq!(path.collection, "hg38");
        assert_eq!(path.asset, "fasta");
        assert_eq!(path.seek_key.as_deref(), Some("chrom_sizes"));
        assert_eq!(path.tag.as_deref(), Some("v1"));
    }

    #[test]
    fn parse_registry_path_bare() {
        let path: RegistryPath = "hg38/bowtie2_index".parse().unwrap();
        assert_eq!(path.seek_key, None);
        assert_eq!(path.tag, None);
        assert_matches!(
            "hg38".parse::<RegistryPath>(),
            Err(RefgenError::InvalidRegistryPath(_))
        );
    }

    #[test]
    fn size_thresholds() {
        assert!("6GB".parse::<ArchiveSize>().unwrap().is_large());
        assert!(!"4GB".parse::<ArchiveSize>().unwrap().is_large());
        assert!("0.1TB".parse::<ArchiveSize>().unwrap().is_large());
        assert!(!"900MB".parse::<ArchiveSize>().unwrap().is_large());
        assert!("15.4 gb".parse::<ArchiveSize>().unwrap().is_large());
    }
}
