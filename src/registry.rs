//! Typed tree of the genome configuration document.
//!
//! The document is a YAML mapping with four required top-level keys
//! (`genome_server`, `genome_folder`, `config_version`, `genomes`). Below
//! `genomes` every level is a struct; keys this crate does not know about are
//! kept in `extra`/`attributes` maps so a load/save cycle never drops them.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml_ng::{Mapping, Value};

use crate::domain::AssetRef;
use crate::error::RefgenError;

pub const CFG_SERVER_KEY: &str = "genome_server";
pub const CFG_VERSION_KEY: &str = "config_version";

pub const CONFIG_VERSION: f64 = 0.3;
pub const REQUIRED_CONFIG_VERSION: f64 = 0.3;
pub const DEFAULT_TAG: &str = "default";

/// Last tool release able to read each retired config version.
const RELEASE_BY_CONFIG_VERSION: &[(&str, &str)] = &[("0.1", "0.4.4"), ("0.2", "0.6.0")];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_description: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_seek_keys",
        skip_serializing_if = "Option::is_none"
    )]
    pub seek_keys: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_size: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub asset_parents: Vec<AssetRef>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub asset_children: Vec<AssetRef>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Tag {
    /// A tag is complete once its seek-key map exists, even if empty.
    pub fn is_complete(&self) -> bool {
        self.seek_keys.is_some()
    }

    pub fn seek_key(&self, name: &str) -> Option<&str> {
        self.seek_keys
            .as_ref()
            .and_then(|keys| keys.get(name))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tag: Option<String>,
    #[serde(default, deserialize_with = "scalar_keyed")]
    pub tags: BTreeMap<String, Tag>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default, deserialize_with = "scalar_keyed")]
    pub assets: BTreeMap<String, Asset>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub genome_server: String,
    pub genome_folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<Value>,
    pub genomes: BTreeMap<String, Collection>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    genome_server: Option<String>,
    #[serde(default)]
    genome_folder: Option<String>,
    #[serde(default)]
    config_version: Option<Value>,
    #[serde(default, deserialize_with = "scalar_keyed")]
    genomes: BTreeMap<String, Collection>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(server: &str, folder: &str) -> Self {
        Self {
            genome_server: server.trim_end_matches('/').to_string(),
            genome_folder: folder.to_string(),
            config_version: Some(Value::from(CONFIG_VERSION)),
            genomes: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Parses and validates a document. `origin` is the file the text came
    /// from and supplies the default `genome_folder`.
    pub fn parse(text: &str, origin: Option<&Utf8Path>) -> Result<Self, RefgenError> {
        let value: Value = serde_yaml_ng::from_str(text)
            .map_err(|err| RefgenError::MalformedRegistryStructure(err.to_string()))?;
        if !value.is_mapping() {
            return Err(RefgenError::MalformedRegistryStructure(
                "top level of the genome config is not a mapping".to_string(),
            ));
        }
        let raw: RawDocument = serde_yaml_ng::from_value(value)
            .map_err(|err| RefgenError::MalformedRegistryStructure(err.to_string()))?;

        check_config_version(raw.config_version.as_ref())?;

        let genome_server = raw
            .genome_server
            .map(|server| server.trim_end_matches('/').to_string())
            .ok_or_else(|| RefgenError::MissingConfigData(CFG_SERVER_KEY.to_string()))?;
        let genome_folder = match raw.genome_folder {
            Some(folder) => folder,
            None => default_folder(origin)?,
        };

        Ok(Self {
            genome_server,
            genome_folder,
            config_version: raw.config_version,
            genomes: raw.genomes,
            extra: raw.extra,
        })
    }

    pub fn to_yaml(&self) -> Result<String, RefgenError> {
        serde_yaml_ng::to_string(self)
            .map_err(|err| RefgenError::MalformedRegistryStructure(err.to_string()))
    }

    pub fn collection(&self, name: &str) -> Result<&Collection, RefgenError> {
        self.genomes
            .get(name)
            .ok_or_else(|| RefgenError::MissingCollection(name.to_string()))
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut Collection, RefgenError> {
        self.genomes
            .get_mut(name)
            .ok_or_else(|| RefgenError::MissingCollection(name.to_string()))
    }

    pub fn asset(&self, collection: &str, asset: &str) -> Result<&Asset, RefgenError> {
        self.collection(collection)?
            .assets
            .get(asset)
            .ok_or_else(|| RefgenError::missing_asset(collection, asset))
    }

    pub fn asset_mut(&mut self, collection: &str, asset: &str) -> Result<&mut Asset, RefgenError> {
        self.collection_mut(collection)?
            .assets
            .get_mut(asset)
            .ok_or_else(|| RefgenError::missing_asset(collection, asset))
    }

    pub fn tag(&self, collection: &str, asset: &str, tag: &str) -> Result<&Tag, RefgenError> {
        self.asset(collection, asset)?
            .tags
            .get(tag)
            .ok_or_else(|| RefgenError::missing_tag(collection, asset, tag))
    }

    pub fn tag_mut(
        &mut self,
        collection: &str,
        asset: &str,
        tag: &str,
    ) -> Result<&mut Tag, RefgenError> {
        self.asset_mut(collection, asset)?
            .tags
            .get_mut(tag)
            .ok_or_else(|| RefgenError::missing_tag(collection, asset, tag))
    }

    /// True when the document holds nothing beyond the minimum keys.
    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }
}

fn check_config_version(version: Option<&Value>) -> Result<(), RefgenError> {
    let Some(version) = version else {
        tracing::warn!("Config lacks version key: {CFG_VERSION_KEY}");
        return Ok(());
    };
    let parsed = match version {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(parsed) = parsed else {
        tracing::warn!("Cannot parse config version as numeric: {version:?}");
        return Ok(());
    };
    if parsed < REQUIRED_CONFIG_VERSION {
        let key = format!("{parsed:.1}");
        let release = RELEASE_BY_CONFIG_VERSION
            .iter()
            .find(|(cfg, _)| *cfg == key)
            .map(|(_, release)| format!("refgenie {release}"))
            .unwrap_or_else(|| "an older refgenie release".to_string());
        return Err(RefgenError::IncompatibleSchemaVersion(format!(
            "this genome config (v{key}) is not compliant with v{REQUIRED_CONFIG_VERSION} standards; \
             to use it, downgrade to {release}"
        )));
    }
    tracing::debug!("Config version is compliant: {parsed}");
    Ok(())
}

fn default_folder(origin: Option<&Utf8Path>) -> Result<String, RefgenError> {
    if let Some(parent) = origin.and_then(Utf8Path::parent) {
        return Ok(parent.to_string());
    }
    let cwd = std::env::current_dir().map_err(|err| RefgenError::Filesystem(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map(|path| path.to_string())
        .map_err(|_| RefgenError::Filesystem("non-utf8 working directory".to_string()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Text form of a scalar; hand-edited documents may carry `1:` or `n: 5`
/// where names and paths are expected.
fn scalar_text<E: serde::de::Error>(value: &Value) -> Result<String, E> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(E::custom(format!("expected a scalar, found {other:?}"))),
    }
}

/// Name-keyed level whose keys may be any YAML scalar. Null reads as empty.
fn scalar_keyed<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(mapping) = Option::<Mapping>::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    mapping
        .into_iter()
        .map(|(key, value)| {
            let key = scalar_text::<D::Error>(&key)?;
            let value = T::deserialize(value)
                .map_err(|err| D::Error::custom(format!("{key}: {err}")))?;
            Ok((key, value))
        })
        .collect()
}

fn scalar_seek_keys<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(mapping) = Option::<Mapping>::deserialize(deserializer)? else {
        return Ok(None);
    };
    mapping
        .iter()
        .map(|(key, value)| Ok((scalar_text::<D::Error>(key)?, scalar_text::<D::Error>(value)?)))
        .collect::<Result<_, D::Error>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE: &str = r#"
genome_server: http://refgenomes.databio.org/
genome_folder: /data/genomes
config_version: 0.3
genomes:
  hg38:
    genome_description: Human reference
    assets:
      fasta:
        default_tag: default
        tags:
          default:
            asset_path: fasta
            seek_keys:
              fasta: hg38.fa
              fai: hg38.fa.fai
            asset_digest: a1b2
            asset_children: ["bowtie2_index:default"]
            custom_field: kept
"#;

    #[test]
    fn parse_sample_document() {
        let doc = Document::parse(SAMPLE, None).unwrap();
        assert_eq!(doc.genome_server, "http://refgenomes.databio.org");
        let tag = doc.tag("hg38", "fasta", "default").unwrap();
        assert!(tag.is_complete());
        assert_eq!(tag.seek_key("fai"), Some("hg38.fa.fai"));
        assert_eq!(tag.asset_children[0], AssetRef::new("bowtie2_index", "default"));
        assert!(tag.extra.contains_key("custom_field"));
        let collection = doc.collection("hg38").unwrap();
        assert!(collection.attributes.contains_key("genome_description"));
    }

    #[test]
    fn reject_old_config_version() {
        let text = "genome_server: http://x\nconfig_version: 0.2\ngenomes: null\n";
        let err = Document::parse(text, None).unwrap_err();
        assert_matches!(err, RefgenError::IncompatibleSchemaVersion(ref msg) if msg.contains("0.6.0"));
    }

    #[test]
    fn require_server() {
        let err = Document::parse("genome_folder: /tmp\ngenomes: {}\n", None).unwrap_err();
        assert_matches!(err, RefgenError::MissingConfigData(ref key) if key == CFG_SERVER_KEY);
    }

    #[test]
    fn malformed_levels() {
        let text = "genome_server: http://x\ngenomes:\n  hg38: [1, 2]\n";
        let err = Document::parse(text, None).unwrap_err();
        assert_matches!(err, RefgenError::MalformedRegistryStructure(_));
    }

    #[test]
    fn scalar_names_and_seek_paths_read_as_text() {
        let text = r#"
genome_server: http://x
genome_folder: /g
config_version: 0.3
genomes:
  hg38:
    assets:
      gtf:
        default_tag: "1"
        tags:
          1:
            asset_path: gtf
            seek_keys:
              gtf: gencode.gtf.gz
              n: 5
"#;
        let doc = Document::parse(text, None).unwrap();
        let tag = doc.tag("hg38", "gtf", "1").unwrap();
        assert_eq!(tag.seek_key("n"), Some("5"));
        assert_eq!(tag.seek_key("gtf"), Some("gencode.gtf.gz"));
        let reparsed = Document::parse(&doc.to_yaml().unwrap(), None).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn nested_seek_key_values_are_rejected() {
        let text = "genome_server: http://x\ngenomes:\n  hg38:\n    assets:\n      gtf:\n        tags:\n          v1:\n            seek_keys:\n              gtf: [a, b]\n";
        let err = Document::parse(text, None).unwrap_err();
        assert_matches!(err, RefgenError::MalformedRegistryStructure(_));
    }

    #[test]
    fn folder_defaults_to_config_dir() {
        let text = "genome_server: http://x\ngenomes: null\n";
        let doc = Document::parse(text, Some(Utf8Path::new("/refs/genome_config.yaml"))).unwrap();
        assert_eq!(doc.genome_folder, "/refs");
        assert!(doc.is_empty());
    }

    #[test]
    fn yaml_round_trip_keeps_unknown_keys() {
        let doc = Document::parse(SAMPLE, None).unwrap();
        let text = doc.to_yaml().unwrap();
        let reparsed = Document::parse(&text, None).unwrap();
        assert_eq!(doc, reparsed);
    }
}
