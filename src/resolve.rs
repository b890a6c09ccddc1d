use camino::{Utf8Path, Utf8PathBuf};

use crate::config::expand_path;
use crate::error::RefgenError;
use crate::registry::Document;

/// What to do when no candidate path exists on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    #[default]
    Fail,
    Warn,
    Silent,
}

#[derive(Debug, Clone, Default)]
pub struct SeekQuery<'a> {
    pub seek_key: Option<&'a str>,
    pub enclosing_dir: bool,
    pub allow_incomplete: bool,
}

/// Raw path of a tagged asset as recorded in the document; may be relative.
///
/// With no seek-key, a seek-key named like the asset is preferred, then the
/// bare tag directory. A seek-key value of `.` points at the tag directory.
pub fn seek_path(
    document: &Document,
    collection: &str,
    asset: &str,
    tag: &str,
    query: &SeekQuery<'_>,
) -> Result<Utf8PathBuf, RefgenError> {
    let allow_incomplete = query.allow_incomplete || query.seek_key.is_none();
    document.assert_exists(collection, Some(asset), Some(tag), allow_incomplete)?;
    let entry = document.tag(collection, asset, tag)?;
    let storage = entry.asset_path.as_deref().unwrap_or_else(|| {
        tracing::debug!("No asset_path for '{collection}/{asset}:{tag}', using asset name");
        asset
    });
    let tag_dir = Utf8PathBuf::from(storage).join(tag);
    if query.enclosing_dir {
        return Ok(tag_dir);
    }

    let seek_key = match query.seek_key {
        Some(seek_key) => seek_key,
        None if entry.seek_key(asset).is_some() => asset,
        None => return Ok(tag_dir),
    };
    let fragment = entry.seek_key(seek_key).ok_or_else(|| {
        RefgenError::MissingSeekKey(format!(
            "genome/asset:tag bundle '{collection}/{asset}:{tag}' exists, but seek_key '{seek_key}' is missing"
        ))
    })?;
    if fragment == "." {
        Ok(tag_dir)
    } else {
        Ok(tag_dir.join(fragment))
    }
}

/// Default existence check: the path exists locally or is a URL.
pub fn exists_or_url(path: &Utf8Path) -> bool {
    is_url(path.as_str()) || path.as_std_path().exists()
}

pub fn is_url(value: &str) -> bool {
    ["http://", "https://", "ftp://", "s3://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// Resolves a tagged asset to a usable path.
///
/// The recorded path is tried as-is when absolute, then re-rooted under
/// `<genome_folder>/<collection>/`. When neither passes `check_exist`,
/// `strictness` decides between an error, a warning, or silence; the
/// unresolved path is returned in the latter two cases.
pub fn get_asset(
    document: &Document,
    collection: &str,
    asset: &str,
    tag: Option<&str>,
    query: &SeekQuery<'_>,
    strictness: Strictness,
    check_exist: &dyn Fn(&Utf8Path) -> bool,
) -> Result<Utf8PathBuf, RefgenError> {
    let tag = match tag {
        Some(tag) => tag.to_string(),
        None => document.get_default_tag(collection, asset, true).tag,
    };
    tracing::debug!(
        "getting asset: '{collection}/{asset}.{}:{tag}'",
        query.seek_key.unwrap_or("")
    );
    let path = seek_path(document, collection, asset, &tag, query)?;
    if path.is_absolute() && check_exist(&path) {
        return Ok(path);
    }
    tracing::debug!("Relative or nonexistent path: {path}");
    let full_path = Utf8PathBuf::from(expand_path(&document.genome_folder))
        .join(collection)
        .join(&path);
    tracing::debug!("Trying path relative to genome folder: {full_path}");
    if check_exist(&full_path) {
        return Ok(full_path);
    }
    if strictness == Strictness::Silent {
        return Ok(path);
    }

    let mut message = format!(
        "for genome '{collection}' the asset '{asset}.{}:{tag}' doesn't exist; tried {path} and {full_path}",
        query.seek_key.unwrap_or("")
    );
    let extant: Vec<String> = [&path, &full_path]
        .into_iter()
        .flat_map(|base| [format!("{base}.tar.gz"), format!("{base}.tar")])
        .filter(|candidate| check_exist(Utf8Path::new(candidate)))
        .collect();
    if !extant.is_empty() {
        message.push_str(&format!(". These paths exist: {}", extant.join(", ")));
    }
    match strictness {
        Strictness::Fail => Err(RefgenError::AssetPathMissing(message)),
        _ => {
            tracing::warn!("{message}");
            Ok(path)
        }
    }
}

/// Local path of the staged archive for a tag: `<folder>/<collection>/<asset>__<tag>.tgz`.
pub fn archive_path(genome_folder: &Utf8Path, collection: &str, asset: &str, tag: &str) -> Utf8PathBuf {
    genome_folder
        .join(collection)
        .join(format!("{asset}__{tag}.tgz"))
}

/// Canonical directory of a tag: `<folder>/<collection>/<asset>/<tag>`.
pub fn tag_dir(genome_folder: &Utf8Path, collection: &str, asset: &str, tag: &str) -> Utf8PathBuf {
    genome_folder.join(collection).join(asset).join(tag)
}
