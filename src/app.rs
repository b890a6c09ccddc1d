use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::RegistryPath;
use crate::error::RefgenError;
use crate::fetch::{AssetFetcher, ForcePolicy, PullOutcome};
use crate::fs_util::remove_path;
use crate::graph::RetagOutcome;
use crate::prompt::Confirm;
use crate::remote::{CatalogClient, list_remote};
use crate::resolve::{SeekQuery, Strictness, exists_or_url, get_asset};
use crate::store::RegistryStore;

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub config_path: String,
    pub genome_server: String,
    pub genome_folder: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub source: String,
    pub genomes: String,
    pub assets: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullReport {
    pub items: Vec<PullItemResult>,
}

impl PullReport {
    pub fn failures(&self) -> usize {
        self.items.iter().filter(|item| item.action == "failed").count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PullItemResult {
    pub genome: String,
    pub asset: String,
    pub tag: Option<String>,
    pub action: String,
    pub path: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeekResult {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagResult {
    pub genome: String,
    pub asset: String,
    pub old_tag: String,
    pub new_tag: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResult {
    pub genome: String,
    pub asset: String,
    pub tag: String,
    pub removed: bool,
    pub deleted_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefaultResult {
    pub genome: String,
    pub asset: String,
    pub tag: String,
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<C: CatalogClient> {
    store: RegistryStore,
    catalog: C,
}

impl<C: CatalogClient> App<C> {
    pub fn new(store: RegistryStore, catalog: C) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn init(&self, server: &str, folder: Option<&str>) -> Result<InitResult, RefgenError> {
        let document = self.store.initialize(server, folder)?;
        Ok(InitResult {
            config_path: self.store.path().to_string(),
            genome_server: document.genome_server,
            genome_folder: document.genome_folder,
        })
    }

    pub fn list_local(&self, filter: Option<&[String]>) -> Result<ListResult, RefgenError> {
        let document = self.store.read()?;
        let (genomes, assets) = document.list_local(filter)?;
        Ok(ListResult {
            source: self.store.path().to_string(),
            genomes,
            assets,
        })
    }

    pub fn list_remote(
        &self,
        filter: Option<&[String]>,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, RefgenError> {
        let server = self.store.read()?.genome_server;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; querying {server}"),
            elapsed: None,
        });
        let (genomes, assets) = list_remote(&self.catalog, filter)?;
        Ok(ListResult {
            source: server,
            genomes,
            assets,
        })
    }

    /// Pulls each requested asset in turn. A failed item does not stop the
    /// batch; only registry-level errors do.
    pub fn pull(
        &self,
        paths: &[RegistryPath],
        force: ForcePolicy,
        confirm: &dyn Confirm,
        sink: &dyn ProgressSink,
    ) -> Result<PullReport, RefgenError> {
        let fetcher = AssetFetcher::new(&self.catalog, confirm, sink);
        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let result = fetcher.pull(
                &self.store,
                &path.collection,
                &path.asset,
                path.tag.as_deref(),
                force,
            )?;
            let (action, item_path, message) = match result.outcome {
                PullOutcome::Installed(path) => ("installed", Some(path.to_string()), None),
                PullOutcome::Skipped(path) => ("skipped", Some(path.to_string()), None),
                PullOutcome::Aborted(reason) => ("aborted", None, Some(reason)),
                PullOutcome::Failed(err) => ("failed", None, Some(err.to_string())),
            };
            items.push(PullItemResult {
                genome: result.collection,
                asset: result.asset,
                tag: result.tag,
                action: action.to_string(),
                path: item_path,
                message,
            });
        }
        Ok(PullReport { items })
    }

    pub fn seek(
        &self,
        path: &RegistryPath,
        enclosing_dir: bool,
        strictness: Strictness,
    ) -> Result<SeekResult, RefgenError> {
        let document = self.store.read()?;
        let query = SeekQuery {
            seek_key: path.seek_key.as_deref(),
            enclosing_dir,
            allow_incomplete: false,
        };
        let resolved = get_asset(
            &document,
            &path.collection,
            &path.asset,
            path.tag.as_deref(),
            &query,
            strictness,
            &exists_or_url,
        )?;
        Ok(SeekResult {
            path: resolved.to_string(),
        })
    }

    pub fn tag(
        &self,
        path: &RegistryPath,
        new_tag: &str,
        confirm: &dyn Confirm,
    ) -> Result<TagResult, RefgenError> {
        let mut session = self.store.load()?;
        let document = session.document_mut();
        let old_tag = match &path.tag {
            Some(tag) => tag.clone(),
            None => document.get_default_tag(&path.collection, &path.asset, true).tag,
        };
        let outcome = document.retag(&path.collection, &path.asset, &old_tag, new_tag, confirm)?;
        if outcome == RetagOutcome::Retagged {
            session.save()?;
        }
        let action = match outcome {
            RetagOutcome::Retagged => "retagged",
            RetagOutcome::Declined => "declined",
            RetagOutcome::Unchanged => "unchanged",
        };
        Ok(TagResult {
            genome: path.collection.clone(),
            asset: path.asset.clone(),
            old_tag,
            new_tag: new_tag.to_string(),
            action: action.to_string(),
        })
    }

    /// Deletes a tag's files and its registry entry.
    pub fn remove(
        &self,
        path: &RegistryPath,
        confirm: &dyn Confirm,
    ) -> Result<RemoveResult, RefgenError> {
        let mut session = self.store.load()?;
        let document = session.document_mut();
        let tag = match &path.tag {
            Some(tag) => tag.clone(),
            None => document.get_default_tag(&path.collection, &path.asset, true).tag,
        };
        document.assert_exists(&path.collection, Some(&path.asset), Some(&tag), true)?;
        let mut result = RemoveResult {
            genome: path.collection.clone(),
            asset: path.asset.clone(),
            tag: tag.clone(),
            removed: false,
            deleted_path: None,
        };
        let question = format!(
            "Removing '{}/{}:{tag}'. Do you want to proceed?",
            path.collection, path.asset
        );
        if !confirm.confirm(&question, false) {
            tracing::info!("Action aborted by the user");
            return Ok(result);
        }

        let query = SeekQuery {
            enclosing_dir: true,
            allow_incomplete: true,
            ..SeekQuery::default()
        };
        let tag_dir = get_asset(
            document,
            &path.collection,
            &path.asset,
            Some(&tag),
            &query,
            Strictness::Silent,
            &|candidate: &Utf8Path| candidate.as_std_path().exists(),
        )?;
        if tag_dir.is_absolute() && tag_dir.as_std_path().exists() {
            remove_path(tag_dir.as_std_path())?;
            tracing::info!("Removed {tag_dir}");
            result.deleted_path = Some(tag_dir.to_string());
        } else {
            tracing::warn!("No files found for '{}/{}:{tag}'", path.collection, path.asset);
        }

        document.remove_tag(&path.collection, &path.asset, Some(&tag))?;
        session.save()?;
        result.removed = true;
        Ok(result)
    }

    pub fn set_default(&self, path: &RegistryPath, force: bool) -> Result<DefaultResult, RefgenError> {
        let tag = path.tag.clone().ok_or_else(|| {
            RefgenError::InvalidRegistryPath(format!("{path}: a tag is required"))
        })?;
        let mut session = self.store.load()?;
        let changed = session
            .document_mut()
            .set_default_tag(&path.collection, &path.asset, &tag, force)?;
        if changed {
            session.save()?;
        } else {
            tracing::info!(
                "Default tag for '{}/{}' already set; pass --force to replace it",
                path.collection,
                path.asset
            );
        }
        Ok(DefaultResult {
            genome: path.collection.clone(),
            asset: path.asset.clone(),
            tag,
            changed,
        })
    }
}
