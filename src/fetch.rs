//! The pull state machine.
//!
//! `ResolveTag -> CheckLocalExisting -> CheckParentDigests -> SizeConfirm ->
//! Download -> VerifyChecksum -> Extract -> Commit`
//!
//! Pre-download checks run against an unlocked snapshot of the registry. The
//! lock is taken only for the commit, so the registry is untouched unless a
//! pull ends in [`PullOutcome::Installed`].

use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde_yaml_ng::{Mapping, Value};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::{expand_path, unbound_env_vars};
use crate::domain::AssetRef;
use crate::error::RefgenError;
use crate::fs_util::{file_md5, remove_path, untar};
use crate::interrupt;
use crate::prompt::Confirm;
use crate::registry::Document;
use crate::remote::{CatalogClient, RemoteAssetMetadata};
use crate::resolve::{archive_path, tag_dir};
use crate::store::RegistryStore;

/// What to do when the tag directory already exists locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForcePolicy {
    /// Keep the existing directory and skip the pull.
    Keep,
    /// Ask before overwriting.
    #[default]
    Prompt,
    Overwrite,
}

impl From<Option<bool>> for ForcePolicy {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => ForcePolicy::Overwrite,
            Some(false) => ForcePolicy::Keep,
            None => ForcePolicy::Prompt,
        }
    }
}

#[derive(Debug)]
pub enum PullOutcome {
    Installed(Utf8PathBuf),
    Skipped(Utf8PathBuf),
    Aborted(String),
    Failed(RefgenError),
}

impl PullOutcome {
    /// Installed path, if the pull produced one.
    pub fn installed_path(&self) -> Option<&Utf8Path> {
        match self {
            PullOutcome::Installed(path) => Some(path),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct PullResult {
    pub collection: String,
    pub asset: String,
    /// `None` when the tag could not be resolved.
    pub tag: Option<String>,
    pub outcome: PullOutcome,
}

pub struct AssetFetcher<'a, C: CatalogClient + ?Sized> {
    catalog: &'a C,
    confirm: &'a dyn Confirm,
    sink: &'a dyn ProgressSink,
}

impl<'a, C: CatalogClient + ?Sized> AssetFetcher<'a, C> {
    pub fn new(catalog: &'a C, confirm: &'a dyn Confirm, sink: &'a dyn ProgressSink) -> Self {
        Self {
            catalog,
            confirm,
            sink,
        }
    }

    /// Pulls one tagged asset into the local genome folder.
    ///
    /// Returns `Err` only when the registry cannot be read or its genome
    /// folder has unbound variables; everything past that is reported as a
    /// [`PullOutcome`].
    pub fn pull(
        &self,
        store: &RegistryStore,
        collection: &str,
        asset: &str,
        tag: Option<&str>,
        force: ForcePolicy,
    ) -> Result<PullResult, RefgenError> {
        let snapshot = store.read()?;
        let unbound = unbound_env_vars(&snapshot.genome_folder);
        if !unbound.is_empty() {
            return Err(RefgenError::UnboundEnvironmentVariable(unbound.join(", ")));
        }
        let genome_folder = Utf8PathBuf::from(expand_path(&snapshot.genome_folder));
        let started = Instant::now();

        self.phase(started, format!("phase=ResolveTag; {collection}/{asset}"));
        let tag = match tag {
            Some(tag) => tag.to_string(),
            None => match self.catalog.fetch_default_tag(collection, asset) {
                Ok(tag) => {
                    tracing::info!("Determined server default tag: {tag}");
                    tag
                }
                Err(err) => {
                    tracing::error!("Could not determine the default tag for '{collection}/{asset}': {err}");
                    return Ok(PullResult {
                        collection: collection.to_string(),
                        asset: asset.to_string(),
                        tag: None,
                        outcome: PullOutcome::Failed(err),
                    });
                }
            },
        };

        let job = PullJob {
            store,
            snapshot: &snapshot,
            genome_folder: &genome_folder,
            collection,
            asset,
            tag: &tag,
            started,
        };
        let outcome = match self.run(&job, force) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!("Pull of '{collection}/{asset}:{tag}' failed: {err}");
                PullOutcome::Failed(err)
            }
        };
        Ok(PullResult {
            collection: collection.to_string(),
            asset: asset.to_string(),
            tag: Some(tag),
            outcome,
        })
    }

    fn run(&self, job: &PullJob<'_>, force: ForcePolicy) -> Result<PullOutcome, RefgenError> {
        let PullJob {
            collection,
            asset,
            tag,
            ..
        } = *job;
        let metadata = self.catalog.fetch_metadata(collection, asset, tag)?;

        self.phase(job.started, format!("phase=CheckLocalExisting; {collection}/{asset}:{tag}"));
        let target = tag_dir(job.genome_folder, collection, asset, tag);
        let replace_existing = target.as_std_path().exists();
        if replace_existing {
            let keep = match force {
                ForcePolicy::Keep => true,
                ForcePolicy::Prompt => !self.confirm.confirm(
                    &format!("Genome asset '{collection}/{asset}:{tag}' exists. Do you want to overwrite?"),
                    false,
                ),
                ForcePolicy::Overwrite => false,
            };
            if keep {
                tracing::info!("Skipping existing asset: {target}");
                return Ok(PullOutcome::Skipped(target));
            }
        }

        self.phase(job.started, format!("phase=CheckParentDigests; {collection}/{asset}:{tag}"));
        let adopted = self.check_parents(job, &metadata.asset_parents)?;

        self.phase(job.started, format!("phase=SizeConfirm; {collection}/{asset}:{tag}"));
        if let Some(size) = metadata.parsed_archive_size().filter(|size| size.is_large()) {
            let question = format!(
                "The '{collection}/{asset}:{tag}' archive is {size}. Do you want to proceed?"
            );
            if !self.confirm.confirm(&question, false) {
                tracing::info!("Pull of '{collection}/{asset}:{tag}' skipped by user");
                return Ok(PullOutcome::Aborted("skipped by user".to_string()));
            }
        }

        self.phase(job.started, format!("phase=Download; {collection}/{asset}:{tag}"));
        let collection_dir = job.genome_folder.join(collection);
        fs::create_dir_all(collection_dir.as_std_path())
            .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        let archive = archive_path(job.genome_folder, collection, asset, tag);
        let downloaded = {
            let _guard = interrupt::guard(archive.as_std_path());
            self.catalog
                .download_archive(collection, asset, tag, archive.as_std_path())
        };
        match downloaded {
            Ok(bytes) => tracing::info!("Downloaded {bytes} bytes to {archive}"),
            Err(err) => {
                log_download_failure(&err);
                remove_path(archive.as_std_path())?;
                return Ok(PullOutcome::Failed(err));
            }
        }

        let installed = self.verify_and_extract(job, &metadata, &archive, &target, replace_existing);
        if let Err(err) = remove_path(archive.as_std_path()) {
            tracing::warn!("Could not remove archive {archive}: {err}");
        }
        installed?;

        self.phase(job.started, format!("phase=Commit; {collection}/{asset}:{tag}"));
        self.commit(job, &metadata, &adopted)?;
        Ok(PullOutcome::Installed(target))
    }

    /// Compares each declared parent's remote digest with the local one.
    /// A recorded digest is compared even when the parent tag is incomplete.
    /// Returns the digests to adopt for parents with no local digest yet.
    fn check_parents(
        &self,
        job: &PullJob<'_>,
        parents: &[AssetRef],
    ) -> Result<Vec<(AssetRef, String)>, RefgenError> {
        let mut adopted = Vec::new();
        for parent in parents {
            let remote = self
                .catalog
                .fetch_asset_digest(job.collection, parent.asset(), parent.tag())?;
            let local = job
                .snapshot
                .tag(job.collection, parent.asset(), parent.tag())
                .ok()
                .and_then(|entry| entry.asset_digest.clone());
            match local {
                Some(local) if local != remote => {
                    tracing::error!(
                        "Parent '{}/{parent}' digest differs from the server's; aborting pull",
                        job.collection
                    );
                    return Err(RefgenError::DigestMismatch {
                        subject: format!("parent asset {}/{parent}", job.collection),
                        local,
                        remote,
                    });
                }
                Some(_) => {}
                None => {
                    tracing::debug!(
                        "No local digest for parent '{}/{parent}', adopting the server's",
                        job.collection
                    );
                    adopted.push((parent.clone(), remote));
                }
            }
        }
        Ok(adopted)
    }

    fn verify_and_extract(
        &self,
        job: &PullJob<'_>,
        metadata: &RemoteAssetMetadata,
        archive: &Utf8Path,
        target: &Utf8Path,
        replace_existing: bool,
    ) -> Result<(), RefgenError> {
        let PullJob {
            collection,
            asset,
            tag,
            ..
        } = *job;
        self.phase(job.started, format!("phase=VerifyChecksum; {collection}/{asset}:{tag}"));
        match metadata.archive_digest.as_deref() {
            Some(expected) => {
                let actual = file_md5(archive.as_std_path())?;
                if actual != expected {
                    return Err(RefgenError::DigestMismatch {
                        subject: format!("archive {collection}/{asset}:{tag}"),
                        local: actual,
                        remote: expected.to_string(),
                    });
                }
            }
            None => tracing::warn!("No archive digest published for '{collection}/{asset}:{tag}'"),
        }

        self.phase(job.started, format!("phase=Extract; {collection}/{asset}:{tag}"));
        let collection_dir = job.genome_folder.join(collection);
        let scratch = tempfile::Builder::new()
            .prefix(".refgenie-extract")
            .tempdir_in(collection_dir.as_std_path())
            .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        untar(archive.as_std_path(), scratch.path())?;
        let extracted = scratch.path().join(asset);
        if !extracted.is_dir() {
            return Err(RefgenError::Filesystem(format!(
                "archive {archive} has no '{asset}' directory"
            )));
        }
        if replace_existing {
            tracing::info!("Removing existing asset: {target}");
            remove_path(target.as_std_path())?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        }
        fs::rename(&extracted, target.as_std_path())
            .map_err(|err| RefgenError::Filesystem(format!("move into {target}: {err}")))?;
        Ok(())
    }

    fn commit(
        &self,
        job: &PullJob<'_>,
        metadata: &RemoteAssetMetadata,
        adopted: &[(AssetRef, String)],
    ) -> Result<(), RefgenError> {
        let mut session = job.store.load()?;
        let document: &mut Document = session.document_mut();
        for (parent, digest) in adopted {
            let mut data = Mapping::new();
            data.insert(Value::from("asset_digest"), Value::from(digest.as_str()));
            document.ensure_path(job.collection, Some(parent.asset()), Some(parent.tag()), Some(&data))?;
        }
        let attributes = metadata.pull_attributes()?;
        document.ensure_path(job.collection, Some(job.asset), Some(job.tag), Some(&attributes))?;
        document.set_default_tag(job.collection, job.asset, job.tag, false)?;
        session.save()
    }

    fn phase(&self, started: Instant, message: String) {
        tracing::debug!("{message}");
        self.sink.event(ProgressEvent {
            message,
            elapsed: Some(started.elapsed()),
        });
    }
}

struct PullJob<'a> {
    store: &'a RegistryStore,
    snapshot: &'a Document,
    genome_folder: &'a Utf8Path,
    collection: &'a str,
    asset: &'a str,
    tag: &'a str,
    started: Instant,
}

fn log_download_failure(err: &RefgenError) {
    match err {
        RefgenError::ArchiveNotFound(what) => {
            tracing::error!("Archive not found on the server: {what}")
        }
        RefgenError::ConnectionRefused(what) => {
            tracing::error!("Server refused the connection: {what}")
        }
        RefgenError::TruncatedDownload(what) => {
            tracing::error!("Server sent fewer bytes than announced: {what}")
        }
        other => tracing::error!("Download failed: {other}"),
    }
}
