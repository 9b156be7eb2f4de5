use std::path::{Path, PathBuf};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::haar::Signature;
use crate::loader::{is_image_file, signature_for_file};
use crate::metadata::{FileSummary, content_hash, read_file_summary};
use crate::store::SignatureStore;
use crate::{AlbumId, ImageId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Image files seen on disk.
    pub files: usize,
    /// Files that were new or changed since the last run.
    pub updated: usize,
    pub fingerprinted: usize,
    pub failed: usize,
    /// Catalog images whose files disappeared.
    pub pruned: usize,
}

pub struct Indexer<'a> {
    catalog: &'a Catalog,
}

impl<'a> Indexer<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Indexer { catalog }
    }

    /// Register every image below `root` and fingerprint what is new.
    pub fn index_dir(&self, root: &Path) -> Result<IndexReport> {
        let collection = self.catalog.add_collection(root)?;
        self.catalog.set_collection_available(collection, root.is_dir())?;

        let mut report = IndexReport::default();
        let mut stale: Vec<(AlbumId, PathBuf)> = Vec::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image_file(path) {
                continue;
            }
            report.files += 1;

            let Some(dir) = path.parent() else {
                continue;
            };
            let relative = dir
                .strip_prefix(root)
                .map(|r| {
                    r.components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();
            let album = self.catalog.add_album(collection, &relative)?;

            let name = entry.file_name().to_string_lossy();
            let unchanged = match (self.catalog.cached_image(album, &name)?, entry.metadata()) {
                (Some(cached), Ok(meta)) => {
                    let mtime_ns = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_nanos() as i64);
                    cached.file_size == meta.len() && Some(cached.mtime_ns) == mtime_ns
                }
                _ => false,
            };
            if !unchanged {
                stale.push((album, path.to_path_buf()));
            }
        }

        let summaries: Vec<(AlbumId, &Path, Result<(FileSummary, String)>)> = stale
            .par_iter()
            .map(|(album, path)| {
                let summary = read_file_summary(path).and_then(|s| Ok((s, content_hash(path)?)));
                (*album, path.as_path(), summary)
            })
            .collect();

        for (album, path, summary) in summaries {
            match summary {
                Ok((summary, hash)) => {
                    self.catalog.upsert_image(album, &summary, &hash)?;
                    report.updated += 1;
                }
                Err(e) => {
                    log::warn!("Failed to read {}: {e}", path.display());
                    report.failed += 1;
                }
            }
        }

        report.pruned = self.catalog.prune_missing()?;

        let dirty = self.catalog.dirty_or_missing_fingerprints()?;
        let (fingerprinted, failed) = self.update_fingerprints(&dirty)?;
        report.fingerprinted = fingerprinted;
        report.failed += failed;

        log::info!(
            "Indexed {}: {} files, {} updated, {} fingerprinted, {} failed, {} pruned",
            root.display(),
            report.files,
            report.updated,
            report.fingerprinted,
            report.failed,
            report.pruned
        );
        Ok(report)
    }

    /// Recompute the signatures of `ids` in parallel and store them.
    /// Returns how many succeeded and how many failed.
    pub fn update_fingerprints(&self, ids: &[ImageId]) -> Result<(usize, usize)> {
        let mut paths = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.catalog.image_path(id)? {
                Some(path) => paths.push((id, path)),
                None => log::debug!("Image {id} has no path, not fingerprinting"),
            }
        }

        let computed: Vec<(ImageId, &Path, Result<Signature>)> = paths
            .par_iter()
            .map(|(id, path)| (*id, path.as_path(), signature_for_file(path)))
            .collect();

        let (mut ok, mut failed) = (0, 0);
        for (id, path, signature) in computed {
            match signature {
                Ok(signature) => {
                    self.catalog.put(id, &signature)?;
                    ok += 1;
                }
                Err(e) => {
                    log::warn!("Failed to fingerprint {}: {e}", path.display());
                    failed += 1;
                }
            }
        }
        Ok((ok, failed))
    }

    /// Recompute every signature in the catalog, dirty or not.
    pub fn rebuild_all_fingerprints(&self) -> Result<(usize, usize)> {
        let ids = self.catalog.image_ids()?;
        self.update_fingerprints(&ids)
    }
}
