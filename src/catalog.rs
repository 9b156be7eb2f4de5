use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};

use crate::duplicates::DuplicatesResults;
use crate::error::Result;
use crate::haar::Signature;
use crate::metadata::FileSummary;
use crate::store::{CandidatePoolProvider, ItemInfo, MetadataProvider, ResultSink, SignatureStore};
use crate::{AlbumId, ImageId, TagId, codec};

/// `searches.kind` of generated duplicate groups.
pub const DUPLICATES_SEARCH_KIND: &str = "duplicates";
/// `image_similarity.algorithm` of Haar similarities.
pub const HAAR_ALGORITHM: i64 = 1;

/// A duplicate group as stored in the `searches` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSearch {
    pub id: i64,
    pub reference: ImageId,
    pub members: Vec<ImageId>,
    pub similarity: f64,
}

/// What the indexer remembers about a file between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub id: ImageId,
    pub file_size: u64,
    pub mtime_ns: i64,
}

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let catalog = Catalog { conn };
        catalog.init_schema()?;
        Ok(catalog)
    }

    pub fn open_in_memory() -> Result<Self> {
        let catalog = Catalog {
            conn: Connection::open_in_memory()?,
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                available INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS albums (
                id INTEGER PRIMARY KEY,
                collection_id INTEGER NOT NULL,
                relative_path TEXT NOT NULL,
                UNIQUE (collection_id, relative_path)
            );

            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY,
                album_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mtime_ns INTEGER NOT NULL,
                width INTEGER,
                height INTEGER,
                creation_date TEXT,
                modification_date TEXT,
                unique_hash TEXT,
                UNIQUE (album_id, name)
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS image_tags (
                image_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (image_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS haar_matrix (
                image_id INTEGER PRIMARY KEY,
                modification_date TEXT,
                unique_hash TEXT,
                matrix BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS image_similarity (
                image_id1 INTEGER NOT NULL,
                image_id2 INTEGER NOT NULL,
                algorithm INTEGER NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (image_id1, image_id2, algorithm)
            );

            CREATE TABLE IF NOT EXISTS searches (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                image_ids TEXT NOT NULL,
                avg_similarity REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_images_album ON images(album_id);
            CREATE INDEX IF NOT EXISTS idx_searches_kind ON searches(kind, name);",
        )?;
        Ok(())
    }

    // --- Collections and albums ---

    /// Register a collection root, returning the existing id if known.
    pub fn add_collection(&self, path: &Path) -> Result<i64> {
        let path_str = path.to_string_lossy();
        self.conn.execute(
            "INSERT OR IGNORE INTO collections (path, available) VALUES (?1, 1)",
            params![path_str.as_ref()],
        )?;
        Ok(self.conn.query_row(
            "SELECT id FROM collections WHERE path = ?1",
            params![path_str.as_ref()],
            |row| row.get(0),
        )?)
    }

    pub fn set_collection_available(&self, collection: i64, available: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE collections SET available = ?2 WHERE id = ?1",
            params![collection, available],
        )?;
        Ok(())
    }

    /// Mark every collection available iff its root exists on disk.
    pub fn refresh_availability(&self) -> Result<()> {
        for (id, path) in self.collections()? {
            self.set_collection_available(id, path.is_dir())?;
        }
        Ok(())
    }

    pub fn collections(&self) -> Result<Vec<(i64, PathBuf)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, path FROM collections ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, PathBuf::from(row.get::<_, String>(1)?)))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// `relative_path` is `""` for the collection root, else `/`-separated.
    pub fn add_album(&self, collection: i64, relative_path: &str) -> Result<AlbumId> {
        self.conn.execute(
            "INSERT OR IGNORE INTO albums (collection_id, relative_path) VALUES (?1, ?2)",
            params![collection, relative_path],
        )?;
        Ok(self.conn.query_row(
            "SELECT id FROM albums WHERE collection_id = ?1 AND relative_path = ?2",
            params![collection, relative_path],
            |row| row.get(0),
        )?)
    }

    // --- Images and tags ---

    /// Insert or update the row of one file, keyed by album and name.
    pub fn upsert_image(&self, album: AlbumId, summary: &FileSummary, unique_hash: &str) -> Result<ImageId> {
        let (width, height) = match summary.dimensions {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };
        self.conn.execute(
            "INSERT INTO images (album_id, name, file_size, mtime_ns, width, height,
                                 creation_date, modification_date, unique_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(album_id, name) DO UPDATE SET
                file_size = excluded.file_size,
                mtime_ns = excluded.mtime_ns,
                width = excluded.width,
                height = excluded.height,
                creation_date = excluded.creation_date,
                modification_date = excluded.modification_date,
                unique_hash = excluded.unique_hash",
            params![
                album,
                summary.filename,
                summary.file_size as i64,
                summary.mtime_ns,
                width,
                height,
                summary.creation_date.as_deref(),
                summary.modification_date.as_deref(),
                unique_hash,
            ],
        )?;
        Ok(self.conn.query_row(
            "SELECT id FROM images WHERE album_id = ?1 AND name = ?2",
            params![album, summary.filename],
            |row| row.get(0),
        )?)
    }

    /// Size and mtime recorded for a file, if it was indexed before.
    pub fn cached_image(&self, album: AlbumId, name: &str) -> Result<Option<CachedImage>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, file_size, mtime_ns FROM images WHERE album_id = ?1 AND name = ?2",
        )?;
        Ok(stmt
            .query_row(params![album, name], |row| {
                Ok(CachedImage {
                    id: row.get(0)?,
                    file_size: row.get::<_, i64>(1)? as u64,
                    mtime_ns: row.get(2)?,
                })
            })
            .optional()?)
    }

    pub fn image_id_for_path(&self, path: &Path) -> Result<Option<ImageId>> {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            return Ok(None);
        };
        let Some(dir) = path.parent() else {
            return Ok(None);
        };

        for (collection, root) in self.collections()? {
            let Ok(relative) = dir.strip_prefix(&root) else {
                continue;
            };
            let found = self
                .conn
                .query_row(
                    "SELECT i.id FROM images i JOIN albums a ON a.id = i.album_id
                     WHERE a.collection_id = ?1 AND a.relative_path = ?2 AND i.name = ?3",
                    params![collection, relative_path_string(relative), name],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    pub fn image_path(&self, id: ImageId) -> Result<Option<PathBuf>> {
        let row = self
            .conn
            .query_row(
                "SELECT c.path, a.relative_path, i.name FROM images i
                 JOIN albums a ON a.id = i.album_id
                 JOIN collections c ON c.id = a.collection_id
                 WHERE i.id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;

        Ok(row.map(|(root, relative, name)| {
            let mut path = PathBuf::from(root);
            if !relative.is_empty() {
                path.push(relative);
            }
            path.push(name);
            path
        }))
    }

    /// Delete an image together with its signature, tags and similarities.
    pub fn remove_image(&self, id: ImageId) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM images WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM haar_matrix WHERE image_id = ?1", params![id])?;
        tx.execute("DELETE FROM image_tags WHERE image_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM image_similarity WHERE image_id1 = ?1 OR image_id2 = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove images of available collections whose files are gone.
    pub fn prune_missing(&self) -> Result<usize> {
        let ids: Vec<ImageId> = {
            let mut stmt = self.conn.prepare(
                "SELECT i.id FROM images i
                 JOIN albums a ON a.id = i.album_id
                 JOIN collections c ON c.id = a.collection_id
                 WHERE c.available = 1",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut removed = 0;
        for id in ids {
            if let Some(path) = self.image_path(id)? {
                if !path.exists() {
                    log::debug!("Pruning missing file {}", path.display());
                    self.remove_image(id)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub fn add_tag(&self, name: &str) -> Result<TagId> {
        self.conn
            .execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![name])?;
        Ok(self
            .conn
            .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| row.get(0))?)
    }

    pub fn tag_id(&self, name: &str) -> Result<Option<TagId>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?)
    }

    pub fn tag_image(&self, id: ImageId, tag: TagId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO image_tags (image_id, tag_id) VALUES (?1, ?2)",
            params![id, tag],
        )?;
        Ok(())
    }

    /// Album of a directory inside a known collection.
    pub fn album_for_dir(&self, dir: &Path) -> Result<Option<AlbumId>> {
        for (collection, root) in self.collections()? {
            let Ok(relative) = dir.strip_prefix(&root) else {
                continue;
            };
            let found = self
                .conn
                .query_row(
                    "SELECT id FROM albums WHERE collection_id = ?1 AND relative_path = ?2",
                    params![collection, relative_path_string(relative)],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Every catalog image, by id.
    pub fn image_ids(&self) -> Result<Vec<ImageId>> {
        let mut stmt = self.conn.prepare_cached("SELECT id FROM images ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // --- Fingerprints ---

    /// True when the stored signature is absent or was computed from an
    /// older version of the file.
    pub fn has_dirty_or_missing_fingerprint(&self, id: ImageId) -> Result<bool> {
        let clean: Option<bool> = self
            .conn
            .query_row(
                "SELECT h.modification_date IS i.modification_date
                        AND h.unique_hash IS i.unique_hash
                 FROM images i LEFT JOIN haar_matrix h ON h.image_id = i.id
                 WHERE i.id = ?1 AND h.image_id IS NOT NULL",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(!clean.unwrap_or(false))
    }

    pub fn dirty_or_missing_fingerprints(&self) -> Result<Vec<ImageId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT i.id FROM images i LEFT JOIN haar_matrix h ON h.image_id = i.id
             WHERE h.image_id IS NULL
                OR h.modification_date IS NOT i.modification_date
                OR h.unique_hash IS NOT i.unique_hash
             ORDER BY i.id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // --- Similarity cache ---

    pub fn set_image_similarity(&self, a: ImageId, b: ImageId, value: f64) -> Result<()> {
        let (first, second) = (a.min(b), a.max(b));
        self.conn.execute(
            "INSERT OR REPLACE INTO image_similarity (image_id1, image_id2, algorithm, value)
             VALUES (?1, ?2, ?3, ?4)",
            params![first, second, HAAR_ALGORITHM, value],
        )?;
        Ok(())
    }

    pub fn image_similarity(&self, a: ImageId, b: ImageId) -> Result<Option<f64>> {
        let (first, second) = (a.min(b), a.max(b));
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM image_similarity
                 WHERE image_id1 = ?1 AND image_id2 = ?2 AND algorithm = ?3",
                params![first, second, HAAR_ALGORITHM],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Forget every similarity involving `id`.
    pub fn remove_image_similarity(&self, id: ImageId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM image_similarity WHERE (image_id1 = ?1 OR image_id2 = ?1) AND algorithm = ?2",
            params![id, HAAR_ALGORITHM],
        )?;
        Ok(())
    }

    pub fn clear_image_similarity(&self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM image_similarity WHERE algorithm = ?1",
            params![HAAR_ALGORITHM],
        )?;
        Ok(())
    }

    // --- Saved duplicate searches ---

    pub fn duplicate_searches(&self) -> Result<Vec<SavedSearch>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, image_ids, avg_similarity FROM searches WHERE kind = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![DUPLICATES_SEARCH_KIND], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;

        let mut searches = Vec::new();
        for row in rows {
            let (id, name, image_ids, similarity) = row?;
            let Ok(reference) = name.parse::<ImageId>() else {
                log::warn!("Skipping duplicate search {id} with unexpected name {name:?}");
                continue;
            };
            let members = image_ids
                .split(',')
                .filter_map(|s| s.trim().parse::<ImageId>().ok())
                .collect();
            searches.push(SavedSearch {
                id,
                reference,
                members,
                similarity,
            });
        }
        Ok(searches)
    }

    // --- Maintenance ---

    pub fn integrity_check(&self) -> Result<bool> {
        let status: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if status != "ok" {
            log::warn!("Catalog integrity check: {status}");
        }
        Ok(status == "ok")
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

fn relative_path_string(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl SignatureStore for Catalog {
    fn get(&self, id: ImageId) -> Result<Option<Signature>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT matrix FROM haar_matrix WHERE image_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        blob.map(|b| codec::decode(&b)).transpose()
    }

    /// Stamps the signature with the image's current date and hash so
    /// later edits to the file show up as dirty.
    fn put(&self, id: ImageId, sig: &Signature) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO haar_matrix (image_id, modification_date, unique_hash, matrix)
             VALUES (?1,
                     (SELECT modification_date FROM images WHERE id = ?1),
                     (SELECT unique_hash FROM images WHERE id = ?1),
                     ?2)",
            params![id, codec::encode(sig)],
        )?;
        Ok(())
    }

    fn remove(&self, id: ImageId) -> Result<()> {
        self.conn
            .execute("DELETE FROM haar_matrix WHERE image_id = ?1", params![id])?;
        Ok(())
    }

    fn for_each(&self, visit: &mut dyn FnMut(ImageId, Result<Signature>)) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT image_id, matrix FROM haar_matrix ORDER BY image_id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: ImageId = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            visit(id, codec::decode(&blob));
        }
        Ok(())
    }
}

impl CandidatePoolProvider for Catalog {
    fn images_in_album(&self, album: AlbumId) -> Result<Vec<ImageId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM images WHERE album_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![album], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn images_with_tag(&self, tag: TagId) -> Result<Vec<ImageId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT image_id FROM image_tags WHERE tag_id = ?1 ORDER BY image_id")?;
        let rows = stmt.query_map(params![tag], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn album_memberships(&self) -> Result<HashMap<ImageId, AlbumId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT i.id, i.album_id FROM images i
             JOIN albums a ON a.id = i.album_id
             JOIN collections c ON c.id = a.collection_id
             WHERE c.available = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, ImageId>(0)?, row.get::<_, AlbumId>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

impl MetadataProvider for Catalog {
    fn item_info(&self, id: ImageId) -> Result<Option<ItemInfo>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT album_id, file_size, width, height, creation_date, modification_date
             FROM images WHERE id = ?1",
        )?;
        Ok(stmt
            .query_row(params![id], |row| {
                Ok(ItemInfo {
                    id,
                    album: row.get(0)?,
                    file_size: row.get::<_, i64>(1)? as u64,
                    width: row.get(2)?,
                    height: row.get(3)?,
                    creation_date: row.get(4)?,
                    modification_date: row.get(5)?,
                })
            })
            .optional()?)
    }
}

impl ResultSink for Catalog {
    fn rebuild_groups(&self, results: &DuplicatesResults, is_album_update: bool) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        if is_album_update {
            for reference in results.groups.keys() {
                tx.execute(
                    "DELETE FROM searches WHERE kind = ?1 AND name = ?2",
                    params![DUPLICATES_SEARCH_KIND, reference.to_string()],
                )?;
            }
        } else {
            tx.execute(
                "DELETE FROM searches WHERE kind = ?1",
                params![DUPLICATES_SEARCH_KIND],
            )?;
        }

        for (reference, group) in &results.groups {
            let image_ids = group
                .members
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");
            tx.execute(
                "INSERT INTO searches (kind, name, image_ids, avg_similarity) VALUES (?1, ?2, ?3, ?4)",
                params![DUPLICATES_SEARCH_KIND, reference.to_string(), image_ids, group.similarity],
            )?;
        }

        for (&(a, b), &value) in &results.pair_similarities {
            tx.execute(
                "INSERT OR REPLACE INTO image_similarity (image_id1, image_id2, algorithm, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![a, b, HAAR_ALGORITHM, value],
            )?;
        }

        tx.commit()?;
        log::info!(
            "Saved {} duplicate groups ({})",
            results.len(),
            if is_album_update { "update" } else { "full rebuild" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::DuplicateGroup;
    use crate::search::CandidatePool;
    use crate::testutil::noise_signature;

    fn summary(name: &str, modified: &str) -> FileSummary {
        FileSummary {
            filename: name.to_string(),
            file_size: 1234,
            mtime_ns: 1,
            dimensions: Some((640, 480)),
            creation_date: Some("2020-01-01 00:00:00".to_string()),
            modification_date: Some(modified.to_string()),
        }
    }

    /// One collection at `/photos`, albums `""` and `trips`, three images.
    fn populated() -> (Catalog, i64, AlbumId, AlbumId, Vec<ImageId>) {
        let catalog = Catalog::open_in_memory().unwrap();
        let collection = catalog.add_collection(Path::new("/photos")).unwrap();
        let root = catalog.add_album(collection, "").unwrap();
        let trips = catalog.add_album(collection, "trips").unwrap();
        let ids = vec![
            catalog.upsert_image(root, &summary("a.jpg", "2021-01-01 00:00:00"), "h1").unwrap(),
            catalog.upsert_image(root, &summary("b.jpg", "2021-01-01 00:00:00"), "h2").unwrap(),
            catalog.upsert_image(trips, &summary("c.jpg", "2021-01-01 00:00:00"), "h3").unwrap(),
        ];
        (catalog, collection, root, trips, ids)
    }

    #[test]
    fn collections_and_albums_are_idempotent() {
        let catalog = Catalog::open_in_memory().unwrap();
        let a = catalog.add_collection(Path::new("/photos")).unwrap();
        assert_eq!(catalog.add_collection(Path::new("/photos")).unwrap(), a);
        let album = catalog.add_album(a, "2020/summer").unwrap();
        assert_eq!(catalog.add_album(a, "2020/summer").unwrap(), album);
        assert_eq!(catalog.collections().unwrap(), vec![(a, PathBuf::from("/photos"))]);
    }

    #[test]
    fn images_resolve_to_and_from_paths() {
        let (catalog, _, root, trips, ids) = populated();
        assert_eq!(catalog.image_path(ids[2]).unwrap(), Some(PathBuf::from("/photos/trips/c.jpg")));
        assert_eq!(catalog.image_path(ids[0]).unwrap(), Some(PathBuf::from("/photos/a.jpg")));
        assert_eq!(catalog.image_id_for_path(Path::new("/photos/trips/c.jpg")).unwrap(), Some(ids[2]));
        assert_eq!(catalog.image_id_for_path(Path::new("/elsewhere/c.jpg")).unwrap(), None);
        assert_eq!(catalog.album_for_dir(Path::new("/photos/trips")).unwrap(), Some(trips));
        assert_eq!(catalog.album_for_dir(Path::new("/photos")).unwrap(), Some(root));

        // Re-indexing the same file keeps its id.
        let again = catalog.upsert_image(root, &summary("a.jpg", "2022-01-01 00:00:00"), "h9").unwrap();
        assert_eq!(again, ids[0]);
        let info = catalog.item_info(ids[0]).unwrap().unwrap();
        assert_eq!(info.album, Some(root));
        assert_eq!(info.pixel_count(), 640 * 480);
        assert_eq!(info.modification_date.as_deref(), Some("2022-01-01 00:00:00"));
    }

    #[test]
    fn signatures_round_trip_and_track_dirtiness() {
        let (catalog, _, root, _, ids) = populated();
        assert_eq!(catalog.dirty_or_missing_fingerprints().unwrap(), ids);

        let sig = noise_signature(1);
        catalog.put(ids[0], &sig).unwrap();
        assert_eq!(catalog.get(ids[0]).unwrap(), Some(sig));
        assert!(!catalog.has_dirty_or_missing_fingerprint(ids[0]).unwrap());
        assert!(catalog.has_dirty_or_missing_fingerprint(ids[1]).unwrap());

        // The file changed after fingerprinting.
        catalog.upsert_image(root, &summary("a.jpg", "2023-05-05 00:00:00"), "h1").unwrap();
        assert!(catalog.has_dirty_or_missing_fingerprint(ids[0]).unwrap());
        assert_eq!(catalog.dirty_or_missing_fingerprints().unwrap(), ids);

        catalog.remove(ids[0]).unwrap();
        assert_eq!(catalog.get(ids[0]).unwrap(), None);
    }

    #[test]
    fn corrupt_blobs_are_reported_per_image() {
        let (catalog, _, _, _, ids) = populated();
        catalog.put(ids[0], &noise_signature(1)).unwrap();
        catalog
            .conn
            .execute(
                "INSERT INTO haar_matrix (image_id, matrix) VALUES (?1, ?2)",
                params![ids[1], vec![1u8, 2, 3]],
            )
            .unwrap();

        let mut seen = Vec::new();
        catalog
            .for_each(&mut |id, sig| seen.push((id, sig.is_ok())))
            .unwrap();
        assert_eq!(seen, vec![(ids[0], true), (ids[1], false)]);
        assert!(catalog.get(ids[1]).is_err());
    }

    #[test]
    fn unavailable_collections_leave_the_pool() {
        let (catalog, collection, _, _, ids) = populated();
        for (i, &id) in ids.iter().enumerate() {
            catalog.put(id, &noise_signature(i as u64)).unwrap();
        }
        assert_eq!(CandidatePool::build(&catalog, &catalog, None).unwrap().len(), 3);

        catalog.set_collection_available(collection, false).unwrap();
        assert!(CandidatePool::build(&catalog, &catalog, None).unwrap().is_empty());

        // `/photos` does not exist here, so a refresh keeps it unavailable.
        catalog.refresh_availability().unwrap();
        assert!(catalog.album_memberships().unwrap().is_empty());
    }

    #[test]
    fn albums_and_tags_feed_scope_resolution() {
        let (catalog, _, root, trips, ids) = populated();
        let tag = catalog.add_tag("holiday").unwrap();
        assert_eq!(catalog.add_tag("holiday").unwrap(), tag);
        assert_eq!(catalog.tag_id("holiday").unwrap(), Some(tag));
        catalog.tag_image(ids[1], tag).unwrap();
        catalog.tag_image(ids[2], tag).unwrap();

        assert_eq!(catalog.images_in_album(root).unwrap(), vec![ids[0], ids[1]]);
        assert_eq!(catalog.images_in_album(trips).unwrap(), vec![ids[2]]);
        assert_eq!(catalog.images_with_tag(tag).unwrap(), vec![ids[1], ids[2]]);
    }

    #[test]
    fn similarity_cache_orders_pairs() {
        let (catalog, _, _, _, ids) = populated();
        catalog.set_image_similarity(ids[1], ids[0], 0.75).unwrap();
        assert_eq!(catalog.image_similarity(ids[0], ids[1]).unwrap(), Some(0.75));
        catalog.set_image_similarity(ids[2], ids[0], 0.5).unwrap();

        catalog.remove_image_similarity(ids[1]).unwrap();
        assert_eq!(catalog.image_similarity(ids[0], ids[1]).unwrap(), None);
        assert_eq!(catalog.image_similarity(ids[0], ids[2]).unwrap(), Some(0.5));

        catalog.clear_image_similarity().unwrap();
        assert_eq!(catalog.image_similarity(ids[0], ids[2]).unwrap(), None);
    }

    fn results(groups: &[(ImageId, &[ImageId], f64)]) -> DuplicatesResults {
        let mut results = DuplicatesResults::default();
        for &(reference, members, similarity) in groups {
            results.groups.insert(
                reference,
                DuplicateGroup {
                    similarity,
                    members: members.to_vec(),
                },
            );
            for &m in members.iter().filter(|&&m| m != reference) {
                results
                    .pair_similarities
                    .insert((reference.min(m), reference.max(m)), similarity);
            }
        }
        results
    }

    #[test]
    fn full_rebuild_replaces_every_duplicate_search() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.rebuild_groups(&results(&[(1, &[1, 2], 0.9), (3, &[3, 4], 0.8)]), false).unwrap();
        catalog.rebuild_groups(&results(&[(5, &[5, 6, 7], 0.95)]), false).unwrap();

        let searches = catalog.duplicate_searches().unwrap();
        assert_eq!(searches.len(), 1);
        assert_eq!(searches[0].reference, 5);
        assert_eq!(searches[0].members, vec![5, 6, 7]);
        assert_eq!(searches[0].similarity, 0.95);
        assert_eq!(catalog.image_similarity(5, 7).unwrap(), Some(0.95));
    }

    #[test]
    fn album_update_only_replaces_matching_references() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.rebuild_groups(&results(&[(1, &[1, 2], 0.9), (3, &[3, 4], 0.8)]), false).unwrap();
        catalog.rebuild_groups(&results(&[(3, &[3, 4, 8], 0.85)]), true).unwrap();

        let mut searches: Vec<(ImageId, Vec<ImageId>)> = catalog
            .duplicate_searches()
            .unwrap()
            .into_iter()
            .map(|s| (s.reference, s.members))
            .collect();
        searches.sort();
        assert_eq!(searches, vec![(1, vec![1, 2]), (3, vec![3, 4, 8])]);
    }

    #[test]
    fn removing_an_image_drops_its_signature() {
        let (catalog, _, _, _, ids) = populated();
        catalog.put(ids[0], &noise_signature(2)).unwrap();
        catalog.set_image_similarity(ids[0], ids[1], 0.6).unwrap();
        catalog.remove_image(ids[0]).unwrap();

        assert_eq!(catalog.get(ids[0]).unwrap(), None);
        assert_eq!(catalog.item_info(ids[0]).unwrap(), None);
        assert_eq!(catalog.image_similarity(ids[0], ids[1]).unwrap(), None);
        assert_eq!(catalog.image_ids().unwrap(), vec![ids[1], ids[2]]);
    }

    #[test]
    fn maintenance_runs_on_a_fresh_catalog() {
        let catalog = Catalog::open_in_memory().unwrap();
        assert!(catalog.integrity_check().unwrap());
        catalog.vacuum().unwrap();
    }
}
