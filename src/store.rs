use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::duplicates::DuplicatesResults;
use crate::error::Result;
use crate::haar::Signature;
use crate::{AlbumId, ImageId, TagId, codec};

/// One signature per image.
pub trait SignatureStore {
    fn get(&self, id: ImageId) -> Result<Option<Signature>>;

    fn put(&self, id: ImageId, sig: &Signature) -> Result<()>;

    fn remove(&self, id: ImageId) -> Result<()>;

    /// Visit every stored signature. Entries that fail to decode are handed
    /// to the visitor as errors; only store failures end the walk early.
    fn for_each(&self, visit: &mut dyn FnMut(ImageId, Result<Signature>)) -> Result<()>;
}

/// Album and tag membership of catalog images.
pub trait CandidatePoolProvider {
    fn images_in_album(&self, album: AlbumId) -> Result<Vec<ImageId>>;

    fn images_with_tag(&self, tag: TagId) -> Result<Vec<ImageId>>;

    /// Album of every image whose collection is currently available.
    fn album_memberships(&self) -> Result<HashMap<ImageId, AlbumId>>;
}

/// File facts the reference-selection policy looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: ImageId,
    pub album: Option<AlbumId>,
    pub file_size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// `YYYY-MM-DD HH:MM:SS`; sorts chronologically.
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
}

impl ItemInfo {
    pub fn new(id: ImageId) -> Self {
        ItemInfo {
            id,
            ..Default::default()
        }
    }

    pub fn pixel_count(&self) -> u64 {
        match (self.width, self.height) {
            (Some(w), Some(h)) => w as u64 * h as u64,
            _ => 0,
        }
    }
}

pub trait MetadataProvider {
    fn item_info(&self, id: ImageId) -> Result<Option<ItemInfo>>;
}

/// Persists the groups of a finished duplicate run.
pub trait ResultSink {
    /// Replace previously generated duplicate searches. With
    /// `is_album_update` only the searches of the new references are
    /// replaced and older ones are kept.
    fn rebuild_groups(&self, results: &DuplicatesResults, is_album_update: bool) -> Result<()>;
}

/// Everything in memory. Signatures are kept encoded, as a database would.
#[derive(Default)]
pub struct MemoryCatalog {
    signatures: Mutex<BTreeMap<ImageId, Vec<u8>>>,
    items: BTreeMap<ImageId, ItemInfo>,
    tags: HashMap<TagId, BTreeSet<ImageId>>,
    unavailable_albums: HashSet<AlbumId>,
    rebuilds: Mutex<Vec<(DuplicatesResults, bool)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, info: ItemInfo) {
        self.items.insert(info.id, info);
    }

    pub fn tag_image(&mut self, tag: TagId, id: ImageId) {
        self.tags.entry(tag).or_default().insert(id);
    }

    pub fn set_album_available(&mut self, album: AlbumId, available: bool) {
        if available {
            self.unavailable_albums.remove(&album);
        } else {
            self.unavailable_albums.insert(album);
        }
    }

    /// Store raw bytes as a signature, bypassing the encoder.
    pub fn put_raw(&self, id: ImageId, blob: Vec<u8>) {
        self.signatures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, blob);
    }

    /// Every `rebuild_groups` call received so far.
    pub fn rebuilds(&self) -> Vec<(DuplicatesResults, bool)> {
        self.rebuilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SignatureStore for MemoryCatalog {
    fn get(&self, id: ImageId) -> Result<Option<Signature>> {
        let signatures = self.signatures.lock().unwrap_or_else(PoisonError::into_inner);
        signatures.get(&id).map(|blob| codec::decode(blob)).transpose()
    }

    fn put(&self, id: ImageId, sig: &Signature) -> Result<()> {
        self.put_raw(id, codec::encode(sig));
        Ok(())
    }

    fn remove(&self, id: ImageId) -> Result<()> {
        self.signatures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }

    fn for_each(&self, visit: &mut dyn FnMut(ImageId, Result<Signature>)) -> Result<()> {
        let signatures = self.signatures.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, blob) in signatures.iter() {
            visit(*id, codec::decode(blob));
        }
        Ok(())
    }
}

impl CandidatePoolProvider for MemoryCatalog {
    fn images_in_album(&self, album: AlbumId) -> Result<Vec<ImageId>> {
        Ok(self
            .items
            .values()
            .filter(|info| info.album == Some(album))
            .map(|info| info.id)
            .collect())
    }

    fn images_with_tag(&self, tag: TagId) -> Result<Vec<ImageId>> {
        Ok(self
            .tags
            .get(&tag)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn album_memberships(&self) -> Result<HashMap<ImageId, AlbumId>> {
        Ok(self
            .items
            .values()
            .filter_map(|info| Some((info.id, info.album?)))
            .filter(|(_, album)| !self.unavailable_albums.contains(album))
            .collect())
    }
}

impl MetadataProvider for MemoryCatalog {
    fn item_info(&self, id: ImageId) -> Result<Option<ItemInfo>> {
        Ok(self.items.get(&id).cloned())
    }
}

impl ResultSink for MemoryCatalog {
    fn rebuild_groups(&self, results: &DuplicatesResults, is_album_update: bool) -> Result<()> {
        self.rebuilds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((results.clone(), is_album_update));
        Ok(())
    }
}
