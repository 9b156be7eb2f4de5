use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::store::CandidatePoolProvider;
use crate::{AlbumId, ImageId, TagId};

/// How the album and tag selections of a search combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlbumTagRelation {
    /// Images in any selected album or with any selected tag.
    Union,
    /// Images in a selected album that also carry a selected tag.
    Intersection,
    /// Images in the selected albums without any selected tag.
    AlbumExclusive,
    /// Images with a selected tag outside the selected albums.
    TagExclusive,
    /// Only one of the two selections is expected to be used.
    #[default]
    NoMix,
}

impl fmt::Display for AlbumTagRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlbumTagRelation::Union => "union",
            AlbumTagRelation::Intersection => "intersection",
            AlbumTagRelation::AlbumExclusive => "album-exclusive",
            AlbumTagRelation::TagExclusive => "tag-exclusive",
            AlbumTagRelation::NoMix => "no-mix",
        };
        f.write_str(name)
    }
}

impl FromStr for AlbumTagRelation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "union" => Ok(AlbumTagRelation::Union),
            "intersection" => Ok(AlbumTagRelation::Intersection),
            "album-exclusive" => Ok(AlbumTagRelation::AlbumExclusive),
            "tag-exclusive" => Ok(AlbumTagRelation::TagExclusive),
            "no-mix" => Ok(AlbumTagRelation::NoMix),
            other => Err(Error::InvalidArgument(format!(
                "unknown album/tag relation: {other}"
            ))),
        }
    }
}

/// Resolve an album/tag selection into a flat id set.
pub fn images_from_scope(
    provider: &dyn CandidatePoolProvider,
    albums: &[AlbumId],
    tags: &[TagId],
    relation: AlbumTagRelation,
) -> Result<HashSet<ImageId>> {
    let mut in_albums = HashSet::new();
    for &album in albums {
        in_albums.extend(provider.images_in_album(album)?);
    }

    let mut with_tags = HashSet::new();
    for &tag in tags {
        with_tags.extend(provider.images_with_tag(tag)?);
    }

    let images = match relation {
        AlbumTagRelation::Union => &in_albums | &with_tags,
        AlbumTagRelation::Intersection => &in_albums & &with_tags,
        AlbumTagRelation::AlbumExclusive => &in_albums - &with_tags,
        AlbumTagRelation::TagExclusive => &with_tags - &in_albums,
        AlbumTagRelation::NoMix => {
            if albums.is_empty() && tags.is_empty() {
                log::warn!("Duplicates scope: no albums or tags selected, nothing to scan");
                return Ok(HashSet::new());
            }
            &in_albums | &with_tags
        }
    };

    Ok(images)
}
