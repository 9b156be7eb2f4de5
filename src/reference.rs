use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::store::ItemInfo;
use crate::{AlbumId, ImageId};

/// How the reference image of a duplicate group is picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// Oldest file; larger files, then more pixels, win ties.
    #[default]
    OlderOrLarger,
    /// A member inside the reference folders, if there is one.
    PreferFolder,
    /// A member outside the reference folders, if there is one.
    ExcludeFolder,
    NewerCreationDate,
    NewerModificationDate,
}

impl fmt::Display for ReferencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferencePolicy::OlderOrLarger => "older-or-larger",
            ReferencePolicy::PreferFolder => "prefer-folder",
            ReferencePolicy::ExcludeFolder => "exclude-folder",
            ReferencePolicy::NewerCreationDate => "newer-creation-date",
            ReferencePolicy::NewerModificationDate => "newer-modification-date",
        };
        f.write_str(name)
    }
}

impl FromStr for ReferencePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "older-or-larger" => Ok(ReferencePolicy::OlderOrLarger),
            "prefer-folder" => Ok(ReferencePolicy::PreferFolder),
            "exclude-folder" => Ok(ReferencePolicy::ExcludeFolder),
            "newer-creation-date" => Ok(ReferencePolicy::NewerCreationDate),
            "newer-modification-date" => Ok(ReferencePolicy::NewerModificationDate),
            other => Err(Error::InvalidArgument(format!("unknown reference policy: {other}"))),
        }
    }
}

/// Pick the reference of a group. `None` only for an empty group.
/// `folders` is only consulted by the two folder policies.
pub fn select_reference(
    policy: ReferencePolicy,
    members: &[ItemInfo],
    folders: &HashSet<AlbumId>,
) -> Option<ImageId> {
    let in_folders = |info: &&ItemInfo| info.album.is_some_and(|a| folders.contains(&a));

    let chosen = match policy {
        ReferencePolicy::OlderOrLarger => members.iter().min_by(|a, b| older_or_larger(a, b)),
        ReferencePolicy::PreferFolder => members
            .iter()
            .filter(in_folders)
            .min_by(|a, b| older_or_larger(a, b))
            .or_else(|| members.iter().min_by(|a, b| older_or_larger(a, b))),
        ReferencePolicy::ExcludeFolder => members
            .iter()
            .filter(|info| !in_folders(info))
            .min_by(|a, b| older_or_larger(a, b))
            .or_else(|| members.iter().min_by(|a, b| older_or_larger(a, b))),
        ReferencePolicy::NewerCreationDate => members.iter().min_by(|a, b| {
            newest_first(&a.creation_date, &b.creation_date).then(a.id.cmp(&b.id))
        }),
        ReferencePolicy::NewerModificationDate => members.iter().min_by(|a, b| {
            newest_first(&a.modification_date, &b.modification_date).then(a.id.cmp(&b.id))
        }),
    };

    chosen.map(|info| info.id)
}

fn older_or_larger(a: &ItemInfo, b: &ItemInfo) -> Ordering {
    oldest_first(&a.creation_date, &b.creation_date)
        .then(b.file_size.cmp(&a.file_size))
        .then(b.pixel_count().cmp(&a.pixel_count()))
        .then(a.id.cmp(&b.id))
}

// Unknown dates always lose.
fn oldest_first(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn newest_first(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
