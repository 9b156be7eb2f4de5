use image::{DynamicImage, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::haar::{Signature, compute_signature};
use crate::search::{Candidate, CandidatePool};
use crate::{AlbumId, ImageId};

pub fn noise_image(seed: u64) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let img = RgbImage::from_fn(64, 64, |_, _| Rgb([rng.random(), rng.random(), rng.random()]));
    DynamicImage::ImageRgb8(img)
}

pub fn noise_signature(seed: u64) -> Signature {
    compute_signature(&noise_image(seed))
}

pub fn candidate(id: ImageId, album: AlbumId, signature: Signature) -> Candidate {
    Candidate {
        id,
        album: Some(album),
        signature,
    }
}

/// `(id, album, seed)` triples; equal seeds give identical signatures.
pub fn pool(entries: &[(ImageId, AlbumId, u64)]) -> CandidatePool {
    CandidatePool::from_entries(
        entries
            .iter()
            .map(|&(id, album, seed)| candidate(id, album, noise_signature(seed))),
    )
}
