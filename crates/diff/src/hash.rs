use image::imageops::{self, FilterType};
use image::RgbaImage;

const HASH_SIDE: u32 = 8;

/// Computes an 8x8 average hash of a rendered page.
///
/// The image is converted to grayscale, downsampled to 8x8, and each
/// cell contributes one bit: set when the cell is brighter than the
/// mean. Hashes of visually similar pages differ in few bits, so
/// [`hamming_distance`] works as a cheap similarity measure.
pub fn average_hash(image: &RgbaImage) -> u64 {
    let gray = imageops::grayscale(image);
    let cells = imageops::resize(&gray, HASH_SIDE, HASH_SIDE, FilterType::Triangle);

    let total: u32 = cells.pixels().map(|pixel| u32::from(pixel[0])).sum();
    let mean = total / (HASH_SIDE * HASH_SIDE);

    let mut hash = 0u64;
    for (bit, pixel) in cells.pixels().enumerate() {
        if u32::from(pixel[0]) > mean {
            hash |= 1 << bit;
        }
    }
    hash
}

/// Number of differing bits between two average hashes.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
