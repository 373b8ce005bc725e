//! Staleness detection for fit results.
//!
//! A fit remembers a hash of the exact data it was computed from. The hash
//! is XXH3-64 (fixed seed) over a version byte followed by, for each of
//! x, y, x_err and y_err, the series length and the little-endian bytes of
//! every value.

use super::FitData;
use xxhash_rust::xxh3::Xxh3;

const CHECKSUM_VERSION: u8 = 1;

pub fn hash_data(data: &FitData) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&[CHECKSUM_VERSION]);
    for series in [&data.x, &data.y, &data.x_err, &data.y_err] {
        hasher.update(&(series.len() as u64).to_le_bytes());
        for value in series.iter() {
            hasher.update(&value.to_le_bytes());
        }
    }
    hasher.digest()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(y: &[f64]) -> FitData {
        FitData {
            x: vec![0.0, 1.0, 2.0],
            y: y.to_vec(),
            x_err: vec![0.0; 3],
            y_err: vec![0.1; 3],
        }
    }

    #[test]
    fn test_identical_data_hashes_equal() {
        assert_eq!(hash_data(&data(&[1.0, 2.0, 3.0])), hash_data(&data(&[1.0, 2.0, 3.0])));
    }

    #[test]
    fn test_changed_data_hashes_differ() {
        assert_ne!(hash_data(&data(&[1.0, 2.0, 3.0])), hash_data(&data(&[1.0, 2.0, 3.5])));
    }

    #[test]
    fn test_series_boundaries_matter() {
        let a = FitData {
            x: vec![1.0, 2.0],
            y: vec![3.0],
            x_err: vec![],
            y_err: vec![],
        };
        let b = FitData {
            x: vec![1.0],
            y: vec![2.0, 3.0],
            x_err: vec![],
            y_err: vec![],
        };
        assert_ne!(hash_data(&a), hash_data(&b));
    }
}
