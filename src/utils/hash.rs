const SEED: u32 = 13331;

/// Folds `data` into a running multiplicative checksum.
pub fn rolling_checksum(seed: u32, data: &[u8]) -> u32 {
    data.iter()
        .fold(seed, |acc, &b| acc.wrapping_mul(SEED).wrapping_add(b as u32))
}

pub fn verify_checksum(data: &[u8], expected_checksum: u32) -> bool {
    rolling_checksum(0, data) == expected_checksum
}
