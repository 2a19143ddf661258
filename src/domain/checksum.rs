// Frame checksum: plain byte sum truncated to 8 bits

/// Sum of all byte values modulo 256. Empty input yields 0.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}
