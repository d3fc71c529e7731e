//! Partition assignment checksum
//!
//! Partition membership must be identical across processes, machines and
//! releases, because a catalog dump written today is compared against a scan
//! written by another process tomorrow. `std::hash` gives no such guarantee,
//! so paths are assigned with CRC-32 (IEEE) over their UTF-8 bytes.

use flate2::Crc;

/// CRC-32 of a path
pub fn path_checksum(path: &str) -> u32 {
    let mut crc = Crc::new();
    crc.update(path.as_bytes());
    crc.sum()
}

/// Partition index of `path` among `partitions` partitions
pub fn partition_of(path: &str, partitions: usize) -> usize {
    debug_assert!(partitions > 0);
    (path_checksum(path) as usize) % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        // Standard CRC-32/IEEE check values
        assert_eq!(path_checksum(""), 0);
        assert_eq!(path_checksum("123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_partition_is_stable() {
        let path = "/store/mc/Run3/file.root";
        let first = partition_of(path, 17);
        for _ in 0..100 {
            assert_eq!(partition_of(path, 17), first);
        }
        assert!(first < 17);
        assert_eq!(partition_of(path, 1), 0);
    }

    #[test]
    fn test_partitions_spread() {
        let mut seen = [0usize; 8];
        for i in 0..8000 {
            seen[partition_of(&format!("/store/file_{}.root", i), 8)] += 1;
        }
        assert!(seen.iter().all(|&n| n > 500));
    }
}
