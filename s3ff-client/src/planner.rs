//! Part planning as performed by S3-style signing backends.
//!
//! The client never plans parts itself; it uploads whatever the backend
//! returned. This planner backs [`MemoryStorage`](crate::MemoryStorage) and
//! documents the shape of plans a real backend produces.

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Splits a file size into part sizes under multipart-upload limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlanner {
    /// Requested size of every part but the last
    pub part_size: u64,
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_parts: u64,
}

impl Default for PartPlanner {
    fn default() -> Self {
        Self {
            part_size: 64 * MIB,
            min_part_size: 5 * MIB,
            max_part_size: 5 * GIB,
            max_parts: 10_000,
        }
    }
}

impl PartPlanner {
    pub fn new(part_size: u64) -> Self {
        Self {
            part_size,
            ..Self::default()
        }
    }

    /// A planner without store limits, for small test files
    pub fn unconstrained(part_size: u64) -> Self {
        Self {
            part_size: part_size.max(1),
            min_part_size: 1,
            max_part_size: u64::MAX,
            max_parts: u64::MAX,
        }
    }

    /// Effective size of the leading parts for a file of `file_size` bytes
    pub fn effective_part_size(&self, file_size: u64) -> u64 {
        let clamped = self
            .part_size
            .max(self.min_part_size)
            .min(self.max_part_size);
        clamped
            .max(file_size.div_ceil(self.max_parts.max(1)))
            .max(1)
    }

    /// `(part_number, size)` pairs; an empty file has no parts
    pub fn plan(&self, file_size: u64) -> Vec<(u32, u64)> {
        let part_size = self.effective_part_size(file_size);
        let full_parts = file_size / part_size;
        let remainder = file_size % part_size;

        let mut sizes: Vec<u64> = (0..full_parts).map(|_| part_size).collect();
        if remainder > 0 {
            sizes.push(remainder);
        }
        sizes
            .into_iter()
            .enumerate()
            .map(|(i, size)| (i as u32 + 1, size))
            .collect()
    }
}
