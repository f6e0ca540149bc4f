//! Buddy Allocator untuk global heap.
//!
//! Power-of-two buddy allocator di atas satu contiguous address range.
//! Setiap chunk punya sibling unik (offset XOR size); pada free, sibling
//! yang sama-sama kosong langsung di-merge secara rekursif, jadi free-list
//! distribution tidak degenerate setelah churn.
//!
//! Tidak thread-safe: satu instance dimiliki oleh satu core thread.
//! Core lain harus mengirim message ke owning core, bukan menyentuh
//! allocator langsung.

use std::collections::BTreeMap;

use tracing::{error, trace};

use crate::error::{Result, RuntimeError};

/// Satu region yang dikelola allocator. Size selalu power of two.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    size: u64,
    in_use: bool,
}

/// Snapshot dari state allocator, untuk metrics dan test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Number of chunks currently tracked (free and in use).
    pub chunks: usize,
    /// Sum of all chunk sizes; equals the initial region size.
    pub bytes_total: u64,
    /// Bytes held by in-use chunks.
    pub bytes_in_use: u64,
    /// Bytes held by free chunks.
    pub bytes_free: u64,
}

/// Buddy allocator di atas range `[0, size)`.
///
/// Offsets yang dikembalikan relative terhadap base milik caller;
/// allocator sendiri tidak pernah menyentuh memory.
pub struct BuddyAllocator {
    /// Semua chunk, keyed by offset. Ordered supaya lookup by address O(log n).
    chunks: BTreeMap<u64, Chunk>,
    /// Free chunks per size class. Size class kosong langsung di-remove,
    /// jadi "smallest class >= request" cukup satu range query.
    free_lists: BTreeMap<u64, Vec<u64>>,
    size: u64,
}

impl BuddyAllocator {
    /// Membuat allocator untuk region sebesar `size` bytes.
    ///
    /// Region yang bukan power of two di-decompose jadi deretan chunk
    /// power-of-two menurun (ambil bit tertinggi berulang kali sampai
    /// habis). Chunk di tepi region bisa tidak punya buddy; merge pada
    /// chunk itu berhenti dengan sendirinya.
    ///
    /// # Panics
    /// Panic jika `size == 0`.
    pub fn new(size: u64) -> Self {
        assert!(size > 0, "allocator must manage a non-empty region");

        let mut allocator = Self {
            chunks: BTreeMap::new(),
            free_lists: BTreeMap::new(),
            size,
        };

        let mut offset = 0u64;
        let mut remaining = size;
        while remaining > 0 {
            let chunk_size = prev_power_of_two(remaining);
            allocator.chunks.insert(
                offset,
                Chunk {
                    size: chunk_size,
                    in_use: false,
                },
            );
            allocator.push_free(chunk_size, offset);
            trace!(offset, chunk_size, "initial chunk");
            offset += chunk_size;
            remaining -= chunk_size;
        }

        allocator
    }

    /// Allocate `bytes`, dibulatkan ke power of two berikutnya.
    ///
    /// Returns offset dari chunk yang dialokasikan. Offset selalu aligned
    /// ke rounded size. Request nol diperlakukan sebagai satu byte.
    pub fn malloc(&mut self, bytes: usize) -> Result<u64> {
        let rounded = next_power_of_two(bytes as u64);

        // Cari size class terkecil yang >= rounded dan masih punya chunk.
        let class = match self.free_lists.range(rounded..).next() {
            Some((&class, _)) => class,
            None => {
                error!(
                    requested = bytes,
                    rounded, "out of memory in the global heap"
                );
                return Err(RuntimeError::OutOfMemory { requested: bytes });
            }
        };

        let offset = match self.pop_free(class) {
            Some(offset) => offset,
            // Invariant: empty classes are removed, so the range hit
            // a non-empty list. Treat a miss as exhaustion anyway.
            None => return Err(RuntimeError::OutOfMemory { requested: bytes }),
        };

        // Subdivide: simpan separuh bawah, separuh atas jadi chunk free baru.
        let mut chunk_size = class;
        while chunk_size > rounded {
            chunk_size /= 2;
            let upper = offset + chunk_size;
            self.chunks.insert(
                upper,
                Chunk {
                    size: chunk_size,
                    in_use: false,
                },
            );
            self.push_free(chunk_size, upper);
            if let Some(chunk) = self.chunks.get_mut(&offset) {
                chunk.size = chunk_size;
            }
            trace!(offset, chunk_size, "split chunk");
        }

        if let Some(chunk) = self.chunks.get_mut(&offset) {
            chunk.in_use = true;
        }
        Ok(offset)
    }

    /// Free chunk yang sebelumnya dikembalikan oleh [`malloc`](Self::malloc).
    ///
    /// Offset yang tidak dikenal atau sudah free adalah programming bug
    /// dan menghasilkan [`RuntimeError::InvalidFree`].
    pub fn free(&mut self, offset: u64) -> Result<()> {
        let size = match self.chunks.get_mut(&offset) {
            Some(chunk) if chunk.in_use => {
                chunk.in_use = false;
                chunk.size
            }
            _ => {
                error!(offset, "invalid free");
                return Err(RuntimeError::InvalidFree { offset });
            }
        };

        self.push_free(size, offset);
        self.try_merge(offset);
        Ok(())
    }

    /// Snapshot state untuk metrics.
    pub fn stats(&self) -> AllocatorStats {
        let mut bytes_in_use = 0;
        let mut bytes_free = 0;
        for chunk in self.chunks.values() {
            if chunk.in_use {
                bytes_in_use += chunk.size;
            } else {
                bytes_free += chunk.size;
            }
        }
        AllocatorStats {
            chunks: self.chunks.len(),
            bytes_total: bytes_in_use + bytes_free,
            bytes_in_use,
            bytes_free,
        }
    }

    /// Total region size yang dikelola.
    #[inline(always)]
    pub fn region_size(&self) -> u64 {
        self.size
    }

    /// Merge chunk free dengan buddy-nya selama keduanya free dan sama
    /// besar. Buddy = offset XOR size. Chunk tepi region (buddy di luar
    /// range, atau terpecah beda ukuran) menghentikan loop.
    fn try_merge(&mut self, mut offset: u64) {
        loop {
            let size = match self.chunks.get(&offset) {
                Some(chunk) => chunk.size,
                None => return,
            };
            let buddy = offset ^ size;

            match self.chunks.get(&buddy) {
                Some(b) if b.size == size && !b.in_use => {
                    let lower = offset.min(buddy);
                    let higher = offset.max(buddy);

                    // Chunk beralamat tinggi hilang; yang rendah digandakan
                    // ukurannya dan pindah size class.
                    self.unlink_free(size, higher);
                    self.chunks.remove(&higher);

                    self.unlink_free(size, lower);
                    if let Some(chunk) = self.chunks.get_mut(&lower) {
                        chunk.size = size * 2;
                    }
                    self.push_free(size * 2, lower);
                    trace!(lower, merged_size = size * 2, "merged buddies");

                    offset = lower;
                }
                _ => return,
            }
        }
    }

    #[inline(always)]
    fn push_free(&mut self, size: u64, offset: u64) {
        self.free_lists.entry(size).or_default().push(offset);
    }

    fn pop_free(&mut self, size: u64) -> Option<u64> {
        let list = self.free_lists.get_mut(&size)?;
        let offset = list.pop()?;
        if list.is_empty() {
            self.free_lists.remove(&size);
        }
        Some(offset)
    }

    fn unlink_free(&mut self, size: u64, offset: u64) {
        if let Some(list) = self.free_lists.get_mut(&size) {
            if let Some(at) = list.iter().position(|&o| o == offset) {
                list.swap_remove(at);
            }
            if list.is_empty() {
                self.free_lists.remove(&size);
            }
        }
    }
}

/// Next power of two, dengan `next_power_of_two(0) == 1`.
#[inline(always)]
fn next_power_of_two(v: u64) -> u64 {
    v.max(1).next_power_of_two()
}

/// Largest power of two `<= v`. Caller menjamin `v > 0`.
#[inline(always)]
fn prev_power_of_two(v: u64) -> u64 {
    debug_assert!(v > 0);
    1 << (63 - v.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects (offset, size, in_use) triples for structural comparison.
    fn layout(a: &BuddyAllocator) -> Vec<(u64, u64, bool)> {
        a.chunks
            .iter()
            .map(|(&off, c)| (off, c.size, c.in_use))
            .collect()
    }

    /// No two free chunks of equal size may differ only in bit log2(size).
    fn assert_no_free_siblings(a: &BuddyAllocator) {
        for (&off, chunk) in &a.chunks {
            if chunk.in_use {
                continue;
            }
            let buddy = off ^ chunk.size;
            if let Some(b) = a.chunks.get(&buddy) {
                assert!(
                    b.in_use || b.size != chunk.size,
                    "free siblings at {:#x}/{:#x} size {}",
                    off,
                    buddy,
                    chunk.size
                );
            }
        }
    }

    #[test]
    fn test_non_power_of_two_decomposition() {
        // Region of 12 bytes splits into {0, 8} and {8, 4}.
        let a = BuddyAllocator::new(12);
        assert_eq!(layout(&a), vec![(0, 8, false), (8, 4, false)]);
        assert_eq!(a.stats().bytes_total, 12);
    }

    #[test]
    fn test_malloc_prefers_exact_size_class() {
        let mut a = BuddyAllocator::new(12);

        // malloc(3) rounds to 4; the lower-bound query lands on the exact
        // size-4 class (the edge chunk at offset 8), leaving the 8 intact.
        let off = a.malloc(3).unwrap();
        assert_eq!(off, 8);
        assert_eq!(a.stats().bytes_in_use, 4);
        assert_eq!(a.stats().bytes_total, 12);
        assert_no_free_siblings(&a);
    }

    #[test]
    fn test_malloc_splits_larger_chunk() {
        let mut a = BuddyAllocator::new(16);

        // malloc(3) rounds to 4: the 16 splits into 8 + 8, then 4 + 4,
        // and the lower half is returned each time.
        let off = a.malloc(3).unwrap();
        assert_eq!(off, 0);
        assert_eq!(
            layout(&a),
            vec![(0, 4, true), (4, 4, false), (8, 8, false)]
        );
        assert_no_free_siblings(&a);
    }

    #[test]
    fn test_buddy_coalesce_restores_initial_state() {
        let mut a = BuddyAllocator::new(12);
        let initial = layout(&a);

        let x = a.malloc(3).unwrap();
        let y = a.malloc(4).unwrap();
        a.free(y).unwrap();
        a.free(x).unwrap();

        assert_eq!(layout(&a), initial);
        assert_no_free_siblings(&a);
    }

    #[test]
    fn test_recursive_merge() {
        let mut a = BuddyAllocator::new(32);
        let offs: Vec<u64> = (0..4).map(|_| a.malloc(8).unwrap()).collect();
        assert_eq!(a.stats().bytes_in_use, 32);

        // Freeing in an order that forces the final free to cascade all
        // the way back up to a single 32-byte chunk.
        for &off in &[offs[1], offs[3], offs[2], offs[0]] {
            a.free(off).unwrap();
        }
        assert_eq!(layout(&a), vec![(0, 32, false)]);
    }

    #[test]
    fn test_out_of_memory() {
        let mut a = BuddyAllocator::new(16);
        let off = a.malloc(16).unwrap();
        assert_eq!(off, 0);

        // Everything is taken; even one byte has to fail.
        match a.malloc(1) {
            Err(RuntimeError::OutOfMemory { requested }) => assert_eq!(requested, 1),
            other => panic!("expected OutOfMemory, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_oversized_request_fails() {
        // Largest initial chunk is 8; a 16-byte request cannot be satisfied
        // by stitching non-buddy regions together.
        let mut a = BuddyAllocator::new(12);
        assert!(matches!(
            a.malloc(16),
            Err(RuntimeError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_invalid_free_and_double_free() {
        let mut a = BuddyAllocator::new(64);
        assert!(matches!(
            a.free(8),
            Err(RuntimeError::InvalidFree { offset: 8 })
        ));

        let off = a.malloc(8).unwrap();
        a.free(off).unwrap();
        assert!(matches!(a.free(off), Err(RuntimeError::InvalidFree { .. })));
    }

    #[test]
    fn test_alignment() {
        let mut a = BuddyAllocator::new(1 << 16);
        for bytes in [1usize, 3, 7, 12, 100, 900, 4097] {
            let rounded = (bytes as u64).next_power_of_two();
            let off = a.malloc(bytes).unwrap();
            assert_eq!(off % rounded, 0, "malloc({}) returned {:#x}", bytes, off);
        }
    }

    #[test]
    fn test_conservation_under_churn() {
        let mut a = BuddyAllocator::new(1 << 12);
        let initial = layout(&a);
        let total = a.stats().bytes_total;

        // Deterministic interleaving of allocs and frees.
        let mut live: Vec<u64> = Vec::new();
        let mut seed = 0x9e3779b97f4a7c15u64;
        for _ in 0..400 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            if seed % 3 != 0 || live.is_empty() {
                let bytes = 1 + (seed % 256) as usize;
                if let Ok(off) = a.malloc(bytes) {
                    live.push(off);
                }
            } else {
                let at = (seed as usize / 7) % live.len();
                let off = live.swap_remove(at);
                a.free(off).unwrap();
            }

            let stats = a.stats();
            assert_eq!(stats.bytes_in_use + stats.bytes_free, total);
            assert_eq!(stats.bytes_total, total);
            assert_no_free_siblings(&a);
        }

        // Releasing everything returns the allocator to its canonical state.
        for off in live.drain(..) {
            a.free(off).unwrap();
        }
        assert_eq!(layout(&a), initial);
    }

    #[test]
    fn test_doubling_request_doubles_rounded_size() {
        let mut a = BuddyAllocator::new(64);
        let n = 15usize;

        // malloc(n + 1) fits in a 16-byte class; malloc(2n + 1) needs 32.
        let small = a.malloc(n + 1).unwrap();
        let big = a.malloc(2 * n + 1).unwrap();
        assert_eq!(a.stats().bytes_in_use, 16 + 32);
        a.free(small).unwrap();
        a.free(big).unwrap();
    }

    #[test]
    fn test_edge_chunk_has_no_buddy() {
        // Region 12: the trailing 4-chunk's buddy offset (8 ^ 4 = 12) lies
        // outside the region, so freeing it must terminate without merging.
        let mut a = BuddyAllocator::new(12);
        let off = a.malloc(4).unwrap();
        assert_eq!(off, 8);
        a.free(off).unwrap();
        assert_eq!(a.stats().chunks, 2);
    }

    #[test]
    fn test_next_power_of_two_of_zero() {
        assert_eq!(next_power_of_two(0), 1);
        assert_eq!(next_power_of_two(1), 1);
        assert_eq!(next_power_of_two(3), 4);
    }
}
