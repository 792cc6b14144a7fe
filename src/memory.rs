//! # Kernel Heap
//!
//! A fixed `HEAP_SIZE` byte arena from which task stacks, the idle stack and
//! channel buffers are carved. There is no global allocator: the arena lives
//! inside the scheduler, and each allocation is handed out as an owned
//! [`Region`] that must be given back to [`Heap::free`].
//!
//! Allocation is first-fit over the gaps between live regions, which are kept
//! sorted by offset. Freed space merges with its neighbours implicitly since
//! only live regions are tracked.

use heapless::Vec;

use crate::config::{HEAP_ALIGN, HEAP_SIZE, MAX_REGIONS};
use crate::error::{KernelError, Resource};

/// Backing storage, aligned so that every region start is 8-byte aligned.
#[repr(C, align(8))]
struct Arena([u8; HEAP_SIZE]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    offset: usize,
    len: usize,
}

impl Span {
    const fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Exclusive handle to a block of heap memory.
///
/// Not `Clone`: a region has exactly one owner (a task's stack, a channel's
/// buffer) until it is freed.
#[derive(Debug, PartialEq, Eq)]
pub struct Region {
    offset: usize,
    len: usize,
}

impl Region {
    /// Usable size in bytes (the requested size rounded up to `HEAP_ALIGN`).
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// First-fit allocator over a fixed `HEAP_SIZE` arena.
pub struct Heap {
    arena: Arena,
    /// Live regions, sorted by offset.
    used: Vec<Span, MAX_REGIONS>,
    free_bytes: usize,
    min_free_bytes: usize,
}

impl Heap {
    pub const fn new() -> Self {
        Self {
            arena: Arena([0; HEAP_SIZE]),
            used: Vec::new(),
            free_bytes: HEAP_SIZE,
            min_free_bytes: HEAP_SIZE,
        }
    }

    /// Carve out `size` bytes (rounded up to `HEAP_ALIGN`).
    pub fn alloc(&mut self, size: usize) -> Result<Region, KernelError> {
        if size == 0 {
            return Err(KernelError::InvalidParameter("zero-sized allocation"));
        }
        let len = size
            .checked_add(HEAP_ALIGN - 1)
            .map(|s| s & !(HEAP_ALIGN - 1))
            .ok_or(KernelError::ResourceExhausted(Resource::Memory))?;

        let mut cursor = 0;
        let mut slot = None;
        for (i, span) in self.used.iter().enumerate() {
            if span.offset - cursor >= len {
                slot = Some(i);
                break;
            }
            cursor = span.end();
        }
        let index = match slot {
            Some(i) => i,
            None if HEAP_SIZE - cursor >= len => self.used.len(),
            None => return Err(KernelError::ResourceExhausted(Resource::Memory)),
        };

        self.used
            .insert(index, Span { offset: cursor, len })
            .map_err(|_| KernelError::ResourceExhausted(Resource::Regions))?;

        self.free_bytes -= len;
        self.min_free_bytes = self.min_free_bytes.min(self.free_bytes);
        self.bytes_mut(&Region { offset: cursor, len }).fill(0);
        Ok(Region { offset: cursor, len })
    }

    /// Return a region to the heap.
    pub fn free(&mut self, region: Region) {
        if let Ok(i) = self.used.binary_search_by_key(&region.offset, |s| s.offset) {
            self.used.remove(i);
            self.free_bytes += region.len;
        }
    }

    /// The bytes behind `region`.
    pub fn bytes(&self, region: &Region) -> &[u8] {
        &self.arena.0[region.offset..region.offset + region.len]
    }

    pub fn bytes_mut(&mut self, region: &Region) -> &mut [u8] {
        &mut self.arena.0[region.offset..region.offset + region.len]
    }

    /// Bytes not currently allocated (possibly fragmented).
    pub const fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Lowest value `free_bytes` has ever had.
    pub const fn min_free_bytes(&self) -> usize {
        self.min_free_bytes
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_rounds_and_aligns() {
        let mut heap = Heap::new();
        let a = heap.alloc(5).unwrap();
        let b = heap.alloc(9).unwrap();
        assert_eq!(a.len(), 8);
        assert_eq!(b.len(), 16);
        assert_eq!(heap.free_bytes(), HEAP_SIZE - 24);

        let base = heap.bytes(&a).as_ptr() as usize;
        assert_eq!(base % HEAP_ALIGN, 0);
        assert_eq!(heap.bytes(&b).as_ptr() as usize, base + 8);
    }

    #[test]
    fn test_freed_gap_is_reused_first_fit() {
        let mut heap = Heap::new();
        let a = heap.alloc(64).unwrap();
        let b = heap.alloc(64).unwrap();
        let c = heap.alloc(64).unwrap();
        let b_addr = heap.bytes(&b).as_ptr() as usize;

        heap.free(b);
        let d = heap.alloc(32).unwrap();
        assert_eq!(heap.bytes(&d).as_ptr() as usize, b_addr);

        heap.free(a);
        heap.free(c);
        heap.free(d);
        assert_eq!(heap.free_bytes(), HEAP_SIZE);
        assert_eq!(heap.min_free_bytes(), HEAP_SIZE - 192);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut heap = Heap::new();
        let all = heap.alloc(HEAP_SIZE).unwrap();
        assert_eq!(
            heap.alloc(8),
            Err(KernelError::ResourceExhausted(Resource::Memory))
        );
        heap.free(all);
        assert!(heap.alloc(HEAP_SIZE + 1).is_err());
        assert!(matches!(heap.alloc(0), Err(KernelError::InvalidParameter(_))));
    }

    #[test]
    fn test_allocation_is_zeroed() {
        let mut heap = Heap::new();
        let a = heap.alloc(16).unwrap();
        heap.bytes_mut(&a).fill(0xAA);
        heap.free(a);
        let b = heap.alloc(16).unwrap();
        assert!(heap.bytes(&b).iter().all(|&x| x == 0));
    }
}
