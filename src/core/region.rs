//! Memory-Mapped Region untuk local slice dari global heap.
//!
//! Setiap core memiliki satu region anonim yang di-mmap saat startup;
//! semua global allocation yang "homed" di core ini hidup di dalamnya.
//! Akses remote hanya lewat message — region tidak pernah dishare
//! antar thread.

use std::io;

use memmap2::MmapMut;

/// Anonymous mmap region, base untuk resolving 44-bit heap offsets.
pub struct MemoryRegion {
    map: MmapMut,
    len: usize,
}

impl MemoryRegion {
    /// Map region anonim sebesar `len` bytes, zero-filled oleh kernel.
    pub fn new(len: usize) -> io::Result<Self> {
        assert!(len > 0, "region must be non-empty");
        let map = MmapMut::map_anon(len)?;
        Ok(Self { map, len })
    }

    /// Ukuran region dalam bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer untuk dispatch: target address = base + 44-bit offset.
    #[inline(always)]
    pub fn base_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    /// Menulis satu value bertipe `T` pada byte offset `off`.
    ///
    /// # Panics
    /// Panic jika `off + size_of::<T>()` melewati akhir region.
    #[inline(always)]
    pub fn write_at<T: Copy>(&mut self, off: usize, value: T) {
        assert!(off + std::mem::size_of::<T>() <= self.len);
        // SAFETY: bounds sudah dicek; alignment dijamin oleh allocator
        // (offset selalu aligned ke rounded allocation size).
        unsafe {
            (self.map.as_mut_ptr().add(off) as *mut T).write(value);
        }
    }

    /// Membaca satu value bertipe `T` dari byte offset `off`.
    ///
    /// # Panics
    /// Panic jika `off + size_of::<T>()` melewati akhir region.
    #[inline(always)]
    pub fn read_at<T: Copy>(&self, off: usize) -> T {
        assert!(off + std::mem::size_of::<T>() <= self.len);
        // SAFETY: bounds sudah dicek; region zero-initialized oleh kernel,
        // jadi setiap bit pattern yang dibaca berasal dari write_at atau nol.
        unsafe { (self.map.as_ptr().add(off) as *const T).read() }
    }
}
