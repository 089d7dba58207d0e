//! Guard-page protected, grow-only element buffers.
//!
//! A [`GuardedBuffer`] hands out exactly the requested number of elements and
//! places the end of that region flush against an inaccessible guard span, so
//! the first element written past the end faults instead of corrupting memory.
//!
//! Layout of one reservation:
//!
//! ```text
//! base                                   guard            base + reserved
//! |<----- committed (64 KiB multiple) ---->|<----- 256 KiB ----->|
//!                    |<-- requested n -->|
//!                    ^ returned slice
//! ```
//!
//! Reservations only grow. A request that fits the current capacity reuses the
//! mapping, and since the slice is anchored at the guard, the same `n` always
//! yields the same address.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr::NonNull;

use thiserror::Error;

/// Commit granularity in bytes.
pub const ALLOCATION_GRANULARITY: usize = 64 * 1024;

/// Size of the no-access span following every committed region.
pub const GUARD_SPAN: usize = 256 * 1024;

/// Smallest value of the fill pattern.
pub const FILL_MIN: i32 = -23;

/// Largest value of the fill pattern.
pub const FILL_MAX: i32 = 23;

const FILL_PERIOD: usize = (FILL_MAX - FILL_MIN + 1) as usize;

/// Fill pattern value at element `offset` of a returned region.
#[inline]
pub fn fill_value(offset: usize) -> i32 {
    FILL_MIN + (offset % FILL_PERIOD) as i32
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("request for {elements} elements overflows the address space")]
    SizeOverflow { elements: usize },
    #[error("failed to reserve {bytes} bytes of address space: {source}")]
    Reserve {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to commit {bytes} bytes read/write: {source}")]
    Commit {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("guard redzone overwritten {offset} bytes past the usable region")]
    RedzoneCorrupted { offset: usize },
}

/// Element types a [`GuardedBuffer`] can hold.
pub trait GuardElement: Copy + 'static {
    fn from_fill(value: i32) -> Self;
}

impl GuardElement for f32 {
    #[inline]
    fn from_fill(value: i32) -> Self {
        value as f32
    }
}

impl GuardElement for f64 {
    #[inline]
    fn from_fill(value: i32) -> Self {
        value as f64
    }
}

/// Reserve / commit / release capability behind a [`GuardedBuffer`].
///
/// `reserve` returns a range with no access rights. `commit` grants
/// read/write on the first `committed` bytes and must leave the rest of the
/// range unusable.
pub trait VirtualMemory {
    fn reserve(bytes: usize) -> Result<NonNull<u8>, GuardError>;

    /// # Safety
    /// `base` must come from [`VirtualMemory::reserve`] with `reserved` bytes,
    /// and `committed <= reserved`.
    unsafe fn commit(base: NonNull<u8>, committed: usize, reserved: usize) -> Result<(), GuardError>;

    /// # Safety
    /// `base`/`reserved` must describe a live reservation; it is invalid afterwards.
    unsafe fn release(base: NonNull<u8>, reserved: usize);

    /// Verify the guard span is intact. Hardware guards cannot be written, so
    /// the default has nothing to check.
    ///
    /// # Safety
    /// Same contract as [`VirtualMemory::commit`].
    unsafe fn check_guard(
        _base: NonNull<u8>,
        _committed: usize,
        _reserved: usize,
    ) -> Result<(), GuardError> {
        Ok(())
    }
}

/// Anonymous private mappings: `mmap(PROT_NONE)`, then `mprotect` of the
/// committed prefix to read/write.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PageMapping;

#[cfg(unix)]
impl VirtualMemory for PageMapping {
    fn reserve(bytes: usize) -> Result<NonNull<u8>, GuardError> {
        // SAFETY: anonymous mapping, no fd; MAP_FAILED is checked below.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(GuardError::Reserve {
                bytes,
                source: std::io::Error::last_os_error(),
            });
        }
        NonNull::new(ptr as *mut u8).ok_or_else(|| GuardError::Reserve {
            bytes,
            source: std::io::Error::other("mmap returned null"),
        })
    }

    unsafe fn commit(base: NonNull<u8>, committed: usize, _reserved: usize) -> Result<(), GuardError> {
        let ret = libc::mprotect(
            base.as_ptr() as *mut libc::c_void,
            committed,
            libc::PROT_READ | libc::PROT_WRITE,
        );
        if ret != 0 {
            return Err(GuardError::Commit {
                bytes: committed,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    unsafe fn release(base: NonNull<u8>, reserved: usize) {
        libc::munmap(base.as_ptr() as *mut libc::c_void, reserved);
    }
}

/// Heap-backed fallback for targets without page protection.
///
/// The guard span is filled with a canary byte at commit time and verified on
/// every request and on release. Overruns are detected after the fact rather
/// than trapped, and reads past the end go unnoticed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedzoneHeap;

const REDZONE_CANARY: u8 = 0xA5;
const REDZONE_ALIGN: usize = 64;

impl RedzoneHeap {
    fn layout(bytes: usize) -> Result<std::alloc::Layout, GuardError> {
        std::alloc::Layout::from_size_align(bytes, REDZONE_ALIGN)
            .map_err(|_| GuardError::SizeOverflow { elements: bytes })
    }
}

impl VirtualMemory for RedzoneHeap {
    fn reserve(bytes: usize) -> Result<NonNull<u8>, GuardError> {
        let layout = Self::layout(bytes)?;
        // SAFETY: GUARD_SPAN keeps every reservation non-zero sized.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| GuardError::Reserve {
            bytes,
            source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        })
    }

    unsafe fn commit(base: NonNull<u8>, committed: usize, reserved: usize) -> Result<(), GuardError> {
        std::ptr::write_bytes(base.as_ptr().add(committed), REDZONE_CANARY, reserved - committed);
        Ok(())
    }

    unsafe fn release(base: NonNull<u8>, reserved: usize) {
        if let Ok(layout) = Self::layout(reserved) {
            std::alloc::dealloc(base.as_ptr(), layout);
        }
    }

    unsafe fn check_guard(base: NonNull<u8>, committed: usize, reserved: usize) -> Result<(), GuardError> {
        let redzone = std::slice::from_raw_parts(base.as_ptr().add(committed), reserved - committed);
        match redzone.iter().position(|&b| b != REDZONE_CANARY) {
            Some(offset) => Err(GuardError::RedzoneCorrupted { offset }),
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
pub type PlatformMemory = PageMapping;

#[cfg(not(unix))]
pub type PlatformMemory = RedzoneHeap;

#[derive(Debug, Clone, Copy)]
struct Reservation {
    base: NonNull<u8>,
    committed: usize,
    reserved: usize,
}

/// Grow-only buffer whose returned slice ends exactly at a guard span.
///
/// Every request refills the returned region with [`fill_value`], so data from
/// a previous, differently shaped request is never visible.
pub struct GuardedBuffer<T: GuardElement = f32, M: VirtualMemory = PlatformMemory> {
    reservation: Option<Reservation>,
    _marker: PhantomData<(T, M)>,
}

impl<T: GuardElement, M: VirtualMemory> GuardedBuffer<T, M> {
    pub const fn new() -> Self {
        Self {
            reservation: None,
            _marker: PhantomData,
        }
    }

    /// Elements available without remapping.
    pub fn capacity(&self) -> usize {
        self.reservation
            .map_or(0, |r| r.committed / size_of::<T>())
    }

    /// Start of the current reservation, if any.
    pub fn reservation_base(&self) -> Option<NonNull<u8>> {
        self.reservation.map(|r| r.base)
    }

    /// Storage for exactly `elements` values, filled with the cyclic pattern.
    ///
    /// The slice always ends at the guard, so its start address is stable only
    /// for a repeated `elements`; a smaller request within capacity reuses the
    /// mapping but starts at a higher address.
    pub fn try_request(&mut self, elements: usize) -> Result<&mut [T], GuardError> {
        if elements == 0 {
            return Ok(&mut []);
        }

        if let Some(current) = self.reservation {
            // SAFETY: `current` is the live reservation owned by this buffer.
            if let Err(err) = unsafe { M::check_guard(current.base, current.committed, current.reserved) } {
                self.discard();
                return Err(err);
            }
        }

        let fits = |r: &Reservation| elements <= r.committed / size_of::<T>();
        let reservation = match self.reservation.filter(fits) {
            Some(current) => current,
            None => {
                self.discard();
                let fresh = Self::map(elements)?;
                self.reservation = Some(fresh);
                fresh
            }
        };

        // SAFETY: the committed prefix is read/write, `elements` fits inside it,
        // and the guard address is aligned for T (committed is a multiple of
        // ALLOCATION_GRANULARITY and base is at least 64-byte aligned).
        let region = unsafe {
            let guard = reservation.base.as_ptr().add(reservation.committed) as *mut T;
            std::slice::from_raw_parts_mut(guard.sub(elements), elements)
        };
        for (offset, value) in region.iter_mut().enumerate() {
            *value = T::from_fill(fill_value(offset));
        }
        Ok(region)
    }

    /// Like [`GuardedBuffer::try_request`], but a failure aborts the process.
    pub fn request(&mut self, elements: usize) -> &mut [T] {
        match self.try_request(elements) {
            Ok(region) => region,
            Err(err) => {
                log::error!("guarded buffer request for {elements} elements failed: {err}");
                std::process::abort();
            }
        }
    }

    /// Unmap the whole reservation. Reports a damaged redzone, if the backing
    /// memory can detect one.
    pub fn release(&mut self) -> Result<(), GuardError> {
        let Some(current) = self.reservation.take() else {
            return Ok(());
        };
        // SAFETY: `current` was the live reservation; it is dropped right after.
        unsafe {
            let checked = M::check_guard(current.base, current.committed, current.reserved);
            M::release(current.base, current.reserved);
            checked
        }
    }

    fn map(elements: usize) -> Result<Reservation, GuardError> {
        let overflow = GuardError::SizeOverflow { elements };
        let committed = elements
            .checked_mul(size_of::<T>())
            .and_then(|bytes| bytes.checked_next_multiple_of(ALLOCATION_GRANULARITY));
        let Some(committed) = committed else {
            return Err(overflow);
        };
        let Some(reserved) = committed.checked_add(GUARD_SPAN) else {
            return Err(overflow);
        };

        let base = M::reserve(reserved)?;
        // SAFETY: `base` was just reserved with `reserved` bytes.
        if let Err(err) = unsafe { M::commit(base, committed, reserved) } {
            unsafe { M::release(base, reserved) };
            return Err(err);
        }
        log::debug!(
            "guarded buffer mapped: {} elements ({committed} bytes + {GUARD_SPAN} guard)",
            committed / size_of::<T>()
        );
        Ok(Reservation {
            base,
            committed,
            reserved,
        })
    }

    fn discard(&mut self) {
        if let Some(current) = self.reservation.take() {
            // SAFETY: `current` was the live reservation.
            unsafe { M::release(current.base, current.reserved) };
        }
    }
}

impl<T: GuardElement, M: VirtualMemory> Default for GuardedBuffer<T, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GuardElement, M: VirtualMemory> Drop for GuardedBuffer<T, M> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("guarded buffer overrun detected on release: {err}");
            std::process::abort();
        }
    }
}

impl<T: GuardElement, M: VirtualMemory> std::fmt::Debug for GuardedBuffer<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedBuffer")
            .field("capacity", &self.capacity())
            .field("base", &self.reservation_base())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_value_cycles() {
        assert_eq!(fill_value(0), -23);
        assert_eq!(fill_value(23), 0);
        assert_eq!(fill_value(46), 23);
        assert_eq!(fill_value(47), -23);
        assert_eq!(fill_value(47 * 1000 + 5), -18);
    }

    #[test]
    fn test_zero_request_maps_nothing() {
        let mut buf = GuardedBuffer::<f32>::new();
        assert!(buf.request(0).is_empty());
        assert_eq!(buf.capacity(), 0);
        assert!(buf.reservation_base().is_none());
    }

    #[test]
    fn test_capacity_rounds_to_granularity() {
        let mut buf = GuardedBuffer::<f32>::new();
        assert_eq!(buf.request(1).len(), 1);
        assert_eq!(buf.capacity(), ALLOCATION_GRANULARITY / 4);

        let mut wide = GuardedBuffer::<f64>::new();
        wide.request(ALLOCATION_GRANULARITY / 8 + 1);
        assert_eq!(wide.capacity(), 2 * ALLOCATION_GRANULARITY / 8);
    }

    #[test]
    fn test_region_ends_at_guard() {
        let mut buf = GuardedBuffer::<f32>::new();
        let end = {
            let region = buf.request(1000);
            region.as_ptr_range().end as usize
        };
        let base = buf.reservation_base().map(|b| b.as_ptr() as usize);
        assert_eq!(Some(end), base.map(|b| b + buf.capacity() * 4));
    }

    #[test]
    fn test_same_size_same_address() {
        let mut buf = GuardedBuffer::<f32>::new();
        let first = buf.request(777).as_ptr();
        let second = buf.request(777).as_ptr();
        assert_eq!(first, second);
    }

    #[test]
    fn test_smaller_request_moves_start_not_end() {
        let mut buf = GuardedBuffer::<f32>::new();
        let (start_large, end_large) = {
            let r = buf.request(100).as_ptr_range();
            (r.start as usize, r.end as usize)
        };
        let (start_small, end_small) = {
            let r = buf.request(40).as_ptr_range();
            (r.start as usize, r.end as usize)
        };
        assert_eq!(end_small, end_large);
        assert_eq!(start_small, start_large + 60 * 4);
    }

    #[test]
    fn test_reuse_within_capacity_and_growth() {
        let mut buf = GuardedBuffer::<f32>::new();
        buf.request(10);
        let base = buf.reservation_base();
        let capacity = buf.capacity();

        buf.request(capacity);
        buf.request(3);
        assert_eq!(buf.reservation_base(), base);
        assert_eq!(buf.capacity(), capacity);

        buf.request(capacity + 1);
        assert_eq!(buf.capacity(), 2 * capacity);

        // never shrinks
        buf.request(1);
        assert_eq!(buf.capacity(), 2 * capacity);
    }

    #[test]
    fn test_request_refills_pattern() {
        let mut buf = GuardedBuffer::<f32>::new();
        buf.request(100).fill(0.0);
        let region = buf.request(60);
        let expected: Vec<f32> = (0..60).map(|i| fill_value(i) as f32).collect();
        assert_eq!(region, expected.as_slice());
        assert_eq!(region[47], -23.0);
    }

    #[test]
    fn test_release_then_request_remaps() {
        let mut buf = GuardedBuffer::<f64>::new();
        buf.request(5)[4] = 1.5;
        buf.release().unwrap();
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.request(5)[4], fill_value(4) as f64);
    }

    #[test]
    fn test_redzone_detects_overrun() {
        let mut buf = GuardedBuffer::<f32, RedzoneHeap>::new();
        buf.request(10);
        let base = buf.reservation_base().unwrap();
        // The redzone is part of the heap allocation: in bounds of the
        // reservation, one byte past the requested region.
        unsafe { base.as_ptr().add(buf.capacity() * 4).write(0) };

        match buf.try_request(10) {
            Err(GuardError::RedzoneCorrupted { offset }) => assert_eq!(offset, 0),
            other => panic!("expected redzone corruption, got {other:?}"),
        }
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.request(4).len(), 4);
    }

    #[test]
    fn test_redzone_clean_release() {
        let mut buf = GuardedBuffer::<f32, RedzoneHeap>::new();
        buf.request(1 << 16).fill(3.0);
        assert!(buf.release().is_ok());
    }
}
