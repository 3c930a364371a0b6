//! Physical Memory and Swap Devices
//!
//! The memory manager talks to two collaborators: the RAM pool that
//! holds resident pages, and the swap device that holds evicted ones.
//! Both are described by traits so the simulator can plug in its own
//! storage. [`MemPhy`] is the reference implementation of both.
//!
//! # Design
//! - Storage is split into page-sized frames
//! - A bitmap tracks allocated frames (bit = 1: allocated)
//! - Every call locks an internal spinlock, so one device can be shared
//!   by many address spaces
//! - Allocation is always fallible; callers never assume success

use alloc::vec;
use alloc::vec::Vec;

use log::info;
use spin::Mutex;

use super::address::{FrameNumber, PhysAddr, SwapSlot, PAGE_SIZE};
use super::error::MmError;

/// Error type for device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemPhyError {
    /// No free frame in the RAM pool.
    OutOfMemory,
    /// No free slot on the swap device.
    OutOfSwap,
    /// The frame or slot index is outside the device, or the offset is
    /// outside the frame.
    InvalidFrame,
}

impl core::fmt::Display for MemPhyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "no free frame"),
            Self::OutOfSwap => write!(f, "no free swap slot"),
            Self::InvalidFrame => write!(f, "frame index out of range"),
        }
    }
}

impl From<MemPhyError> for MmError {
    fn from(err: MemPhyError) -> Self {
        match err {
            MemPhyError::OutOfMemory => MmError::OutOfMemory,
            MemPhyError::OutOfSwap => MmError::OutOfSwap,
            MemPhyError::InvalidFrame => MmError::InvalidAddress,
        }
    }
}

/// The swap device: page-sized slots that hold evicted pages.
pub trait SwapDevice: Send + Sync {
    /// Take a free slot.
    fn alloc_slot(&self) -> Result<SwapSlot, MemPhyError>;

    /// Return a slot to the device.
    fn free_slot(&self, slot: SwapSlot);

    /// Copy a whole slot into `buf` (`PAGE_SIZE` bytes).
    fn read_slot(&self, slot: SwapSlot, buf: &mut [u8]) -> Result<(), MemPhyError>;

    /// Overwrite a whole slot from `buf` (`PAGE_SIZE` bytes).
    fn write_slot(&self, slot: SwapSlot, buf: &[u8]) -> Result<(), MemPhyError>;
}

/// The RAM pool: page-sized frames with byte access.
///
/// Frames handed out by [`alloc_frame`](Self::alloc_frame) are zeroed.
pub trait PhysicalMemory: Send + Sync {
    /// Take a free, zeroed frame.
    fn alloc_frame(&self) -> Result<FrameNumber, MemPhyError>;

    /// Return a frame to the pool.
    fn free_frame(&self, frame: FrameNumber);

    /// Read one byte at `offset` within `frame`.
    fn read_byte(&self, frame: FrameNumber, offset: usize) -> Result<u8, MemPhyError>;

    /// Write one byte at `offset` within `frame`.
    fn write_byte(&self, frame: FrameNumber, offset: usize, value: u8) -> Result<(), MemPhyError>;

    /// Copy a whole frame into `buf` (`PAGE_SIZE` bytes).
    fn read_frame(&self, frame: FrameNumber, buf: &mut [u8]) -> Result<(), MemPhyError>;

    /// Overwrite a whole frame from `buf` (`PAGE_SIZE` bytes).
    fn write_frame(&self, frame: FrameNumber, buf: &[u8]) -> Result<(), MemPhyError>;

    /// Fill a frame with zeros.
    fn zero_frame(&self, frame: FrameNumber) -> Result<(), MemPhyError> {
        self.write_frame(frame, &[0u8; PAGE_SIZE])
    }

    /// Copy a frame's content into a swap slot.
    fn copy_frame_to_swap(
        &self,
        frame: FrameNumber,
        swap: &dyn SwapDevice,
        slot: SwapSlot,
    ) -> Result<(), MemPhyError> {
        let mut page = [0u8; PAGE_SIZE];
        self.read_frame(frame, &mut page)?;
        swap.write_slot(slot, &page)
    }

    /// Copy a swap slot's content into a frame.
    fn copy_swap_to_frame(
        &self,
        swap: &dyn SwapDevice,
        slot: SwapSlot,
        frame: FrameNumber,
    ) -> Result<(), MemPhyError> {
        let mut page = [0u8; PAGE_SIZE];
        swap.read_slot(slot, &mut page)?;
        self.write_frame(frame, &page)
    }
}

/// Device state behind the lock.
struct MemPhyInner {
    /// Backing bytes, `total_frames * PAGE_SIZE` long.
    storage: Vec<u8>,
    /// Bitmap tracking allocated frames (1 = allocated, 0 = free).
    bitmap: Vec<u8>,
    /// Number of free frames remaining.
    free_count: usize,
    /// Total frames under management.
    total_frames: usize,
}

impl MemPhyInner {
    fn new(size: usize) -> Self {
        let total_frames = size / PAGE_SIZE;
        Self {
            storage: vec![0; total_frames * PAGE_SIZE],
            bitmap: vec![0; total_frames.div_ceil(8)],
            free_count: total_frames,
            total_frames,
        }
    }

    /// Set a bit in the bitmap.
    #[inline]
    fn set_bit(&mut self, frame: usize, allocated: bool) {
        let byte_idx = frame / 8;
        let bit_idx = frame % 8;

        if allocated {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            self.bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }

    /// Check if a frame is allocated.
    #[inline]
    fn is_allocated(&self, frame: usize) -> bool {
        (self.bitmap[frame / 8] >> (frame % 8)) & 1 == 1
    }

    /// Allocate the lowest free frame and zero it.
    fn alloc(&mut self) -> Option<usize> {
        if self.free_count == 0 {
            return None;
        }

        let byte_idx = self.bitmap.iter().position(|&b| b != 0xFF)?;
        let bit_idx = (!self.bitmap[byte_idx]).trailing_zeros() as usize;
        let frame = byte_idx * 8 + bit_idx;
        if frame >= self.total_frames {
            return None;
        }

        self.set_bit(frame, true);
        self.free_count -= 1;
        self.frame_mut(frame).fill(0);
        Some(frame)
    }

    /// Free a previously allocated frame.
    ///
    /// # Panics
    /// On double free or an index outside the device. Both mean the page
    /// table has been corrupted.
    fn free(&mut self, frame: usize) {
        assert!(
            frame < self.total_frames,
            "Attempted to free frame outside device: {}",
            frame
        );
        assert!(
            self.is_allocated(frame),
            "Double free detected for frame: {}",
            frame
        );

        self.set_bit(frame, false);
        self.free_count += 1;
    }

    fn frame(&self, frame: usize) -> Result<&[u8], MemPhyError> {
        if frame >= self.total_frames {
            return Err(MemPhyError::InvalidFrame);
        }
        Ok(&self.storage[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE])
    }

    fn frame_mut(&mut self, frame: usize) -> &mut [u8] {
        &mut self.storage[frame * PAGE_SIZE..(frame + 1) * PAGE_SIZE]
    }

    fn checked_frame_mut(&mut self, frame: usize) -> Result<&mut [u8], MemPhyError> {
        if frame >= self.total_frames {
            return Err(MemPhyError::InvalidFrame);
        }
        Ok(self.frame_mut(frame))
    }
}

/// A byte-addressed memory device split into page-sized frames.
///
/// Used both as the RAM pool ([`PhysicalMemory`]) and as the swap device
/// ([`SwapDevice`]).
pub struct MemPhy {
    inner: Mutex<MemPhyInner>,
}

impl MemPhy {
    /// Create a device of `size` bytes. A trailing partial frame is not
    /// usable.
    pub fn new(size: usize) -> Self {
        Self {
            inner: Mutex::new(MemPhyInner::new(size)),
        }
    }

    /// Create a device holding exactly `frames` frames.
    pub fn with_frames(frames: usize) -> Self {
        Self::new(frames * PAGE_SIZE)
    }

    /// Total number of frames.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total_frames
    }

    /// Number of free frames remaining.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// Read a byte by physical address.
    pub fn read(&self, addr: PhysAddr) -> Result<u8, MemPhyError> {
        self.read_byte(addr.frame_number(), addr.frame_offset())
    }

    /// Write a byte by physical address.
    pub fn write(&self, addr: PhysAddr, value: u8) -> Result<(), MemPhyError> {
        self.write_byte(addr.frame_number(), addr.frame_offset(), value)
    }

    /// Log every non-zero byte of the device.
    pub fn dump(&self) {
        let inner = self.inner.lock();
        info!(
            "memphy: {} frames, {} free",
            inner.total_frames, inner.free_count
        );
        for (addr, byte) in inner.storage.iter().enumerate().filter(|(_, b)| **b != 0) {
            info!("  {:#08x}: {:#04x}", addr, byte);
        }
    }
}

impl core::fmt::Debug for MemPhy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        write!(
            f,
            "MemPhy(frames={}, free={})",
            inner.total_frames, inner.free_count
        )
    }
}

fn check_offset(offset: usize) -> Result<(), MemPhyError> {
    if offset < PAGE_SIZE {
        Ok(())
    } else {
        Err(MemPhyError::InvalidFrame)
    }
}

fn check_page_buf(len: usize) -> Result<(), MemPhyError> {
    if len == PAGE_SIZE {
        Ok(())
    } else {
        Err(MemPhyError::InvalidFrame)
    }
}

impl PhysicalMemory for MemPhy {
    fn alloc_frame(&self) -> Result<FrameNumber, MemPhyError> {
        self.inner
            .lock()
            .alloc()
            .map(FrameNumber::new)
            .ok_or(MemPhyError::OutOfMemory)
    }

    fn free_frame(&self, frame: FrameNumber) {
        self.inner.lock().free(frame.index());
    }

    fn read_byte(&self, frame: FrameNumber, offset: usize) -> Result<u8, MemPhyError> {
        check_offset(offset)?;
        Ok(self.inner.lock().frame(frame.index())?[offset])
    }

    fn write_byte(&self, frame: FrameNumber, offset: usize, value: u8) -> Result<(), MemPhyError> {
        check_offset(offset)?;
        self.inner.lock().checked_frame_mut(frame.index())?[offset] = value;
        Ok(())
    }

    fn read_frame(&self, frame: FrameNumber, buf: &mut [u8]) -> Result<(), MemPhyError> {
        check_page_buf(buf.len())?;
        buf.copy_from_slice(self.inner.lock().frame(frame.index())?);
        Ok(())
    }

    fn write_frame(&self, frame: FrameNumber, buf: &[u8]) -> Result<(), MemPhyError> {
        check_page_buf(buf.len())?;
        self.inner
            .lock()
            .checked_frame_mut(frame.index())?
            .copy_from_slice(buf);
        Ok(())
    }
}

impl SwapDevice for MemPhy {
    fn alloc_slot(&self) -> Result<SwapSlot, MemPhyError> {
        self.inner
            .lock()
            .alloc()
            .map(SwapSlot::new)
            .ok_or(MemPhyError::OutOfSwap)
    }

    fn free_slot(&self, slot: SwapSlot) {
        self.inner.lock().free(slot.index());
    }

    fn read_slot(&self, slot: SwapSlot, buf: &mut [u8]) -> Result<(), MemPhyError> {
        self.read_frame(FrameNumber::new(slot.index()), buf)
    }

    fn write_slot(&self, slot: SwapSlot, buf: &[u8]) -> Result<(), MemPhyError> {
        self.write_frame(FrameNumber::new(slot.index()), buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_exhausted() {
        let ram = MemPhy::with_frames(3);
        assert_eq!(ram.alloc_frame(), Ok(FrameNumber::new(0)));
        assert_eq!(ram.alloc_frame(), Ok(FrameNumber::new(1)));
        assert_eq!(ram.alloc_frame(), Ok(FrameNumber::new(2)));
        assert_eq!(ram.alloc_frame(), Err(MemPhyError::OutOfMemory));
        assert_eq!(ram.free_frames(), 0);

        ram.free_frame(FrameNumber::new(1));
        assert_eq!(ram.alloc_frame(), Ok(FrameNumber::new(1)));
    }

    #[test]
    fn test_partial_frame_unusable() {
        let ram = MemPhy::new(PAGE_SIZE * 2 + 7);
        assert_eq!(ram.total_frames(), 2);
    }

    #[test]
    fn test_alloc_zeroes_frame() {
        let ram = MemPhy::with_frames(1);
        let frame = ram.alloc_frame().unwrap();
        ram.write_byte(frame, 9, 0xAB).unwrap();
        ram.free_frame(frame);

        let again = ram.alloc_frame().unwrap();
        assert_eq!(again, frame);
        assert_eq!(ram.read_byte(again, 9), Ok(0));
    }

    #[test]
    fn test_byte_access_bounds() {
        let ram = MemPhy::with_frames(1);
        assert_eq!(
            ram.read_byte(FrameNumber::new(0), PAGE_SIZE),
            Err(MemPhyError::InvalidFrame)
        );
        assert_eq!(
            ram.write_byte(FrameNumber::new(1), 0, 1),
            Err(MemPhyError::InvalidFrame)
        );
    }

    #[test]
    fn test_swap_copy_round_trip() {
        let ram = MemPhy::with_frames(2);
        let swap = MemPhy::with_frames(2);

        let frame = ram.alloc_frame().unwrap();
        ram.write_byte(frame, 0, 0x11).unwrap();
        ram.write_byte(frame, PAGE_SIZE - 1, 0x22).unwrap();

        let slot = swap.alloc_slot().unwrap();
        ram.copy_frame_to_swap(frame, &swap, slot).unwrap();
        ram.zero_frame(frame).unwrap();
        assert_eq!(ram.read_byte(frame, 0), Ok(0));

        let other = ram.alloc_frame().unwrap();
        ram.copy_swap_to_frame(&swap, slot, other).unwrap();
        assert_eq!(ram.read_byte(other, 0), Ok(0x11));
        assert_eq!(ram.read_byte(other, PAGE_SIZE - 1), Ok(0x22));
    }

    #[test]
    fn test_swap_exhaustion_reports_out_of_swap() {
        let swap = MemPhy::with_frames(0);
        assert_eq!(swap.alloc_slot(), Err(MemPhyError::OutOfSwap));
    }

    #[test]
    #[should_panic(expected = "Double free")]
    fn test_double_free_panics() {
        let ram = MemPhy::with_frames(1);
        let frame = ram.alloc_frame().unwrap();
        ram.free_frame(frame);
        ram.free_frame(frame);
    }
}
