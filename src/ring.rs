//! Single-producer / single-consumer ring over shared memory
//!
//! Layout of the shared region:
//!
//! ```text
//! 0   put_index  u32  written by the producer only
//! 4   get_index  u32  written by the consumer only
//! 8   slots      capacity * 80 bytes
//! ```
//!
//! Both indices count up forever and wrap at 2^32. Occupancy is
//! `put - get` (modular) and a slot lives at `index & (capacity - 1)`. The
//! capacity must be a power of two so that consecutive indices stay on
//! consecutive slots across the u32 wrap. A side
//! publishes its index with release ordering after it is done with the slot
//! memory and reads the peer's index with acquire ordering, which is what
//! makes slot contents visible across threads and processes.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::constants::*;
use crate::error::{Result, SuperCanError};
use crate::region::{required_size, SharedRegion};
use crate::slot::Slot;
use crate::wake::WakeSignal;

/// Largest capacity for which modular occupancy stays unambiguous
pub const MAX_CAPACITY: u32 = 1 << 31;

struct RingShared {
    region: Arc<dyn SharedRegion>,
    capacity: u32,
}

impl RingShared {
    fn index(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: the region is at least header sized and 4-byte aligned
        // (checked in RingChannel::new) and outlives `self`. Index words are
        // only ever accessed atomically.
        unsafe { &*(self.region.as_ptr().add(offset) as *const AtomicU32) }
    }

    fn put_index(&self) -> &AtomicU32 {
        self.index(SC_MM_PUT_INDEX_OFFSET)
    }

    fn get_index(&self) -> &AtomicU32 {
        self.index(SC_MM_GET_INDEX_OFFSET)
    }

    fn slot_ptr(&self, index: u32) -> *mut u8 {
        let offset = SC_MM_SLOTS_OFFSET + (index & (self.capacity - 1)) as usize * SC_MM_SLOT_SIZE;
        // SAFETY: offset + SC_MM_SLOT_SIZE <= required_size(capacity) <= region length.
        unsafe { self.region.as_ptr().add(offset) }
    }

    /// Occupancy for the given indices, or a corruption error
    fn used(&self, put: u32, get: u32) -> Result<u32> {
        let used = put.wrapping_sub(get);
        if used > self.capacity {
            warn!(
                "Ring corrupt: put={} get={} used={} capacity={}",
                put, get, used, self.capacity
            );
            return Err(SuperCanError::ProtocolCorruption {
                put,
                get,
                capacity: self.capacity,
            });
        }
        Ok(used)
    }
}

/// A ring laid over a shared region
///
/// The channel itself only validates and describes the layout. Exactly one
/// `RingProducer` and one `RingConsumer` may operate on a region at any time,
/// counting the peer process.
#[derive(Clone)]
pub struct RingChannel {
    shared: Arc<RingShared>,
}

impl RingChannel {
    /// Lay a ring of `capacity` slots over `region`
    ///
    /// `capacity` must be a power of two no larger than `MAX_CAPACITY`.
    /// The region is not modified. Call `initialize` on freshly created
    /// memory that the peer has not touched yet.
    pub fn new(region: Arc<dyn SharedRegion>, capacity: u32) -> Result<Self> {
        if !capacity.is_power_of_two() || capacity > MAX_CAPACITY {
            return Err(SuperCanError::InvalidCapacity(capacity));
        }

        let required = required_size(capacity);
        if region.len() < required {
            return Err(SuperCanError::RegionTooSmall {
                required,
                actual: region.len(),
            });
        }

        if region.as_ptr() as usize % std::mem::align_of::<AtomicU32>() != 0 {
            return Err(SuperCanError::RegionMisaligned);
        }

        Ok(Self {
            shared: Arc::new(RingShared { region, capacity }),
        })
    }

    /// Zero both indices
    ///
    /// Only valid before either peer starts using the ring.
    pub fn initialize(&self) {
        self.shared.put_index().store(0, Ordering::Relaxed);
        self.shared.get_index().store(0, Ordering::Release);
    }

    /// Number of slots
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    /// Current occupancy as seen from outside either side
    pub fn occupancy(&self) -> Result<u32> {
        let get = self.shared.get_index().load(Ordering::Acquire);
        let put = self.shared.put_index().load(Ordering::Acquire);
        self.shared.used(put, get)
    }

    /// Producer side, notifying `wake` after every push
    pub fn producer(&self, wake: Arc<dyn WakeSignal>) -> RingProducer {
        RingProducer {
            shared: Arc::clone(&self.shared),
            wake,
        }
    }

    /// Consumer side, waiting on `wake` in `RingConsumer::wait`
    pub fn consumer(&self, wake: Arc<dyn WakeSignal>) -> RingConsumer {
        RingConsumer {
            shared: Arc::clone(&self.shared),
            wake,
        }
    }
}

impl fmt::Debug for RingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingChannel")
            .field("capacity", &self.shared.capacity)
            .field("put", &self.shared.put_index().load(Ordering::Relaxed))
            .field("get", &self.shared.get_index().load(Ordering::Relaxed))
            .finish()
    }
}

/// Writing side of a ring
pub struct RingProducer {
    shared: Arc<RingShared>,
    wake: Arc<dyn WakeSignal>,
}

impl RingProducer {
    /// Append one slot
    ///
    /// Returns `Ok(false)` without touching the ring when it is full.
    /// Returns `ProtocolCorruption` when the consumer's index is impossible.
    pub fn try_push(&mut self, slot: &Slot) -> Result<bool> {
        let get = self.shared.get_index().load(Ordering::Acquire);
        let put = self.shared.put_index().load(Ordering::Relaxed);
        let used = self.shared.used(put, get)?;

        if used == self.shared.capacity {
            trace!("Ring full at put={}", put);
            return Ok(false);
        }

        let bytes = slot.pack();
        // SAFETY: the slot at `put` is owned by the producer until put is
        // published; the consumer does not read it before that.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.shared.slot_ptr(put), SC_MM_SLOT_SIZE);
        }

        self.shared.put_index().store(put.wrapping_add(1), Ordering::Release);
        self.wake.notify();
        Ok(true)
    }

    /// Number of free slots
    pub fn free(&self) -> Result<u32> {
        let get = self.shared.get_index().load(Ordering::Acquire);
        let put = self.shared.put_index().load(Ordering::Relaxed);
        Ok(self.shared.capacity - self.shared.used(put, get)?)
    }

    /// Number of slots in the ring
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }
}

/// Reading side of a ring
pub struct RingConsumer {
    shared: Arc<RingShared>,
    wake: Arc<dyn WakeSignal>,
}

impl RingConsumer {
    /// Take everything currently published
    ///
    /// Never blocks. The returned iterator yields decoded slots and publishes
    /// the new get index once, when it is dropped. Slots not yet iterated at
    /// that point stay in the ring.
    pub fn drain(&mut self) -> Result<Drain<'_>> {
        let put = self.shared.put_index().load(Ordering::Acquire);
        let get = self.shared.get_index().load(Ordering::Relaxed);
        self.shared.used(put, get)?;

        Ok(Drain {
            shared: &self.shared,
            get,
            start: get,
            put,
        })
    }

    /// Drop everything queued by moving get up to put
    ///
    /// Only safe while the producer is quiescent. Returns the number of
    /// slots discarded.
    pub fn reset(&mut self) -> u32 {
        let put = self.shared.put_index().load(Ordering::Acquire);
        let get = self.shared.get_index().load(Ordering::Relaxed);
        self.shared.get_index().store(put, Ordering::Release);

        let dropped = put.wrapping_sub(get);
        if dropped > 0 {
            debug!("Ring reset dropped {} slots", dropped);
        }
        dropped
    }

    /// Wait for the producer's wake notification
    ///
    /// The notification is a hint. Callers must drain afterwards whatever
    /// this returns.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake.wait(timeout)
    }

    /// Number of published slots not consumed yet
    pub fn pending(&self) -> Result<u32> {
        let put = self.shared.put_index().load(Ordering::Acquire);
        let get = self.shared.get_index().load(Ordering::Relaxed);
        self.shared.used(put, get)
    }

    /// Number of slots in the ring
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }
}

/// Iterator over the slots of one `RingConsumer::drain` call
pub struct Drain<'a> {
    shared: &'a RingShared,
    get: u32,
    start: u32,
    put: u32,
}

impl Iterator for Drain<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        while self.get != self.put {
            let mut raw = [0u8; SC_MM_SLOT_SIZE];
            // SAFETY: slots between get and put were published by the producer
            // and are not rewritten until get moves past them.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.shared.slot_ptr(self.get),
                    raw.as_mut_ptr(),
                    SC_MM_SLOT_SIZE,
                );
            }
            self.get = self.get.wrapping_add(1);

            match Slot::unpack(&raw) {
                Ok(Some(slot)) => return Some(slot),
                Ok(None) => debug!("Skipping ring slot with type 0x{:02x}", raw[0]),
                Err(e) => debug!("Skipping unreadable ring slot: {}", e),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.put.wrapping_sub(self.get) as usize))
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        if self.get != self.start {
            self.shared.get_index().store(self.get, Ordering::Release);
        }
    }
}
