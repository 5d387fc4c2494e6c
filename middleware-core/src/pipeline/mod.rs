//! Bounded event pipeline.
//!
//! A fixed-capacity ring of pre-allocated slots hands frames from a single
//! network-receive thread to one or more consumer threads without ever
//! reallocating. The producer claims slot `n` only once every consumer has
//! released slot `n - capacity`; that gate is the sole backpressure
//! mechanism. Consumers observe slots in strictly increasing sequence
//! order and learn batch boundaries through the `end_of_batch` flag so
//! they can defer side effects (flushes) to the end of a burst.
//!
//! Capacity must be a power of two so `sequence & (capacity - 1)` indexes
//! the slot array without division.

use log::error;
use std::cell::UnsafeCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default ring capacity for the wire-intake pipelines.
pub const DEFAULT_CAPACITY: usize = 16_384;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Capacity must be a non-zero power of two, got {0}")]
    CapacityNotPowerOfTwo(usize),
    #[error("At least one consumer is required")]
    NoConsumers,
}

/// A reusable wire-frame slot: raw payload bytes plus the frame tag.
/// Buffers are cleared and refilled in place, so after warm-up the hot
/// path allocates nothing.
#[derive(Debug, Default)]
pub struct FrameSlot {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl FrameSlot {
    /// Overwrites this slot in place.
    pub fn fill(&mut self, topic: &str, payload: &[u8]) {
        self.topic.clear();
        self.topic.push_str(topic);
        self.payload.clear();
        self.payload.extend_from_slice(payload);
    }
}

struct RingCore<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: u64,
    capacity: u64,
    /// Count of published slots; slot `n` is readable once `cursor > n`.
    cursor: AtomicU64,
    /// Per-consumer count of released slots.
    gates: Box<[AtomicU64]>,
    closed: AtomicBool,
}

// Slots are handed over with release/acquire pairs on `cursor` and
// `gates`; a slot is never read and written concurrently.
unsafe impl<T: Send> Send for RingCore<T> {}
unsafe impl<T: Send> Sync for RingCore<T> {}

impl<T> RingCore<T> {
    fn min_gate(&self) -> u64 {
        self.gates
            .iter()
            .map(|g| g.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }
}

fn backoff(spins: &mut u32) {
    if *spins < 128 {
        std::hint::spin_loop();
    } else if *spins < 256 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_micros(50));
    }
    *spins = spins.saturating_add(1);
}

/// Creates a pipeline with `consumers` consumers that each observe every
/// published slot.
pub fn pipeline<T: Default + Send + 'static>(
    capacity: usize,
    consumers: usize,
) -> Result<(Producer<T>, Vec<Consumer<T>>), PipelineError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(PipelineError::CapacityNotPowerOfTwo(capacity));
    }
    if consumers == 0 {
        return Err(PipelineError::NoConsumers);
    }

    let slots: Box<[UnsafeCell<T>]> = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();
    let gates: Box<[AtomicU64]> = (0..consumers).map(|_| AtomicU64::new(0)).collect();

    let core = Arc::new(RingCore {
        slots,
        mask: capacity as u64 - 1,
        capacity: capacity as u64,
        cursor: AtomicU64::new(0),
        gates,
        closed: AtomicBool::new(false),
    });

    let consumers = (0..consumers)
        .map(|index| Consumer {
            core: Arc::clone(&core),
            index,
            consumed: 0,
        })
        .collect();

    let producer = Producer { core, next: 0 };
    Ok((producer, consumers))
}

/// The single producer side. Not clonable: claim/publish is a
/// single-writer protocol.
pub struct Producer<T> {
    core: Arc<RingCore<T>>,
    next: u64,
}

impl<T: Send> Producer<T> {
    /// Claims the next slot for writing.
    ///
    /// Blocks (spin, then yield, then short sleeps) while the slot this
    /// sequence maps to is still held by the slowest consumer.
    pub fn claim(&mut self) -> Claim<'_, T> {
        let sequence = self.next;
        let mut spins = 0u32;
        while sequence >= self.core.min_gate() + self.core.capacity {
            backoff(&mut spins);
        }
        Claim {
            producer: self,
            sequence,
        }
    }

    /// Marks the pipeline closed. Consumers drain what is published and
    /// then exit their run loops.
    pub fn close(&self) {
        self.core.closed.store(true, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity as usize
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.core.closed.store(true, Ordering::Release);
    }
}

/// An exclusive handle on one claimed slot. Dropping without `publish`
/// releases the claim; the same sequence is handed out again.
pub struct Claim<'a, T> {
    producer: &'a mut Producer<T>,
    sequence: u64,
}

impl<T> Claim<'_, T> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Makes the slot visible to consumers.
    pub fn publish(self) {
        self.producer
            .core
            .cursor
            .store(self.sequence + 1, Ordering::Release);
        self.producer.next = self.sequence + 1;
    }
}

impl<T> std::ops::Deref for Claim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        let index = (self.sequence & self.producer.core.mask) as usize;
        // Exclusive: gated on every consumer having released this slot,
        // and the claim borrows the producer mutably.
        unsafe { &*self.producer.core.slots[index].get() }
    }
}

impl<T> std::ops::DerefMut for Claim<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        let index = (self.sequence & self.producer.core.mask) as usize;
        unsafe { &mut *self.producer.core.slots[index].get() }
    }
}

/// One consumer of the pipeline. Every consumer sees every slot.
pub struct Consumer<T> {
    core: Arc<RingCore<T>>,
    index: usize,
    consumed: u64,
}

impl<T: Send + 'static> Consumer<T> {
    /// Runs the consume loop on the calling thread until the pipeline is
    /// closed and drained.
    ///
    /// The handler receives `(slot, sequence, end_of_batch)`. A panicking
    /// handler is caught per slot and logged; the sequence still counts as
    /// consumed so the ring never stalls on a poison message.
    pub fn run<F>(mut self, mut handler: F)
    where
        F: FnMut(&T, u64, bool),
    {
        let mut spins = 0u32;
        loop {
            let available = self.core.cursor.load(Ordering::Acquire);
            if available == self.consumed {
                if self.core.closed.load(Ordering::Acquire)
                    && self.core.cursor.load(Ordering::Acquire) == self.consumed
                {
                    return;
                }
                backoff(&mut spins);
                continue;
            }
            spins = 0;

            for sequence in self.consumed..available {
                let index = (sequence & self.core.mask) as usize;
                let slot = unsafe { &*self.core.slots[index].get() };
                let end_of_batch = sequence + 1 == available;

                let outcome =
                    catch_unwind(AssertUnwindSafe(|| handler(slot, sequence, end_of_batch)));
                if outcome.is_err() {
                    error!(
                        "Pipeline consumer {} failed at sequence {}, slot skipped",
                        self.index, sequence
                    );
                }

                // Release per slot so the producer reclaims promptly.
                self.core.gates[self.index].store(sequence + 1, Ordering::Release);
            }
            self.consumed = available;
        }
    }

    /// Spawns the consume loop on a dedicated named thread.
    pub fn spawn<F>(self, name: &str, handler: F) -> std::io::Result<std::thread::JoinHandle<()>>
    where
        F: FnMut(&T, u64, bool) + Send + 'static,
    {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run(handler))
    }
}
