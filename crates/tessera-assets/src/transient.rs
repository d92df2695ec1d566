//! Reference-counted scratch buffers shared by a batch of assets.
//!
//! The contextualize stage sums the transient sizes requested by one batch
//! and calls [`TransientAllocator::create_buffer_group`] once. Each asset of
//! the batch then owns a [`TransientBufferId`] naming the shared slot
//! (`parent`) and its byte offset within it (`child`). The slot's backing
//! allocation is released exactly when the last of its children is returned.
//!
//! Returns arrive out of order and may repeat (a broken read and a late
//! completion can both try to hand a child back), so returning a child of a
//! freed or unknown slot is a logged no-op.

use std::fmt;

// ---------------------------------------------------------------------------
// TransientBufferId
// ---------------------------------------------------------------------------

/// Location of one asset's bytes inside a transient slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientBufferId {
    /// Index of the pool slot.
    pub parent: usize,
    /// Byte offset inside the slot.
    pub child: usize,
}

impl TransientBufferId {
    pub fn new(parent: usize, child: usize) -> Self {
        Self { parent, child }
    }

    /// The same slot at another offset.
    pub fn with_child(self, child: usize) -> Self {
        Self { child, ..self }
    }
}

impl fmt::Debug for TransientBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransientBufferId({}+{})", self.parent, self.child)
    }
}

impl fmt::Display for TransientBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}+{}", self.parent, self.child)
    }
}

// ---------------------------------------------------------------------------
// TransientError
// ---------------------------------------------------------------------------

/// Why a buffer group could not be created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransientError {
    /// Creating the group would push live transient memory over the budget.
    #[error("transient budget exceeded: {requested} bytes requested, {live} live, budget {budget}")]
    BudgetExceeded {
        requested: usize,
        live: usize,
        budget: usize,
    },

    /// The system allocator refused to reserve the bytes.
    #[error("failed to reserve {requested} bytes for a transient buffer group")]
    OutOfMemory { requested: usize },
}

// ---------------------------------------------------------------------------
// TransientAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Slot {
    /// `None` once freed; the slot index is then reusable.
    buffer: Option<Vec<u8>>,
    live_children: usize,
}

/// Pool of transient buffer slots.
#[derive(Debug)]
pub struct TransientAllocator {
    slots: Vec<Slot>,
    /// Upper bound on the sum of live slot sizes, if any.
    budget: Option<usize>,
    live_bytes: usize,
}

impl TransientAllocator {
    /// Create a pool with `initial_slots` empty slots.
    pub fn new(initial_slots: usize) -> Self {
        let mut slots = Vec::with_capacity(initial_slots);
        slots.resize_with(initial_slots, Slot::default);
        Self {
            slots,
            budget: None,
            live_bytes: 0,
        }
    }

    /// Create a pool that refuses groups which would exceed `budget` live
    /// bytes.
    pub fn with_budget(initial_slots: usize, budget: Option<usize>) -> Self {
        Self {
            budget,
            ..Self::new(initial_slots)
        }
    }

    /// Allocate one zeroed region of `total_size` bytes shared by
    /// `child_count` assets.
    ///
    /// Reuses the first free slot, appending a new one if every slot is
    /// live. The returned id has `child == 0`.
    ///
    /// # Errors
    ///
    /// - [`TransientError::BudgetExceeded`] if a budget is configured and
    ///   would be exceeded.
    /// - [`TransientError::OutOfMemory`] if the bytes cannot be reserved.
    pub fn create_buffer_group(
        &mut self,
        total_size: usize,
        child_count: usize,
    ) -> Result<TransientBufferId, TransientError> {
        if let Some(budget) = self.budget {
            if self.live_bytes.saturating_add(total_size) > budget {
                return Err(TransientError::BudgetExceeded {
                    requested: total_size,
                    live: self.live_bytes,
                    budget,
                });
            }
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(total_size)
            .map_err(|_| TransientError::OutOfMemory {
                requested: total_size,
            })?;
        buffer.resize(total_size, 0);

        let index = match self.slots.iter().position(|s| s.buffer.is_none()) {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };

        self.slots[index] = Slot {
            buffer: Some(buffer),
            live_children: child_count,
        };
        self.live_bytes += total_size;

        tracing::info!(
            index,
            total_size,
            child_count,
            "allocating transient buffer group"
        );

        Ok(TransientBufferId::new(index, 0))
    }

    /// The bytes of `id`'s slot from its child offset to the end of the slot.
    ///
    /// Returns `None` (and logs) if the slot is out of range or already
    /// freed; the caller must skip the asset.
    pub fn get_buffer(&self, id: TransientBufferId) -> Option<&[u8]> {
        let buffer = self.live_buffer(id, "access")?;
        match buffer.get(id.child..) {
            Some(bytes) => Some(bytes),
            None => {
                tracing::warn!(
                    parent = id.parent,
                    child = id.child,
                    size = buffer.len(),
                    "transient child offset past end of buffer"
                );
                None
            }
        }
    }

    /// Mutable counterpart of [`get_buffer`](Self::get_buffer).
    pub fn get_buffer_mut(&mut self, id: TransientBufferId) -> Option<&mut [u8]> {
        self.live_buffer(id, "write")?;
        let buffer = self.slots[id.parent].buffer.as_mut()?;
        let len = buffer.len();
        if id.child > len {
            tracing::warn!(
                parent = id.parent,
                child = id.child,
                size = len,
                "transient child offset past end of buffer"
            );
            return None;
        }
        Some(&mut buffer[id.child..])
    }

    /// Release one child of `id`'s slot, freeing the slot when its last
    /// child is returned.
    ///
    /// Returning a child of an out-of-range or already-freed slot logs a
    /// warning and does nothing.
    pub fn return_child(&mut self, id: TransientBufferId) {
        if id.parent >= self.slots.len() {
            tracing::warn!(
                parent = id.parent,
                slots = self.slots.len(),
                "returning transient buffer out of allocated range"
            );
            return;
        }

        let slot = &mut self.slots[id.parent];
        if slot.buffer.is_none() {
            tracing::warn!(parent = id.parent, "returning transient buffer already deallocated");
            return;
        }

        slot.live_children = slot.live_children.saturating_sub(1);
        if slot.live_children == 0 {
            if let Some(buffer) = slot.buffer.take() {
                self.live_bytes -= buffer.len();
            }
            tracing::info!(parent = id.parent, "transient buffer deallocated");
        }
    }

    // -- diagnostics --------------------------------------------------------

    /// Whether the slot `parent` currently holds an allocation.
    pub fn is_live(&self, parent: usize) -> bool {
        self.slots
            .get(parent)
            .is_some_and(|slot| slot.buffer.is_some())
    }

    /// Number of children not yet returned for slot `parent`.
    pub fn live_children(&self, parent: usize) -> usize {
        self.slots
            .get(parent)
            .filter(|slot| slot.buffer.is_some())
            .map_or(0, |slot| slot.live_children)
    }

    /// Size in bytes of slot `parent`, if live.
    pub fn slot_size(&self, parent: usize) -> Option<usize> {
        self.slots
            .get(parent)
            .and_then(|slot| slot.buffer.as_ref())
            .map(Vec::len)
    }

    /// Number of slots, live or free.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live slots.
    pub fn live_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.buffer.is_some()).count()
    }

    /// Sum of the sizes of all live slots.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    fn live_buffer(&self, id: TransientBufferId, action: &str) -> Option<&Vec<u8>> {
        let Some(slot) = self.slots.get(id.parent) else {
            tracing::warn!(
                parent = id.parent,
                slots = self.slots.len(),
                action,
                "transient buffer out of allocated range"
            );
            return None;
        };
        match slot.buffer.as_ref() {
            Some(buffer) => Some(buffer),
            None => {
                tracing::warn!(parent = id.parent, action, "transient buffer already deallocated");
                None
            }
        }
    }
}

impl Default for TransientAllocator {
    fn default() -> Self {
        Self::new(16)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_freed_after_last_child() {
        let mut alloc = TransientAllocator::new(4);
        let id = alloc.create_buffer_group(60, 3).unwrap();
        assert_eq!(id.child, 0);
        assert_eq!(alloc.slot_size(id.parent), Some(60));

        alloc.return_child(id.with_child(10));
        alloc.return_child(id);
        assert!(alloc.is_live(id.parent));
        assert_eq!(alloc.live_children(id.parent), 1);

        alloc.return_child(id.with_child(30));
        assert!(!alloc.is_live(id.parent));
        assert!(alloc.get_buffer(id).is_none());
        assert_eq!(alloc.live_bytes(), 0);
    }

    #[test]
    fn double_return_is_noop() {
        let mut alloc = TransientAllocator::new(1);
        let id = alloc.create_buffer_group(8, 1).unwrap();
        alloc.return_child(id);
        alloc.return_child(id);
        assert!(!alloc.is_live(id.parent));

        // A new group reusing the slot must not be affected by the stale id.
        let again = alloc.create_buffer_group(8, 2).unwrap();
        assert_eq!(again.parent, id.parent);
        assert_eq!(alloc.live_children(again.parent), 2);
    }

    #[test]
    fn out_of_range_is_tolerated() {
        let mut alloc = TransientAllocator::new(2);
        let bogus = TransientBufferId::new(99, 0);
        assert!(alloc.get_buffer(bogus).is_none());
        assert!(alloc.get_buffer_mut(bogus).is_none());
        alloc.return_child(bogus);
        assert_eq!(alloc.slot_count(), 2);
    }

    #[test]
    fn free_slots_are_reused_before_growing() {
        let mut alloc = TransientAllocator::new(1);
        let a = alloc.create_buffer_group(4, 1).unwrap();
        let b = alloc.create_buffer_group(4, 1).unwrap();
        assert_eq!((a.parent, b.parent), (0, 1));
        assert_eq!(alloc.slot_count(), 2);

        alloc.return_child(a);
        let c = alloc.create_buffer_group(4, 1).unwrap();
        assert_eq!(c.parent, 0);
        assert_eq!(alloc.slot_count(), 2);
    }

    #[test]
    fn child_views_start_at_offset() {
        let mut alloc = TransientAllocator::new(1);
        let id = alloc.create_buffer_group(6, 2).unwrap();
        alloc.get_buffer_mut(id.with_child(3)).unwrap()[..3].copy_from_slice(b"xyz");
        assert_eq!(alloc.get_buffer(id).unwrap(), b"\0\0\0xyz");
        assert_eq!(alloc.get_buffer(id.with_child(3)).unwrap(), b"xyz");
        assert!(alloc.get_buffer(id.with_child(7)).is_none());
    }

    #[test]
    fn budget_limits_live_bytes() {
        let mut alloc = TransientAllocator::with_budget(2, Some(100));
        let a = alloc.create_buffer_group(60, 1).unwrap();
        let err = alloc.create_buffer_group(50, 1).unwrap_err();
        assert_eq!(
            err,
            TransientError::BudgetExceeded {
                requested: 50,
                live: 60,
                budget: 100
            }
        );

        alloc.return_child(a);
        assert!(alloc.create_buffer_group(50, 1).is_ok());
    }

    #[test]
    fn zero_sized_group() {
        let mut alloc = TransientAllocator::default();
        let id = alloc.create_buffer_group(0, 1).unwrap();
        assert_eq!(alloc.get_buffer(id), Some(&[][..]));
        alloc.return_child(id);
        assert!(!alloc.is_live(id.parent));
    }
}
