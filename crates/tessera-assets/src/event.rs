//! Asynchronous I/O events.
//!
//! Every read submitted to the [`AsyncIo`](crate::io::AsyncIo) backend carries
//! an [`IoTag`] naming what it was for. The poll stage matches on the tag to
//! find the originating record: an asset slot inside an index batch, or a
//! pending entity blob.

use tessera_core::id::HashId;

use crate::context::LoadingContext;

// ---------------------------------------------------------------------------
// IoTag
// ---------------------------------------------------------------------------

/// Routing tag attached to a read request and echoed in its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoTag {
    /// An asset read: slot `slot` of index batch `batch`.
    Asset { batch: u64, slot: usize },
    /// A whole entity blob.
    Entity { entity_id: HashId },
}

// ---------------------------------------------------------------------------
// AsyncAssetEvent
// ---------------------------------------------------------------------------

/// Resolution state of one scheduled asset read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Pending,
    Available,
    Broken,
}

/// A scheduled asset read and its outcome.
///
/// Owned by the index batch that scheduled it. The outcome is set exactly
/// once, either by the completion poll or by the stall deadline.
#[derive(Debug)]
pub struct AsyncAssetEvent {
    /// `None` once handed to the index callback.
    context: Option<LoadingContext>,
    state: EventState,
    /// Pipeline tick during which the read was submitted.
    scheduled_tick: u64,
}

impl AsyncAssetEvent {
    pub fn new(context: LoadingContext, scheduled_tick: u64) -> Self {
        Self {
            context: Some(context),
            state: EventState::Pending,
            scheduled_tick,
        }
    }

    pub fn is_available(&self) -> bool {
        self.state == EventState::Available
    }

    pub fn is_broken(&self) -> bool {
        self.state == EventState::Broken
    }

    /// Available or broken.
    pub fn is_resolved(&self) -> bool {
        self.state != EventState::Pending
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn scheduled_tick(&self) -> u64 {
        self.scheduled_tick
    }

    /// Mark the read as successfully completed.
    ///
    /// Returns `false` without changing anything if the event was already
    /// resolved.
    pub fn mark_available(&mut self) -> bool {
        self.resolve(EventState::Available)
    }

    /// Mark the read as permanently failed.
    ///
    /// Returns `false` without changing anything if the event was already
    /// resolved.
    pub fn mark_broken(&mut self) -> bool {
        self.resolve(EventState::Broken)
    }

    fn resolve(&mut self, state: EventState) -> bool {
        if self.state != EventState::Pending {
            tracing::warn!(
                current = ?self.state,
                requested = ?state,
                asset_id = ?self.context.as_ref().map(|c| c.asset_id),
                "asset event already resolved"
            );
            return false;
        }
        self.state = state;
        true
    }

    pub fn context(&self) -> Option<&LoadingContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut LoadingContext> {
        self.context.as_mut()
    }

    /// Take the context out for indexing. Subsequent calls return `None`.
    pub fn take_context(&mut self) -> Option<LoadingContext> {
        self.context.take()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AssetRequest;
    use tessera_core::id::GroupId;

    fn event() -> AsyncAssetEvent {
        let request = AssetRequest::new(
            GroupId::from_names("audio", "clip"),
            HashId::from_name("boom.wav"),
            10,
        );
        AsyncAssetEvent::new(LoadingContext::from_request(&request), 3)
    }

    #[test]
    fn resolves_exactly_once() {
        let mut ev = event();
        assert!(!ev.is_resolved());
        assert!(ev.mark_available());
        assert!(!ev.mark_broken());
        assert!(ev.is_available());
        assert!(!ev.is_broken());
    }

    #[test]
    fn broken_is_terminal() {
        let mut ev = event();
        assert!(ev.mark_broken());
        assert!(!ev.mark_available());
        assert_eq!(ev.state(), EventState::Broken);
        assert_eq!(ev.scheduled_tick(), 3);
    }

    #[test]
    fn context_taken_once() {
        let mut ev = event();
        assert!(ev.take_context().is_some());
        assert!(ev.take_context().is_none());
        assert!(ev.context().is_none());
    }
}
