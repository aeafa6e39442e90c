//! Request definitions and the fixed-capacity request store
//!
//! The store is an arena of `Option<Request>` slots with an explicit occupied
//! count and a rotating cursor. Selection for the next transaction starts just
//! past the cursor and wraps, so no pending request is served twice before
//! every other pending request has been served once.

use std::fmt;
use std::time::Instant;

use tracing::warn;

/// Result of one consumed request, handed to its completion callback.
///
/// Ownership of the request's data buffer returns to the caller here. For
/// reads, `data` holds the decoded values on success and its prior (possibly
/// stale) contents on failure. For writes it holds the values that were sent.
pub struct TransferOutcome {
    /// Whether the transaction completed with a valid, non-exception reply
    pub success: bool,
    /// The request's data buffer
    pub data: Vec<u16>,
    /// Caller-supplied correlation tag
    pub tag: u32,
}

/// Completion callback, invoked synchronously from the engine tick,
/// exactly once per consumed request. Must not re-enter the engine.
pub type Callback = Box<dyn FnOnce(TransferOutcome) + Send>;

/// One queued read or write operation.
///
/// Coil values use packed word storage: logical coil `i` lives in
/// `data[i / 16]`, bit `i % 16`.
pub struct Request {
    /// Target unit (slave) address, 1-247
    pub unit_id: u8,
    /// Raw Modbus function code
    pub function: u8,
    /// Starting register or coil address
    pub address: u16,
    /// Register count, coil count, or write value depending on function
    pub quantity: u16,
    /// Values to write, or destination for read results
    pub data: Vec<u16>,
    /// Completion callback; taken exactly once when the transaction ends
    pub(crate) callback: Option<Callback>,
    /// Caller-supplied correlation tag, passed through to the callback
    pub tag: u32,
    /// When the request entered the store
    pub(crate) queued_at: Instant,
}

impl Request {
    /// Create a request. `data` carries write payloads and receives read
    /// results; for reads it may start empty.
    pub fn new(
        unit_id: u8,
        function: u8,
        address: u16,
        quantity: u16,
        data: Vec<u16>,
        tag: u32,
        callback: Callback,
    ) -> Self {
        Self {
            unit_id,
            function,
            address,
            quantity,
            data,
            callback: Some(callback),
            tag,
            queued_at: Instant::now(),
        }
    }

    /// Consume the request into its callback outcome, firing the callback.
    ///
    /// The callback has already been taken if the request was abandoned by a
    /// store clear; in that case nothing fires.
    pub(crate) fn complete(mut self, success: bool) {
        if let Some(callback) = self.callback.take() {
            callback(TransferOutcome {
                success,
                data: self.data,
                tag: self.tag,
            });
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("unit_id", &self.unit_id)
            .field("function", &format_args!("0x{:02X}", self.function))
            .field("address", &self.address)
            .field("quantity", &self.quantity)
            .field("data_len", &self.data.len())
            .field("tag", &self.tag)
            .field("queued_at", &self.queued_at)
            .finish()
    }
}

/// Fixed-capacity request store with round-robin selection
pub struct RequestQueue {
    slots: Box<[Option<Request>]>,
    /// Number of occupied slots; invariant: equals `slots.iter().flatten().count()`
    count: usize,
    /// Last slot served; scanning for the next starts just past it
    cursor: usize,
}

impl RequestQueue {
    /// Create a store with `capacity` slots (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            count: 0,
            cursor: 0,
        }
    }

    /// Number of pending requests
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if no requests are pending
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total slot capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store a request in the first free slot.
    ///
    /// Returns the request unchanged when every slot is occupied, so the
    /// caller keeps the buffer and callback and may retry later.
    pub fn push(&mut self, request: Request) -> Result<usize, Request> {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(request);
                self.count += 1;
                Ok(index)
            },
            None => Err(request),
        }
    }

    /// Select the next pending request round-robin, advancing the cursor.
    ///
    /// Returns the slot index; the request stays in its slot until taken.
    /// If a full scan finds no occupied slot despite a nonzero count, the
    /// count is reset to zero rather than trusted: bookkeeping drift must
    /// degrade to an empty queue, never to a stuck engine. That branch is
    /// unreachable under correct operation.
    pub fn next(&mut self) -> Option<usize> {
        if self.count == 0 {
            return None;
        }

        let capacity = self.slots.len();
        for step in 1..=capacity {
            let index = (self.cursor + step) % capacity;
            if self.slots[index].is_some() {
                self.cursor = index;
                return Some(index);
            }
        }

        warn!(
            count = self.count,
            "request store count out of sync with slots; resetting to empty"
        );
        self.count = 0;
        None
    }

    /// Borrow the request in `index`, if occupied
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Request> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Mutably borrow the request in `index`, if occupied
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Request> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Remove and return the request in `index`, freeing the slot
    pub fn take(&mut self, index: usize) -> Option<Request> {
        let request = self.slots.get_mut(index).and_then(Option::take);
        if request.is_some() {
            self.count -= 1;
        }
        request
    }

    /// Drop every queued request without invoking callbacks.
    ///
    /// This is the only cancellation mechanism; a request that is
    /// mid-transaction is abandoned silently.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.count = 0;
        self.cursor = 0;
    }

    /// Test-only invariant check: count matches occupied slots
    #[cfg(test)]
    pub(crate) fn count_consistent(&self) -> bool {
        self.count == self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Test-only: corrupt the count to exercise the self-healing branch
    #[cfg(test)]
    pub(crate) fn force_count(&mut self, count: usize) {
        self.count = count;
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("capacity", &self.slots.len())
            .field("count", &self.count)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::constants::FC_READ_HOLDING_REGISTERS;

    fn dummy_request(unit_id: u8) -> Request {
        Request::new(
            unit_id,
            FC_READ_HOLDING_REGISTERS,
            0,
            1,
            Vec::new(),
            u32::from(unit_id),
            Box::new(|_| {}),
        )
    }

    #[test]
    fn test_push_until_full() {
        let mut queue = RequestQueue::new(3);
        assert!(queue.push(dummy_request(1)).is_ok());
        assert!(queue.push(dummy_request(2)).is_ok());
        assert!(queue.push(dummy_request(3)).is_ok());
        assert_eq!(queue.len(), 3);
        assert!(queue.count_consistent());

        // Fourth push hands the request back
        let rejected = queue.push(dummy_request(4));
        assert!(rejected.is_err());
        assert_eq!(rejected.unwrap_err().unit_id, 4);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_round_robin_selection() {
        let mut queue = RequestQueue::new(4);
        for unit in 1..=4 {
            queue.push(dummy_request(unit)).unwrap();
        }

        // Two full rotations: each slot served once per rotation, in order
        let mut served = Vec::new();
        for _ in 0..8 {
            let index = queue.next().unwrap();
            served.push(queue.get(index).unwrap().unit_id);
        }
        assert_eq!(served, vec![2, 3, 4, 1, 2, 3, 4, 1]);
    }

    #[test]
    fn test_round_robin_skips_freed_slots() {
        let mut queue = RequestQueue::new(4);
        for unit in 1..=4 {
            queue.push(dummy_request(unit)).unwrap();
        }

        let first = queue.next().unwrap();
        assert_eq!(queue.get(first).unwrap().unit_id, 2);
        queue.take(first).unwrap();
        assert!(queue.count_consistent());

        let mut served = Vec::new();
        for _ in 0..3 {
            let index = queue.next().unwrap();
            served.push(queue.get(index).unwrap().unit_id);
        }
        assert_eq!(served, vec![3, 4, 1]);
    }

    #[test]
    fn test_next_on_empty() {
        let mut queue = RequestQueue::new(4);
        assert!(queue.next().is_none());
    }

    #[test]
    fn test_self_healing_count_reset() {
        let mut queue = RequestQueue::new(4);
        queue.force_count(2); // bookkeeping drift: no slot is actually occupied

        assert!(queue.next().is_none());
        assert_eq!(queue.len(), 0);
        assert!(queue.count_consistent());
    }

    #[test]
    fn test_clear_skips_callbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicUsize::new(0));
        let mut queue = RequestQueue::new(2);
        for _ in 0..2 {
            let fired = Arc::clone(&fired);
            queue
                .push(Request::new(
                    1,
                    FC_READ_HOLDING_REGISTERS,
                    0,
                    1,
                    Vec::new(),
                    0,
                    Box::new(move |_| {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }),
                ))
                .unwrap();
        }

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.count_consistent());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Store is reusable after clear
        assert!(queue.push(dummy_request(1)).is_ok());
    }

    #[test]
    fn test_complete_fires_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let request = Request::new(
            5,
            FC_READ_HOLDING_REGISTERS,
            100,
            2,
            vec![10, 300],
            42,
            Box::new(move |outcome| {
                assert!(outcome.success);
                assert_eq!(outcome.data, vec![10, 300]);
                assert_eq!(outcome.tag, 42);
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        request.complete(true);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
