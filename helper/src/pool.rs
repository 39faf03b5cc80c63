use crossbeam_queue::ArrayQueue;

/// Bounded free-list of reusable values, shared between request handlers.
///
/// When empty, [`Pool::take`] builds a fresh value; when full,
/// [`Pool::give_back`] evicts the oldest parked value.
pub struct Pool<T: Default> {
    free: ArrayQueue<T>,
}

impl<T: Default> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Self { free: ArrayQueue::new(capacity.max(1)) }
    }

    pub fn take(&self) -> T { self.free.pop().unwrap_or_default() }

    pub fn give_back(&self, value: T) { self.free.force_push(value); }

    pub fn parked(&self) -> usize { self.free.len() }
}
