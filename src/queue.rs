pub trait Queue<T: Send> {

    /// Adds the element `e` to the back of the queue.
    fn push(&self, e: T);

    /// Retrieves and removes the head of this queue or returns None if the
    /// queue is empty.
    fn try_pop(&self) -> Option<T>;

    /// Returns true if the underlying data structure does not contain any
    /// elements.
    fn is_empty(&self) -> bool;
}

pub trait SyncQueue<T: Send> : Queue<T> {
    /// Retrieves and removes the head of this queue, waiting if necessary
    /// until an element becomes available. Returns None once the queue has
    /// been stopped.
    fn wait_and_pop(&self) -> Option<T>;

    /// Releases every consumer blocked in `wait_and_pop`, now and in the
    /// future.
    fn notify_stop(&self);

    fn is_stopped(&self) -> bool;
}
