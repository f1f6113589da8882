use crate::{Queue, SyncQueue};
use std::{fmt, ptr};
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An unbounded FIFO queue in which values are contained by a linked list.
///
/// The queue uses the "two lock" algorithm: producers only contend on the
/// tail lock and consumers only contend on the head lock. The list always
/// begins with a dummy node, so the queue is empty exactly when the head and
/// the tail reference the same node.
///
/// Consumers may block in [`wait_and_pop`](LinkedQueue::wait_and_pop) until a
/// value is pushed or [`notify_stop`](LinkedQueue::notify_stop) is called.
/// Once stopped, pops no longer hand out values, although pushes are still
/// accepted.
///
/// `LinkedQueue` is a handle; clones share the same queue.
pub struct LinkedQueue<T: Send> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Send> LinkedQueue<T> {
    /// Constructs a new, empty `LinkedQueue<T>`.
    pub fn new() -> LinkedQueue<T> {
        LinkedQueue {
            inner: Arc::new(QueueInner::new()),
        }
    }

    /// Returns the number of elements in the queue.
    ///
    /// The value is a snapshot and may be stale by the time it is observed.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the queue contains no elements.
    ///
    /// Like `len`, this is a hint and must not be used for synchronization.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns `true` once `notify_stop` has been called on any handle.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Appends `e` to the back of the queue and wakes one waiting consumer.
    ///
    /// The append only takes the tail lock. Waking the consumer briefly takes
    /// the head lock after the tail lock is released, so producers do contend
    /// with consumers for that moment; without it a consumer that has just
    /// found the queue empty could miss the wakeup.
    pub fn push(&self, e: T) {
        self.inner.push(e);
    }

    /// Takes from the queue if there is an element available.
    ///
    /// Returns `None` without blocking when the queue is empty or stopped.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.try_pop()
    }

    /// Takes from the queue into `out` if there is an element available.
    ///
    /// Returns `false` and leaves `out` untouched when the queue is empty or
    /// stopped.
    pub fn try_pop_into(&self, out: &mut T) -> bool {
        fill(self.inner.try_pop(), out)
    }

    /// Takes from the queue, blocking until there is an element available or
    /// the queue is stopped.
    ///
    /// Returns `None` if the queue is stopped, even if elements remain.
    pub fn wait_and_pop(&self) -> Option<T> {
        self.inner.wait_and_pop()
    }

    /// Blocking counterpart of `try_pop_into`.
    pub fn wait_and_pop_into(&self, out: &mut T) -> bool {
        fill(self.inner.wait_and_pop(), out)
    }

    /// Stops the queue and wakes every blocked consumer.
    ///
    /// Calling this more than once has no further effect.
    pub fn notify_stop(&self) {
        self.inner.notify_stop();
    }
}

impl<T: Send> Queue<T> for LinkedQueue<T> {
    fn push(&self, e: T) {
        LinkedQueue::push(self, e)
    }

    fn try_pop(&self) -> Option<T> {
        LinkedQueue::try_pop(self)
    }

    fn is_empty(&self) -> bool {
        LinkedQueue::is_empty(self)
    }
}

impl<T: Send> SyncQueue<T> for LinkedQueue<T> {
    fn wait_and_pop(&self) -> Option<T> {
        LinkedQueue::wait_and_pop(self)
    }

    fn notify_stop(&self) {
        LinkedQueue::notify_stop(self)
    }

    fn is_stopped(&self) -> bool {
        LinkedQueue::is_stopped(self)
    }
}

impl<T: Send> Clone for LinkedQueue<T> {
    fn clone(&self) -> LinkedQueue<T> {
        LinkedQueue { inner: self.inner.clone() }
    }
}

impl<T: Send> Default for LinkedQueue<T> {
    fn default() -> LinkedQueue<T> {
        LinkedQueue::new()
    }
}

impl<T: Send> fmt::Debug for LinkedQueue<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("LinkedQueue")
            .field("len", &self.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn fill<T>(val: Option<T>, out: &mut T) -> bool {
    match val {
        Some(val) => {
            *out = val;
            true
        }
        None => false,
    }
}

//  Two lock queue, after Michael & Scott.
//
//  `head` always points at a dummy node whose item has been consumed (or was
//  never set). Values live in the nodes reachable from `head.next`. `tail`
//  points at the last node of the chain; it is a position, not an owner. Every
//  node is owned by its predecessor and the first one by `head`.
//
//  Pushers take only the tail lock. Consumers take the head lock and, to
//  decide emptiness, momentarily take the tail lock while still holding it.
//  Nothing ever holds the tail lock while acquiring the head lock.
//
//  Visibility: a pusher writes `tail.next` and then moves `tail` under the
//  tail lock. A consumer only follows `head.next` after observing, under the
//  tail lock, that `tail != head`, which orders it after the write.
//
//  Nodes are only touched through raw pointers and field places, never
//  through a reference to a whole node: when the queue holds a single value,
//  a pusher writes `tail.next` on the very node a consumer is taking the item
//  out of.
struct QueueInner<T: Send> {

    // Lock held by try_pop, wait_and_pop, etc
    head: Mutex<NodePtr<T>>,

    // Lock held by push
    tail: Mutex<NodePtr<T>>,

    // Current number of elements
    count: AtomicUsize,

    // Set once by notify_stop
    stopped: AtomicBool,

    // Wait queue for blocked consumers
    not_empty: Condvar,

    // The chain owns values of type T
    _marker: PhantomData<T>,
}

// Nodes are only reached through the locks above
unsafe impl<T: Send> Send for QueueInner<T> {}
unsafe impl<T: Send> Sync for QueueInner<T> {}

impl<T: Send> QueueInner<T> {
    fn new() -> QueueInner<T> {
        let dummy = NodePtr::new(Node::empty());

        QueueInner {
            head: Mutex::new(dummy),
            tail: Mutex::new(dummy),
            count: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            not_empty: Condvar::new(),
            _marker: PhantomData,
        }
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn is_empty(&self) -> bool {
        let head = lock(&self.head);
        *head == self.get_tail()
    }

    // Must be called while holding the head lock
    fn get_tail(&self) -> NodePtr<T> {
        *lock(&self.tail)
    }

    fn push(&self, e: T) {
        // Allocate outside of the lock
        let node = NodePtr::new(Node::new(e));

        {
            let mut tail = lock(&self.tail);
            tail.set_next(node);
            *tail = node;

            // Counted before the node can be observed by a consumer
            self.count.fetch_add(1, Ordering::Relaxed);
        }

        self.notify_not_empty();
    }

    fn try_pop(&self) -> Option<T> {
        let mut head = lock(&self.head);

        if self.is_stopped() || *head == self.get_tail() {
            return None;
        }

        let (val, old) = self.dequeue(&mut head);
        drop(head);

        old.free();
        Some(val)
    }

    fn wait_and_pop(&self) -> Option<T> {
        let head = lock(&self.head);

        let mut head = self.not_empty
            .wait_while(head, |head| !self.is_stopped() && *head == self.get_tail())
            .unwrap_or_else(PoisonError::into_inner);

        // Shutdown wins over available data
        if self.is_stopped() {
            return None;
        }

        let (val, old) = self.dequeue(&mut head);
        drop(head);

        old.free();
        Some(val)
    }

    fn notify_stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("queue stopped; remaining={}", self.len());

        let _head = lock(&self.head);
        self.not_empty.notify_all();
    }

    // Acquiring the head lock before signaling closes the window between a
    // consumer evaluating the wait predicate and parking on the condvar.
    fn notify_not_empty(&self) {
        let _head = lock(&self.head);
        self.not_empty.notify_one();
    }

    // Promotes `head.next` to be the new dummy, returning its item along with
    // the detached old dummy. The queue must be non-empty.
    fn dequeue(&self, head: &mut MutexGuard<NodePtr<T>>) -> (T, NodePtr<T>) {
        let old = **head;
        let first = old.next();

        let val = first.take_item();
        **head = first;

        self.count.fetch_sub(1, Ordering::Relaxed);

        (val, old)
    }
}

impl<T: Send> Drop for QueueInner<T> {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut().unwrap_or_else(PoisonError::into_inner);

        // Iterative so that long chains do not overflow the stack
        while !node.is_null() {
            let next = node.next();
            node.free();
            node = next;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // No user code runs while either lock is held, so a poisoned lock still
    // guards a consistent chain.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Node<T> {
    item: Option<T>,
    next: NodePtr<T>,
}

impl<T> Node<T> {
    fn new(val: T) -> Node<T> {
        Node {
            item: Some(val),
            next: NodePtr::null(),
        }
    }

    fn empty() -> Node<T> {
        Node {
            item: None,
            next: NodePtr::null(),
        }
    }
}

struct NodePtr<T> {
    ptr: *mut Node<T>,
}

impl<T> NodePtr<T> {
    fn new(node: Node<T>) -> NodePtr<T> {
        NodePtr { ptr: Box::into_raw(Box::new(node)) }
    }

    fn null() -> NodePtr<T> {
        NodePtr { ptr: ptr::null_mut() }
    }

    fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    fn next(&self) -> NodePtr<T> {
        debug_assert!(!self.is_null());
        unsafe { (*self.ptr).next }
    }

    fn set_next(&self, next: NodePtr<T>) {
        debug_assert!(!self.is_null());
        unsafe { (*self.ptr).next = next; }
    }

    fn take_item(&self) -> T {
        debug_assert!(!self.is_null());
        unsafe { (*self.ptr).item.take() }
            .expect("item already consumed")
    }

    fn free(self) {
        debug_assert!(!self.is_null());
        drop(unsafe { Box::from_raw(self.ptr) });
    }
}

impl<T> Clone for NodePtr<T> {
    fn clone(&self) -> NodePtr<T> {
        *self
    }
}

impl<T> Copy for NodePtr<T> {}

impl<T> PartialEq for NodePtr<T> {
    fn eq(&self, other: &NodePtr<T>) -> bool {
        ptr::eq(self.ptr, other.ptr)
    }
}

impl<T> Eq for NodePtr<T> {}

unsafe impl<T: Send> Send for NodePtr<T> {}
