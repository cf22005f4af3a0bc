//! Lock-free FIFO queue of parked waiters.
//!
//! [`WaitQueue`] holds one node per blocked thread. Producers append at the
//! tail with a compare-and-swap loop and never block. Consumers (releasers
//! waking the head, condition signals moving nodes elsewhere, timed-out
//! waiters pruning themselves) take turns through a single consumer slot.
//! A releaser that finds the slot busy records its wake request and leaves;
//! the thread holding the slot serves every request before giving it up, so
//! no releaser ever waits for another.
//!
//! ## Structure
//!
//! Two intrusive singly-linked lanes, each with a permanent stub node
//! (Vyukov's MPSC queue). New waiters join the main lane. A waiter that was
//! woken but lost its retry rejoins through the retry lane, which consumers
//! drain first, so it keeps its place ahead of everyone who queued after it.
//!
//! The queue keeps one strong reference to each linked node; the waiter
//! keeps another. A node is therefore freed only once it is both unlinked
//! and abandoned by its thread, whichever happens last.
//!
//! Cancellation is terminal and lazy: a cancelled node stays linked until a
//! consumer reaches it, and consumers treat it as absent.
//!
//! ## Ordering
//!
//! Linking a node and requesting a wake are each followed by a
//! `SeqCst` fence. A waiter links, then re-checks the state word; a releaser
//! changes the state word, then scans the lanes. The fences order the two
//! sides so one of them always sees the other.

use core::ptr;
use std::sync::Arc;

use bitflags::bitflags;

use super::loom_compat::{
    AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering, Thread, current, fence, park,
    park_timeout, spin_loop, yield_now,
};
use super::stress::stress_delay;
use super::wait::Wait;
use crate::SyncError;

bitflags! {
    /// Lifecycle flags of a waiter node. No flag set means queued and
    /// waiting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct NodeStatus: u8 {
        /// Woken by a release; the owner must re-validate its condition.
        const SIGNALLED = 1 << 0;
        /// Abandoned after a timeout or cancellation. Terminal.
        const CANCELLED = 1 << 1;
        /// Moved from a condition queue onto its lock's queue.
        const TRANSFERRED = 1 << 2;
    }
}

/// Which kind of acquisition a waiter is blocked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// At most one holder (locks).
    Exclusive,
    /// Many holders, counted in the state word (latches, semaphores,
    /// barriers).
    Shared,
}

/// One blocked caller.
pub(crate) struct Node {
    next: AtomicPtr<Node>,
    status: AtomicU8,
    mode: Mode,
    /// `None` only for the stubs.
    thread: Option<Thread>,
}

impl Node {
    /// Creates a waiting node for the calling thread.
    pub(crate) fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            next: AtomicPtr::new(ptr::null_mut()),
            status: AtomicU8::new(NodeStatus::empty().bits()),
            mode,
            thread: Some(current()),
        })
    }

    fn stub() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            status: AtomicU8::new(NodeStatus::empty().bits()),
            mode: Mode::Exclusive,
            thread: None,
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn status(&self) -> NodeStatus {
        NodeStatus::from_bits_retain(self.status.load(Ordering::SeqCst))
    }

    /// Resets a signalled node so it can be queued again.
    ///
    /// Only the owning thread calls this, after a wake it could not use.
    pub(crate) fn rearm(&self) {
        debug_assert!(self.status().contains(NodeStatus::SIGNALLED));
        self.status
            .store(NodeStatus::empty().bits(), Ordering::SeqCst);
    }

    /// Adds `flag` if `allowed` accepts the current status.
    ///
    /// Returns `true` if this call made the transition.
    fn transition(&self, allowed: impl Fn(NodeStatus) -> bool, flag: NodeStatus) -> bool {
        let mut raw = self.status.load(Ordering::SeqCst);
        loop {
            let status = NodeStatus::from_bits_retain(raw);
            if !allowed(status) {
                return false;
            }
            match self.status.compare_exchange_weak(
                raw,
                (status | flag).bits(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => raw = actual,
            }
        }
    }

    fn unpark(&self) {
        if let Some(thread) = &self.thread {
            thread.unpark();
        }
    }
}

/// Result of [`WaitQueue::park`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parked {
    /// A consumer signalled the node. The node is no longer linked.
    Signalled,
    /// The wait expired or was cancelled. The node is cancelled.
    Aborted(SyncError),
}

/// What the consumer sees at the head of a lane.
enum Front {
    Empty,
    /// A producer swapped the tail but has not linked its node yet.
    Busy,
    Node(*mut Node),
}

/// Exponential spin, then yield. Used only while a producer finishes its
/// two-step link or while another consumer holds the slot.
struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    fn new() -> Self {
        Self { step: 0 }
    }

    fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                spin_loop();
            }
            self.step += 1;
        } else {
            yield_now();
        }
    }
}

/// One linked list of nodes with its own stub.
struct Lane {
    /// Consumer end. Only touched by the holder of the consumer slot.
    head: AtomicPtr<Node>,
    /// Producer end.
    tail: AtomicPtr<Node>,
    stub: Arc<Node>,
}

impl Lane {
    fn new() -> Self {
        let stub = Arc::new(Node::stub());
        let stub_ptr = Arc::as_ptr(&stub).cast_mut();
        Self {
            head: AtomicPtr::new(stub_ptr),
            tail: AtomicPtr::new(stub_ptr),
            stub,
        }
    }

    fn stub_ptr(&self) -> *mut Node {
        Arc::as_ptr(&self.stub).cast_mut()
    }

    fn push(&self, node: Arc<Node>) {
        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        self.link(Arc::into_raw(node).cast_mut());
    }

    fn link(&self, node: *mut Node) {
        let mut prev = self.tail.load(Ordering::SeqCst);
        loop {
            stress_delay();
            match self
                .tail
                .compare_exchange_weak(prev, node, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
        stress_delay();
        crate::assert_unsafe_precondition!(!prev.is_null());
        // SAFETY: `prev` was the tail when the CAS succeeded. The consumer
        // never unlinks a node whose `next` is still null while it is the
        // tail (it reports `Busy` instead), and the stub lives as long as
        // the lane.
        unsafe { (*prev).next.store(node, Ordering::SeqCst) };
    }

    /// Returns the first real node, stepping over the stub.
    ///
    /// # Safety
    ///
    /// The caller must hold the consumer slot.
    unsafe fn front(&self) -> Front {
        let stub = self.stub_ptr();
        let mut head = self.head.load(Ordering::Relaxed);
        // SAFETY: `head` is the stub or a linked node the lane holds a
        // reference to.
        let next = unsafe { &*head }.next.load(Ordering::SeqCst);
        if head == stub {
            if next.is_null() {
                return if self.tail.load(Ordering::SeqCst) == stub {
                    Front::Empty
                } else {
                    Front::Busy
                };
            }
            self.head.store(next, Ordering::Relaxed);
            head = next;
        }
        Front::Node(head)
    }

    /// Unlinks `head`, handing back the lane's reference to it. `None`
    /// means a producer is mid-link behind it.
    ///
    /// # Safety
    ///
    /// The caller must hold the consumer slot, and `head` must be the node
    /// most recently returned by [`front`](Self::front).
    unsafe fn pop_front(&self, head: *mut Node) -> Option<Arc<Node>> {
        crate::assert_unsafe_precondition!(head != self.stub_ptr());
        // SAFETY: `head` is linked; the lane holds a reference to it.
        let node = unsafe { &*head };
        let mut next = node.next.load(Ordering::SeqCst);
        if next.is_null() {
            if self.tail.load(Ordering::SeqCst) != head {
                return None;
            }
            // `head` is the last node: put the stub behind it so it can
            // leave without emptying the list under a producer.
            self.stub.next.store(ptr::null_mut(), Ordering::SeqCst);
            self.link(self.stub_ptr());
            next = node.next.load(Ordering::SeqCst);
            if next.is_null() {
                return None;
            }
        }
        self.head.store(next, Ordering::Relaxed);
        // SAFETY: `head` came from `Arc::into_raw` in `push` and is no
        // longer reachable from the list.
        Some(unsafe { Arc::from_raw(head.cast_const()) })
    }

    /// One attempt at taking the head: `Ok(None)` when the lane is empty,
    /// `Err(())` while a producer is mid-link.
    ///
    /// # Safety
    ///
    /// The caller must hold the consumer slot.
    unsafe fn take(&self) -> Result<Option<Arc<Node>>, ()> {
        // SAFETY: slot held by the caller.
        match unsafe { self.front() } {
            Front::Empty => Ok(None),
            Front::Busy => Err(()),
            // SAFETY: `head` was just returned by `front`.
            Front::Node(head) => unsafe { self.pop_front(head) }.map(Some).ok_or(()),
        }
    }

    /// Drops cancelled nodes sitting at the head.
    ///
    /// # Safety
    ///
    /// The caller must hold the consumer slot.
    unsafe fn prune(&self) {
        // SAFETY: slot held by the caller; `head` is linked and alive.
        while let Front::Node(head) = unsafe { self.front() } {
            if !unsafe { &*head }.status().contains(NodeStatus::CANCELLED) {
                break;
            }
            // SAFETY: `head` was just returned by `front`.
            if unsafe { self.pop_front(head) }.is_none() {
                break;
            }
        }
    }
}

/// A FIFO queue of parked waiters.
///
/// The queue never owns a waiter's lifetime beyond a reference count: the
/// blocked thread keeps its node alive while it waits and drops it when it
/// resumes.
pub struct WaitQueue {
    /// Woken waiters that lost their retry. Served before `main`.
    retry: Lane,
    main: Lane,
    consuming: AtomicBool,
    /// Outstanding `unpark_head` requests.
    wakes: AtomicUsize,
    /// Outstanding `unpark_all` request.
    wake_all: AtomicBool,
    /// Linked nodes that are still waiting (neither signalled nor
    /// cancelled, nor transferred away).
    queued: AtomicUsize,
    /// Signalled nodes whose owner has not yet finished its retry.
    woken: AtomicUsize,
}

impl WaitQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            retry: Lane::new(),
            main: Lane::new(),
            consuming: AtomicBool::new(false),
            wakes: AtomicUsize::new(0),
            wake_all: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            woken: AtomicUsize::new(0),
        }
    }

    /// Returns `true` if at least one queued node is still waiting.
    pub fn has_waiters(&self) -> bool {
        self.len() > 0
    }

    /// Number of queued nodes still waiting. A snapshot, stale on return.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Returns `true` if no queued node is waiting.
    pub fn is_empty(&self) -> bool {
        !self.has_waiters()
    }

    /// Number of woken waiters that have not yet finished their retry.
    pub(crate) fn woken(&self) -> usize {
        self.woken.load(Ordering::SeqCst)
    }

    /// Wakes the first waiting node, skipping cancelled ones.
    ///
    /// A no-op if nobody is waiting. Never blocks: if another thread is
    /// already consuming, the request is left for it.
    pub fn unpark_head(&self) {
        fence(Ordering::SeqCst);
        self.wakes.fetch_add(1, Ordering::SeqCst);
        self.drain();
    }

    /// Wakes every node queued at the time the request is served.
    pub fn unpark_all(&self) {
        fence(Ordering::SeqCst);
        self.wake_all.store(true, Ordering::SeqCst);
        self.drain();
    }

    /// Appends `node` at the tail.
    pub(crate) fn enqueue(&self, node: Arc<Node>) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.main.push(node);
        fence(Ordering::SeqCst);
    }

    /// Puts a woken node back, ahead of every node still in the main lane.
    ///
    /// The node must have been signalled from this queue and re-armed.
    pub(crate) fn requeue(&self, node: Arc<Node>) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.retry.push(node);
        fence(Ordering::SeqCst);
    }

    /// Records that the owner of a signalled node has finished its retry,
    /// whether it acquired or went back with [`requeue`](Self::requeue).
    pub(crate) fn finish_wake(&self) {
        let prev = self.woken.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "finish_wake without a signalled node");
    }

    /// Returns whether `node` is the first waiting node and no woken waiter
    /// is still retrying. `None` if another thread holds the consumer slot
    /// and the answer is unknown.
    pub(crate) fn first_in_line(&self, node: &Node) -> Option<bool> {
        if self.woken() > 0 {
            return Some(false);
        }
        if !self.try_claim_consumer() {
            return None;
        }
        // SAFETY: the consumer slot is held until `release_consumer`.
        let first = match unsafe { self.first_waiting() } {
            Front::Node(head) => ptr::eq(head.cast_const(), ptr::from_ref(node)),
            Front::Empty | Front::Busy => false,
        };
        self.release_consumer();
        Some(first)
    }

    /// Parks the calling thread until `node` is signalled, or until `wait`
    /// expires while the node is still plainly waiting.
    ///
    /// A node that was transferred from a condition queue can no longer be
    /// cancelled; its owner keeps parking until the lock's queue signals it.
    pub(crate) fn park(&self, node: &Node, wait: &Wait<'_>) -> Parked {
        loop {
            let status = node.status();
            if status.contains(NodeStatus::SIGNALLED) {
                return Parked::Signalled;
            }
            if status.contains(NodeStatus::TRANSFERRED) {
                park();
                continue;
            }
            if let Some(err) = wait.expired() {
                if self.cancel(node) {
                    return Parked::Aborted(err);
                }
                // Lost the race against a signal; the next pass sees it.
                continue;
            }
            match wait.remaining() {
                Some(timeout) => park_timeout(timeout),
                None => park(),
            }
        }
    }

    /// Marks a waiting node cancelled. Returns `false` if it was already
    /// signalled, transferred or cancelled.
    pub(crate) fn cancel(&self, node: &Node) -> bool {
        if node.transition(|s| s.is_empty(), NodeStatus::CANCELLED) {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.drain();
            true
        } else {
            false
        }
    }

    /// Takes back a node whose owner no longer needs a wake: it acquired
    /// on its own recheck. Unlike [`cancel`](Self::cancel) this also covers
    /// a node transferred onto this queue. Returns `false` if the node was
    /// already signalled or cancelled.
    pub(crate) fn withdraw(&self, node: &Node) -> bool {
        let withdrawn = node.transition(
            |s| !s.intersects(NodeStatus::SIGNALLED | NodeStatus::CANCELLED),
            NodeStatus::CANCELLED,
        );
        if withdrawn {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            self.drain();
        }
        withdrawn
    }

    /// Moves the first waiting node (or all of them) onto `dest` without
    /// waking anyone. Returns how many moved.
    pub(crate) fn transfer_to(&self, dest: &WaitQueue, all: bool) -> usize {
        let mut backoff = Backoff::new();
        while !self.try_claim_consumer() {
            backoff.snooze();
        }
        let mut moved = 0;
        // SAFETY: the consumer slot is held until `release_consumer`.
        while let Some(node) = unsafe { self.pop() } {
            if node.transition(|s| s.is_empty(), NodeStatus::TRANSFERRED) {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                dest.enqueue(node);
                moved += 1;
                if !all {
                    break;
                }
            }
        }
        self.release_consumer();
        moved
    }

    // -----------------------------------------------------------------------
    // Consumer side
    // -----------------------------------------------------------------------

    fn try_claim_consumer(&self) -> bool {
        self.consuming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Gives up the slot and serves any request that arrived meanwhile.
    fn release_consumer(&self) {
        self.consuming.store(false, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if self.has_requests() {
            self.drain();
        }
    }

    fn has_requests(&self) -> bool {
        self.wakes.load(Ordering::SeqCst) > 0 || self.wake_all.load(Ordering::SeqCst)
    }

    /// Serves pending requests if the consumer slot is free.
    fn drain(&self) {
        loop {
            fence(Ordering::SeqCst);
            if !self.try_claim_consumer() {
                // The holder re-checks the requests after releasing the slot.
                return;
            }
            // SAFETY: the consumer slot is held until the store below.
            unsafe { self.consume() };
            self.consuming.store(false, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            if !self.has_requests() {
                return;
            }
        }
    }

    /// # Safety
    ///
    /// The caller must hold the consumer slot.
    unsafe fn consume(&self) {
        crate::assert_unsafe_precondition!(
            self.consuming.load(Ordering::Relaxed),
            "wait queue consumed without holding the consumer slot"
        );
        loop {
            let all = self.wake_all.swap(false, Ordering::SeqCst);
            let mut wakes = self.wakes.swap(0, Ordering::SeqCst);
            if !all && wakes == 0 {
                break;
            }
            fence(Ordering::SeqCst);
            while all || wakes > 0 {
                // SAFETY: slot held by the caller.
                let Some(node) = (unsafe { self.pop() }) else {
                    // Requests against an empty queue are dropped; a waiter
                    // that links later re-checks the state word before
                    // parking.
                    break;
                };
                if self.signal(&node) {
                    wakes = wakes.saturating_sub(1);
                }
            }
        }
        // SAFETY: slot held by the caller.
        unsafe {
            self.retry.prune();
            self.main.prune();
        }
    }

    fn signal(&self, node: &Node) -> bool {
        let woken = node.transition(
            |s| !s.intersects(NodeStatus::SIGNALLED | NodeStatus::CANCELLED),
            NodeStatus::SIGNALLED,
        );
        if woken {
            // Counted as woken before it stops counting as queued.
            self.woken.fetch_add(1, Ordering::SeqCst);
            self.queued.fetch_sub(1, Ordering::SeqCst);
            node.unpark();
        }
        woken
    }

    /// The first live node across both lanes, pruning cancelled ones.
    ///
    /// # Safety
    ///
    /// The caller must hold the consumer slot.
    unsafe fn first_waiting(&self) -> Front {
        for lane in [&self.retry, &self.main] {
            // SAFETY: slot held by the caller.
            unsafe { lane.prune() };
            match unsafe { lane.front() } {
                Front::Empty => {}
                front => return front,
            }
        }
        Front::Empty
    }

    /// Unlinks and returns the head node, retry lane first, spinning while
    /// a producer is mid-link. `None` means both lanes are empty.
    ///
    /// # Safety
    ///
    /// The caller must hold the consumer slot.
    unsafe fn pop(&self) -> Option<Arc<Node>> {
        let mut backoff = Backoff::new();
        loop {
            // SAFETY: slot held by the caller.
            let taken = match unsafe { self.retry.take() } {
                Ok(None) => unsafe { self.main.take() },
                other => other,
            };
            match taken {
                Ok(node) => return node,
                Err(()) => backoff.snooze(),
            }
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        // Nobody else can reach the queue any more; release every node.
        self.consuming.store(true, Ordering::Relaxed);
        // SAFETY: exclusive access through `&mut self`.
        while unsafe { self.pop() }.is_some() {}
    }
}

impl core::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitQueue")
            .field("waiting", &self.len())
            .field("woken", &self.woken())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::test_util::wait_until;
    use std::time::Duration;

    fn queued(queue: &WaitQueue, count: usize) -> Vec<Arc<Node>> {
        (0..count)
            .map(|_| {
                let node = Node::new(Mode::Exclusive);
                queue.enqueue(Arc::clone(&node));
                node
            })
            .collect()
    }

    #[test]
    fn unpark_head_on_empty_queue_is_noop() {
        let queue = WaitQueue::new();
        queue.unpark_head();
        queue.unpark_all();
        assert!(queue.is_empty());
        // The dropped requests do not linger for the next waiter.
        let nodes = queued(&queue, 1);
        assert_eq!(nodes[0].status(), NodeStatus::empty());
    }

    #[test]
    fn unpark_head_is_fifo() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 3);
        assert_eq!(queue.len(), 3);

        queue.unpark_head();
        assert_eq!(nodes[0].status(), NodeStatus::SIGNALLED);
        assert_eq!(nodes[1].status(), NodeStatus::empty());

        queue.unpark_head();
        assert_eq!(nodes[1].status(), NodeStatus::SIGNALLED);
        assert_eq!(nodes[2].status(), NodeStatus::empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancelled_node_is_skipped() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 3);
        assert!(queue.cancel(&nodes[0]));
        assert!(!queue.cancel(&nodes[0]), "cancellation is terminal");

        queue.unpark_head();
        assert_eq!(nodes[0].status(), NodeStatus::CANCELLED);
        assert_eq!(nodes[1].status(), NodeStatus::SIGNALLED);
        assert_eq!(nodes[2].status(), NodeStatus::empty());
    }

    #[test]
    fn signalled_node_cannot_be_cancelled() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 1);
        queue.unpark_head();
        assert!(!queue.cancel(&nodes[0]));
        assert_eq!(nodes[0].status(), NodeStatus::SIGNALLED);
    }

    #[test]
    fn withdraw_takes_back_transferred_node() {
        let condition = WaitQueue::new();
        let lock = WaitQueue::new();
        let nodes = queued(&condition, 1);
        condition.transfer_to(&lock, false);
        assert!(lock.withdraw(&nodes[0]));
        assert!(lock.is_empty());
        lock.unpark_head();
        assert!(!nodes[0].status().contains(NodeStatus::SIGNALLED));
    }

    #[test]
    fn unpark_all_wakes_everyone() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 4);
        queue.unpark_all();
        assert!(nodes
            .iter()
            .all(|n| n.status() == NodeStatus::SIGNALLED));
        assert!(queue.is_empty());
    }

    #[test]
    fn requeued_node_is_served_before_main_lane() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 2);
        queue.unpark_head();
        assert_eq!(queue.woken(), 1);
        nodes[0].rearm();
        queue.requeue(Arc::clone(&nodes[0]));
        queue.finish_wake();
        assert_eq!(queue.woken(), 0);
        assert_eq!(queue.len(), 2);

        let late = queued(&queue, 1);
        queue.unpark_head();
        assert_eq!(nodes[0].status(), NodeStatus::SIGNALLED);
        assert_eq!(nodes[1].status(), NodeStatus::empty());
        queue.unpark_head();
        assert_eq!(nodes[1].status(), NodeStatus::SIGNALLED);
        assert_eq!(late[0].status(), NodeStatus::empty());
    }

    #[test]
    fn first_in_line_follows_the_head() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 2);
        assert_eq!(queue.first_in_line(&nodes[0]), Some(true));
        assert_eq!(queue.first_in_line(&nodes[1]), Some(false));

        assert!(queue.cancel(&nodes[0]));
        assert_eq!(queue.first_in_line(&nodes[1]), Some(true));
    }

    #[test]
    fn woken_waiter_blocks_first_in_line() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 2);
        queue.unpark_head();
        // The woken owner has not retried yet.
        assert_eq!(queue.first_in_line(&nodes[1]), Some(false));
        queue.finish_wake();
        assert_eq!(queue.first_in_line(&nodes[1]), Some(true));
    }

    #[test]
    fn transfer_moves_without_waking() {
        let condition = WaitQueue::new();
        let lock = WaitQueue::new();
        let nodes = queued(&condition, 3);

        assert_eq!(condition.transfer_to(&lock, false), 1);
        assert_eq!(nodes[0].status(), NodeStatus::TRANSFERRED);
        assert!(!condition.cancel(&nodes[0]));
        assert_eq!(lock.len(), 1);

        assert_eq!(condition.transfer_to(&lock, true), 2);
        assert!(condition.is_empty());
        assert_eq!(lock.len(), 3);

        lock.unpark_head();
        assert!(nodes[0].status().contains(NodeStatus::SIGNALLED));
        assert!(!nodes[1].status().contains(NodeStatus::SIGNALLED));
    }

    #[test]
    fn park_returns_when_signalled() {
        let queue = Arc::new(WaitQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let node = Node::new(Mode::Shared);
                queue.enqueue(Arc::clone(&node));
                queue.park(&node, &Wait::forever())
            })
        };
        assert!(wait_until(|| queue.has_waiters()));
        queue.unpark_head();
        assert_eq!(waiter.join().unwrap(), Parked::Signalled);
    }

    #[test]
    fn park_times_out_and_cancels() {
        let queue = WaitQueue::new();
        let node = Node::new(Mode::Exclusive);
        queue.enqueue(Arc::clone(&node));
        let outcome = queue.park(&node, &Wait::timeout(Duration::from_millis(10)));
        assert_eq!(outcome, Parked::Aborted(SyncError::TimedOut));
        assert_eq!(node.status(), NodeStatus::CANCELLED);
        assert!(queue.is_empty());
    }

    #[test]
    fn pruned_and_dropped_nodes_are_released() {
        let queue = WaitQueue::new();
        let nodes = queued(&queue, 3);
        assert!(queue.cancel(&nodes[0]));
        // Pruning on cancel released the queue's reference to the head.
        assert_eq!(Arc::strong_count(&nodes[0]), 1);
        assert_eq!(Arc::strong_count(&nodes[1]), 2);
        drop(queue);
        assert!(nodes.iter().all(|n| Arc::strong_count(n) == 1));
    }

    #[test]
    fn concurrent_producers_are_all_served() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 200;

        let queue = Arc::new(WaitQueue::new());
        let producers: Vec<_> = (0..THREADS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|_| {
                            let node = Node::new(Mode::Shared);
                            queue.enqueue(Arc::clone(&node));
                            node
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let nodes: Vec<_> = producers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(queue.len(), THREADS * PER_THREAD);
        for _ in 0..THREADS * PER_THREAD {
            queue.unpark_head();
        }
        assert!(queue.is_empty());
        assert!(nodes
            .iter()
            .all(|n| n.status() == NodeStatus::SIGNALLED));
    }
}
