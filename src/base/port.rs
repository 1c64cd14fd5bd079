//! `Port` models an IO port of a component.
//!
//! An output port and an input port are joined by `link`, which gives both the same channel. The
//! channel is a register: what the producer drives during a tick is only visible to the consumer
//! after the channel is latched at the end of that tick. Every tick starts from the idle value
//! (`T::default()`), so a producer that drives nothing transfers nothing.
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Default)]
pub struct Input;

#[derive(Default)]
pub struct Output;

struct Channel<T> {
    // value visible to the consumer this tick
    current: T,
    // value driven by the producer this tick
    next: T,
}

/// Wrapper type of a reference to a channel.  Newtype is necessary to implement get/put methods at
/// the reference type.
pub struct ChannelRef<T>(Arc<RwLock<Channel<T>>>);

impl<T> Clone for ChannelRef<T> {
    fn clone(&self) -> Self {
        ChannelRef(Arc::clone(&self.0))
    }
}

pub struct Port<D, T> {
    lock: OnceLock<ChannelRef<T>>,
    direction: PhantomData<D>,
}

impl<D, T> Default for Port<D, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, T> Port<D, T> {
    pub fn new() -> Self {
        Port {
            lock: OnceLock::new(),
            direction: PhantomData,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.lock.get().is_some()
    }

    fn channel(&self) -> &ChannelRef<T> {
        self.lock.get().expect("port not linked")
    }
}

impl<T: Default> Port<Output, T> {
    /// Drive `data` for the current tick, replacing anything driven earlier in the same tick.
    pub fn put(&mut self, data: T) {
        self.channel().put(data)
    }
}

impl<T: Default + Clone> Port<Input, T> {
    pub fn peek(&self) -> T {
        self.channel().peek()
    }

    /// Take the value latched at the end of the previous tick, leaving the idle value behind.
    pub fn get(&mut self) -> T {
        self.channel().get()
    }
}

impl<T: Default> ChannelRef<T> {
    fn put(&self, data: T) {
        self.0.write().expect("rw lock poisoned").next = data;
    }

    fn get(&self) -> T {
        std::mem::take(&mut self.0.write().expect("rw lock poisoned").current)
    }

    fn peek(&self) -> T
    where
        T: Clone,
    {
        self.0.read().expect("rw lock poisoned").current.clone()
    }
}

/// End-of-tick register update for a channel, type-erased so a clock domain can latch all of its
/// channels together.
pub trait Latch {
    fn latch(&self);
}

impl<T: Default> Latch for ChannelRef<T> {
    fn latch(&self) {
        let mut guard = self.0.write().expect("rw lock poisoned");
        let channel = &mut *guard;
        channel.current = std::mem::take(&mut channel.next);
    }
}

/// transfers data from an output port to an input port of the same type,
/// by giving them the same channel
pub fn link<T: Default>(a: &mut Port<Input, T>, b: &mut Port<Output, T>) -> ChannelRef<T> {
    let lock = Arc::new(RwLock::new(Channel::<T> {
        current: T::default(),
        next: T::default(),
    }));
    a.lock
        .set(ChannelRef(Arc::clone(&lock)))
        .map_err(|_| "")
        .expect("lock already set");
    b.lock
        .set(ChannelRef(Arc::clone(&lock)))
        .map_err(|_| "")
        .expect("lock already set");
    ChannelRef(lock)
}
