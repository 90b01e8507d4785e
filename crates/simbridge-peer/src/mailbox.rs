//! Single-slot blocking hand-off between an I/O worker and its caller.
//!
//! A [`Mailbox`] holds at most one message. Producers block while the slot is
//! occupied and never overwrite it. The sender side can [`claim`](Mailbox::claim)
//! a message, keeping the slot busy until it calls [`release`](Mailbox::release),
//! so the next producer only proceeds once the previous message was written.
//!
//! [`close`](Mailbox::close) wakes every waiter; it is how a discarded
//! connection stops its workers and bounces callers to the next connection.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Why a `put` did not place its value. The value is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PutError<T> {
    Closed(T),
    TimedOut(T),
}

impl<T> PutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PutError::Closed(value) | PutError::TimedOut(value) => value,
        }
    }
}

/// Why a `take` or `claim` returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
    Closed,
    TimedOut,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    in_flight: bool,
    closed: bool,
}

impl<T> Slot<T> {
    fn occupied(&self) -> bool {
        self.value.is_some() || self.in_flight
    }
}

/// Capacity-1 blocking channel.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                in_flight: false,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Place `value`, blocking while the slot is occupied.
    pub fn put(&self, value: T) -> Result<(), PutError<T>> {
        self.put_until(value, None)
    }

    pub fn put_timeout(&self, value: T, timeout: Duration) -> Result<(), PutError<T>> {
        self.put_until(value, Some(Instant::now() + timeout))
    }

    /// Place `value`, giving up at `deadline`.
    pub fn put_until(&self, value: T, deadline: Option<Instant>) -> Result<(), PutError<T>> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Err(PutError::Closed(value));
            }
            if !slot.occupied() {
                slot.value = Some(value);
                self.cond.notify_all();
                return Ok(());
            }
            match self.wait(slot, deadline) {
                Some(guard) => slot = guard,
                None => return Err(PutError::TimedOut(value)),
            }
        }
    }

    /// Remove and return the message, blocking until one arrives.
    ///
    /// A message left in a closed mailbox is still returned.
    pub fn take(&self) -> Result<T, TakeError> {
        self.take_until(None)
    }

    pub fn take_timeout(&self, timeout: Duration) -> Result<T, TakeError> {
        self.take_until(Some(Instant::now() + timeout))
    }

    pub fn take_until(&self, deadline: Option<Instant>) -> Result<T, TakeError> {
        let mut slot = self.lock();
        loop {
            if let Some(value) = slot.value.take() {
                self.cond.notify_all();
                return Ok(value);
            }
            if slot.closed {
                return Err(TakeError::Closed);
            }
            match self.wait(slot, deadline) {
                Some(guard) => slot = guard,
                None => return Err(TakeError::TimedOut),
            }
        }
    }

    /// Non-blocking take.
    pub fn try_take(&self) -> Option<T> {
        let value = self.lock().value.take();
        if value.is_some() {
            self.cond.notify_all();
        }
        value
    }

    /// Take the message but keep the slot occupied until [`release`](Self::release).
    ///
    /// Fails with `Closed` as soon as the mailbox is closed, even if a message
    /// is pending.
    pub fn claim(&self) -> Result<T, TakeError> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Err(TakeError::Closed);
            }
            if let Some(value) = slot.value.take() {
                slot.in_flight = true;
                return Ok(value);
            }
            slot = self
                .cond
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Mark a claimed message as consumed; wakes a blocked producer.
    pub fn release(&self) {
        self.lock().in_flight = false;
        self.cond.notify_all();
    }

    /// Close the mailbox and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True while a message is pending or claimed.
    pub fn is_occupied(&self) -> bool {
        self.lock().occupied()
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a change. `None` means the deadline passed.
    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, Slot<T>>,
        deadline: Option<Instant>,
    ) -> Option<MutexGuard<'a, Slot<T>>> {
        match deadline {
            None => Some(
                self.cond
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
            ),
            Some(deadline) => {
                let remaining = deadline.checked_duration_since(Instant::now())?;
                if remaining.is_zero() {
                    return None;
                }
                let (guard, _) = self
                    .cond
                    .wait_timeout(guard, remaining)
                    .unwrap_or_else(PoisonError::into_inner);
                Some(guard)
            }
        }
    }
}
