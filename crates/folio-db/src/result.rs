//! Result containers filled by statements.
//!
//! A statement writes into its container while it executes; the caller
//! reads it afterwards. Both containers are first-write-wins: a retried or
//! duplicated write path can never replace the value the first successful
//! write stored.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Holds at most one value of type `T`.
#[derive(Debug)]
pub struct SingleResult<T> {
    inner: Mutex<SingleInner<T>>,
}

#[derive(Debug)]
struct SingleInner<T> {
    value: Option<T>,
    has_been_set: bool,
}

impl<T> SingleResult<T> {
    /// An empty container.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(SingleInner {
                value: None,
                has_been_set: false,
            }),
        }
    }

    /// Store `value` unless a value has already been stored.
    pub fn set(&self, value: T) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.has_been_set {
            return;
        }
        inner.value = Some(value);
        inner.has_been_set = true;
    }

    /// Whether [`SingleResult::set`] has been called.
    pub fn has_been_set(&self) -> bool {
        self.inner.lock().is_ok_and(|inner| inner.has_been_set)
    }
}

impl<T: Clone> SingleResult<T> {
    /// The held value, or `None` if nothing was stored.
    pub fn get(&self) -> Option<T> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.value.clone())
    }
}

impl<T: Clone + Default> SingleResult<T> {
    /// The held value without an absence check; unset reads as `T::default()`.
    pub fn value(&self) -> T {
        self.get().unwrap_or_default()
    }
}

impl<T> Default for SingleResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds an ordered sequence of `T`, consumed front to back.
#[derive(Debug)]
pub struct MultipleResult<T> {
    inner: Mutex<MultipleInner<T>>,
}

#[derive(Debug)]
struct MultipleInner<T> {
    items: VecDeque<T>,
    has_been_set: bool,
}

impl<T> MultipleResult<T> {
    /// An empty container.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(MultipleInner {
                items: VecDeque::new(),
                has_been_set: false,
            }),
        }
    }

    /// Store `items` unless a sequence has already been stored.
    pub fn set(&self, items: Vec<T>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.has_been_set {
            return;
        }
        inner.items = items.into();
        inner.has_been_set = true;
    }

    /// Pop the front element.
    pub fn next(&self) -> Option<T> {
        self.inner.lock().ok().and_then(|mut inner| inner.items.pop_front())
    }

    /// Whether at least **two** elements remain.
    ///
    /// Paginated reads fetch one row past the page; a cursor loop calling
    /// `next` while `has_next` holds leaves exactly that look-ahead row
    /// unconsumed.
    pub fn has_next(&self) -> bool {
        self.remaining() >= 2
    }

    /// Number of elements not yet consumed.
    pub fn remaining(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.items.len())
    }

    /// Take every element not yet consumed.
    pub fn drain(&self) -> Vec<T> {
        self.inner
            .lock()
            .map(|mut inner| inner.items.drain(..).collect())
            .unwrap_or_default()
    }

    /// Whether [`MultipleResult::set`] has been called.
    pub fn has_been_set(&self) -> bool {
        self.inner.lock().is_ok_and(|inner| inner.has_been_set)
    }
}

impl<T> Default for MultipleResult<T> {
    fn default() -> Self {
        Self::new()
    }
}
