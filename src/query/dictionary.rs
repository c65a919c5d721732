//! Transient string dictionary injected into result sets

use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct DictInner {
    strings: Vec<String>,
    index: HashMap<String, i32, ahash::RandomState>,
}

/// Maps strings to transient negative ids and back.
///
/// Transient ids start at -2 and grow downward, so they never collide with
/// the non-negative ids of a persisted dictionary. The handle is shared and
/// interior-mutable; query code receives it by injection rather than through
/// process-wide state.
#[derive(Default)]
pub struct StringDictionary {
    inner: Mutex<DictInner>,
}

impl StringDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `value`, allocating the next transient id if it is new
    pub fn get_or_add_transient(&self, value: &str) -> i32 {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.index.get(value) {
            return id;
        }
        let id = -(inner.strings.len() as i32) - 2;
        inner.strings.push(value.to_owned());
        inner.index.insert(value.to_owned(), id);
        id
    }

    /// Resolve a transient id back to its string
    pub fn string(&self, id: i32) -> Option<String> {
        if id > -2 {
            return None;
        }
        let idx = (-id - 2) as usize;
        self.inner.lock().strings.get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
