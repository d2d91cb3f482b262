//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Carrot.
//
// Carrot is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Carrot is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Carrot. If not, see <http://www.gnu.org/licenses/>.

use std::sync::{Arc, Mutex};

/// A list which is cheap to iterate while other threads modify it.
///
/// Readers take an immutable snapshot; writers replace the whole backing
/// vector under a short lock. This suits sets that are read far more often
/// than they change, such as event listeners or the members of a chat room.
pub struct CowList<T> {
    items: Mutex<Arc<Vec<T>>>,
}

impl<T> Default for CowList<T> {
    fn default() -> Self {
        CowList {
            items: Mutex::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: Clone> CowList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current contents.
    ///
    /// Later modifications are not reflected in the returned snapshot.
    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.items.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    pub fn push(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        let mut new = Vec::clone(&items);
        new.push(item);
        *items = Arc::new(new);
    }

    /// Add `item` unless an existing element satisfies `conflicts`.
    ///
    /// Returns whether `item` was added.
    pub fn push_unless(
        &self,
        item: T,
        mut conflicts: impl FnMut(&T) -> bool,
    ) -> bool {
        let mut items = self.items.lock().unwrap();
        if items.iter().any(|i| conflicts(i)) {
            return false;
        }

        let mut new = Vec::clone(&items);
        new.push(item);
        *items = Arc::new(new);
        true
    }

    /// Remove every element for which `remove` returns true, returning the
    /// removed elements in their original order.
    pub fn remove_where(&self, mut remove: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut items = self.items.lock().unwrap();
        if !items.iter().any(|i| remove(i)) {
            return Vec::new();
        }

        let (removed, kept): (Vec<T>, Vec<T>) =
            items.iter().cloned().partition(|i| remove(i));
        *items = Arc::new(kept);
        removed
    }

    /// Remove everything, returning what was there.
    pub fn clear(&self) -> Arc<Vec<T>> {
        let mut items = self.items.lock().unwrap();
        std::mem::replace(&mut *items, Arc::new(Vec::new()))
    }
}
