//! Working lists of CRNs still waiting for an outcome

use serde::Serialize;

/// Which side of the add/drop request a list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Add,
    Drop,
}

impl Role {
    /// Label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            Role::Add => "add",
            Role::Drop => "drop",
        }
    }
}

/// Ordered set of CRNs pending a successful outcome for one role.
///
/// Items are unique; insertion order is kept for display. Serializes as a
/// plain JSON array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WorkingList {
    items: Vec<String>,
}

impl WorkingList {
    /// Build a list, dropping repeated CRNs after their first occurrence.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for item in items {
            list.push(item.into());
        }
        list
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.iter().any(|i| i == item)
    }

    /// Append `item` unless it is already present. Returns whether it was added.
    pub fn push(&mut self, item: String) -> bool {
        if self.contains(&item) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Remove `item`. Returns whether it was present.
    pub fn remove(&mut self, item: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i != item);
        self.items.len() != before
    }

    /// Put `new` in the slot held by `old`.
    ///
    /// If `new` is already in the list, `old` is just removed so the list
    /// stays duplicate-free. Returns false when `old` was not present.
    pub fn replace(&mut self, old: &str, new: String) -> bool {
        let Some(pos) = self.items.iter().position(|i| i == old) else {
            return false;
        };
        if self.contains(&new) {
            self.items.remove(pos);
        } else {
            self.items[pos] = new;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }
}

impl<S: Into<String>> FromIterator<S> for WorkingList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// The add and drop working lists submitted together in one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingLists {
    pub add: WorkingList,
    pub drop: WorkingList,
}

impl WorkingLists {
    pub fn new(add: WorkingList, drop: WorkingList) -> Self {
        Self { add, drop }
    }

    pub fn get(&self, role: Role) -> &WorkingList {
        match role {
            Role::Add => &self.add,
            Role::Drop => &self.drop,
        }
    }

    /// True once every CRN has reached a final outcome.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.drop.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.add.len() + self.drop.len()
    }
}
