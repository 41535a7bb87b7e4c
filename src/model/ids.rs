//! Newtype class identifier.
//!
//! A class id is the position of a class name in `AppData::classes`, or the
//! sentinel `-1` for a box that has not been assigned a class yet. Keeping it
//! a newtype stops raw indices from other sources (detector outputs, COCO
//! category ids) from being stored without going through a mapping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a class in the class list, or [`ClassId::UNASSIGNED`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub i32);

impl ClassId {
    /// Sentinel for boxes without a class.
    pub const UNASSIGNED: ClassId = ClassId(-1);

    /// Creates a new ClassId.
    #[inline]
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    /// Creates a ClassId from a class list index.
    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self(i32::try_from(index).unwrap_or(-1))
    }

    /// Returns the underlying value.
    #[inline]
    pub fn as_i32(&self) -> i32 {
        self.0
    }

    /// Returns the class list index, or `None` for negative ids.
    #[inline]
    pub fn index(&self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    #[inline]
    pub fn is_assigned(&self) -> bool {
        self.0 >= 0
    }

    /// Returns true if the id is unassigned or indexes into a class list of
    /// length `num_classes`.
    #[inline]
    pub fn is_valid_for(&self, num_classes: usize) -> bool {
        match self.index() {
            Some(index) => index < num_classes,
            None => *self == Self::UNASSIGNED,
        }
    }
}

impl Default for ClassId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl From<i32> for ClassId {
    fn from(id: i32) -> Self {
        ClassId::new(id)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
