#![forbid(unsafe_code)]

//! Sequence interceptor.
//!
//! Every mutating method belongs to one of three notification classes, and
//! the class, not the call's outcome, decides what fires:
//!
//! - **Length-changing** (`push`, `pop`, `shift`, `unshift`, `insert`,
//!   `remove`, `extend`, `truncate`, `resize`, `clear`): run the mutation,
//!   then fire the shape key exactly once. Shifted indices are never
//!   notified individually, and the key fires even when the call was a
//!   no-op, such as `pop` on an empty sequence.
//! - **In-place, length-preserving** (`sort`, `sort_by`, `reverse`, `fill`,
//!   `fill_range`, `copy_within`, `swap`): also fire the shape key exactly
//!   once. The count is unchanged but which element sits at which index
//!   changed wholesale, and a blanket shape invalidation is cheaper than a
//!   per-index diff.
//! - **Index write** (`set`): equal value, silence; changed value in range,
//!   fire that index; write past the end, the length changed as a side
//!   effect, so fire the shape key only.
//!
//! Reads are two-tier: `get(i)` records an edge on index `i`, while `len`
//! and every iteration-style read record the shape key only. Iterating
//! depends on overall shape, not on individual element identity.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use crate::cx::ObserveCx;
use crate::dispatch::{self, Observed};
use crate::key::{OwnerId, PropKey};
use crate::value::{Raw, SeqCell};

enum WriteOutcome {
    Unchanged,
    Element,
    Grew,
}

/// Tracked view over a [`SeqCell`].
#[derive(Clone)]
pub struct ObservedSeq {
    cx: ObserveCx,
    cell: Rc<SeqCell>,
    owner: OwnerId,
}

impl ObservedSeq {
    pub(crate) fn bind(cx: &ObserveCx, cell: Rc<SeqCell>) -> Self {
        let owner = cx.owner_of_cell(&cell);
        Self {
            cx: cx.clone(),
            cell,
            owner,
        }
    }

    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The raw sequence behind this wrapper.
    #[must_use]
    pub fn raw(&self) -> Raw {
        Raw::Seq(Rc::clone(&self.cell))
    }

    fn fire_len(&self) {
        self.cx.fire_change(self.owner, &PropKey::Length);
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Element count. Records the shape key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.items.borrow().is_empty()
    }

    /// Read one index.
    ///
    /// Records an edge on that index, in or out of range; an out-of-range
    /// read returns null. Nested containers come back wrapped.
    #[must_use]
    pub fn get(&self, index: usize) -> Observed {
        self.cx.add_ref(self.owner, PropKey::index(index));
        let looked_up = self.cell.items.borrow().get(index).cloned();
        match looked_up {
            Some(value) => dispatch::resolve(&self.cx, value),
            None => Observed::Value(Raw::Null),
        }
    }

    #[must_use]
    pub fn first(&self) -> Observed {
        self.get(0)
    }

    /// Read the final element: a shape read plus an index read.
    #[must_use]
    pub fn last(&self) -> Observed {
        self.cx.add_ref(self.owner, PropKey::Length);
        let looked_up = {
            let items = self.cell.items.borrow();
            items.last().map(|value| (items.len() - 1, value.clone()))
        };
        match looked_up {
            Some((index, value)) => {
                self.cx.add_ref(self.owner, PropKey::index(index));
                dispatch::resolve(&self.cx, value)
            }
            None => Observed::Value(Raw::Null),
        }
    }

    /// Iterate a snapshot of the sequence, wrapping each element.
    ///
    /// Records the shape key once and no per-index edges.
    #[must_use]
    pub fn iter(&self) -> SeqIter {
        self.cx.add_ref(self.owner, PropKey::Length);
        let snapshot: Vec<Raw> = self.cell.items.borrow().clone();
        SeqIter {
            cx: self.cx.clone(),
            items: snapshot.into_iter(),
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Observed> {
        self.iter().collect()
    }

    pub fn for_each(&self, mut visit: impl FnMut(usize, &Observed)) {
        for (index, value) in self.iter().enumerate() {
            visit(index, &value);
        }
    }

    /// First element matching the predicate. The predicate sees wrapped
    /// elements, so tracked reads inside it still collect edges.
    pub fn find(&self, predicate: impl FnMut(&Observed) -> bool) -> Option<Observed> {
        self.iter().find(predicate)
    }

    pub fn position(&self, mut predicate: impl FnMut(&Observed) -> bool) -> Option<usize> {
        self.iter().position(|item| predicate(&item))
    }

    /// Membership by raw equality. A shape-level read.
    #[must_use]
    pub fn contains(&self, value: &Raw) -> bool {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.items.borrow().iter().any(|item| item == value)
    }

    // -----------------------------------------------------------------
    // Index writes
    // -----------------------------------------------------------------

    /// Write one index.
    ///
    /// Equal values are silent. A write past the end pads the gap with
    /// nulls; the length changed as a side effect, so only the shape key
    /// fires.
    pub fn set(&self, index: usize, value: Raw) {
        let outcome = {
            let mut items = self.cell.items.borrow_mut();
            match items.get_mut(index) {
                Some(slot) if *slot == value => WriteOutcome::Unchanged,
                Some(slot) => {
                    *slot = value;
                    WriteOutcome::Element
                }
                None => {
                    items.resize(index, Raw::Null);
                    items.push(value);
                    WriteOutcome::Grew
                }
            }
        };
        match outcome {
            WriteOutcome::Unchanged => {}
            WriteOutcome::Element => self.cx.fire_change(self.owner, &PropKey::index(index)),
            WriteOutcome::Grew => self.fire_len(),
        }
    }

    // -----------------------------------------------------------------
    // Length-changing mutators
    // -----------------------------------------------------------------

    pub fn push(&self, value: Raw) {
        self.cell.items.borrow_mut().push(value);
        self.fire_len();
    }

    pub fn pop(&self) -> Option<Raw> {
        let popped = self.cell.items.borrow_mut().pop();
        self.fire_len();
        popped
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Raw> {
        let shifted = {
            let mut items = self.cell.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.fire_len();
        shifted
    }

    /// Prepend one element.
    pub fn unshift(&self, value: Raw) {
        self.cell.items.borrow_mut().insert(0, value);
        self.fire_len();
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, value: Raw) {
        {
            let mut items = self.cell.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, value);
        }
        self.fire_len();
    }

    /// Remove the element at `index`, if in range.
    pub fn remove(&self, index: usize) -> Option<Raw> {
        let removed = {
            let mut items = self.cell.items.borrow_mut();
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        };
        self.fire_len();
        removed
    }

    /// Append every value, firing the shape key once for the whole batch.
    pub fn extend(&self, values: impl IntoIterator<Item = Raw>) {
        // Drain the caller's iterator before borrowing: it may read this
        // same sequence through a wrapper.
        let values: Vec<Raw> = values.into_iter().collect();
        self.cell.items.borrow_mut().extend(values);
        self.fire_len();
    }

    pub fn truncate(&self, len: usize) {
        self.cell.items.borrow_mut().truncate(len);
        self.fire_len();
    }

    pub fn resize(&self, len: usize, fill: Raw) {
        self.cell.items.borrow_mut().resize(len, fill);
        self.fire_len();
    }

    pub fn clear(&self) {
        self.cell.items.borrow_mut().clear();
        self.fire_len();
    }

    // -----------------------------------------------------------------
    // In-place mutators
    // -----------------------------------------------------------------

    /// Sort by the raw total order.
    pub fn sort(&self) {
        self.cell.items.borrow_mut().sort_by(Raw::total_cmp);
        self.fire_len();
    }

    /// Sort by a caller-supplied comparator over raw values.
    ///
    /// The sequence is taken out of its cell while the comparator runs, so
    /// a comparator that reads this sequence through a wrapper sees it
    /// empty rather than tripping a borrow. Writes the comparator makes
    /// through a wrapper land in that emptied cell and are discarded when
    /// the sorted items are put back, even though their notifications have
    /// already fired.
    pub fn sort_by(&self, compare: impl FnMut(&Raw, &Raw) -> Ordering) {
        let mut items = self.cell.items.take();
        items.sort_by(compare);
        self.cell.items.replace(items);
        self.fire_len();
    }

    pub fn reverse(&self) {
        self.cell.items.borrow_mut().reverse();
        self.fire_len();
    }

    /// Overwrite every element with clones of `value`.
    pub fn fill(&self, value: Raw) {
        self.cell.items.borrow_mut().fill(value);
        self.fire_len();
    }

    /// Overwrite `range`, clamped to the current bounds.
    pub fn fill_range(&self, value: Raw, range: Range<usize>) {
        {
            let mut items = self.cell.items.borrow_mut();
            let len = items.len();
            let start = range.start.min(len);
            let end = range.end.clamp(start, len);
            items[start..end].fill(value);
        }
        self.fire_len();
    }

    /// Clone `src` onto the positions starting at `dest`, clamped so both
    /// ranges stay in bounds.
    pub fn copy_within(&self, src: Range<usize>, dest: usize) {
        {
            let mut items = self.cell.items.borrow_mut();
            let len = items.len();
            let start = src.start.min(len);
            let end = src.end.clamp(start, len);
            let dest = dest.min(len);
            let count = (end - start).min(len - dest);
            let scratch: Vec<Raw> = items[start..start + count].to_vec();
            items[dest..dest + count].clone_from_slice(&scratch);
        }
        self.fire_len();
    }

    /// Swap two elements when both indices are in range.
    pub fn swap(&self, a: usize, b: usize) {
        {
            let mut items = self.cell.items.borrow_mut();
            if a < items.len() && b < items.len() {
                items.swap(a, b);
            }
        }
        self.fire_len();
    }
}

impl PartialEq for ObservedSeq {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell) && self.owner == other.owner
    }
}

impl Eq for ObservedSeq {}

impl fmt::Debug for ObservedSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedSeq")
            .field("owner", &self.owner)
            .field("cell", &self.cell)
            .finish()
    }
}

/// Snapshot iterator over a sequence, wrapping each element on the way out.
pub struct SeqIter {
    cx: ObserveCx,
    items: std::vec::IntoIter<Raw>,
}

impl Iterator for SeqIter {
    type Item = Observed;

    fn next(&mut self) -> Option<Observed> {
        self.items.next().map(|raw| dispatch::resolve(&self.cx, raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for SeqIter {}

impl fmt::Debug for SeqIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqIter({} remaining)", self.items.len())
    }
}
