#![forbid(unsafe_code)]

//! Record and date interceptors.
//!
//! A record notifies per field: reading `get("count")` records an edge on
//! `Field("count")`, writing the same field fires exactly that key. Adding a
//! brand-new field also fires only its own key, which pairs with the
//! absent-field rule on the read side: `get` of a missing field returns null
//! *and* records the edge, so the observer reruns when the field appears.
//! Iteration-style reads (`keys`, `entries`, `len`) record the shape key
//! instead of one edge per field; record writes never fire that key, so a
//! shape edge on a record only matters to facades that fire it directly.
//!
//! Dates are single-channel. Every read of the stored instant, however it is
//! sliced, records the one date key; every mutator fires it, without testing
//! for redundant writes.

use std::fmt;
use std::rc::Rc;

use crate::cx::ObserveCx;
use crate::dispatch::{self, Observed};
use crate::key::{OwnerId, PropKey};
use crate::value::{BoundFn, DateCell, MS_PER_DAY, Raw, RecordCell, civil_from_days, days_from_civil};

// ───────────────────────────────────────────────────────────────────────────
// Call errors
// ───────────────────────────────────────────────────────────────────────────

/// Failure modes of [`ObservedRecord::call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The record has no field with the requested name.
    NoSuchField { field: String },
    /// The field exists but does not hold a function.
    NotCallable { field: String },
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchField { field } => write!(f, "no field named `{field}`"),
            Self::NotCallable { field } => write!(f, "field `{field}` is not callable"),
        }
    }
}

impl std::error::Error for CallError {}

// ───────────────────────────────────────────────────────────────────────────
// Record interceptor
// ───────────────────────────────────────────────────────────────────────────

/// Tracked view over a [`RecordCell`].
///
/// Cloning the wrapper is cheap and shares the underlying cell; wrappers
/// bound to the same cell through the same context compare equal.
#[derive(Clone)]
pub struct ObservedRecord {
    cx: ObserveCx,
    cell: Rc<RecordCell>,
    owner: OwnerId,
}

impl ObservedRecord {
    pub(crate) fn bind(cx: &ObserveCx, cell: Rc<RecordCell>) -> Self {
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

    /// The raw record behind this wrapper.
    #[must_use]
    pub fn raw(&self) -> Raw {
        Raw::Record(Rc::clone(&self.cell))
    }

    /// Read one field.
    ///
    /// Records an edge on the field and wraps nested containers. An absent
    /// field reads as null but still records the edge. Function fields come
    /// back as [`Observed::Method`] bound to the raw record, with no edge:
    /// a method lookup is not a data dependency.
    #[must_use]
    pub fn get(&self, name: &str) -> Observed {
        let looked_up = self.cell.fields.borrow().get(name).cloned();
        match looked_up {
            Some(Raw::Fn(func)) => Observed::Method(BoundFn {
                recv: self.raw(),
                func,
            }),
            Some(value) => {
                self.cx.add_ref(self.owner, PropKey::field(name));
                dispatch::resolve(&self.cx, value)
            }
            None => {
                self.cx.add_ref(self.owner, PropKey::field(name));
                Observed::Value(Raw::Null)
            }
        }
    }

    /// Whether the field is present. Records an edge on the field, so the
    /// observer reruns when the field appears or is overwritten.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.cx.add_ref(self.owner, PropKey::field(name));
        self.cell.fields.borrow().contains_key(name)
    }

    /// Write one field, firing `Field(name)` on change.
    ///
    /// A write that stores an identical value is silent. Identity follows
    /// [`Raw`] equality: primitives compare by value, containers by cell.
    pub fn set(&self, name: &str, value: Raw) {
        {
            let mut fields = self.cell.fields.borrow_mut();
            if let Some(slot) = fields.get_mut(name) {
                if *slot == value {
                    return;
                }
                *slot = value;
            } else {
                fields.insert(Rc::from(name), value);
            }
        }
        self.cx.fire_change(self.owner, &PropKey::field(name));
    }

    /// Field count. A shape-level read: records the shape key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.fields.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.fields.borrow().is_empty()
    }

    /// Snapshot of field names in insertion order. Records the shape key.
    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.fields.borrow().keys().map(Rc::clone).collect()
    }

    /// Snapshot of `(name, value)` pairs in insertion order.
    ///
    /// Iteration is a shape-level read: one edge on the shape key, none per
    /// field. Values still resolve through the dispatcher, so nested
    /// containers come back wrapped and function fields come back bound.
    #[must_use]
    pub fn entries(&self) -> Vec<(Rc<str>, Observed)> {
        self.cx.add_ref(self.owner, PropKey::Length);
        let snapshot: Vec<(Rc<str>, Raw)> = self
            .cell
            .fields
            .borrow()
            .iter()
            .map(|(name, value)| (Rc::clone(name), value.clone()))
            .collect();
        snapshot
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    Raw::Fn(func) => Observed::Method(BoundFn {
                        recv: self.raw(),
                        func,
                    }),
                    other => dispatch::resolve(&self.cx, other),
                };
                (name, value)
            })
            .collect()
    }

    pub fn for_each(&self, mut visit: impl FnMut(&str, &Observed)) {
        for (name, value) in self.entries() {
            visit(&name, &value);
        }
    }

    /// Invoke a function field against the raw record.
    ///
    /// No field borrow is held while the function body runs, so the body may
    /// mutate the record it was called on. Records no edge.
    pub fn call(&self, name: &str, args: &[Raw]) -> Result<Raw, CallError> {
        let looked_up = self.cell.fields.borrow().get(name).cloned();
        match looked_up {
            Some(Raw::Fn(func)) => {
                let bound = BoundFn {
                    recv: self.raw(),
                    func,
                };
                Ok(bound.call(args))
            }
            Some(_) => Err(CallError::NotCallable {
                field: name.to_owned(),
            }),
            None => Err(CallError::NoSuchField {
                field: name.to_owned(),
            }),
        }
    }
}

impl PartialEq for ObservedRecord {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell) && self.owner == other.owner
    }
}

impl Eq for ObservedRecord {}

impl fmt::Debug for ObservedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedRecord")
            .field("owner", &self.owner)
            .field("cell", &self.cell)
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Date interceptor
// ───────────────────────────────────────────────────────────────────────────

/// Tracked view over a [`DateCell`].
///
/// All reads funnel through the single date key, so an observer that looked
/// at any slice of the instant reruns on any date mutation.
#[derive(Clone)]
pub struct ObservedDate {
    cx: ObserveCx,
    cell: Rc<DateCell>,
    owner: OwnerId,
}

impl ObservedDate {
    pub(crate) fn bind(cx: &ObserveCx, cell: Rc<DateCell>) -> Self {
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

    #[must_use]
    pub fn raw(&self) -> Raw {
        Raw::Date(Rc::clone(&self.cell))
    }

    /// Milliseconds since the Unix epoch. Records the date edge.
    #[must_use]
    pub fn millis(&self) -> i64 {
        self.cx.add_ref(self.owner, PropKey::DateStamp);
        self.cell.millis.get()
    }

    fn days(&self) -> i64 {
        self.millis().div_euclid(MS_PER_DAY)
    }

    /// Proleptic Gregorian year, UTC.
    #[must_use]
    pub fn year(&self) -> i64 {
        civil_from_days(self.days()).0
    }

    /// Month of year, `1..=12`, UTC.
    #[must_use]
    pub fn month(&self) -> u32 {
        civil_from_days(self.days()).1
    }

    /// Day of month, `1..=31`, UTC.
    #[must_use]
    pub fn day(&self) -> u32 {
        civil_from_days(self.days()).2
    }

    /// Day of week, `0 = Sunday .. 6 = Saturday`, UTC.
    #[must_use]
    pub fn weekday(&self) -> u32 {
        // 1970-01-01 was a Thursday.
        let weekday = (self.days() + 4).rem_euclid(7);
        u32::try_from(weekday).unwrap_or(0)
    }

    /// Milliseconds since UTC midnight, `0..MS_PER_DAY`.
    #[must_use]
    pub fn time_of_day(&self) -> i64 {
        self.millis().rem_euclid(MS_PER_DAY)
    }

    /// Store a new instant. Always fires the date key, even when the stored
    /// value is unchanged.
    pub fn set_millis(&self, millis: i64) {
        self.cell.millis.set(millis);
        self.cx.fire_change(self.owner, &PropKey::DateStamp);
    }

    /// Shift the instant, saturating at the representable range.
    pub fn add_millis(&self, delta: i64) {
        self.set_millis(self.cell.millis.get().saturating_add(delta));
    }

    /// Move to a calendar date, keeping the time of day.
    ///
    /// `month` is clamped to `1..=12` and `day` to `1..=31`; a day past the
    /// end of the month rolls over into the next, matching civil-day
    /// arithmetic. Years past what the millisecond clock can hold saturate
    /// the stored instant at the representable range.
    pub fn set_date(&self, year: i64, month: u32, day: u32) {
        let month = month.clamp(1, 12);
        let day = day.clamp(1, 31);
        let time = self.cell.millis.get().rem_euclid(MS_PER_DAY);
        let days = days_from_civil(year, month, day);
        self.set_millis(days.saturating_mul(MS_PER_DAY).saturating_add(time));
    }
}

impl PartialEq for ObservedDate {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell) && self.owner == other.owner
    }
}

impl Eq for ObservedDate {}

impl fmt::Debug for ObservedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedDate")
            .field("owner", &self.owner)
            .field("cell", &self.cell)
            .finish()
    }
}
