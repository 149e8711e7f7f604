#![forbid(unsafe_code)]

//! Raw value model shared by every interceptor.
//!
//! [`Raw`] is the unwrapped state tree: primitives plus reference-counted
//! container cells. Container payloads sit behind `RefCell` so wrappers can
//! mutate through shared handles, and each cell carries a `mark` slot where
//! the in-place ownership model stamps its owner identity.
//!
//! Equality is deliberately shallow: primitives compare by value (floats by
//! bit pattern, so `NaN == NaN` holds and `0.0 != -0.0`), containers compare
//! by cell identity. The redundant-write guard in the interceptors leans on
//! exactly this distinction, and hashing follows the same rules so any `Raw`
//! can serve as a map key.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use web_time::SystemTime;

use crate::key::OwnerId;

/// Insertion-ordered field table of a record cell.
pub type FieldMap = IndexMap<Rc<str>, Raw, ahash::RandomState>;
/// Insertion-ordered entry table of a map cell.
pub type EntryMap = IndexMap<Raw, Raw, ahash::RandomState>;
/// Insertion-ordered member table of a set cell.
pub type MemberSet = IndexSet<Raw, ahash::RandomState>;

/// Milliseconds per civil day.
pub(crate) const MS_PER_DAY: i64 = 86_400_000;

// ---------------------------------------------------------------------------
// Container cells
// ---------------------------------------------------------------------------

/// Shared payload of a record value.
pub struct RecordCell {
    pub(crate) fields: RefCell<FieldMap>,
    pub(crate) mark: Cell<Option<OwnerId>>,
}

/// Shared payload of a sequence value.
pub struct SeqCell {
    pub(crate) items: RefCell<Vec<Raw>>,
    pub(crate) mark: Cell<Option<OwnerId>>,
}

/// Shared payload of a keyed map value.
pub struct MapCell {
    pub(crate) entries: RefCell<EntryMap>,
    pub(crate) mark: Cell<Option<OwnerId>>,
}

/// Shared payload of a uniqueness-set value.
pub struct SetCell {
    pub(crate) members: RefCell<MemberSet>,
    pub(crate) mark: Cell<Option<OwnerId>>,
}

/// Shared payload of a mutable date: milliseconds since the Unix epoch.
pub struct DateCell {
    pub(crate) millis: Cell<i64>,
    pub(crate) mark: Cell<Option<OwnerId>>,
}

// Debug stays shallow: cells can sit inside their own payloads, and a deep
// print would recurse or trip a held borrow.

impl fmt::Debug for RecordCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fields.try_borrow() {
            Ok(fields) => write!(f, "RecordCell({} fields)", fields.len()),
            Err(_) => f.write_str("RecordCell(<borrowed>)"),
        }
    }
}

impl fmt::Debug for SeqCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.items.try_borrow() {
            Ok(items) => write!(f, "SeqCell({} items)", items.len()),
            Err(_) => f.write_str("SeqCell(<borrowed>)"),
        }
    }
}

impl fmt::Debug for MapCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entries.try_borrow() {
            Ok(entries) => write!(f, "MapCell({} entries)", entries.len()),
            Err(_) => f.write_str("MapCell(<borrowed>)"),
        }
    }
}

impl fmt::Debug for SetCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.members.try_borrow() {
            Ok(members) => write!(f, "SetCell({} members)", members.len()),
            Err(_) => f.write_str("SetCell(<borrowed>)"),
        }
    }
}

impl fmt::Debug for DateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateCell({} ms)", self.millis.get())
    }
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// A native function stored in a record field.
///
/// The calling convention is receiver-first: invoked through a wrapper,
/// `func` receives the raw record it was read from, never the wrapper, so a
/// function body cannot create dependency edges by accident.
#[derive(Clone, Copy)]
pub struct NativeFn {
    /// Name used in diagnostics and `Debug` output.
    pub name: &'static str,
    /// The function body.
    pub func: fn(&Raw, &[Raw]) -> Raw,
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn<{}>", self.name)
    }
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool {
        self.func as usize == other.func as usize && self.name == other.name
    }
}

impl Eq for NativeFn {}

impl Hash for NativeFn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.func as usize).hash(state);
    }
}

/// A function read out of a record, bound to the raw record it came from.
///
/// Produced by [`ObservedRecord::get`](crate::record::ObservedRecord::get)
/// when the field holds a [`NativeFn`]. Reading a function field records no
/// dependency, and calling through the binding runs against raw state.
#[derive(Clone, Debug)]
pub struct BoundFn {
    pub(crate) recv: Raw,
    pub(crate) func: NativeFn,
}

impl BoundFn {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.func.name
    }

    /// The raw receiver the function was bound to.
    #[must_use]
    pub fn receiver(&self) -> &Raw {
        &self.recv
    }

    /// Invoke with the bound receiver.
    pub fn call(&self, args: &[Raw]) -> Raw {
        (self.func.func)(&self.recv, args)
    }
}

impl PartialEq for BoundFn {
    fn eq(&self, other: &Self) -> bool {
        self.func == other.func && self.recv == other.recv
    }
}

impl Eq for BoundFn {}

// ---------------------------------------------------------------------------
// Raw values
// ---------------------------------------------------------------------------

/// An unwrapped state value.
///
/// Cloning is cheap: primitives copy, containers bump a reference count and
/// keep sharing the same cell.
#[derive(Clone)]
pub enum Raw {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Fn(NativeFn),
    Record(Rc<RecordCell>),
    Seq(Rc<SeqCell>),
    Map(Rc<MapCell>),
    Set(Rc<SetCell>),
    Date(Rc<DateCell>),
}

/// Discriminant-only view of a [`Raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Fn,
    Record,
    Seq,
    Map,
    Set,
    Date,
}

impl Raw {
    /// Build a string value.
    #[must_use]
    pub fn str(value: impl Into<Rc<str>>) -> Self {
        Self::Str(value.into())
    }

    /// Build a record from `(name, value)` pairs. Later duplicates win.
    #[must_use]
    pub fn record<N, I>(fields: I) -> Self
    where
        N: Into<Rc<str>>,
        I: IntoIterator<Item = (N, Raw)>,
    {
        let fields: FieldMap = fields.into_iter().map(|(n, v)| (n.into(), v)).collect();
        Self::Record(Rc::new(RecordCell {
            fields: RefCell::new(fields),
            mark: Cell::new(None),
        }))
    }

    /// Build a sequence.
    #[must_use]
    pub fn seq(items: impl IntoIterator<Item = Raw>) -> Self {
        Self::Seq(Rc::new(SeqCell {
            items: RefCell::new(items.into_iter().collect()),
            mark: Cell::new(None),
        }))
    }

    /// Build a keyed map from `(key, value)` pairs. Later duplicates win.
    #[must_use]
    pub fn map(entries: impl IntoIterator<Item = (Raw, Raw)>) -> Self {
        let entries: EntryMap = entries.into_iter().collect();
        Self::Map(Rc::new(MapCell {
            entries: RefCell::new(entries),
            mark: Cell::new(None),
        }))
    }

    /// Build a uniqueness set. Duplicate members collapse.
    #[must_use]
    pub fn set(members: impl IntoIterator<Item = Raw>) -> Self {
        let members: MemberSet = members.into_iter().collect();
        Self::Set(Rc::new(SetCell {
            members: RefCell::new(members),
            mark: Cell::new(None),
        }))
    }

    /// Build a date from milliseconds since the Unix epoch.
    #[must_use]
    pub fn date(millis: i64) -> Self {
        Self::Date(Rc::new(DateCell {
            millis: Cell::new(millis),
            mark: Cell::new(None),
        }))
    }

    /// Build a date holding the current wall-clock time.
    #[must_use]
    pub fn date_now() -> Self {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Self::date(millis)
    }

    /// Build a function value.
    #[must_use]
    pub fn func(name: &'static str, func: fn(&Raw, &[Raw]) -> Raw) -> Self {
        Self::Fn(NativeFn { name, func })
    }

    /// Discriminant of this value.
    #[must_use]
    pub const fn kind(&self) -> RawKind {
        match self {
            Self::Null => RawKind::Null,
            Self::Bool(_) => RawKind::Bool,
            Self::Int(_) => RawKind::Int,
            Self::Float(_) => RawKind::Float,
            Self::Str(_) => RawKind::Str,
            Self::Fn(_) => RawKind::Fn,
            Self::Record(_) => RawKind::Record,
            Self::Seq(_) => RawKind::Seq,
            Self::Map(_) => RawKind::Map,
            Self::Set(_) => RawKind::Set,
            Self::Date(_) => RawKind::Date,
        }
    }

    /// True for the container kinds the dispatcher wraps.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        matches!(
            self,
            Self::Record(_) | Self::Seq(_) | Self::Map(_) | Self::Set(_) | Self::Date(_)
        )
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Numeric view: ints widen to `f64`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Instrumentation slot of a container cell, `None` for primitives.
    pub(crate) fn instrument_mark(&self) -> Option<&Cell<Option<OwnerId>>> {
        match self {
            Self::Record(c) => Some(&c.mark),
            Self::Seq(c) => Some(&c.mark),
            Self::Map(c) => Some(&c.mark),
            Self::Set(c) => Some(&c.mark),
            Self::Date(c) => Some(&c.mark),
            _ => None,
        }
    }

    /// Total order across all raw values, used by sequence sorting.
    ///
    /// Kinds order as null < bool < numbers < strings < functions < records
    /// < sequences < maps < sets < dates. Ints and floats compare as one
    /// numeric class with `f64::total_cmp` semantics. Containers of the same
    /// kind order by cell address, which is arbitrary but stable while the
    /// cells live; dates order by timestamp.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        fn class(value: &Raw) -> u8 {
            match value {
                Raw::Null => 0,
                Raw::Bool(_) => 1,
                Raw::Int(_) | Raw::Float(_) => 2,
                Raw::Str(_) => 3,
                Raw::Fn(_) => 4,
                Raw::Record(_) => 5,
                Raw::Seq(_) => 6,
                Raw::Map(_) => 7,
                Raw::Set(_) => 8,
                Raw::Date(_) => 9,
            }
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Fn(a), Self::Fn(b)) => (a.func as usize).cmp(&(b.func as usize)),
            (Self::Record(a), Self::Record(b)) => {
                (Rc::as_ptr(a) as usize).cmp(&(Rc::as_ptr(b) as usize))
            }
            (Self::Seq(a), Self::Seq(b)) => {
                (Rc::as_ptr(a) as usize).cmp(&(Rc::as_ptr(b) as usize))
            }
            (Self::Map(a), Self::Map(b)) => {
                (Rc::as_ptr(a) as usize).cmp(&(Rc::as_ptr(b) as usize))
            }
            (Self::Set(a), Self::Set(b)) => {
                (Rc::as_ptr(a) as usize).cmp(&(Rc::as_ptr(b) as usize))
            }
            (Self::Date(a), Self::Date(b)) => a.millis.get().cmp(&b.millis.get()),
            _ => class(self).cmp(&class(other)),
        }
    }
}

impl PartialEq for Raw {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Fn(a), Self::Fn(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => Rc::ptr_eq(a, b),
            (Self::Seq(a), Self::Seq(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::Date(a), Self::Date(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Raw {}

impl Hash for Raw {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(x) => x.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::Fn(func) => func.hash(state),
            Self::Record(c) => Rc::as_ptr(c).hash(state),
            Self::Seq(c) => Rc::as_ptr(c).hash(state),
            Self::Map(c) => Rc::as_ptr(c).hash(state),
            Self::Set(c) => Rc::as_ptr(c).hash(state),
            Self::Date(c) => Rc::as_ptr(c).hash(state),
        }
    }
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Fn(func) => write!(f, "{func:?}"),
            Self::Record(c) => write!(f, "record@{:p}", Rc::as_ptr(c)),
            Self::Seq(c) => write!(f, "seq@{:p}", Rc::as_ptr(c)),
            Self::Map(c) => write!(f, "map@{:p}", Rc::as_ptr(c)),
            Self::Set(c) => write!(f, "set@{:p}", Rc::as_ptr(c)),
            Self::Date(c) => write!(f, "date@{:p}", Rc::as_ptr(c)),
        }
    }
}

// ---------------------------------------------------------------------------
// Civil calendar
// ---------------------------------------------------------------------------

// Howard Hinnant's days/civil algorithms, proleptic Gregorian.

/// Days since 1970-01-01 to `(year, month, day)`.
pub(crate) fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m as u32, d)
}

/// `(year, month, day)` to days since 1970-01-01. Out-of-range days of month
/// roll forward into the following month. The era arithmetic runs in `i128`
/// so extreme years saturate the day count instead of overflowing.
pub(crate) fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = i128::from(year);
    let y = if month <= 2 { year - 1 } else { year };
    let m = i128::from(month);
    let d = i128::from(day);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;
    i64::try_from(days).unwrap_or(if days < 0 { i64::MIN } else { i64::MAX })
}
