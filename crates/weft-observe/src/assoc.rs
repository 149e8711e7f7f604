#![forbid(unsafe_code)]

//! Associative and uniqueness-set interceptors.
//!
//! Three kinds of key participate: the specific entry key, the shape key
//! (entry count), and the any-key sentinel (key-set churn). The notification
//! table, which several observers depend on for exactness:
//!
//! - `set` on an absent key fires shape then any-key; on a present key with
//!   a new value it fires the entry key then any-key, never shape. Any-key
//!   fires on every effective `set`, insert or update alike. A `set` that
//!   stores an identical value fires nothing.
//! - `delete` of a present key fires the entry key then shape, never
//!   any-key. Deleting an absent key is silent.
//! - `clear` of a non-empty container fires every entry key in insertion
//!   order, then shape, then any-key. Clearing an empty container is silent.
//! - `add` on a uniqueness set fires shape then any-key for a new member
//!   and nothing for a present one.
//!
//! On the read side, absence is a shape dependency: `has`/`get` of a
//! missing key records an edge on the shape key, since the only way absence
//! becomes presence is a shape-changing insert. Iteration records both the
//! any-key and shape keys.

use std::fmt;
use std::rc::Rc;

use crate::cx::ObserveCx;
use crate::dispatch::{self, Observed};
use crate::key::{OwnerId, PropKey};
use crate::value::{MapCell, Raw, SetCell};

enum SetOutcome {
    Inserted,
    Updated,
    Unchanged,
}

// ───────────────────────────────────────────────────────────────────────────
// Keyed map
// ───────────────────────────────────────────────────────────────────────────

/// Tracked view over a [`MapCell`].
///
/// Keys are identity and travel raw; values resolve through the dispatcher,
/// so container values come back wrapped.
#[derive(Clone)]
pub struct ObservedMap {
    cx: ObserveCx,
    cell: Rc<MapCell>,
    owner: OwnerId,
}

impl ObservedMap {
    pub(crate) fn bind(cx: &ObserveCx, cell: Rc<MapCell>) -> Self {
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
        Raw::Map(Rc::clone(&self.cell))
    }

    fn track_iteration(&self) {
        self.cx.add_ref(self.owner, PropKey::AnyKey);
        self.cx.add_ref(self.owner, PropKey::Length);
    }

    /// Entry count. Records the shape key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.entries.borrow().is_empty()
    }

    /// Whether the key is present: a present key records its own edge, an
    /// absent one records the shape key.
    #[must_use]
    pub fn has(&self, key: &Raw) -> bool {
        let present = self.cell.entries.borrow().contains_key(key);
        if present {
            self.cx.add_ref(self.owner, PropKey::entry(key.clone()));
        } else {
            self.cx.add_ref(self.owner, PropKey::Length);
        }
        present
    }

    /// Read one entry. Mirrors [`has`](Self::has) for tracking; an absent
    /// key reads as null.
    #[must_use]
    pub fn get(&self, key: &Raw) -> Observed {
        let looked_up = self.cell.entries.borrow().get(key).cloned();
        match looked_up {
            Some(value) => {
                self.cx.add_ref(self.owner, PropKey::entry(key.clone()));
                dispatch::resolve(&self.cx, value)
            }
            None => {
                self.cx.add_ref(self.owner, PropKey::Length);
                Observed::Value(Raw::Null)
            }
        }
    }

    /// Insert or update one entry. See the module table for what fires.
    pub fn set(&self, key: Raw, value: Raw) {
        let outcome = {
            let mut entries = self.cell.entries.borrow_mut();
            match entries.get_mut(&key) {
                Some(slot) if *slot == value => SetOutcome::Unchanged,
                Some(slot) => {
                    *slot = value;
                    SetOutcome::Updated
                }
                None => {
                    entries.insert(key.clone(), value);
                    SetOutcome::Inserted
                }
            }
        };
        match outcome {
            SetOutcome::Unchanged => {}
            SetOutcome::Inserted => {
                self.cx.fire_change(self.owner, &PropKey::Length);
                self.cx.fire_change(self.owner, &PropKey::AnyKey);
            }
            SetOutcome::Updated => {
                self.cx.fire_change(self.owner, &PropKey::entry(key));
                self.cx.fire_change(self.owner, &PropKey::AnyKey);
            }
        }
    }

    /// Remove one entry. Fires the entry key then shape when the key was
    /// present; silent otherwise.
    pub fn delete(&self, key: &Raw) -> bool {
        let removed = self.cell.entries.borrow_mut().shift_remove(key).is_some();
        if removed {
            self.cx.fire_change(self.owner, &PropKey::entry(key.clone()));
            self.cx.fire_change(self.owner, &PropKey::Length);
        }
        removed
    }

    /// Remove every entry, firing each entry key in insertion order, then
    /// shape, then any-key. Silent when already empty.
    pub fn clear(&self) {
        let keys: Vec<Raw> = {
            let mut entries = self.cell.entries.borrow_mut();
            if entries.is_empty() {
                return;
            }
            let keys = entries.keys().cloned().collect();
            entries.clear();
            keys
        };
        for key in keys {
            self.cx.fire_change(self.owner, &PropKey::entry(key));
        }
        self.cx.fire_change(self.owner, &PropKey::Length);
        self.cx.fire_change(self.owner, &PropKey::AnyKey);
    }

    /// Snapshot of keys in insertion order. An iteration read.
    #[must_use]
    pub fn keys(&self) -> Vec<Raw> {
        self.track_iteration();
        self.cell.entries.borrow().keys().cloned().collect()
    }

    /// Snapshot of values in insertion order, wrapped. An iteration read.
    #[must_use]
    pub fn values(&self) -> Vec<Observed> {
        self.track_iteration();
        let snapshot: Vec<Raw> = self.cell.entries.borrow().values().cloned().collect();
        snapshot
            .into_iter()
            .map(|value| dispatch::resolve(&self.cx, value))
            .collect()
    }

    /// Snapshot of `(key, value)` pairs in insertion order. An iteration
    /// read; values come back wrapped.
    #[must_use]
    pub fn entries(&self) -> Vec<(Raw, Observed)> {
        self.track_iteration();
        let snapshot: Vec<(Raw, Raw)> = self
            .cell
            .entries
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        snapshot
            .into_iter()
            .map(|(key, value)| (key, dispatch::resolve(&self.cx, value)))
            .collect()
    }

    pub fn for_each(&self, mut visit: impl FnMut(&Raw, &Observed)) {
        for (key, value) in self.entries() {
            visit(&key, &value);
        }
    }
}

impl PartialEq for ObservedMap {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell) && self.owner == other.owner
    }
}

impl Eq for ObservedMap {}

impl fmt::Debug for ObservedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedMap")
            .field("owner", &self.owner)
            .field("cell", &self.cell)
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Uniqueness set
// ───────────────────────────────────────────────────────────────────────────

/// Tracked view over a [`SetCell`].
///
/// Bulk reads are bound to the raw members: beyond the shape and any-key
/// edges there is no per-call dependency to record, and members are
/// identity, so they travel unwrapped.
#[derive(Clone)]
pub struct ObservedSet {
    cx: ObserveCx,
    cell: Rc<SetCell>,
    owner: OwnerId,
}

impl ObservedSet {
    pub(crate) fn bind(cx: &ObserveCx, cell: Rc<SetCell>) -> Self {
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
        Raw::Set(Rc::clone(&self.cell))
    }

    fn track_iteration(&self) {
        self.cx.add_ref(self.owner, PropKey::AnyKey);
        self.cx.add_ref(self.owner, PropKey::Length);
    }

    /// Member count. Records the shape key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.members.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cx.add_ref(self.owner, PropKey::Length);
        self.cell.members.borrow().is_empty()
    }

    /// Whether the member is present: present records its own edge, absent
    /// records the shape key.
    #[must_use]
    pub fn has(&self, member: &Raw) -> bool {
        let present = self.cell.members.borrow().contains(member);
        if present {
            self.cx.add_ref(self.owner, PropKey::entry(member.clone()));
        } else {
            self.cx.add_ref(self.owner, PropKey::Length);
        }
        present
    }

    /// Insert one member. A new member fires shape then any-key; a member
    /// already present is a no-op. Returns whether the set grew.
    pub fn add(&self, member: Raw) -> bool {
        let inserted = self.cell.members.borrow_mut().insert(member);
        if inserted {
            self.cx.fire_change(self.owner, &PropKey::Length);
            self.cx.fire_change(self.owner, &PropKey::AnyKey);
        }
        inserted
    }

    /// Remove one member. Fires the member's key then shape when present;
    /// silent otherwise.
    pub fn delete(&self, member: &Raw) -> bool {
        let removed = self.cell.members.borrow_mut().shift_remove(member);
        if removed {
            self.cx.fire_change(self.owner, &PropKey::entry(member.clone()));
            self.cx.fire_change(self.owner, &PropKey::Length);
        }
        removed
    }

    /// Remove every member, firing each member key in insertion order, then
    /// shape, then any-key. Silent when already empty.
    pub fn clear(&self) {
        let members: Vec<Raw> = {
            let mut members = self.cell.members.borrow_mut();
            if members.is_empty() {
                return;
            }
            let snapshot = members.iter().cloned().collect();
            members.clear();
            snapshot
        };
        for member in members {
            self.cx.fire_change(self.owner, &PropKey::entry(member));
        }
        self.cx.fire_change(self.owner, &PropKey::Length);
        self.cx.fire_change(self.owner, &PropKey::AnyKey);
    }

    /// Snapshot of raw members in insertion order. An iteration read.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Raw> {
        self.track_iteration();
        self.cell.members.borrow().iter().cloned().collect()
    }

    pub fn for_each(&self, mut visit: impl FnMut(&Raw)) {
        for member in self.to_vec() {
            visit(&member);
        }
    }
}

impl PartialEq for ObservedSet {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell) && self.owner == other.owner
    }
}

impl Eq for ObservedSet {}

impl fmt::Debug for ObservedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedSet")
            .field("owner", &self.owner)
            .field("cell", &self.cell)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::key::ObserverId;

    fn spy(cx: &ObserveCx) -> (ObserverId, Rc<RefCell<Vec<PropKey>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let id = cx.register_observer(move |_, key: &PropKey| {
            sink.borrow_mut().push(key.clone());
        });
        (id, log)
    }

    fn map(cx: &ObserveCx, raw: &Raw) -> ObservedMap {
        cx.wrap(raw).as_map().expect("map wraps").clone()
    }

    fn set(cx: &ObserveCx, raw: &Raw) -> ObservedSet {
        cx.wrap(raw).as_set().expect("set wraps").clone()
    }

    /// Subscribe one spy to every key the container can fire.
    fn spy_all(cx: &ObserveCx, owner: OwnerId, entries: &[Raw]) -> Rc<RefCell<Vec<PropKey>>> {
        let (id, log) = spy(cx);
        let _guard = cx.enter(id);
        cx.add_ref(owner, PropKey::Length);
        cx.add_ref(owner, PropKey::AnyKey);
        for key in entries {
            cx.add_ref(owner, PropKey::entry(key.clone()));
        }
        log
    }

    #[test]
    fn set_dual_fire_asymmetry() {
        let cx = ObserveCx::default();
        let m = map(&cx, &Raw::map(Vec::new()));
        let k = Raw::str("k");
        let log = spy_all(&cx, m.owner(), &[k.clone()]);

        m.set(k.clone(), Raw::str("v"));
        assert_eq!(*log.borrow(), vec![PropKey::Length, PropKey::AnyKey]);

        log.borrow_mut().clear();
        m.set(k.clone(), Raw::str("v2"));
        assert_eq!(
            *log.borrow(),
            vec![PropKey::entry(k.clone()), PropKey::AnyKey]
        );

        log.borrow_mut().clear();
        m.set(k, Raw::str("v2"));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn absence_is_a_shape_dependency() {
        let cx = ObserveCx::default();
        let m = map(&cx, &Raw::map(Vec::new()));
        let (id, log) = spy(&cx);

        {
            let _guard = cx.enter(id);
            assert!(!m.has(&Raw::str("z")));
            assert_eq!(m.get(&Raw::str("z")), Observed::Value(Raw::Null));
        }
        assert_eq!(cx.observer_count(m.owner(), &PropKey::Length), 1);
        assert_eq!(
            cx.observer_count(m.owner(), &PropKey::entry(Raw::str("z"))),
            0
        );

        m.set(Raw::str("z"), Raw::Int(1));
        assert_eq!(*log.borrow(), vec![PropKey::Length]);
    }

    #[test]
    fn present_reads_track_the_entry_key() {
        let cx = ObserveCx::default();
        let k = Raw::str("k");
        let m = map(&cx, &Raw::map([(k.clone(), Raw::Int(1))]));
        let (id, log) = spy(&cx);

        {
            let _guard = cx.enter(id);
            assert!(m.has(&k));
            assert_eq!(m.get(&k).to_raw(), Raw::Int(1));
        }
        assert_eq!(cx.observer_count(m.owner(), &PropKey::entry(k.clone())), 1);
        assert_eq!(cx.observer_count(m.owner(), &PropKey::Length), 0);

        m.set(k.clone(), Raw::Int(2));
        assert_eq!(*log.borrow(), vec![PropKey::entry(k)]);
    }

    #[test]
    fn delete_fires_key_then_shape_never_anykey() {
        let cx = ObserveCx::default();
        let k = Raw::str("k");
        let m = map(&cx, &Raw::map([(k.clone(), Raw::Int(1))]));
        let log = spy_all(&cx, m.owner(), &[k.clone()]);

        assert!(!m.delete(&Raw::str("ghost")));
        assert!(log.borrow().is_empty());

        assert!(m.delete(&k));
        assert_eq!(
            *log.borrow(),
            vec![PropKey::entry(k.clone()), PropKey::Length]
        );
        assert!(!m.delete(&k));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn clear_fires_keys_in_insertion_order_then_sentinels() {
        let cx = ObserveCx::default();
        let a = Raw::str("a");
        let b = Raw::str("b");
        let m = map(
            &cx,
            &Raw::map([(a.clone(), Raw::Int(1)), (b.clone(), Raw::Int(2))]),
        );
        let log = spy_all(&cx, m.owner(), &[a.clone(), b.clone()]);

        m.clear();
        assert_eq!(
            *log.borrow(),
            vec![
                PropKey::entry(a),
                PropKey::entry(b),
                PropKey::Length,
                PropKey::AnyKey,
            ]
        );

        log.borrow_mut().clear();
        m.clear();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn iteration_reads_both_sentinels() {
        let cx = ObserveCx::default();
        let m = map(
            &cx,
            &Raw::map([(Raw::str("a"), Raw::record([("n", Raw::Int(1))]))]),
        );
        let (id, _log) = spy(&cx);

        {
            let _guard = cx.enter(id);
            assert_eq!(m.keys(), vec![Raw::str("a")]);
            let values = m.values();
            assert!(values[0].is_wrapped());
            let entries = m.entries();
            assert_eq!(entries[0].0, Raw::str("a"));
        }
        assert_eq!(cx.edge_count(), 2);
        assert_eq!(cx.observer_count(m.owner(), &PropKey::AnyKey), 1);
        assert_eq!(cx.observer_count(m.owner(), &PropKey::Length), 1);
    }

    #[test]
    fn map_for_each_sees_wrapped_values() {
        let cx = ObserveCx::default();
        let m = map(
            &cx,
            &Raw::map([
                (Raw::str("plain"), Raw::Int(1)),
                (Raw::str("nested"), Raw::seq([Raw::Int(2)])),
            ]),
        );

        let mut seen = Vec::new();
        m.for_each(|key, value| seen.push((key.clone(), value.is_wrapped())));
        assert_eq!(seen, [(Raw::str("plain"), false), (Raw::str("nested"), true)]);
    }

    #[test]
    fn container_and_nan_keys_resolve_by_identity() {
        let cx = ObserveCx::default();
        let m = map(&cx, &Raw::map(Vec::new()));

        let record_key = Raw::record([("id", Raw::Int(1))]);
        m.set(record_key.clone(), Raw::str("by-cell"));
        assert!(m.has(&record_key));
        assert!(!m.has(&Raw::record([("id", Raw::Int(1))])));

        m.set(Raw::Float(f64::NAN), Raw::str("by-bits"));
        assert_eq!(m.get(&Raw::Float(f64::NAN)).to_raw(), Raw::str("by-bits"));
        assert!(m.delete(&record_key));
    }

    #[test]
    fn uniqueness_add_and_delete() {
        let cx = ObserveCx::default();
        let s = set(&cx, &Raw::set(Vec::new()));
        let member = Raw::str("m");
        let log = spy_all(&cx, s.owner(), &[member.clone()]);

        assert!(s.add(member.clone()));
        assert_eq!(*log.borrow(), vec![PropKey::Length, PropKey::AnyKey]);

        log.borrow_mut().clear();
        assert!(!s.add(member.clone()));
        assert!(log.borrow().is_empty());

        assert!(s.delete(&member));
        assert_eq!(
            *log.borrow(),
            vec![PropKey::entry(member.clone()), PropKey::Length]
        );
        assert!(!s.delete(&member));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn uniqueness_membership_tracking() {
        let cx = ObserveCx::default();
        let s = set(&cx, &Raw::set([Raw::Int(1)]));
        let (id, _log) = spy(&cx);

        {
            let _guard = cx.enter(id);
            assert!(s.has(&Raw::Int(1)));
            assert!(!s.has(&Raw::Int(2)));
            assert_eq!(s.len(), 1);
        }
        assert_eq!(
            cx.observer_count(s.owner(), &PropKey::entry(Raw::Int(1))),
            1
        );
        assert_eq!(cx.observer_count(s.owner(), &PropKey::Length), 1);
    }

    #[test]
    fn uniqueness_clear_order() {
        let cx = ObserveCx::default();
        let x = Raw::str("x");
        let y = Raw::str("y");
        let s = set(&cx, &Raw::set([x.clone(), y.clone()]));
        let log = spy_all(&cx, s.owner(), &[x.clone(), y.clone()]);

        s.clear();
        assert_eq!(
            *log.borrow(),
            vec![
                PropKey::entry(x),
                PropKey::entry(y),
                PropKey::Length,
                PropKey::AnyKey,
            ]
        );

        log.borrow_mut().clear();
        s.clear();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn bulk_reads_yield_raw_members() {
        let cx = ObserveCx::default();
        let nested = Raw::record([("n", Raw::Int(1))]);
        let s = set(&cx, &Raw::set([Raw::Int(1), nested.clone()]));
        let (id, _log) = spy(&cx);

        let members = {
            let _guard = cx.enter(id);
            s.to_vec()
        };
        assert_eq!(members, vec![Raw::Int(1), nested]);
        assert_eq!(cx.edge_count(), 2);

        let mut count = 0;
        s.for_each(|_| count += 1);
        assert_eq!(count, 2);
    }
}
