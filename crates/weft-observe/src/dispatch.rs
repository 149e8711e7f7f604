#![forbid(unsafe_code)]

//! Recursive wrap dispatcher.
//!
//! One chokepoint decides how values cross from raw state into tracked code:
//! containers get an interceptor wrapper bound to the engine context,
//! primitives and functions pass through untouched. Every interceptor read
//! path funnels nested values back through here, which is what makes deep
//! observation lazy: a child container is wrapped the moment it is read, not
//! when its parent was.

use crate::assoc::{ObservedMap, ObservedSet};
use crate::cx::ObserveCx;
use crate::key::OwnerId;
use crate::record::{ObservedDate, ObservedRecord};
use crate::seq::ObservedSeq;
use crate::value::{BoundFn, Raw};

/// A value as tracked code sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observed {
    /// Primitive or function value. Never tracked.
    Value(Raw),
    /// Function field bound to its raw receiver.
    Method(BoundFn),
    Record(ObservedRecord),
    Seq(ObservedSeq),
    Map(ObservedMap),
    Set(ObservedSet),
    Date(ObservedDate),
}

impl Observed {
    /// Raw value behind this one. Wrapping then unwrapping is identity.
    #[must_use]
    pub fn to_raw(&self) -> Raw {
        match self {
            Self::Value(value) => value.clone(),
            Self::Method(bound) => Raw::Fn(bound.func),
            Self::Record(record) => record.raw(),
            Self::Seq(seq) => seq.raw(),
            Self::Map(map) => map.raw(),
            Self::Set(set) => set.raw(),
            Self::Date(date) => date.raw(),
        }
    }

    /// Owner identity, for wrapper variants.
    #[must_use]
    pub fn owner(&self) -> Option<OwnerId> {
        match self {
            Self::Value(_) | Self::Method(_) => None,
            Self::Record(record) => Some(record.owner()),
            Self::Seq(seq) => Some(seq.owner()),
            Self::Map(map) => Some(map.owner()),
            Self::Set(set) => Some(set.owner()),
            Self::Date(date) => Some(date.owner()),
        }
    }

    /// True for interceptor wrappers, false for passthrough values.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        !matches!(self, Self::Value(_) | Self::Method(_))
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Raw> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_method(&self) -> Option<&BoundFn> {
        match self {
            Self::Method(bound) => Some(bound),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&ObservedRecord> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_seq(&self) -> Option<&ObservedSeq> {
        match self {
            Self::Seq(seq) => Some(seq),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&ObservedMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<&ObservedSet> {
        match self {
            Self::Set(set) => Some(set),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<&ObservedDate> {
        match self {
            Self::Date(date) => Some(date),
            _ => None,
        }
    }
}

/// Route one raw value: wrap containers, pass primitives through.
pub(crate) fn resolve(cx: &ObserveCx, raw: Raw) -> Observed {
    match raw {
        Raw::Record(cell) => Observed::Record(ObservedRecord::bind(cx, cell)),
        Raw::Seq(cell) => Observed::Seq(ObservedSeq::bind(cx, cell)),
        Raw::Map(cell) => Observed::Map(ObservedMap::bind(cx, cell)),
        Raw::Set(cell) => Observed::Set(ObservedSet::bind(cx, cell)),
        Raw::Date(cell) => Observed::Date(ObservedDate::bind(cx, cell)),
        passthrough => Observed::Value(passthrough),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::Ownership;

    #[test]
    fn containers_wrap_primitives_pass() {
        let cx = ObserveCx::default();
        assert!(cx.wrap(&Raw::record([("a", Raw::Int(1))])).is_wrapped());
        assert!(cx.wrap(&Raw::seq([Raw::Int(1)])).is_wrapped());
        assert!(cx.wrap(&Raw::map(Vec::new())).is_wrapped());
        assert!(cx.wrap(&Raw::set([Raw::Int(1)])).is_wrapped());
        assert!(cx.wrap(&Raw::date(0)).is_wrapped());

        assert!(!cx.wrap(&Raw::Null).is_wrapped());
        assert!(!cx.wrap(&Raw::Int(1)).is_wrapped());
        assert!(!cx.wrap(&Raw::str("s")).is_wrapped());
    }

    #[test]
    fn functions_pass_through_unbound() {
        let cx = ObserveCx::default();
        let f = Raw::func("noop", |_, _| Raw::Null);
        let wrapped = cx.wrap(&f);
        assert_eq!(wrapped.as_value(), Some(&f));
        assert!(wrapped.as_method().is_none());
    }

    #[test]
    fn to_raw_returns_the_same_cell() {
        let cx = ObserveCx::default();
        let raw = Raw::seq([Raw::Int(1)]);
        let round = cx.wrap(&raw).to_raw();
        assert_eq!(round, raw);
    }

    #[test]
    fn nested_wrap_agrees_with_direct_wrap() {
        for model in [Ownership::InPlace, Ownership::WrapAround] {
            let cx = ObserveCx::new(model);
            let child = Raw::seq([Raw::Int(1)]);
            let parent = Raw::record([("child", child.clone())]);

            let wrapped = cx.wrap(&parent);
            let record = wrapped.as_record().expect("record wraps");
            let via_parent = record.get("child");
            let direct = cx.wrap(&child);

            assert_eq!(via_parent, direct);
            assert_eq!(via_parent.owner(), direct.owner());
        }
    }

    #[test]
    fn accessors_narrow_by_variant() {
        let cx = ObserveCx::default();
        let wrapped = cx.wrap(&Raw::map(Vec::new()));
        assert!(wrapped.as_map().is_some());
        assert!(wrapped.as_record().is_none());
        assert!(wrapped.as_seq().is_none());
        assert!(wrapped.as_set().is_none());
        assert!(wrapped.as_date().is_none());
        assert!(wrapped.as_value().is_none());
    }
}
