#![forbid(unsafe_code)]

//! Fine-grained dependency tracking and change observation for Weft state.
//!
//! Application state lives in raw [`Raw`] containers. Tracked code reads and
//! writes them through interceptor wrappers handed out by
//! [`ObserveCx::wrap`]: every read records a dependency edge for the active
//! observer, every mutation synchronously notifies the observers of exactly
//! the keys it touched, and nested containers are wrapped lazily as they
//! are read. Two ownership models decide where a container's identity
//! lives; see [`Ownership`].

pub mod assoc;
mod companion;
pub mod cx;
pub mod dispatch;
pub mod key;
pub mod record;
mod registry;
pub mod seq;
pub mod value;

pub use assoc::{ObservedMap, ObservedSet};
pub use cx::{ActiveGuard, ObserveCx, Ownership};
pub use dispatch::Observed;
pub use key::{ObserverId, OwnerId, PropKey};
pub use record::{CallError, ObservedDate, ObservedRecord};
pub use registry::ChangeFn;
pub use seq::{ObservedSeq, SeqIter};
pub use value::{BoundFn, NativeFn, Raw, RawKind};
