#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! A fine-grained reactive runtime.
//!
//! Programs declare [`Signal`] cells holding values, computations derived
//! from them ([`Memo`] for synchronous, [`Task`] for asynchronous work),
//! [`Sensor`] sources bridging external event producers, and [`Effect`]s
//! that run side effects when the values they read change. The runtime
//! tracks which computation depends on which cell, recomputes derived
//! values only when necessary, batches writes, and lazily starts and stops
//! external subscriptions.
//!
//! Reads inside a computation subscribe it automatically:
//!
//! ```
//! use finegrain_reactive::{batch, Effect, Memo, Signal, SignalGet, SignalSet};
//! use std::{cell::Cell, rc::Rc};
//!
//! let first = Signal::new("Ada".to_string());
//! let last = Signal::new("Lovelace".to_string());
//!
//! // recomputed at most once per change, no matter how often it is read
//! let full = Memo::new(move |_| format!("{} {}", first.get(), last.get()));
//!
//! let out = Rc::new(Cell::new(String::new()));
//! Effect::new({
//!     let out = Rc::clone(&out);
//!     move || out.set(full.get().unwrap_or_default())
//! });
//! assert_eq!(out.take(), "Ada Lovelace");
//!
//! // two writes, one notification
//! batch(|| {
//!     first.set("Grace".to_string());
//!     last.set("Hopper".to_string());
//! });
//! assert_eq!(out.take(), "Grace Hopper");
//! ```
//!
//! Derived nodes are lazy and memoized: a diamond-shaped graph recomputes
//! each node once per change, and a recomputation that produces an equal
//! value (by the node's equality predicate) does not notify subscribers.
//! The unset state is explicit — derived reads return `Option<T>`, where
//! `None` means "no value yet" — and computation failures are cached values
//! of their node, returned from every fallible read until a later run
//! succeeds.

mod effect;
mod equality;
mod error;
mod memo;
mod node;
mod outcome;
mod runtime;
mod scope;
mod sensor;
mod signal;
mod spawn;
mod task;
mod traits;
mod watch;

pub use effect::Effect;
pub use equality::{skip_equality, Equals};
pub use error::{Error, ReactiveError};
pub use memo::{Memo, MemoOptions};
pub use outcome::Outcome;
pub use runtime::{batch, flush, untrack};
pub use scope::{on_cleanup, scope, try_on_cleanup, ScopeDisposer};
pub use sensor::{Sensor, SensorOptions, SensorSetter};
pub use signal::{ReadSignal, Signal, SignalOptions, WriteSignal};
pub use spawn::spawn_local;
pub use task::{AbortSignal, Task, TaskOptions};
pub use traits::{
    cleanup_marker, IntoCleanup, SignalDispose, SignalGet, SignalGetUntracked,
    SignalSet, SignalTrack, SignalUpdate, SignalWith, SignalWithUntracked,
};
pub use watch::watch;
