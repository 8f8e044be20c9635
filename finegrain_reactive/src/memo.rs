use crate::{
    equality::{self, Equals},
    error::{Error, ReactiveError},
    node::{AnyComputation, NodeId, NodeKind, NodeState, SourceHooks},
    outcome::Outcome,
    runtime::with_runtime,
    signal::panic_on_read_error,
    traits::{
        SignalDispose, SignalGet, SignalGetUntracked, SignalTrack, SignalWith,
        SignalWithUntracked,
    },
};
use std::{any::Any, cell::RefCell, marker::PhantomData, rc::Rc};

/// An efficient derived reactive value based on other reactive values.
///
/// A memo comes with two guarantees:
/// 1. Its computation runs at most *once* per change, no matter how many
///    times the value is read and no matter how many paths connect it to a
///    changed source.
/// 2. It only notifies its own subscribers when the computed value actually
///    changes (by the memo's equality predicate).
///
/// Memos are lazy: the computation does not run until the first read, and a
/// memo nobody watches releases its upstream subscriptions when invalidated.
/// The closure receives the previously computed value (or the configured
/// initial value), which is `None` on the first run.
///
/// Reads return `Option<T>`: `None` means the memo has not produced a value
/// yet.
///
/// ```
/// use finegrain_reactive::{Memo, Signal, SignalGet, SignalSet};
///
/// let count = Signal::new(1);
/// let double = Memo::new(move |_| count.get() * 2);
///
/// assert_eq!(double.get(), Some(2));
/// count.set(3);
/// assert_eq!(double.get(), Some(6));
/// ```
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Memo<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Memo<T> {}

/// Options accepted by the `*_with_options` memo constructors.
pub struct MemoOptions<T> {
    pub(crate) initial: Option<T>,
    pub(crate) equals: Option<Equals<T>>,
    pub(crate) on_watched: Option<Box<dyn Fn()>>,
    pub(crate) on_unwatched: Option<Box<dyn Fn()>>,
}

impl<T> Default for MemoOptions<T> {
    fn default() -> Self {
        Self {
            initial: None,
            equals: None,
            on_watched: None,
            on_unwatched: None,
        }
    }
}

impl<T> MemoOptions<T> {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the previous-value argument of the first computation.
    pub fn initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Replaces the default `PartialEq` comparison used for the bail-out.
    pub fn equals(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(f));
        self
    }

    /// Called, untracked, just before the memo gains its first subscriber.
    pub fn on_watched(mut self, f: impl Fn() + 'static) -> Self {
        self.on_watched = Some(Box::new(f));
        self
    }

    /// Called, untracked, after the memo loses its last subscriber.
    pub fn on_unwatched(mut self, f: impl Fn() + 'static) -> Self {
        self.on_unwatched = Some(Box::new(f));
        self
    }
}

/// Value storage of a memo node.
pub(crate) struct MemoValue<T> {
    pub value: Option<T>,
    pub error: Option<Error>,
    pub equals: Equals<T>,
}

struct MemoFn<T, F>
where
    F: Fn(Option<&T>) -> Outcome<T>,
{
    f: F,
    ty: PhantomData<T>,
}

impl<T, F> AnyComputation for MemoFn<T, F>
where
    T: 'static,
    F: Fn(Option<&T>) -> Outcome<T>,
{
    fn run(&self, value: Option<Rc<RefCell<dyn Any>>>) -> bool {
        let value = value.expect("memo node to hold a value");

        // hold only a shared borrow while the user code runs, so that
        // nested reads of other nodes stay legal
        let (outcome, changed) = {
            let value = value.borrow();
            let inner = value
                .downcast_ref::<MemoValue<T>>()
                .expect("memo node value had the wrong type");
            let outcome = (self.f)(inner.value.as_ref());
            let changed = match &outcome {
                Outcome::Ready(new) => {
                    inner.error.is_some()
                        || match &inner.value {
                            Some(old) => !(inner.equals)(new, old),
                            // unset is unequal to every set value
                            None => true,
                        }
                }
                Outcome::Pending => {
                    inner.value.is_some() || inner.error.is_some()
                }
                Outcome::Fail(err) => {
                    inner.value.is_some() || inner.error.as_ref() != Some(err)
                }
            };
            (outcome, changed)
        };

        if changed {
            let mut value = value.borrow_mut();
            let inner = value
                .downcast_mut::<MemoValue<T>>()
                .expect("memo node value had the wrong type");
            match outcome {
                Outcome::Ready(new) => {
                    inner.value = Some(new);
                    inner.error = None;
                }
                Outcome::Pending => {
                    inner.value = None;
                    inner.error = None;
                }
                Outcome::Fail(err) => {
                    inner.value = None;
                    inner.error = Some(err);
                }
            }
        }

        changed
    }
}

impl<T> Memo<T> {
    /// Creates a memo from an infallible computation.
    ///
    /// The closure receives the previously computed value, `None` on the
    /// first run.
    #[track_caller]
    pub fn new(f: impl Fn(Option<&T>) -> T + 'static) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_options(f, MemoOptions::default())
    }

    /// Creates a memo from an infallible computation, with options.
    #[track_caller]
    pub fn new_with_options(
        f: impl Fn(Option<&T>) -> T + 'static,
        options: MemoOptions<T>,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::new_outcome_with_options(
            move |prev| Outcome::Ready(f(prev)),
            options,
        )
    }

    /// Creates a memo whose computation may stay pending or fail.
    ///
    /// A [`Outcome::Pending`] run leaves the memo unset; a
    /// [`Outcome::Fail`] run caches the error, which every fallible read
    /// returns until a later run succeeds.
    #[track_caller]
    pub fn new_outcome(
        f: impl Fn(Option<&T>) -> Outcome<T> + 'static,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::new_outcome_with_options(f, MemoOptions::default())
    }

    /// Creates a memo with the full computation protocol and options.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    #[track_caller]
    pub fn new_outcome_with_options(
        f: impl Fn(Option<&T>) -> Outcome<T> + 'static,
        options: MemoOptions<T>,
    ) -> Self
    where
        T: PartialEq,
    {
        let MemoOptions {
            initial,
            equals,
            on_watched,
            on_unwatched,
        } = options;
        let inner = MemoValue {
            value: initial,
            error: None,
            equals: equality::resolve(equals),
        };
        let id = with_runtime(|runtime| {
            runtime.insert_node(
                Some(Rc::new(RefCell::new(inner)) as Rc<RefCell<dyn Any>>),
                // memos are lazy: dirty from the start, computed on the
                // first read
                NodeState::Dirty,
                NodeKind::Memo {
                    f: Rc::new(MemoFn { f, ty: PhantomData }),
                    hooks: SourceHooks::from_parts(on_watched, on_unwatched),
                },
            )
        });
        Memo {
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    /// Returns the current value, failing with
    /// [`ReactiveError::UnsetValue`] while the memo is pending.
    pub fn require(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_get()?.ok_or(ReactiveError::UnsetValue)
    }
}

impl<T: Clone> SignalGet<Option<T>> for Memo<T> {
    #[track_caller]
    fn get(&self) -> Option<T> {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_get(&self) -> Result<Option<T>, ReactiveError> {
        self.try_with(Clone::clone)
    }
}

impl<T> SignalWith<Option<T>> for Memo<T> {
    #[track_caller]
    fn with<U>(&self, f: impl FnOnce(&Option<T>) -> U) -> U {
        match self.try_with(f) {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_with<U>(
        &self,
        f: impl FnOnce(&Option<T>) -> U,
    ) -> Result<U, ReactiveError> {
        // pull before subscribing: a read that trips the cycle guard must
        // not leave a dangling edge behind
        self.id.pull()?;
        self.id.track_node();
        self.id.with_value::<MemoValue<T>, _>(|inner| {
            match &inner.error {
                Some(err) => Err(ReactiveError::Computation(err.clone())),
                None => Ok(f(&inner.value)),
            }
        })?
    }
}

impl<T: Clone> SignalGetUntracked<Option<T>> for Memo<T> {
    #[track_caller]
    fn get_untracked(&self) -> Option<T> {
        match self.try_get_untracked() {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_get_untracked(&self) -> Result<Option<T>, ReactiveError> {
        self.try_with_untracked(Clone::clone)
    }
}

impl<T> SignalWithUntracked<Option<T>> for Memo<T> {
    #[track_caller]
    fn with_untracked<U>(&self, f: impl FnOnce(&Option<T>) -> U) -> U {
        match self.try_with_untracked(f) {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_with_untracked<U>(
        &self,
        f: impl FnOnce(&Option<T>) -> U,
    ) -> Result<U, ReactiveError> {
        self.id.pull()?;
        self.id.with_value::<MemoValue<T>, _>(|inner| {
            match &inner.error {
                Some(err) => Err(ReactiveError::Computation(err.clone())),
                None => Ok(f(&inner.value)),
            }
        })?
    }
}

impl<T> SignalTrack for Memo<T> {
    fn track(&self) {
        self.id.track_node();
    }
}

impl<T> SignalDispose for Memo<T> {
    fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_node(self.id));
    }
}
