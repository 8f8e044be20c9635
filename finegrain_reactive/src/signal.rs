use crate::{
    equality::{self, Equals},
    error::ReactiveError,
    node::{NodeId, NodeKind, NodeState, SourceHooks},
    runtime::with_runtime,
    traits::{
        SignalDispose, SignalGet, SignalGetUntracked, SignalSet, SignalTrack,
        SignalUpdate, SignalWith, SignalWithUntracked,
    },
};
use std::{any::Any, cell::RefCell, marker::PhantomData, rc::Rc};

/// A reactive state cell holding a mutable value.
///
/// Reading the cell inside a memo, task, or effect subscribes that watcher;
/// writing a value that differs from the current one (by the cell's equality
/// predicate) notifies every subscriber.
///
/// ```
/// use finegrain_reactive::{Signal, SignalGet, SignalSet, SignalUpdate};
///
/// let count = Signal::new(0);
///
/// count.set(1);
/// assert_eq!(count.get(), 1);
///
/// // mutate in place rather than reading inside the setter
/// count.update(|count| *count += 1);
/// assert_eq!(count.get(), 2);
/// ```
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Signal<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Signal<T> {}

/// Options accepted by [`Signal::new_with_options`].
pub struct SignalOptions<T> {
    pub(crate) equals: Option<Equals<T>>,
    pub(crate) guard: Option<Rc<dyn Fn(&T) -> bool>>,
    pub(crate) on_watched: Option<Box<dyn Fn()>>,
    pub(crate) on_unwatched: Option<Box<dyn Fn()>>,
}

impl<T> Default for SignalOptions<T> {
    fn default() -> Self {
        Self {
            equals: None,
            guard: None,
            on_watched: None,
            on_unwatched: None,
        }
    }
}

impl<T> SignalOptions<T> {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default `PartialEq` comparison. Pass
    /// [`skip_equality`](crate::skip_equality) to force every write to
    /// propagate.
    pub fn equals(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(f));
        self
    }

    /// Validates written values; a rejected write fails with
    /// [`ReactiveError::InvalidValue`] and leaves the cell untouched.
    pub fn guard(mut self, f: impl Fn(&T) -> bool + 'static) -> Self {
        self.guard = Some(Rc::new(f));
        self
    }

    /// Called, untracked, just before the cell gains its first subscriber.
    pub fn on_watched(mut self, f: impl Fn() + 'static) -> Self {
        self.on_watched = Some(Box::new(f));
        self
    }

    /// Called, untracked, after the cell loses its last subscriber.
    pub fn on_unwatched(mut self, f: impl Fn() + 'static) -> Self {
        self.on_unwatched = Some(Box::new(f));
        self
    }
}

/// Value storage of a state cell.
pub(crate) struct SourceValue<T> {
    pub value: T,
    pub equals: Equals<T>,
    pub guard: Option<Rc<dyn Fn(&T) -> bool>>,
}

impl<T> Signal<T> {
    /// Creates a cell with the given initial value, compared by `PartialEq`.
    #[track_caller]
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::new_with_options(value, SignalOptions::default())
    }

    /// Creates a cell with a custom equality predicate, guard, or
    /// watched/unwatched hooks.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    #[track_caller]
    pub fn new_with_options(value: T, options: SignalOptions<T>) -> Self
    where
        T: PartialEq,
    {
        let SignalOptions {
            equals,
            guard,
            on_watched,
            on_unwatched,
        } = options;
        let inner = SourceValue {
            value,
            equals: equality::resolve(equals),
            guard,
        };
        let id = with_runtime(|runtime| {
            runtime.insert_node(
                Some(Rc::new(RefCell::new(inner)) as Rc<RefCell<dyn Any>>),
                NodeState::Clean,
                NodeKind::Source {
                    hooks: SourceHooks::from_parts(on_watched, on_unwatched),
                },
            )
        });
        Signal {
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    /// Splits the cell into a read half and a write half, which can be
    /// handed to different parts of a program.
    #[track_caller]
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (
            ReadSignal {
                id: self.id,
                ty: PhantomData,
                #[cfg(debug_assertions)]
                defined_at: std::panic::Location::caller(),
            },
            WriteSignal {
                id: self.id,
                ty: PhantomData,
                #[cfg(debug_assertions)]
                defined_at: std::panic::Location::caller(),
            },
        )
    }

    /// Writes without notifying subscribers.
    pub fn set_untracked(&self, new_value: T) {
        if self
            .id
            .with_value_mut::<SourceValue<T>, _>(|inner| inner.value = new_value)
            .is_err()
        {
            warn_updating_dead_node();
        }
    }

    /// Mutates in place without notifying subscribers.
    pub fn update_untracked(&self, f: impl FnOnce(&mut T)) {
        if self
            .id
            .with_value_mut::<SourceValue<T>, _>(|inner| f(&mut inner.value))
            .is_err()
        {
            warn_updating_dead_node();
        }
    }
}

impl<T: Clone> SignalGet<T> for Signal<T> {
    #[track_caller]
    fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_get(&self) -> Result<T, ReactiveError> {
        self.id.track_node();
        self.id
            .with_value::<SourceValue<T>, _>(|inner| inner.value.clone())
    }
}

impl<T> SignalWith<T> for Signal<T> {
    #[track_caller]
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        match self.try_with(f) {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_with<U>(&self, f: impl FnOnce(&T) -> U) -> Result<U, ReactiveError> {
        self.id.track_node();
        self.id
            .with_value::<SourceValue<T>, _>(|inner| f(&inner.value))
    }
}

impl<T: Clone> SignalGetUntracked<T> for Signal<T> {
    #[track_caller]
    fn get_untracked(&self) -> T {
        match self.try_get_untracked() {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_get_untracked(&self) -> Result<T, ReactiveError> {
        self.id
            .with_value::<SourceValue<T>, _>(|inner| inner.value.clone())
    }
}

impl<T> SignalWithUntracked<T> for Signal<T> {
    #[track_caller]
    fn with_untracked<U>(&self, f: impl FnOnce(&T) -> U) -> U {
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
        f: impl FnOnce(&T) -> U,
    ) -> Result<U, ReactiveError> {
        self.id
            .with_value::<SourceValue<T>, _>(|inner| f(&inner.value))
    }
}

impl<T> SignalSet<T> for Signal<T> {
    fn set(&self, new_value: T) {
        if let Err(err) = self.try_set(new_value) {
            tracing::warn!("discarded write to a signal: {err}");
        }
    }

    fn try_set(&self, new_value: T) -> Result<(), ReactiveError> {
        write_source(self.id, new_value).map(|_| ())
    }
}

impl<T> SignalUpdate<T> for Signal<T> {
    fn update(&self, f: impl FnOnce(&mut T)) {
        if self.try_update(f).is_err() {
            warn_updating_dead_node();
        }
    }

    fn try_update<U>(
        &self,
        f: impl FnOnce(&mut T) -> U,
    ) -> Result<U, ReactiveError> {
        let result = self
            .id
            .with_value_mut::<SourceValue<T>, _>(|inner| f(&mut inner.value))?;
        self.id.notify_changed();
        Ok(result)
    }
}

impl<T> SignalTrack for Signal<T> {
    fn track(&self) {
        self.id.track_node();
    }
}

impl<T> SignalDispose for Signal<T> {
    fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_node(self.id));
    }
}

/// The read half of a [`Signal`], produced by [`Signal::split`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ReadSignal<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReadSignal<T> {}

impl<T: Clone> SignalGet<T> for ReadSignal<T> {
    #[track_caller]
    fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_get(&self) -> Result<T, ReactiveError> {
        self.id.track_node();
        self.id
            .with_value::<SourceValue<T>, _>(|inner| inner.value.clone())
    }
}

impl<T> SignalWith<T> for ReadSignal<T> {
    #[track_caller]
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        match self.try_with(f) {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_with<U>(&self, f: impl FnOnce(&T) -> U) -> Result<U, ReactiveError> {
        self.id.track_node();
        self.id
            .with_value::<SourceValue<T>, _>(|inner| f(&inner.value))
    }
}

impl<T: Clone> SignalGetUntracked<T> for ReadSignal<T> {
    #[track_caller]
    fn get_untracked(&self) -> T {
        match self.try_get_untracked() {
            Ok(value) => value,
            Err(err) => panic_on_read_error(
                &err,
                #[cfg(debug_assertions)]
                self.defined_at,
            ),
        }
    }

    fn try_get_untracked(&self) -> Result<T, ReactiveError> {
        self.id
            .with_value::<SourceValue<T>, _>(|inner| inner.value.clone())
    }
}

impl<T> SignalTrack for ReadSignal<T> {
    fn track(&self) {
        self.id.track_node();
    }
}

/// The write half of a [`Signal`], produced by [`Signal::split`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct WriteSignal<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WriteSignal<T> {}

impl<T> SignalSet<T> for WriteSignal<T> {
    fn set(&self, new_value: T) {
        if let Err(err) = self.try_set(new_value) {
            tracing::warn!("discarded write to a signal: {err}");
        }
    }

    fn try_set(&self, new_value: T) -> Result<(), ReactiveError> {
        write_source(self.id, new_value).map(|_| ())
    }
}

impl<T> SignalUpdate<T> for WriteSignal<T> {
    fn update(&self, f: impl FnOnce(&mut T)) {
        if self.try_update(f).is_err() {
            warn_updating_dead_node();
        }
    }

    fn try_update<U>(
        &self,
        f: impl FnOnce(&mut T) -> U,
    ) -> Result<U, ReactiveError> {
        let result = self
            .id
            .with_value_mut::<SourceValue<T>, _>(|inner| f(&mut inner.value))?;
        self.id.notify_changed();
        Ok(result)
    }
}

/// Writes a new value into a source cell: validates it against the guard,
/// compares it with the equality predicate, and notifies on change.
#[cfg_attr(
    debug_assertions,
    tracing::instrument(level = "trace", skip_all)
)]
pub(crate) fn write_source<T: 'static>(
    id: NodeId,
    new_value: T,
) -> Result<bool, ReactiveError> {
    let changed = id.with_value_mut::<SourceValue<T>, _>(|inner| {
        if let Some(guard) = &inner.guard {
            if !guard(&new_value) {
                return Err(ReactiveError::InvalidValue);
            }
        }
        if (inner.equals)(&new_value, &inner.value) {
            Ok(false)
        } else {
            inner.value = new_value;
            Ok(true)
        }
    })??;

    if changed {
        id.notify_changed();
    }
    Ok(changed)
}

impl NodeId {
    /// Subscribes the active watcher, if any, to this node.
    pub(crate) fn track_node(&self) {
        with_runtime(|runtime| runtime.track(*self));
    }

    /// Brings a derived node up to date before its value is read. Fails if
    /// the node's own computation is currently on the stack.
    pub(crate) fn pull(&self) -> Result<(), ReactiveError> {
        with_runtime(|runtime| {
            if runtime.is_computing(*self) {
                return Err(ReactiveError::CircularDependency);
            }
            runtime.update_if_necessary(*self);
            Ok(())
        })
    }

    /// Propagates an actual change of this node's value and drains the
    /// resulting notifications unless a batch is open.
    pub(crate) fn notify_changed(&self) {
        with_runtime(|runtime| {
            runtime.mark_subscribers_dirty(*self);
            runtime.run_effects();
        });
    }

    /// Applies `f` to this node's typed value storage.
    pub(crate) fn with_value<I: 'static, U>(
        &self,
        f: impl FnOnce(&I) -> U,
    ) -> Result<U, ReactiveError> {
        let value = with_runtime(|runtime| {
            runtime.nodes.borrow().get(*self).map(|node| node.value())
        })
        .ok_or(ReactiveError::NodeDisposed)?;
        let value = value.borrow();
        let inner = value
            .downcast_ref::<I>()
            .expect("reactive node value had the wrong type");
        Ok(f(inner))
    }

    /// Applies `f` to this node's typed value storage, mutably.
    pub(crate) fn with_value_mut<I: 'static, U>(
        &self,
        f: impl FnOnce(&mut I) -> U,
    ) -> Result<U, ReactiveError> {
        let value = with_runtime(|runtime| {
            runtime.nodes.borrow().get(*self).map(|node| node.value())
        })
        .ok_or(ReactiveError::NodeDisposed)?;
        let mut value = value.borrow_mut();
        let inner = value
            .downcast_mut::<I>()
            .expect("reactive node value had the wrong type");
        Ok(f(inner))
    }
}

#[track_caller]
pub(crate) fn panic_on_read_error(
    err: &ReactiveError,
    #[cfg(debug_assertions)] defined_at: &'static std::panic::Location<'static>,
) -> ! {
    #[cfg(debug_assertions)]
    panic!(
        "{err}\nnode created here: {defined_at}\npanic happened here: {}",
        std::panic::Location::caller()
    );
    #[cfg(not(debug_assertions))]
    panic!("{err}");
}

#[track_caller]
pub(crate) fn warn_updating_dead_node() {
    tracing::warn!(
        "attempted to update a reactive node that has been disposed \
         (update happened at {})",
        std::panic::Location::caller()
    );
}
