use crate::{
    equality::{self, Equals},
    error::ReactiveError,
    node::{NodeId, NodeKind, NodeState, SourceHooks},
    runtime::with_runtime,
    signal::panic_on_read_error,
    traits::{
        IntoCleanup, SignalDispose, SignalGet, SignalGetUntracked, SignalTrack,
        SignalWith, SignalWithUntracked,
    },
};
use std::{any::Any, cell::RefCell, marker::PhantomData, rc::Rc};

/// A push-driven source bridging an external event producer into the graph.
///
/// The `start` closure runs lazily, with tracking disabled, when the sensor
/// gains its first subscriber; it receives a [`SensorSetter`] to publish
/// values and may return a stop closure, which runs when the last subscriber
/// leaves. A later subscription calls `start` again.
///
/// With [`skip_equality`](crate::skip_equality) as the equality predicate,
/// every `set` propagates even when the reference is identical, which is how
/// in-place mutations of a shared object are published.
///
/// ```
/// use finegrain_reactive::{Effect, Sensor, SensorOptions, SignalGet};
/// use std::{cell::Cell, rc::Rc};
///
/// let sensor = Sensor::new(
///     |set| {
///         set.set(1);
///         move || { /* disconnect the external source */ }
///     },
///     SensorOptions::new(),
/// );
///
/// let seen = Rc::new(Cell::new(None));
/// Effect::new({
///     let seen = seen.clone();
///     move || seen.set(sensor.get())
/// });
/// assert_eq!(seen.get(), Some(1));
/// ```
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Sensor<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Sensor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Sensor<T> {}

/// Options accepted by [`Sensor::new`].
pub struct SensorOptions<T> {
    pub(crate) initial: Option<T>,
    pub(crate) equals: Option<Equals<T>>,
}

impl<T> Default for SensorOptions<T> {
    fn default() -> Self {
        Self {
            initial: None,
            equals: None,
        }
    }
}

impl<T> SensorOptions<T> {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value visible before `start` publishes one.
    pub fn initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Replaces the default `PartialEq` comparison. Pass
    /// [`skip_equality`](crate::skip_equality) to propagate every `set`.
    pub fn equals(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(f));
        self
    }
}

/// Value storage of a sensor node.
pub(crate) struct SensorValue<T> {
    pub value: Option<T>,
    pub equals: Equals<T>,
}

/// Write handle passed to a sensor's `start` closure.
pub struct SensorSetter<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
}

impl<T> Clone for SensorSetter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SensorSetter<T> {}

impl<T> SensorSetter<T> {
    /// Publishes a value, notifying subscribers when the sensor's equality
    /// predicate reports a change.
    pub fn set(&self, new_value: T) {
        if let Err(err) = self.try_set(new_value) {
            tracing::warn!("discarded sensor publication: {err}");
        }
    }

    /// Publishes a value, surfacing rejections.
    pub fn try_set(&self, new_value: T) -> Result<(), ReactiveError> {
        let changed = self.id.with_value_mut::<SensorValue<T>, _>(|inner| {
            let changed = match &inner.value {
                // unset is unequal to every set value
                None => true,
                Some(old) => !(inner.equals)(&new_value, old),
            };
            if changed {
                inner.value = Some(new_value);
            }
            changed
        })?;
        if changed {
            self.id.notify_changed();
        }
        Ok(())
    }
}

impl<T: 'static> Sensor<T> {
    /// Creates a sensor. `start` is not called until the first subscriber
    /// arrives; it may return nothing, a stop closure, an optional stop
    /// closure, or a `Result` of either (see [`IntoCleanup`]).
    #[track_caller]
    pub fn new<C, M>(
        start: impl Fn(SensorSetter<T>) -> C + 'static,
        options: SensorOptions<T>,
    ) -> Self
    where
        T: PartialEq,
        C: IntoCleanup<M>,
    {
        let SensorOptions { initial, equals } = options;
        let inner = SensorValue {
            value: initial,
            equals: equality::resolve(equals),
        };

        let id = with_runtime(|runtime| {
            runtime.insert_node(
                Some(Rc::new(RefCell::new(inner)) as Rc<RefCell<dyn Any>>),
                NodeState::Clean,
                NodeKind::Source { hooks: None },
            )
        });

        // the start/stop lifecycle rides on the watched/unwatched hooks;
        // the stop closure lives between the two
        let stop: Rc<RefCell<Option<Box<dyn FnOnce()>>>> =
            Rc::new(RefCell::new(None));
        let on_watched = {
            let stop = Rc::clone(&stop);
            Box::new(move || {
                let stopper = start(SensorSetter {
                    id,
                    ty: PhantomData,
                });
                *stop.borrow_mut() = stopper.into_cleanup();
            }) as Box<dyn Fn()>
        };
        let on_unwatched = Box::new(move || {
            if let Some(stopper) = stop.borrow_mut().take() {
                stopper();
            }
        }) as Box<dyn Fn()>;

        with_runtime(|runtime| {
            let mut nodes = runtime.nodes.borrow_mut();
            if let Some(node) = nodes.get_mut(id) {
                node.kind = NodeKind::Source {
                    hooks: SourceHooks::from_parts(
                        Some(on_watched),
                        Some(on_unwatched),
                    ),
                };
            }
        });

        Sensor {
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    /// Notifies subscribers without changing the stored value, for external
    /// systems that mutate the referenced object in place.
    pub fn notify(&self) {
        assert!(self.try_notify(), "Sensor::notify(): sensor disposed");
    }

    /// Attempts to notify subscribers; `false` if the sensor is disposed.
    pub fn try_notify(&self) -> bool {
        with_runtime(|runtime| {
            if runtime.nodes.borrow().get(self.id).is_none() {
                return false;
            }
            runtime.mark_subscribers_dirty(self.id);
            runtime.run_effects();
            true
        })
    }

    /// Returns the current value, failing with
    /// [`ReactiveError::UnsetValue`] while the sensor has not published yet.
    pub fn require(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        self.try_get()?.ok_or(ReactiveError::UnsetValue)
    }
}

impl<T: Clone> SignalGet<Option<T>> for Sensor<T> {
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
        self.id.track_node();
        self.id
            .with_value::<SensorValue<T>, _>(|inner| inner.value.clone())
    }
}

impl<T> SignalWith<Option<T>> for Sensor<T> {
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
        self.id.track_node();
        self.id
            .with_value::<SensorValue<T>, _>(|inner| f(&inner.value))
    }
}

impl<T: Clone> SignalGetUntracked<Option<T>> for Sensor<T> {
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
        self.id
            .with_value::<SensorValue<T>, _>(|inner| inner.value.clone())
    }
}

impl<T> SignalWithUntracked<Option<T>> for Sensor<T> {
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
        self.id
            .with_value::<SensorValue<T>, _>(|inner| f(&inner.value))
    }
}

impl<T> SignalTrack for Sensor<T> {
    fn track(&self) {
        self.id.track_node();
    }
}

impl<T> SignalDispose for Sensor<T> {
    fn dispose(self) {
        // stopping before the node disappears lets the external source
        // disconnect
        with_runtime(|runtime| {
            let hooks =
                runtime.nodes.borrow().get(self.id).and_then(|n| n.kind.hooks());
            let has_subscribers = runtime
                .node_subscribers
                .borrow()
                .get(self.id)
                .map(|s| !s.borrow().is_empty())
                .unwrap_or(false);
            if has_subscribers {
                if let Some(hooks) = hooks {
                    if let Some(unwatched) = &hooks.on_unwatched {
                        runtime.untracked(|| unwatched());
                    }
                }
            }
            runtime.dispose_node(self.id);
        });
    }
}
