use crate::{
    equality::{self, Equals},
    error::{Error, ReactiveError},
    node::{AnyComputation, NodeId, NodeKind, NodeState, SourceHooks},
    outcome::Outcome,
    runtime::with_runtime,
    signal::panic_on_read_error,
    spawn::{spawn_local, TrackedFuture},
    traits::{
        SignalDispose, SignalGet, SignalGetUntracked, SignalTrack, SignalWith,
        SignalWithUntracked,
    },
};
use futures::future::{AbortHandle, Abortable, Aborted};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    future::Future,
    marker::PhantomData,
    rc::Rc,
};

/// Cancellation token handed to a task or async-effect body.
///
/// The runtime aborts the token when a tracked dependency changes mid-flight,
/// when the node is disposed, or when its owning scope is disposed. The
/// wrapped future stops being polled at its next suspension point; the body
/// can also poll [`AbortSignal::is_aborted`] to bail out of long synchronous
/// stretches.
#[derive(Clone)]
pub struct AbortSignal {
    pub(crate) handle: AbortHandle,
}

impl AbortSignal {
    /// Whether this run has been cancelled.
    pub fn is_aborted(&self) -> bool {
        self.handle.is_aborted()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.handle.is_aborted())
            .finish()
    }
}

/// An asynchronous derived reactive value.
///
/// Reading a task never blocks: it returns the cached value (or `None` while
/// nothing has settled yet) and, if the task is stale, kicks off a single
/// asynchronous recomputation. At most one run is in flight at a time; a
/// dependency change while one is running aborts it and schedules exactly
/// one retry with the latest inputs. Subscribers are only notified when a
/// run settles with a changed value or error.
///
/// The body receives the previous value and an [`AbortSignal`]. The whole
/// future is polled under the task's tracking scope, so signals read after
/// an `await` become dependencies too.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Task<T>
where
    T: 'static,
{
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Task<T> {}

/// Options accepted by the `*_with_options` task constructors.
pub struct TaskOptions<T> {
    pub(crate) initial: Option<T>,
    pub(crate) equals: Option<Equals<T>>,
    pub(crate) on_watched: Option<Box<dyn Fn()>>,
    pub(crate) on_unwatched: Option<Box<dyn Fn()>>,
}

impl<T> Default for TaskOptions<T> {
    fn default() -> Self {
        Self {
            initial: None,
            equals: None,
            on_watched: None,
            on_unwatched: None,
        }
    }
}

impl<T> TaskOptions<T> {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value visible before the first run settles, also passed to the first
    /// run as the previous value.
    pub fn initial(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    /// Replaces the default `PartialEq` comparison used to decide whether a
    /// settled value counts as a change.
    pub fn equals(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(f));
        self
    }

    /// Called, untracked, just before the task gains its first subscriber.
    pub fn on_watched(mut self, f: impl Fn() + 'static) -> Self {
        self.on_watched = Some(Box::new(f));
        self
    }

    /// Called, untracked, after the task loses its last subscriber.
    pub fn on_unwatched(mut self, f: impl Fn() + 'static) -> Self {
        self.on_unwatched = Some(Box::new(f));
        self
    }
}

/// Value storage of a task node.
pub(crate) struct TaskValue<T> {
    pub value: Option<T>,
    pub error: Option<Error>,
    pub equals: Equals<T>,
}

#[derive(Default)]
struct TaskFlight {
    /// Abort handle of the in-flight run; `None` while idle.
    abort: Option<AbortHandle>,
    /// Bumped for every started run; settlements from older generations are
    /// discarded.
    generation: u64,
}

struct TaskFn<T, F, Fut>
where
    F: Fn(Option<T>, AbortSignal) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    f: F,
    flight: Rc<RefCell<TaskFlight>>,
    node: Cell<Option<NodeId>>,
    marker: PhantomData<fn() -> (T, Fut)>,
}

impl<T, F, Fut> AnyComputation for TaskFn<T, F, Fut>
where
    T: Clone + 'static,
    F: Fn(Option<T>, AbortSignal) -> Fut + 'static,
    Fut: Future<Output = Outcome<T>> + 'static,
{
    fn run(&self, value: Option<Rc<RefCell<dyn Any>>>) -> bool {
        let value = value.expect("task node to hold a value");

        if self.flight.borrow().abort.is_some() {
            // a run is in flight; it will notify when it settles
            return false;
        }

        let node_id = self.node.get().expect("task node id to be wired up");
        let prev = {
            let value = value.borrow();
            let inner = value
                .downcast_ref::<TaskValue<T>>()
                .expect("task node value had the wrong type");
            inner.value.clone()
        };

        let (handle, registration) = AbortHandle::new_pair();
        let generation = {
            let mut flight = self.flight.borrow_mut();
            flight.generation += 1;
            flight.abort = Some(handle.clone());
            flight.generation
        };

        // the synchronous prelude of the body runs right here, under the
        // task's tracking scope; everything after its first await is polled
        // under the same scope by TrackedFuture
        let fut = (self.f)(prev, AbortSignal { handle });

        let flight = Rc::clone(&self.flight);
        spawn_local(async move {
            let result =
                TrackedFuture::new(node_id, Abortable::new(fut, registration))
                    .await;
            settle::<T>(node_id, &flight, generation, &value, result);
        });

        false
    }

    fn interrupt(&self) {
        if let Some(handle) = self.flight.borrow_mut().abort.take() {
            handle.abort();
        }
    }
}

fn settle<T: Clone + 'static>(
    node_id: NodeId,
    flight: &Rc<RefCell<TaskFlight>>,
    generation: u64,
    value: &Rc<RefCell<dyn Any>>,
    result: Result<Outcome<T>, Aborted>,
) {
    {
        let mut flight = flight.borrow_mut();
        if flight.generation != generation {
            // a newer run took over; this settlement is stale
            return;
        }
        flight.abort = None;
    }

    match result {
        Err(Aborted) => {
            // cancelled because a dependency changed mid-flight; re-pull so
            // exactly one retry runs with the latest inputs
            with_runtime(|runtime| {
                {
                    let mut nodes = runtime.nodes.borrow_mut();
                    let Some(node) = nodes.get_mut(node_id) else {
                        return;
                    };
                    if node.state < NodeState::Dirty {
                        node.state = NodeState::Dirty;
                    }
                }
                runtime.update_if_necessary(node_id);
                runtime.run_effects();
            });
        }
        Ok(outcome) => {
            let changed = {
                let mut value = value.borrow_mut();
                let inner = value
                    .downcast_mut::<TaskValue<T>>()
                    .expect("task node value had the wrong type");
                let changed = match &outcome {
                    Outcome::Ready(new) => {
                        inner.error.is_some()
                            || match &inner.value {
                                Some(old) => !(inner.equals)(new, old),
                                None => true,
                            }
                    }
                    Outcome::Pending => {
                        inner.value.is_some() || inner.error.is_some()
                    }
                    Outcome::Fail(err) => {
                        inner.value.is_some()
                            || inner.error.as_ref() != Some(err)
                    }
                };
                if changed {
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
            };

            if changed {
                // the task itself is already up to date; only its
                // subscribers need to hear about the new value
                with_runtime(|runtime| {
                    if runtime.nodes.borrow().get(node_id).is_none() {
                        return;
                    }
                    runtime.mark_subscribers_dirty(node_id);
                    runtime.run_effects();
                });
            }
        }
    }
}

impl<T: Clone + 'static> Task<T> {
    /// Creates a task from an infallible async computation.
    #[track_caller]
    pub fn new<Fut>(f: impl Fn(Option<T>, AbortSignal) -> Fut + 'static) -> Self
    where
        T: PartialEq,
        Fut: Future<Output = T> + 'static,
    {
        Self::new_with_options(f, TaskOptions::default())
    }

    /// Creates a task from an infallible async computation, with options.
    #[track_caller]
    pub fn new_with_options<Fut>(
        f: impl Fn(Option<T>, AbortSignal) -> Fut + 'static,
        options: TaskOptions<T>,
    ) -> Self
    where
        T: PartialEq,
        Fut: Future<Output = T> + 'static,
    {
        Self::new_outcome_with_options(
            move |prev, abort| {
                let fut = f(prev, abort);
                async move { Outcome::Ready(fut.await) }
            },
            options,
        )
    }

    /// Creates a task whose runs may stay pending or fail.
    #[track_caller]
    pub fn new_outcome<Fut>(
        f: impl Fn(Option<T>, AbortSignal) -> Fut + 'static,
    ) -> Self
    where
        T: PartialEq,
        Fut: Future<Output = Outcome<T>> + 'static,
    {
        Self::new_outcome_with_options(f, TaskOptions::default())
    }

    /// Creates a task with the full settlement protocol and options.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    #[track_caller]
    pub fn new_outcome_with_options<Fut>(
        f: impl Fn(Option<T>, AbortSignal) -> Fut + 'static,
        options: TaskOptions<T>,
    ) -> Self
    where
        T: PartialEq,
        Fut: Future<Output = Outcome<T>> + 'static,
    {
        let TaskOptions {
            initial,
            equals,
            on_watched,
            on_unwatched,
        } = options;
        let inner = TaskValue {
            value: initial,
            error: None,
            equals: equality::resolve(equals),
        };
        let task_fn = Rc::new(TaskFn {
            f,
            flight: Rc::new(RefCell::new(TaskFlight::default())),
            node: Cell::new(None),
            marker: PhantomData,
        });
        let id = with_runtime(|runtime| {
            runtime.insert_node(
                Some(Rc::new(RefCell::new(inner)) as Rc<RefCell<dyn Any>>),
                // lazy: the first read kicks off the first run
                NodeState::Dirty,
                NodeKind::Task {
                    f: Rc::clone(&task_fn) as Rc<dyn AnyComputation>,
                    hooks: SourceHooks::from_parts(on_watched, on_unwatched),
                },
            )
        });
        task_fn.node.set(Some(id));
        Task {
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    /// Returns the settled value, failing with
    /// [`ReactiveError::UnsetValue`] while the task has not settled yet.
    pub fn require(&self) -> Result<T, ReactiveError> {
        self.try_get()?.ok_or(ReactiveError::UnsetValue)
    }
}

impl<T: Clone> SignalGet<Option<T>> for Task<T> {
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

impl<T> SignalWith<Option<T>> for Task<T> {
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
        self.id.with_value::<TaskValue<T>, _>(|inner| match &inner.error {
            Some(err) => Err(ReactiveError::Computation(err.clone())),
            None => Ok(f(&inner.value)),
        })?
    }
}

impl<T: Clone> SignalGetUntracked<Option<T>> for Task<T> {
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

impl<T> SignalWithUntracked<Option<T>> for Task<T> {
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
        self.id.with_value::<TaskValue<T>, _>(|inner| match &inner.error {
            Some(err) => Err(ReactiveError::Computation(err.clone())),
            None => Ok(f(&inner.value)),
        })?
    }
}

impl<T> SignalTrack for Task<T> {
    fn track(&self) {
        self.id.track_node();
    }
}

impl<T> SignalDispose for Task<T> {
    fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_node(self.id));
    }
}
