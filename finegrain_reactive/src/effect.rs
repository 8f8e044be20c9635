use crate::{
    node::{AnyComputation, NodeId, NodeKind, NodeState},
    runtime::with_runtime,
    spawn::{spawn_local, TrackedFuture},
    task::AbortSignal,
    traits::{IntoCleanup, SignalDispose},
};
use futures::future::{AbortHandle, Abortable, Aborted};
use std::{any::Any, cell::RefCell, future::Future, rc::Rc};

type Cleanup = Option<Box<dyn FnOnce()>>;

/// A root reactive consumer: runs a side-effecting callback whenever the
/// signals it reads change.
///
/// Creating an effect runs the callback once immediately, tracking every
/// signal read inside it. Writes outside a batch re-run it synchronously;
/// writes inside a batch are collapsed into a single re-run when the
/// outermost batch exits.
///
/// Effects are owned by the surrounding [`scope`](crate::scope) if one is
/// open; the returned handle can always dispose them directly.
///
/// ```
/// use finegrain_reactive::{Effect, Signal, SignalGet, SignalSet};
/// use std::{cell::RefCell, rc::Rc};
///
/// let name = Signal::new("Ada".to_string());
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// Effect::new({
///     let log = Rc::clone(&log);
///     move || log.borrow_mut().push(name.get())
/// });
///
/// name.set("Grace".to_string());
/// assert_eq!(log.borrow().as_slice(), ["Ada", "Grace"]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    pub(crate) id: NodeId,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

struct EffectFn<F>
where
    F: Fn() -> Cleanup,
{
    f: F,
}

impl<F> AnyComputation for EffectFn<F>
where
    F: Fn() -> Cleanup,
{
    fn run(&self, _value: Option<Rc<RefCell<dyn Any>>>) -> bool {
        let cleanup = (self.f)();
        if let Some(cleanup) = cleanup {
            with_runtime(|runtime| {
                let node_id = runtime
                    .observer
                    .get()
                    .expect("effect to run under its own tracking scope");
                runtime.add_node_cleanup(node_id, cleanup);
            });
        }
        true
    }
}

#[derive(Default)]
struct AsyncEffectState {
    abort: Option<AbortHandle>,
    /// Bumped per run; a settled run registers its cleanup only while its
    /// generation is still the current one.
    generation: u64,
}

struct AsyncEffectFn<F, Fut>
where
    F: Fn(AbortSignal) -> Fut,
    Fut: Future<Output = Cleanup>,
{
    f: F,
    state: Rc<RefCell<AsyncEffectState>>,
}

impl<F, Fut> AnyComputation for AsyncEffectFn<F, Fut>
where
    F: Fn(AbortSignal) -> Fut + 'static,
    Fut: Future<Output = Cleanup> + 'static,
{
    fn run(&self, _value: Option<Rc<RefCell<dyn Any>>>) -> bool {
        let (handle, registration) = AbortHandle::new_pair();
        let generation = {
            let mut state = self.state.borrow_mut();
            // the previous run, if still going, is stale from here on
            if let Some(prev) = state.abort.take() {
                prev.abort();
            }
            state.generation += 1;
            state.abort = Some(handle.clone());
            state.generation
        };

        let node_id = with_runtime(|runtime| runtime.observer.get())
            .expect("async effect to run under its own tracking scope");

        // the synchronous prelude runs here, tracked; the rest of the body
        // is polled under the same scope by TrackedFuture
        let fut = (self.f)(AbortSignal { handle });

        let state = Rc::clone(&self.state);
        spawn_local(async move {
            let result =
                TrackedFuture::new(node_id, Abortable::new(fut, registration))
                    .await;
            match result {
                Ok(cleanup) => {
                    let current = {
                        let mut state = state.borrow_mut();
                        if state.generation == generation {
                            state.abort = None;
                            true
                        } else {
                            false
                        }
                    };
                    // a stale run's cleanup is discarded
                    if current {
                        if let Some(cleanup) = cleanup {
                            with_runtime(|runtime| {
                                runtime.add_node_cleanup(node_id, cleanup);
                            });
                        }
                    }
                }
                // cancelled run: absorbed, not a failure
                Err(Aborted) => {}
            }
        });

        true
    }

    fn interrupt(&self) {
        if let Some(handle) = self.state.borrow_mut().abort.take() {
            handle.abort();
        }
    }
}

impl Effect {
    /// Creates an effect and runs it once immediately.
    ///
    /// The callback may return nothing, a cleanup closure, an optional
    /// cleanup, or a `Result` of either (see [`IntoCleanup`]); a returned
    /// cleanup runs before the next re-run and at disposal, and an `Err` is
    /// reported on the logging side-channel rather than thrown.
    ///
    /// ```
    /// use finegrain_reactive::{Effect, Signal, SignalGet, SignalSet};
    /// use std::{cell::Cell, rc::Rc};
    ///
    /// let tick = Signal::new(0);
    /// let open = Rc::new(Cell::new(0));
    ///
    /// let effect = Effect::new({
    ///     let open = Rc::clone(&open);
    ///     move || {
    ///         tick.get();
    ///         open.set(open.get() + 1);
    ///         let open = Rc::clone(&open);
    ///         move || open.set(open.get() - 1)
    ///     }
    /// });
    ///
    /// assert_eq!(open.get(), 1);
    /// tick.set(1); // cleanup of the first run, then the second run
    /// assert_eq!(open.get(), 1);
    ///
    /// use finegrain_reactive::SignalDispose;
    /// effect.dispose();
    /// assert_eq!(open.get(), 0);
    /// ```
    #[track_caller]
    pub fn new<C, M>(f: impl Fn() -> C + 'static) -> Self
    where
        C: IntoCleanup<M>,
    {
        Self::create(move || f().into_cleanup())
    }

    /// Creates an asynchronous effect.
    ///
    /// Each re-run aborts the previous run's [`AbortSignal`] before starting
    /// over, so at most one body is making progress at a time. The body
    /// resolves to anything [`IntoCleanup`]; a resolved cleanup is kept only
    /// if no newer run has started by the time the body settles — stale
    /// cleanups are discarded.
    #[track_caller]
    pub fn new_async<Fut, C, M>(
        f: impl Fn(AbortSignal) -> Fut + 'static,
    ) -> Self
    where
        Fut: Future<Output = C> + 'static,
        C: IntoCleanup<M>,
    {
        Self::create_async(move |abort| {
            let fut = f(abort);
            async move { fut.await.into_cleanup() }
        })
    }

    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    #[track_caller]
    fn create(f: impl Fn() -> Cleanup + 'static) -> Self {
        let id = with_runtime(|runtime| {
            runtime.insert_node(
                None,
                NodeState::Dirty,
                NodeKind::Effect {
                    f: Rc::new(EffectFn { f }),
                },
            )
        });
        with_runtime(|runtime| {
            // first run, then drain anything the first run invalidated
            runtime.update_if_necessary(id);
            runtime.run_effects();
        });
        Effect {
            id,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    #[track_caller]
    fn create_async<Fut>(f: impl Fn(AbortSignal) -> Fut + 'static) -> Self
    where
        Fut: Future<Output = Cleanup> + 'static,
    {
        let id = with_runtime(|runtime| {
            runtime.insert_node(
                None,
                NodeState::Dirty,
                NodeKind::Effect {
                    f: Rc::new(AsyncEffectFn {
                        f,
                        state: Rc::new(RefCell::new(
                            AsyncEffectState::default(),
                        )),
                    }),
                },
            )
        });
        with_runtime(|runtime| {
            runtime.update_if_necessary(id);
            runtime.run_effects();
        });
        Effect {
            id,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }
}

impl SignalDispose for Effect {
    fn dispose(self) {
        with_runtime(|runtime| runtime.dispose_node(self.id));
    }
}
