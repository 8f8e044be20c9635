use crate::{
    error::ReactiveError,
    runtime::{with_runtime, Runtime},
};

slotmap::new_key_type! {
    /// Unique ID assigned to a scope.
    pub(crate) struct ScopeId;
}

/// Runs `f` inside a new scope and returns its result together with the
/// scope's disposer.
///
/// Every node created inside `f` (signals, memos, tasks, sensors, effects,
/// and nested scopes) is owned by the scope; disposing the scope disposes
/// them all, innermost scopes first.
///
/// ```
/// use finegrain_reactive::{scope, Effect, Signal, SignalGet, SignalSet};
/// use std::{cell::Cell, rc::Rc};
///
/// let count = Signal::new(0);
/// let runs = Rc::new(Cell::new(0));
///
/// let ((), disposer) = scope({
///     let runs = Rc::clone(&runs);
///     move || {
///         Effect::new(move || {
///             count.get();
///             runs.set(runs.get() + 1);
///         });
///     }
/// });
/// assert_eq!(runs.get(), 1);
///
/// disposer.dispose();
/// count.set(1); // the effect is gone
/// assert_eq!(runs.get(), 1);
/// ```
pub fn scope<T>(f: impl FnOnce() -> T) -> (T, ScopeDisposer) {
    with_runtime(|runtime| {
        let id = runtime.scopes.borrow_mut().insert(Default::default());

        if let Some(parent) = runtime.owner.get() {
            runtime.scope_parents.borrow_mut().insert(id, parent);
            let mut children = runtime.scope_children.borrow_mut();
            if let Some(entry) = children.entry(parent) {
                entry.or_default().push(id);
            }
        }

        let prev = runtime.owner.replace(Some(id));
        let guard = SetOwnerOnDrop(prev);
        let value = f();
        runtime.owner.set(prev);
        std::mem::forget(guard); // avoid Drop

        (value, ScopeDisposer { id })
    })
}

struct SetOwnerOnDrop(Option<ScopeId>);

impl Drop for SetOwnerOnDrop {
    fn drop(&mut self) {
        with_runtime(|runtime| runtime.owner.set(self.0));
    }
}

/// Handle that disposes a scope created by [`scope`].
#[derive(Debug)]
#[must_use = "a scope leaks its nodes unless dispose() is called"]
pub struct ScopeDisposer {
    pub(crate) id: ScopeId,
}

impl ScopeDisposer {
    /// Disposes the scope: child scopes first, then the scope's cleanup
    /// functions, then every node it owns.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn dispose(self) {
        with_runtime(|runtime| dispose_scope(runtime, self.id));
    }
}

fn dispose_scope(runtime: &Runtime, id: ScopeId) {
    // removing the scope up front makes disposal idempotent when a parent
    // disposes a child whose disposer is also held elsewhere
    let owned = match runtime.scopes.borrow_mut().remove(id) {
        Some(owned) => owned,
        None => return,
    };

    let children = runtime.scope_children.borrow_mut().remove(id);
    for child in children.into_iter().flatten() {
        dispose_scope(runtime, child);
    }

    let cleanups = runtime.scope_cleanups.borrow_mut().remove(id);
    for cleanup in cleanups.into_iter().flatten() {
        cleanup();
    }

    runtime.scope_parents.borrow_mut().remove(id);

    for node in owned.into_inner() {
        runtime.dispose_node(node);
    }
}

/// Registers a cleanup with the current owner.
///
/// Inside a running watcher (an effect body, a memo or task computation) the
/// cleanup attaches to that node and runs before its next re-run and at
/// disposal. Otherwise it attaches to the surrounding scope and runs when
/// the scope is disposed. With neither, the cleanup can never run; this is
/// reported on the logging side-channel.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    if try_on_cleanup(f).is_err() {
        tracing::warn!(
            "on_cleanup called with no surrounding scope or running watcher; \
             the cleanup will never run"
        );
    }
}

/// Registers a cleanup with the current owner, failing with
/// [`ReactiveError::RequiredOwner`] when there is none.
pub fn try_on_cleanup(f: impl FnOnce() + 'static) -> Result<(), ReactiveError> {
    enum Target {
        Node(crate::node::NodeId),
        Scope(ScopeId),
    }

    with_runtime(|runtime| {
        let target = if let Some(observer) = runtime
            .observer
            .get()
            .filter(|observer| runtime.nodes.borrow().get(*observer).is_some())
        {
            Target::Node(observer)
        } else if let Some(owner) = runtime
            .owner
            .get()
            .filter(|owner| runtime.scopes.borrow().get(*owner).is_some())
        {
            Target::Scope(owner)
        } else {
            return Err(ReactiveError::RequiredOwner);
        };

        match target {
            Target::Node(node) => {
                runtime.add_node_cleanup(node, Box::new(f));
            }
            Target::Scope(scope) => {
                let mut cleanups = runtime.scope_cleanups.borrow_mut();
                if let Some(entry) = cleanups.entry(scope) {
                    entry.or_default().push(Box::new(f));
                }
            }
        }
        Ok(())
    })
}
