use crate::node::{NodeId, NodeKind, NodeState, ReactiveNode, SourceHooks};
use crate::scope::ScopeId;
use core::hash::BuildHasherDefault;
use indexmap::IndexSet;
use rustc_hash::FxHasher;
use slotmap::{SecondaryMap, SlotMap, SparseSecondaryMap};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    rc::Rc,
};

pub(crate) type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Consecutive pending-queue drain passes tolerated before the runtime
/// assumes a feedback loop between effects and stops flushing.
const MAX_FLUSH_PASSES: usize = 1024;

thread_local! {
    pub(crate) static RUNTIME: Runtime = Runtime::new();
}

/// Runs `f` with the thread's reactive runtime.
#[inline(always)]
pub(crate) fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    RUNTIME.with(|runtime| f(runtime))
}

// The data structure that owns every signal, memo, task, sensor, and effect
// in the reactive system, together with the scheduler state.
//
// The marking algorithm (Check/Dirty two-phase invalidation resolved by
// pull) follows Reactively (https://github.com/modderme123/reactively).
#[derive(Default)]
pub(crate) struct Runtime {
    /// The active watcher: reads performed while this is set subscribe it.
    pub observer: Cell<Option<NodeId>>,
    /// The scope that newly created nodes are owned by.
    pub owner: Cell<Option<ScopeId>>,
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    pub node_subscribers:
        RefCell<SecondaryMap<NodeId, RefCell<FxIndexSet<NodeId>>>>,
    pub node_sources: RefCell<SecondaryMap<NodeId, RefCell<FxIndexSet<NodeId>>>>,
    #[allow(clippy::type_complexity)]
    pub node_cleanups:
        RefCell<SparseSecondaryMap<NodeId, Vec<Box<dyn FnOnce()>>>>,
    pub pending_effects: RefCell<Vec<NodeId>>,
    pub batch_depth: Cell<usize>,
    pub scopes: RefCell<SlotMap<ScopeId, RefCell<Vec<NodeId>>>>,
    pub scope_parents: RefCell<SparseSecondaryMap<ScopeId, ScopeId>>,
    pub scope_children: RefCell<SparseSecondaryMap<ScopeId, Vec<ScopeId>>>,
    #[allow(clippy::type_complexity)]
    pub scope_cleanups:
        RefCell<SparseSecondaryMap<ScopeId, Vec<Box<dyn FnOnce()>>>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn current_state(&self, node: NodeId) -> NodeState {
        match self.nodes.borrow().get(node) {
            None => NodeState::Clean,
            Some(node) => node.state,
        }
    }

    pub(crate) fn is_computing(&self, node: NodeId) -> bool {
        self.nodes
            .borrow()
            .get(node)
            .map(|n| n.computing)
            .unwrap_or(false)
    }

    fn set_computing(&self, node: NodeId, computing: bool) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(node) {
            node.computing = computing;
        }
    }

    fn mark_clean(&self, node: NodeId) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(node) {
            node.state = NodeState::Clean;
        }
    }

    /// Runs `f` with `observer` as the active watcher, restoring the
    /// previous watcher on exit.
    pub(crate) fn with_observer<T>(
        &self,
        observer: Option<NodeId>,
        f: impl FnOnce() -> T,
    ) -> T {
        let prev = SetObserverOnDrop(self.observer.replace(observer));
        let v = f();
        self.observer.set(prev.0);
        std::mem::forget(prev); // avoid Drop
        v
    }

    /// Runs `f` with tracking disabled.
    pub(crate) fn untracked<T>(&self, f: impl FnOnce() -> T) -> T {
        self.with_observer(None, f)
    }

    /// Registers the active watcher, if any, as a subscriber of `node_id`.
    ///
    /// The `on_watched` hook fires just before the first subscriber lands,
    /// so a sensor's `start` can publish an initial value without notifying
    /// the subscriber that is currently being attached.
    pub(crate) fn track(&self, node_id: NodeId) {
        let Some(observer) = self.observer.get() else {
            return;
        };
        if observer == node_id {
            // a node never subscribes to itself
            return;
        }

        let newly_watched = {
            let mut subs = self.node_subscribers.borrow_mut();
            let Some(entry) = subs.entry(node_id) else {
                return;
            };
            let set = entry.or_default().borrow();
            if set.contains(&observer) {
                return;
            }
            set.is_empty()
        };

        if newly_watched {
            self.notify_watched(node_id);
        }

        let mut subs = self.node_subscribers.borrow_mut();
        if let Some(entry) = subs.entry(node_id) {
            entry.or_default().borrow_mut().insert(observer);
        }
        let mut sources = self.node_sources.borrow_mut();
        if let Some(entry) = sources.entry(observer) {
            entry.or_default().borrow_mut().insert(node_id);
        }
    }

    fn notify_watched(&self, node_id: NodeId) {
        let hooks = self.hooks(node_id);
        if let Some(hooks) = hooks {
            if let Some(watched) = &hooks.on_watched {
                self.untracked(|| watched());
            }
        }
    }

    fn notify_unwatched(&self, node_id: NodeId) {
        let hooks = self.hooks(node_id);
        if let Some(hooks) = hooks {
            if let Some(unwatched) = &hooks.on_unwatched {
                self.untracked(|| unwatched());
            }
        }
    }

    fn hooks(&self, node_id: NodeId) -> Option<Rc<SourceHooks>> {
        self.nodes.borrow().get(node_id).and_then(|n| n.kind.hooks())
    }

    /// Resolves a `Check` mark against the node's sources and re-runs the
    /// node if any of them actually changed.
    pub(crate) fn update_if_necessary(&self, node_id: NodeId) {
        if self.current_state(node_id) == NodeState::Check {
            let sources: Option<Vec<NodeId>> = {
                let sources = self.node_sources.borrow();
                sources
                    .get(node_id)
                    .map(|n| n.borrow().iter().copied().collect())
            };

            for source in sources.into_iter().flatten() {
                self.update_if_necessary(source);
                if self.current_state(node_id) >= NodeState::Dirty {
                    // a single changed parent is enough; checking the rest
                    // would only risk re-running them needlessly
                    break;
                }
            }
        }

        if self.current_state(node_id) >= NodeState::Dirty {
            self.update(node_id);
        } else {
            self.mark_clean(node_id);
        }
    }

    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    pub(crate) fn update(&self, node_id: NodeId) {
        let node = { self.nodes.borrow().get(node_id).cloned() };
        let Some(node) = node else {
            return;
        };

        let changed = match &node.kind {
            // sources are written in place and propagate at write time;
            // they are never pulled
            NodeKind::Source { .. } => return,
            NodeKind::Memo { f, .. }
            | NodeKind::Task { f, .. }
            | NodeKind::Effect { f } => {
                if self.is_computing(node_id) {
                    // the node is mid-run; leave it dirty so the running
                    // pass picks the change up when the body exits
                    return;
                }
                self.set_computing(node_id, true);
                self.cleanup(node_id);
                let value = node.value.clone();
                let changed =
                    self.with_observer(Some(node_id), || f.run(value));
                self.set_computing(node_id, false);
                changed
            }
        };

        if changed {
            let subs = self.node_subscribers.borrow();
            if let Some(subs) = subs.get(node_id) {
                let mut nodes = self.nodes.borrow_mut();
                for sub_id in subs.borrow().iter() {
                    if let Some(sub) = nodes.get_mut(*sub_id) {
                        sub.state = NodeState::Dirty;
                    }
                }
            }
        }

        // an effect whose own body wrote one of its sources gets exactly
        // one more pass once the body has exited
        let rerun = {
            let mut nodes = self.nodes.borrow_mut();
            match nodes.get_mut(node_id) {
                Some(n) if n.kind.is_effect() && n.invalidated => {
                    n.invalidated = false;
                    n.state = NodeState::Dirty;
                    true
                }
                Some(n) => {
                    n.invalidated = false;
                    n.state = NodeState::Clean;
                    false
                }
                None => false,
            }
        };
        if rerun {
            self.pending_effects.borrow_mut().push(node_id);
        }
    }

    /// Drops every subscription this node holds on its sources and runs its
    /// registered cleanups, in insertion order.
    pub(crate) fn cleanup(&self, node_id: NodeId) {
        let mut newly_unwatched: Vec<NodeId> = Vec::new();
        {
            let sources = self.node_sources.borrow();
            if let Some(sources) = sources.get(node_id) {
                let subs = self.node_subscribers.borrow();
                for source in sources.borrow_mut().drain(..) {
                    if let Some(source_subs) = subs.get(source) {
                        let mut source_subs = source_subs.borrow_mut();
                        if source_subs.shift_remove(&node_id)
                            && source_subs.is_empty()
                        {
                            newly_unwatched.push(source);
                        }
                    }
                }
            }
        }
        for source in newly_unwatched {
            self.notify_unwatched(source);
        }

        let cleanups = { self.node_cleanups.borrow_mut().remove(node_id) };
        if let Some(cleanups) = cleanups {
            for cleanup in cleanups {
                cleanup();
            }
        }
    }

    /// Propagates an actual change of `origin`'s value (a write, a sensor
    /// publication, a task settlement): direct subscribers are definitely
    /// stale and marked dirty, transitive ones get `Check`, and every
    /// reached effect is queued. The origin itself stays clean — source
    /// values are replaced in place and never pulled.
    #[cfg_attr(
        debug_assertions,
        tracing::instrument(level = "trace", skip_all)
    )]
    pub(crate) fn mark_subscribers_dirty(&self, origin: NodeId) {
        let marked = self.mark_from(origin);
        self.after_mark(marked);
    }

    /// Depth-first mark traversal over the subscribers of `origin`, in
    /// insertion order. Nodes already visited by an undrained pass are
    /// skipped.
    fn mark_from(&self, origin: NodeId) -> Vec<NodeId> {
        let mut marked_derived: Vec<NodeId> = Vec::new();

        let mut nodes = self.nodes.borrow_mut();
        let mut pending_effects = self.pending_effects.borrow_mut();
        let subscribers = self.node_subscribers.borrow();

        let direct: Vec<NodeId> = subscribers
            .get(origin)
            .map(|s| s.borrow().iter().copied().collect())
            .unwrap_or_default();

        let mut stack: Vec<NodeId> = Vec::new();
        for child_id in direct {
            let Some(child) = nodes.get_mut(child_id) else {
                continue;
            };
            // an effect invalidated while its own body runs gets one more
            // pass after the body exits, visited or not
            if child.computing && child.kind.is_effect() {
                child.invalidated = true;
            }
            if child.state == NodeState::DirtyMarked {
                continue;
            }
            Self::mark(
                child_id,
                child,
                NodeState::Dirty,
                &mut pending_effects,
                &mut marked_derived,
            );
            if let Some(children) = subscribers.get(child_id) {
                stack.extend(children.borrow().iter().rev().copied());
            }
        }
        while let Some(child_id) = stack.pop() {
            let Some(child) = nodes.get_mut(child_id) else {
                continue;
            };
            if child.computing && child.kind.is_effect() {
                child.invalidated = true;
            }
            if child.state == NodeState::Check
                || child.state == NodeState::DirtyMarked
            {
                continue;
            }
            Self::mark(
                child_id,
                child,
                NodeState::Check,
                &mut pending_effects,
                &mut marked_derived,
            );
            if let Some(children) = subscribers.get(child_id) {
                stack.extend(children.borrow().iter().rev().copied());
            }
        }

        marked_derived
    }

    /// Post-traversal work that must run outside the graph borrows: abort
    /// in-flight runs of marked tasks, and let memos nobody watches release
    /// their upstream subscriptions. (A task is kept wired up, since its
    /// abort continuation must retry even when nothing subscribes to it
    /// yet.)
    fn after_mark(&self, marked_derived: Vec<NodeId>) {
        for id in marked_derived {
            let (computation, is_task, has_subscribers) = {
                let nodes = self.nodes.borrow();
                let Some(node) = nodes.get(id) else {
                    continue;
                };
                let has_subscribers = self
                    .node_subscribers
                    .borrow()
                    .get(id)
                    .map(|s| !s.borrow().is_empty())
                    .unwrap_or(false);
                (
                    node.kind.computation(),
                    matches!(node.kind, NodeKind::Task { .. }),
                    has_subscribers,
                )
            };
            if is_task {
                if let Some(f) = &computation {
                    f.interrupt();
                }
            } else if !has_subscribers {
                self.release(id);
            }
        }
    }

    #[inline(always)] // small function, used in the marking loop
    fn mark(
        node_id: NodeId,
        node: &mut ReactiveNode,
        level: NodeState,
        pending_effects: &mut Vec<NodeId>,
        marked_derived: &mut Vec<NodeId>,
    ) {
        if level > node.state {
            node.state = level;
        }

        match node.kind {
            NodeKind::Effect { .. } => pending_effects.push(node_id),
            NodeKind::Memo { .. } | NodeKind::Task { .. } => {
                marked_derived.push(node_id);
            }
            NodeKind::Source { .. } => {}
        }

        if node.state == NodeState::Dirty {
            node.state = NodeState::DirtyMarked;
        }
    }

    /// A derivation with no subscribers lets go of its sources and goes
    /// dirty; the next read recomputes and resubscribes.
    fn release(&self, node_id: NodeId) {
        {
            let mut nodes = self.nodes.borrow_mut();
            match nodes.get_mut(node_id) {
                Some(node) => node.state = NodeState::Dirty,
                None => return,
            }
        }
        self.cleanup(node_id);
    }

    /// Drains the queued effects unless a batch is open.
    pub(crate) fn run_effects(&self) {
        if self.batch_depth.get() == 0 {
            self.drain_pending();
        }
    }

    /// Drains the queued effects regardless of batch depth. Each pass may
    /// queue further effects; draining repeats until the queue stays empty.
    pub(crate) fn drain_pending(&self) {
        let mut passes = 0usize;
        loop {
            let effects = self.pending_effects.take();
            if effects.is_empty() {
                break;
            }
            passes += 1;
            if passes > MAX_FLUSH_PASSES {
                tracing::error!(
                    pending = effects.len(),
                    "circular dependency between effects: still re-invalidating \
                     each other after {MAX_FLUSH_PASSES} flush passes; dropping \
                     the remaining notifications"
                );
                break;
            }
            for effect_id in effects {
                self.update_if_necessary(effect_id);
            }
        }
    }

    /// Fully removes a node: cancels in-flight async work, runs cleanups,
    /// and detaches it from both sides of the graph.
    pub(crate) fn dispose_node(&self, node_id: NodeId) {
        let computation = {
            self.nodes
                .borrow()
                .get(node_id)
                .and_then(|n| n.kind.computation())
        };
        if let Some(f) = computation {
            f.interrupt();
        }

        self.cleanup(node_id);

        // each remaining subscriber drops this node from its sources so it
        // does not try to read the disposed node later
        let subs = { self.node_subscribers.borrow_mut().remove(node_id) };
        if let Some(subs) = subs {
            let sources = self.node_sources.borrow();
            for sub in subs.borrow().iter() {
                if let Some(sub_sources) = sources.get(*sub) {
                    sub_sources.borrow_mut().shift_remove(&node_id);
                }
            }
        }

        self.node_sources.borrow_mut().remove(node_id);
        self.node_cleanups.borrow_mut().remove(node_id);
        self.nodes.borrow_mut().remove(node_id);
    }

    /// Attaches a cleanup to a node; it runs before the node's next re-run
    /// and at disposal, in insertion order. Cleanups registered against a
    /// node that is already gone are dropped.
    pub(crate) fn add_node_cleanup(&self, node_id: NodeId, f: Box<dyn FnOnce()>) {
        if self.nodes.borrow().get(node_id).is_none() {
            tracing::debug!("dropped a cleanup registered on a disposed node");
            return;
        }
        let mut cleanups = self.node_cleanups.borrow_mut();
        if let Some(entry) = cleanups.entry(node_id) {
            entry.or_default().push(f);
        }
    }

    /// Hands ownership of a freshly created node to the current scope.
    pub(crate) fn push_owned(&self, node_id: NodeId) {
        if let Some(owner) = self.owner.get() {
            let scopes = self.scopes.borrow();
            if let Some(scope) = scopes.get(owner) {
                scope.borrow_mut().push(node_id);
            }
        }
    }

    pub(crate) fn insert_node(
        &self,
        value: Option<Rc<RefCell<dyn Any>>>,
        state: NodeState,
        kind: NodeKind,
    ) -> NodeId {
        let id = self.nodes.borrow_mut().insert(ReactiveNode {
            value,
            state,
            computing: false,
            invalidated: false,
            kind,
        });
        self.push_owned(id);
        id
    }
}

struct SetObserverOnDrop(Option<NodeId>);

impl Drop for SetObserverOnDrop {
    fn drop(&mut self) {
        with_runtime(|runtime| runtime.observer.set(self.0));
    }
}

/// Groups writes so that their notifications are delivered together.
///
/// Inside `batch`, writes update values immediately (a read within the same
/// batch observes the new value) but subscriber notifications are queued and
/// collapsed; they are drained once when the outermost `batch` call exits.
/// `batch` is re-entrant.
///
/// ```
/// use finegrain_reactive::{batch, Effect, Signal, SignalGet, SignalSet};
/// use std::{cell::Cell, rc::Rc};
///
/// let a = Signal::new(1);
/// let b = Signal::new(2);
/// let runs = Rc::new(Cell::new(0));
/// Effect::new({
///     let runs = Rc::clone(&runs);
///     move || {
///         a.get();
///         b.get();
///         runs.set(runs.get() + 1);
///     }
/// });
/// assert_eq!(runs.get(), 1);
///
/// batch(|| {
///     a.set(10);
///     b.set(20);
/// });
/// // both writes, one notification
/// assert_eq!(runs.get(), 2);
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|runtime| {
        runtime.batch_depth.set(runtime.batch_depth.get() + 1);
        let guard = DecrementBatchOnDrop;
        let v = f();
        drop(guard);
        if runtime.batch_depth.get() == 0 {
            runtime.drain_pending();
        }
        v
    })
}

struct DecrementBatchOnDrop;

impl Drop for DecrementBatchOnDrop {
    fn drop(&mut self) {
        with_runtime(|runtime| {
            runtime
                .batch_depth
                .set(runtime.batch_depth.get().saturating_sub(1));
        });
    }
}

/// Synchronously drains all pending notifications, even inside a batch.
pub fn flush() {
    with_runtime(|runtime| runtime.drain_pending());
}

/// Suspends reactive tracking while running the given function.
///
/// Reads performed inside `f` do not subscribe the active watcher, which
/// isolates parts of the graph from one another.
///
/// ```
/// use finegrain_reactive::{untrack, Memo, Signal, SignalGet, SignalSet};
///
/// let a = Signal::new(0);
/// let b = Signal::new(0);
/// let c = Memo::new(move |_| a.get() + untrack(|| b.get()));
///
/// assert_eq!(c.get(), Some(0));
/// a.set(1);
/// assert_eq!(c.get(), Some(1));
/// b.set(10);
/// // not recomputed: b was read untracked
/// assert_eq!(c.get(), Some(1));
/// a.set(2);
/// assert_eq!(c.get(), Some(12));
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|runtime| runtime.untracked(f))
}
