use std::{any::Any, cell::RefCell, rc::Rc};

slotmap::new_key_type! {
    /// Unique ID assigned to a node in the reactive graph.
    pub struct NodeId;
}

/// One node of the dependency graph.
///
/// The value is type-erased; the typed accessors in each node module
/// downcast it back. Nodes are cloned out of the arena before running user
/// code so that no arena borrow is held across a callback.
#[derive(Clone)]
pub(crate) struct ReactiveNode {
    pub value: Option<Rc<RefCell<dyn Any>>>,
    pub state: NodeState,
    /// Set while the node's own computation is on the stack; a re-entrant
    /// read of such a node is a circular dependency.
    pub computing: bool,
    /// Set when a write invalidated this node while its body was running, so
    /// the scheduler gives it one more pass after the body exits.
    pub invalidated: bool,
    pub kind: NodeKind,
}

impl ReactiveNode {
    pub fn value(&self) -> Rc<RefCell<dyn Any>> {
        self.value.clone().expect("reactive node to hold a value")
    }
}

#[derive(Clone)]
pub(crate) enum NodeKind {
    /// State cells and sensors: push-only sources without a pull capability.
    Source { hooks: Option<Rc<SourceHooks>> },
    /// Lazy synchronous derivation.
    Memo {
        f: Rc<dyn AnyComputation>,
        hooks: Option<Rc<SourceHooks>>,
    },
    /// Asynchronous derivation with abort-chained cancellation.
    Task {
        f: Rc<dyn AnyComputation>,
        hooks: Option<Rc<SourceHooks>>,
    },
    /// Root consumer; queued rather than pulled.
    Effect { f: Rc<dyn AnyComputation> },
}

impl NodeKind {
    pub fn hooks(&self) -> Option<Rc<SourceHooks>> {
        match self {
            NodeKind::Source { hooks }
            | NodeKind::Memo { hooks, .. }
            | NodeKind::Task { hooks, .. } => hooks.clone(),
            NodeKind::Effect { .. } => None,
        }
    }

    pub fn computation(&self) -> Option<Rc<dyn AnyComputation>> {
        match self {
            NodeKind::Source { .. } => None,
            NodeKind::Memo { f, .. }
            | NodeKind::Task { f, .. }
            | NodeKind::Effect { f } => Some(Rc::clone(f)),
        }
    }

    pub fn is_effect(&self) -> bool {
        matches!(self, NodeKind::Effect { .. })
    }
}

/// Mark state of a node, ordered by severity.
///
/// `Check` means "a transitive source may have changed"; `Dirty` means "a
/// direct source definitely changed"; `DirtyMarked` is dirty plus already
/// visited by the current mark traversal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum NodeState {
    Clean,
    Check,
    Dirty,
    DirtyMarked,
}

/// Pull capability of a derived node or effect, plus cancellation for async
/// kinds.
pub(crate) trait AnyComputation {
    /// Recomputes the node's cached value; returns whether subscribers
    /// should be notified.
    fn run(&self, value: Option<Rc<RefCell<dyn Any>>>) -> bool;

    /// Cancels an in-flight asynchronous run, if any.
    fn interrupt(&self) {}
}

/// Lifecycle hooks fired on subscriber-set transitions: `on_watched` just
/// before the first subscriber is added, `on_unwatched` after the last one
/// is removed. Both run with tracking disabled.
#[derive(Default)]
pub(crate) struct SourceHooks {
    pub on_watched: Option<Box<dyn Fn()>>,
    pub on_unwatched: Option<Box<dyn Fn()>>,
}

impl SourceHooks {
    pub fn from_parts(
        on_watched: Option<Box<dyn Fn()>>,
        on_unwatched: Option<Box<dyn Fn()>>,
    ) -> Option<Rc<Self>> {
        if on_watched.is_none() && on_unwatched.is_none() {
            None
        } else {
            Some(Rc::new(Self {
                on_watched,
                on_unwatched,
            }))
        }
    }
}
