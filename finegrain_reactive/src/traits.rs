use crate::error::{Error, ReactiveError};

/// Clones the current value out of a reactive node.
pub trait SignalGet<T> {
    /// Clones and returns the current value, subscribing the active watcher.
    ///
    /// # Panics
    /// Panics if the node has been disposed, is part of a dependency cycle,
    /// or caches a computation error.
    #[track_caller]
    fn get(&self) -> T;

    /// Clones and returns the current value, subscribing the active watcher;
    /// errors instead of panicking.
    fn try_get(&self) -> Result<T, ReactiveError>;
}

/// Applies a closure to the current value without cloning it.
pub trait SignalWith<T> {
    /// Applies `f` to the current value, subscribing the active watcher.
    ///
    /// # Panics
    /// Panics if the node has been disposed, is part of a dependency cycle,
    /// or caches a computation error.
    #[track_caller]
    fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U;

    /// Applies `f` to the current value, subscribing the active watcher;
    /// errors instead of panicking.
    fn try_with<U>(&self, f: impl FnOnce(&T) -> U) -> Result<U, ReactiveError>;
}

/// [`SignalGet`] without creating a subscription.
pub trait SignalGetUntracked<T> {
    /// Clones and returns the current value without tracking it.
    #[track_caller]
    fn get_untracked(&self) -> T;

    /// Clones and returns the current value without tracking it; errors
    /// instead of panicking.
    fn try_get_untracked(&self) -> Result<T, ReactiveError>;
}

/// [`SignalWith`] without creating a subscription.
pub trait SignalWithUntracked<T> {
    /// Applies `f` to the current value without tracking it.
    #[track_caller]
    fn with_untracked<U>(&self, f: impl FnOnce(&T) -> U) -> U;

    /// Applies `f` to the current value without tracking it; errors instead
    /// of panicking.
    fn try_with_untracked<U>(
        &self,
        f: impl FnOnce(&T) -> U,
    ) -> Result<U, ReactiveError>;
}

/// Replaces the value of a writable node, notifying subscribers when the
/// node's equality predicate reports a change.
pub trait SignalSet<T> {
    /// Writes the new value. Misuse (a disposed node, a guard rejection) is
    /// reported on the logging side-channel rather than panicking.
    fn set(&self, new_value: T);

    /// Writes the new value, surfacing rejections.
    fn try_set(&self, new_value: T) -> Result<(), ReactiveError>;
}

/// Mutates the value of a writable node in place, notifying subscribers.
///
/// In-place mutation consumes the previous value, so there is nothing for
/// the equality predicate to compare against: every update notifies.
pub trait SignalUpdate<T> {
    /// Mutates the value in place and notifies subscribers.
    fn update(&self, f: impl FnOnce(&mut T));

    /// Mutates the value in place and notifies subscribers, returning the
    /// closure's result, or an error if the node is gone.
    fn try_update<U>(&self, f: impl FnOnce(&mut T) -> U)
        -> Result<U, ReactiveError>;
}

/// Subscribes the active watcher without reading the value.
pub trait SignalTrack {
    /// Subscribes the active watcher to this node.
    fn track(&self);
}

/// Consumes the handle and removes the node from the graph.
pub trait SignalDispose {
    /// Disposes the node: cancels in-flight async work, runs its cleanups,
    /// and detaches it from every other node.
    fn dispose(self);
}

/// Conversion accepted wherever a callback hands a cleanup back to the
/// runtime: effect bodies and sensor `start` closures.
///
/// Implemented for `()` (no cleanup), any `FnOnce()` closure, `Option<C>`,
/// and `Result<C, Error>`. The `Err` arm registers nothing and is reported
/// on the logging side-channel, never thrown — effects and sensors are
/// terminal nodes, so there is nobody downstream to rethrow to.
///
/// The `Marker` parameter only disambiguates the implementations; callers
/// never name it.
pub trait IntoCleanup<Marker> {
    /// Converts into the boxed cleanup, if any.
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>>;
}

/// Marker types distinguishing the [`IntoCleanup`] implementations.
pub mod cleanup_marker {
    use std::marker::PhantomData;

    /// Marks the implementation for `()`.
    pub struct Nothing;

    /// Marks the implementation for stop and teardown closures.
    pub struct Stop;

    /// Marks the implementation for `Option<C>`.
    pub struct Maybe<M>(PhantomData<M>);

    /// Marks the implementation for `Result<C, Error>`.
    pub struct Reported<M>(PhantomData<M>);
}

impl IntoCleanup<cleanup_marker::Nothing> for () {
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        None
    }
}

impl<F> IntoCleanup<cleanup_marker::Stop> for F
where
    F: FnOnce() + 'static,
{
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        Some(Box::new(self))
    }
}

impl<C, M> IntoCleanup<cleanup_marker::Maybe<M>> for Option<C>
where
    C: IntoCleanup<M>,
{
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        self.and_then(IntoCleanup::into_cleanup)
    }
}

impl<C, M> IntoCleanup<cleanup_marker::Reported<M>> for Result<C, Error>
where
    C: IntoCleanup<M>,
{
    fn into_cleanup(self) -> Option<Box<dyn FnOnce()>> {
        match self {
            Ok(cleanup) => cleanup.into_cleanup(),
            Err(err) => {
                tracing::error!(
                    "unhandled error in a reactive callback: {err}"
                );
                None
            }
        }
    }
}
