use crate::node::NodeId;
use crate::runtime::with_runtime;
use cfg_if::cfg_if;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Spawns a thread-local [`Future`] on whichever executor is available.
///
/// Async tasks and async effects are driven through this shim: on wasm the
/// bindgen executor, natively a tokio `LocalSet` (under the default `tokio`
/// feature), otherwise the future is driven to completion in place.
pub fn spawn_local<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    cfg_if! {
        if #[cfg(all(target_arch = "wasm32", target_os = "unknown", feature = "wasm"))] {
            wasm_bindgen_futures::spawn_local(fut)
        } else if #[cfg(feature = "tokio")] {
            tokio::task::spawn_local(fut);
        } else {
            futures::executor::block_on(fut)
        }
    }
}

pin_project_lite::pin_project! {
    /// Restores a node as the active watcher around every poll of the inner
    /// future, so that reads performed after an `await` still subscribe it.
    pub(crate) struct TrackedFuture<Fut> {
        #[pin]
        inner: Fut,
        node: NodeId,
    }
}

impl<Fut> TrackedFuture<Fut> {
    pub fn new(node: NodeId, inner: Fut) -> Self {
        Self { inner, node }
    }
}

impl<Fut: Future> Future for TrackedFuture<Fut> {
    type Output = Fut::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let node = *this.node;
        let inner = this.inner;
        with_runtime(|runtime| {
            runtime.with_observer(Some(node), || inner.poll(cx))
        })
    }
}
