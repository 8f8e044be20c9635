use finegrain_reactive::{
    AbortSignal, Effect, Error, Outcome, ReactiveError, Signal, SignalDispose,
    SignalGet, SignalSet, Task, TaskOptions,
};
use std::{cell::Cell, cell::RefCell, rc::Rc, time::Duration};
use tokio::{task::LocalSet, time::sleep};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn task_starts_unset_and_settles() {
    LocalSet::new()
        .run_until(async {
            let t = Task::new(|_prev, _abort: AbortSignal| async {
                sleep(Duration::from_millis(25)).await;
                42
            });

            assert_eq!(t.get(), None);

            sleep(Duration::from_millis(50)).await;
            assert_eq!(t.get(), Some(42));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn task_tracks_signal_changes() {
    LocalSet::new()
        .run_until(async {
            let signal = Signal::new(10);
            let t = Task::new(move |_prev, _abort| async move {
                sleep(Duration::from_millis(10)).await;
                signal.get()
            });

            assert_eq!(t.get(), None);
            sleep(Duration::from_millis(25)).await;
            assert_eq!(t.get(), Some(10));

            // nothing watches the task, so the write only invalidates it;
            // the next read kicks off the new run and returns the stale
            // value until that run settles
            signal.set(30);
            assert_eq!(t.get(), Some(10));
            sleep(Duration::from_millis(25)).await;
            assert_eq!(t.get(), Some(30));

            signal.set(50);
            assert_eq!(t.get(), Some(30));
            sleep(Duration::from_millis(25)).await;
            assert_eq!(t.get(), Some(50));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dependency_change_aborts_the_inflight_run() {
    LocalSet::new()
        .run_until(async {
            let src = Signal::new(1);
            let runs = Rc::new(Cell::new(0));
            let tokens = Rc::new(RefCell::new(Vec::new()));

            let t = Task::new({
                let runs = Rc::clone(&runs);
                let tokens = Rc::clone(&tokens);
                move |_prev, abort| {
                    runs.set(runs.get() + 1);
                    tokens.borrow_mut().push(abort.clone());
                    // read in the synchronous prelude, so the dependency
                    // edge exists before the first await
                    let v = src.get();
                    async move {
                        sleep(Duration::from_millis(100)).await;
                        v * 2
                    }
                }
            });

            assert_eq!(t.get(), None);
            assert_eq!(runs.get(), 1);

            sleep(Duration::from_millis(10)).await;
            src.set(2);

            // the in-flight token aborts at write time, before the retry
            assert!(tokens.borrow()[0].is_aborted());

            sleep(Duration::from_millis(200)).await;
            assert_eq!(t.get(), Some(4));
            // aborted run plus exactly one retry
            assert_eq!(runs.get(), 2);
            assert!(!tokens.borrow()[1].is_aborted());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn at_most_one_run_is_in_flight() {
    LocalSet::new()
        .run_until(async {
            let runs = Rc::new(Cell::new(0));
            let t = Task::new({
                let runs = Rc::clone(&runs);
                move |_prev, _abort| {
                    runs.set(runs.get() + 1);
                    async {
                        sleep(Duration::from_millis(50)).await;
                        7
                    }
                }
            });

            assert_eq!(t.get(), None);
            assert_eq!(t.get(), None);
            assert_eq!(t.get(), None);
            assert_eq!(runs.get(), 1);

            sleep(Duration::from_millis(100)).await;
            assert_eq!(t.get(), Some(7));
            assert_eq!(runs.get(), 1);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn settling_notifies_subscribers() {
    LocalSet::new()
        .run_until(async {
            let src = Signal::new(2);
            let t = Task::new(move |_prev, _abort| {
                let v = src.get();
                async move {
                    sleep(Duration::from_millis(10)).await;
                    v * 10
                }
            });

            let seen = Rc::new(RefCell::new(Vec::new()));
            Effect::new({
                let seen = Rc::clone(&seen);
                move || seen.borrow_mut().push(t.get())
            });
            assert_eq!(seen.borrow().as_slice(), [None]);

            sleep(Duration::from_millis(25)).await;
            assert_eq!(seen.borrow().as_slice(), [None, Some(20)]);

            // the write restarts the task but the effect is not re-run
            // until something actually changes
            src.set(3);
            assert_eq!(seen.borrow().as_slice(), [None, Some(20)]);
            sleep(Duration::from_millis(25)).await;
            assert_eq!(seen.borrow().as_slice(), [None, Some(20), Some(30)]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn equal_settlement_does_not_notify() {
    LocalSet::new()
        .run_until(async {
            let src = Signal::new(1);
            let t = Task::new(move |_prev, _abort| {
                let v = src.get();
                async move {
                    sleep(Duration::from_millis(10)).await;
                    v % 2
                }
            });

            let runs = Rc::new(Cell::new(0));
            Effect::new({
                let runs = Rc::clone(&runs);
                move || {
                    t.get();
                    runs.set(runs.get() + 1);
                }
            });
            sleep(Duration::from_millis(25)).await;
            // creation run plus the first settlement
            assert_eq!(runs.get(), 2);

            // same parity: the recomputation settles to an equal value, so
            // the effect is never notified
            src.set(3);
            sleep(Duration::from_millis(25)).await;
            assert_eq!(runs.get(), 2);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_runs_cache_their_error() {
    LocalSet::new()
        .run_until(async {
            let src = Signal::new(-1);
            let t = Task::new_outcome(move |_prev, _abort| {
                let v = src.get();
                async move {
                    sleep(Duration::from_millis(10)).await;
                    if v < 0 {
                        Outcome::Fail(Error::msg("negative input"))
                    } else {
                        Outcome::Ready(v)
                    }
                }
            });

            assert_eq!(t.try_get(), Ok(None));
            sleep(Duration::from_millis(25)).await;
            assert!(matches!(
                t.try_get(),
                Err(ReactiveError::Computation(ref e))
                    if e.to_string() == "negative input"
            ));

            // the read after the write kicks off the recovery run and still
            // reports the cached error until it settles
            src.set(5);
            assert!(t.try_get().is_err());
            sleep(Duration::from_millis(25)).await;
            assert_eq!(t.try_get(), Ok(Some(5)));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn initial_value_is_visible_before_the_first_settlement() {
    LocalSet::new()
        .run_until(async {
            let t = Task::new_with_options(
                |prev: Option<i32>, _abort| async move {
                    sleep(Duration::from_millis(10)).await;
                    prev.unwrap_or(0) + 1
                },
                TaskOptions::new().initial(100),
            );

            assert_eq!(t.get(), Some(100));
            sleep(Duration::from_millis(25)).await;
            assert_eq!(t.get(), Some(101));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn disposal_aborts_the_inflight_run() {
    LocalSet::new()
        .run_until(async {
            let finished = Rc::new(Cell::new(false));
            let tokens = Rc::new(RefCell::new(Vec::new()));
            let t = Task::new({
                let finished = Rc::clone(&finished);
                let tokens = Rc::clone(&tokens);
                move |_prev, abort| {
                    tokens.borrow_mut().push(abort.clone());
                    let finished = Rc::clone(&finished);
                    async move {
                        sleep(Duration::from_millis(50)).await;
                        finished.set(true);
                        1
                    }
                }
            });

            assert_eq!(t.get(), None);
            sleep(Duration::from_millis(10)).await;

            t.dispose();
            assert!(tokens.borrow()[0].is_aborted());

            sleep(Duration::from_millis(100)).await;
            // the aborted body never reached its tail
            assert!(!finished.get());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn async_effect_aborts_stale_runs_and_discards_their_cleanups() {
    LocalSet::new()
        .run_until(async {
            let src = Signal::new(0);
            let cleanups = Rc::new(RefCell::new(Vec::new()));
            let settled = Rc::new(RefCell::new(Vec::new()));

            Effect::new_async({
                let cleanups = Rc::clone(&cleanups);
                let settled = Rc::clone(&settled);
                move |_abort| {
                    let n = src.get();
                    let cleanups = Rc::clone(&cleanups);
                    let settled = Rc::clone(&settled);
                    async move {
                        sleep(Duration::from_millis(20)).await;
                        settled.borrow_mut().push(n);
                        move || cleanups.borrow_mut().push(n)
                    }
                }
            });

            // two rapid re-runs cancel run 0 and run 1 before they settle
            sleep(Duration::from_millis(5)).await;
            src.set(1);
            sleep(Duration::from_millis(5)).await;
            src.set(2);

            sleep(Duration::from_millis(100)).await;
            assert_eq!(settled.borrow().as_slice(), [2]);
            assert!(cleanups.borrow().is_empty());

            // the next re-run runs the cleanup of the settled run
            src.set(3);
            sleep(Duration::from_millis(100)).await;
            assert_eq!(settled.borrow().as_slice(), [2, 3]);
            assert_eq!(cleanups.borrow().as_slice(), [2]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn async_effect_token_aborts_on_rerun() {
    LocalSet::new()
        .run_until(async {
            let src = Signal::new(0);
            let tokens = Rc::new(RefCell::new(Vec::<AbortSignal>::new()));

            Effect::new_async({
                let tokens = Rc::clone(&tokens);
                move |abort| {
                    src.get();
                    tokens.borrow_mut().push(abort.clone());
                    async move {
                        sleep(Duration::from_millis(50)).await;
                    }
                }
            });
            assert_eq!(tokens.borrow().len(), 1);

            sleep(Duration::from_millis(5)).await;
            src.set(1);

            assert_eq!(tokens.borrow().len(), 2);
            assert!(tokens.borrow()[0].is_aborted());
            assert!(!tokens.borrow()[1].is_aborted());
        })
        .await;
}
