use finegrain_reactive::{
    Effect, Error, Memo, MemoOptions, Outcome, ReactiveError, Signal,
    SignalDispose, SignalGet, SignalOptions, SignalSet,
};
use std::{cell::Cell, rc::Rc};

#[test]
fn memo_calculates_value() {
    let a = Signal::new(1);
    let b = Signal::new(2);
    let c = Signal::new(3);

    let d = Memo::new(move |_| a.get() + b.get() + c.get());
    assert_eq!(d.get(), Some(6));
}

#[test]
fn memo_is_lazy_and_caches() {
    let calculations = Rc::new(Cell::new(0));
    let a = Signal::new(1);

    let doubled = Memo::new({
        let calculations = Rc::clone(&calculations);
        move |_| {
            calculations.set(calculations.get() + 1);
            a.get() * 2
        }
    });

    // nothing runs until the first read
    assert_eq!(calculations.get(), 0);

    assert_eq!(doubled.get(), Some(2));
    assert_eq!(doubled.get(), Some(2));
    assert_eq!(doubled.get(), Some(2));
    assert_eq!(calculations.get(), 1);

    a.set(0);
    assert_eq!(doubled.get(), Some(0));
    assert_eq!(calculations.get(), 2);
}

#[test]
fn nested_memos_recompute_in_dependency_order() {
    let a = Signal::new(0);
    let b = Signal::new(0);
    let c = Memo::new(move |_| a.get() + b.get());
    let d = Memo::new(move |_| c.get().unwrap_or(0) * 2);
    let e = Memo::new(move |_| d.get().unwrap_or(0) + 1);

    assert_eq!(e.get(), Some(1));
    assert_eq!(d.get(), Some(0));
    assert_eq!(c.get(), Some(0));

    a.set(5);
    assert_eq!(c.get(), Some(5));
    assert_eq!(d.get(), Some(10));
    assert_eq!(e.get(), Some(11));

    b.set(1);
    assert_eq!(e.get(), Some(13));
    assert_eq!(d.get(), Some(12));
    assert_eq!(c.get(), Some(6));
}

#[test]
fn diamond_updates_once() {
    let x = Signal::new("a".to_string());
    let a = Memo::new(move |_| x.get());
    let b = Memo::new(move |_| x.get());

    let calculations = Rc::new(Cell::new(0));
    let c = Memo::new({
        let calculations = Rc::clone(&calculations);
        move |_| {
            calculations.set(calculations.get() + 1);
            format!("{} {}", a.get().unwrap(), b.get().unwrap())
        }
    });

    assert_eq!(c.get().as_deref(), Some("a a"));
    assert_eq!(calculations.get(), 1);

    x.set("aa".to_string());
    assert_eq!(c.get().as_deref(), Some("aa aa"));
    assert_eq!(calculations.get(), 2);
}

#[test]
fn unchanged_value_does_not_notify_subscribers() {
    let x = Signal::new(2);
    let parity = Memo::new(move |_| x.get() % 2);

    let runs = Rc::new(Cell::new(0));
    Effect::new({
        let runs = Rc::clone(&runs);
        move || {
            parity.get();
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    // parity recomputes but its value is unchanged
    x.set(4);
    assert_eq!(runs.get(), 1);

    x.set(5);
    assert_eq!(runs.get(), 2);
}

#[test]
fn previous_value_is_passed_to_the_computation() {
    let x = Signal::new(1);
    let running_total =
        Memo::new(move |prev: Option<&i32>| prev.copied().unwrap_or(0) + x.get());

    assert_eq!(running_total.get(), Some(1));
    x.set(2);
    assert_eq!(running_total.get(), Some(3));
    x.set(10);
    assert_eq!(running_total.get(), Some(13));
}

#[test]
fn initial_value_seeds_the_first_run() {
    let x = Signal::new(5);
    let total = Memo::new_with_options(
        move |prev: Option<&i32>| prev.copied().unwrap_or(0) + x.get(),
        MemoOptions::new().initial(100),
    );

    assert_eq!(total.get(), Some(105));
}

#[test]
fn errors_are_cached_and_propagate_to_readers() {
    let x = Signal::new(0);
    let body_runs = Rc::new(Cell::new(0));

    let a = Memo::new_outcome({
        let body_runs = Rc::clone(&body_runs);
        move |_| {
            body_runs.set(body_runs.get() + 1);
            if x.get() == 1 {
                Outcome::Fail(Error::msg("calc"))
            } else {
                Outcome::Ready(1)
            }
        }
    });
    let b = Memo::new(move |_| match a.try_get() {
        Ok(_) => "ok",
        Err(_) => "fail",
    });

    assert_eq!(b.get(), Some("ok"));

    x.set(1);
    assert_eq!(b.get(), Some("fail"));
    let runs_after_failure = body_runs.get();

    // the cached error is returned without re-running the body
    assert!(matches!(
        a.try_get(),
        Err(ReactiveError::Computation(ref e)) if e.to_string() == "calc"
    ));
    assert_eq!(body_runs.get(), runs_after_failure);

    x.set(2);
    assert_eq!(b.get(), Some("ok"));
}

#[test]
fn circular_dependency_fails_the_offending_read() {
    let handle: Rc<Cell<Option<Memo<bool>>>> = Rc::new(Cell::new(None));

    let memo = Memo::new_outcome({
        let handle = Rc::clone(&handle);
        move |_| {
            let me = handle.get().expect("handle to be wired up");
            match me.try_get() {
                Err(ReactiveError::CircularDependency) => Outcome::Ready(true),
                other => panic!("expected a circular-dependency error, got {other:?}"),
            }
        }
    });
    handle.set(Some(memo));

    assert_eq!(memo.get(), Some(true));
}

#[test]
fn pending_memo_reads_as_unset() {
    let ready = Signal::new(false);
    let value = Memo::new_outcome(move |_| {
        if ready.get() {
            Outcome::Ready(42)
        } else {
            Outcome::Pending
        }
    });

    assert_eq!(value.get(), None);
    assert_eq!(value.try_get(), Ok(None));
    assert_eq!(value.require(), Err(ReactiveError::UnsetValue));

    ready.set(true);
    assert_eq!(value.get(), Some(42));
    assert_eq!(value.require(), Ok(42));
}

#[test]
fn unwatched_memo_releases_its_sources() {
    let unwatched = Rc::new(Cell::new(0));
    let source = Signal::new_with_options(
        1,
        SignalOptions::new().on_unwatched({
            let unwatched = Rc::clone(&unwatched);
            move || unwatched.set(unwatched.get() + 1)
        }),
    );
    let doubled = Memo::new(move |_| source.get() * 2);

    let effect = Effect::new(move || {
        doubled.get();
    });
    assert_eq!(unwatched.get(), 0);

    // the memo keeps its subscription until the next push finds it
    // without subscribers
    effect.dispose();
    assert_eq!(unwatched.get(), 0);

    source.set(2);
    assert_eq!(unwatched.get(), 1);

    // reading recomputes and resubscribes
    assert_eq!(doubled.get(), Some(4));
    assert_eq!(unwatched.get(), 1);
}

#[test]
fn disposed_memo_errors() {
    let m = Memo::new(|_| 1);
    assert_eq!(m.get(), Some(1));
    m.dispose();
    assert_eq!(m.try_get(), Err(ReactiveError::NodeDisposed));
}
