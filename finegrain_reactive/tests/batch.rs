use finegrain_reactive::{
    batch, flush, Effect, Memo, Signal, SignalGet, SignalSet,
};
use std::{cell::Cell, rc::Rc};

#[test]
fn batched_writes_notify_once() {
    let s1 = Signal::new(3);
    let s2 = Signal::new(4);
    let sum = Memo::new(move |_| s1.get() + s2.get());

    let out = Rc::new(Cell::new(0));
    let runs = Rc::new(Cell::new(0));
    Effect::new({
        let out = Rc::clone(&out);
        let runs = Rc::clone(&runs);
        move || {
            out.set(sum.get().unwrap());
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!((out.get(), runs.get()), (7, 1));

    batch(|| {
        s1.set(6);
        s2.set(8);
    });

    // exactly one additional run, seeing both writes
    assert_eq!((out.get(), runs.get()), (14, 2));
}

#[test]
fn writes_are_visible_within_the_batch() {
    let s = Signal::new(1);
    let doubled = Memo::new(move |_| s.get() * 2);

    batch(|| {
        s.set(10);
        // a writer-then-reader in the same batch sees the new value,
        // including through a derived node
        assert_eq!(s.get(), 10);
        assert_eq!(doubled.get(), Some(20));
    });
}

#[test]
fn batch_is_reentrant_and_only_the_outermost_drains() {
    let s = Signal::new(0);
    let runs = Rc::new(Cell::new(0));
    Effect::new({
        let runs = Rc::clone(&runs);
        move || {
            s.get();
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    batch(|| {
        s.set(1);
        batch(|| {
            s.set(2);
        });
        // the inner batch must not have drained
        assert_eq!(runs.get(), 1);
        s.set(3);
    });
    assert_eq!(runs.get(), 2);
    assert_eq!(s.get(), 3);
}

#[test]
fn effect_depending_on_multiple_batched_sources_runs_once() {
    let a = Signal::new(0);
    let b = Signal::new(0);
    let c = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move || {
            a.get();
            b.get();
            c.get();
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    batch(|| {
        a.set(1);
        b.set(1);
        c.set(1);
        a.set(2); // a second write to the same cell changes nothing either
    });
    assert_eq!(runs.get(), 2);
}

#[test]
fn flush_drains_even_inside_a_batch() {
    let s = Signal::new(0);
    let runs = Rc::new(Cell::new(0));
    Effect::new({
        let runs = Rc::clone(&runs);
        move || {
            s.get();
            runs.set(runs.get() + 1);
        }
    });

    batch(|| {
        s.set(1);
        assert_eq!(runs.get(), 1);
        flush();
        assert_eq!(runs.get(), 2);
    });
    // nothing left to drain at batch end
    assert_eq!(runs.get(), 2);
}

#[test]
fn return_value_passes_through() {
    let s = Signal::new(1);
    let doubled = batch(|| {
        s.set(21);
        s.get() * 2
    });
    assert_eq!(doubled, 42);
}
