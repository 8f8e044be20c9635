use finegrain_reactive::{
    on_cleanup, Effect, Error, Signal, SignalDispose, SignalGet,
    SignalGetUntracked, SignalSet,
};
use std::{cell::Cell, cell::RefCell, rc::Rc};

#[test]
fn effect_runs_immediately_and_on_change() {
    let a = Signal::new(-1);
    let b = Rc::new(RefCell::new(String::new()));

    Effect::new({
        let b = Rc::clone(&b);
        move || {
            *b.borrow_mut() = format!("Value is {}", a.get());
        }
    });
    assert_eq!(b.borrow().as_str(), "Value is -1");

    a.set(1);
    assert_eq!(b.borrow().as_str(), "Value is 1");
}

#[test]
fn effect_tracks_a_dynamic_dependency_set() {
    let use_first = Signal::new(true);
    let first = Signal::new("a");
    let second = Signal::new("b");
    let runs = Rc::new(Cell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move || {
            if use_first.get() {
                first.get();
            } else {
                second.get();
            }
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    // while the first branch is active, `second` is not a dependency
    second.set("bb");
    assert_eq!(runs.get(), 1);

    use_first.set(false);
    assert_eq!(runs.get(), 2);

    // the roles flip after the branch switch
    first.set("aa");
    assert_eq!(runs.get(), 2);
    second.set("bbb");
    assert_eq!(runs.get(), 3);
}

#[test]
fn returned_cleanup_runs_before_rerun_and_at_disposal() {
    let tick = Signal::new(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let effect = Effect::new({
        let log = Rc::clone(&log);
        move || {
            let n = tick.get();
            log.borrow_mut().push(format!("run {n}"));
            let log = Rc::clone(&log);
            move || log.borrow_mut().push(format!("cleanup {n}"))
        }
    });
    assert_eq!(log.borrow().as_slice(), ["run 0"]);

    tick.set(1);
    assert_eq!(log.borrow().as_slice(), ["run 0", "cleanup 0", "run 1"]);

    effect.dispose();
    assert_eq!(
        log.borrow().as_slice(),
        ["run 0", "cleanup 0", "run 1", "cleanup 1"]
    );

    // disposed: no further runs, no double cleanup
    tick.set(2);
    assert_eq!(log.borrow().len(), 4);
}

#[test]
fn optional_cleanup_registers_only_when_present() {
    let tick = Signal::new(0);
    let cleaned = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let cleaned = Rc::clone(&cleaned);
        move || {
            let n = tick.get();
            if n % 2 == 0 {
                let cleaned = Rc::clone(&cleaned);
                Some(move || cleaned.set(cleaned.get() + 1))
            } else {
                None
            }
        }
    });
    assert_eq!(cleaned.get(), 0);

    // the even run's cleanup fires; the odd run registers nothing
    tick.set(1);
    assert_eq!(cleaned.get(), 1);
    tick.set(2);
    assert_eq!(cleaned.get(), 1);

    effect.dispose();
    assert_eq!(cleaned.get(), 2);
}

#[test]
fn fallible_body_reports_errors_and_registers_no_cleanup() {
    let healthy = Signal::new(true);
    let open = Rc::new(Cell::new(0));

    let effect = Effect::new({
        let open = Rc::clone(&open);
        move || {
            if healthy.get() {
                open.set(open.get() + 1);
                let open = Rc::clone(&open);
                Ok(move || open.set(open.get() - 1))
            } else {
                // reported on the logging side-channel, never thrown
                Err(Error::msg("device lost"))
            }
        }
    });
    assert_eq!(open.get(), 1);

    // the failing run still tears the previous one down, but registers
    // nothing of its own
    healthy.set(false);
    assert_eq!(open.get(), 0);

    effect.dispose();
    assert_eq!(open.get(), 0);
}

#[test]
fn on_cleanup_registrations_run_in_insertion_order() {
    let tick = Signal::new(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let effect = Effect::new({
        let log = Rc::clone(&log);
        move || {
            tick.get();
            for label in ["first", "second", "third"] {
                let log = Rc::clone(&log);
                on_cleanup(move || log.borrow_mut().push(label));
            }
        }
    });
    assert!(log.borrow().is_empty());

    tick.set(1);
    assert_eq!(log.borrow().as_slice(), ["first", "second", "third"]);

    effect.dispose();
    assert_eq!(
        log.borrow().as_slice(),
        ["first", "second", "third", "first", "second", "third"]
    );
}

#[test]
fn writing_a_tracked_cell_reruns_the_body_once_more() {
    let count = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    Effect::new({
        let runs = Rc::clone(&runs);
        move || {
            runs.set(runs.get() + 1);
            let n = count.get();
            if n < 3 {
                count.set(n + 1);
            }
        }
    });

    // initial run plus one follow-up per write, until the fixpoint
    assert_eq!(count.get_untracked(), 3);
    assert_eq!(runs.get(), 4);
}

#[test]
fn disposing_inside_a_batch_prevents_the_rerun() {
    let s = Signal::new(0);
    let runs = Rc::new(Cell::new(0));
    let effect = Effect::new({
        let runs = Rc::clone(&runs);
        move || {
            s.get();
            runs.set(runs.get() + 1);
        }
    });

    finegrain_reactive::batch(|| {
        s.set(1);
        effect.dispose();
    });
    assert_eq!(runs.get(), 1);
}
