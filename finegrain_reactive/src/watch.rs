use crate::{
    effect::Effect, runtime::untrack, traits::SignalDispose,
};
use std::{cell::RefCell, rc::Rc};

/// A variant of [`Effect`] that separates *what* is tracked from *what runs*.
///
/// Every signal read inside `deps` is tracked; `callback` runs untracked and
/// receives the current `deps` value, the previous one, and its own previous
/// return value. Returns a stop function.
///
/// If `immediate` is false, the callback only runs once the first change is
/// detected; with `immediate` set it also runs right away.
///
/// ```
/// use finegrain_reactive::{watch, Signal, SignalGet, SignalSet};
/// use std::{cell::RefCell, rc::Rc};
///
/// let num = Signal::new(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let stop = watch(
///     move || num.get(),
///     {
///         let log = Rc::clone(&log);
///         move |num, prev, _| log.borrow_mut().push((*num, prev.copied()))
///     },
///     false,
/// );
///
/// num.set(1);
/// assert_eq!(log.borrow().as_slice(), [(1, Some(0))]);
///
/// stop();
/// num.set(2); // nothing happens
/// assert_eq!(log.borrow().len(), 1);
/// ```
pub fn watch<W, T>(
    deps: impl Fn() -> W + 'static,
    callback: impl Fn(&W, Option<&W>, Option<T>) -> T + 'static,
    immediate: bool,
) -> impl Fn() + Clone
where
    W: Clone + 'static,
    T: 'static,
{
    let prev_deps: Rc<RefCell<Option<W>>> = Rc::new(RefCell::new(None));
    let prev_ret: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

    let effect = Effect::new({
        let prev_deps = Rc::clone(&prev_deps);
        let prev_ret = Rc::clone(&prev_ret);
        move || {
            let deps_value = deps();

            let first_run = prev_deps.borrow().is_none();
            if first_run && !immediate {
                *prev_deps.borrow_mut() = Some(deps_value);
                return;
            }

            let prev = prev_deps.borrow_mut().take();
            let prev_value = prev_ret.borrow_mut().take();
            let ret = untrack(|| {
                callback(&deps_value, prev.as_ref(), prev_value)
            });
            *prev_ret.borrow_mut() = Some(ret);
            *prev_deps.borrow_mut() = Some(deps_value);
        }
    });

    move || effect.dispose()
}
