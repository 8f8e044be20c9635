use std::rc::Rc;

/// Shared equality predicate attached to a node.
///
/// Writes and recomputations that produce a value equal to the cached one do
/// not notify subscribers; the predicate decides what "equal" means for the
/// node. The unset state compares unequal to every value, so predicates only
/// ever see two set values.
pub type Equals<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Equality predicate that always reports inequality, forcing every write to
/// propagate.
///
/// This is how in-place mutations of shared objects are published through a
/// [`Sensor`](crate::Sensor): the reference never changes, so the default
/// comparison would swallow every update.
pub fn skip_equality<T>(_: &T, _: &T) -> bool {
    false
}

pub(crate) fn partial_eq<T: PartialEq>() -> Equals<T> {
    Rc::new(|a, b| a == b)
}

/// Falls back to `PartialEq` when no predicate was supplied.
pub(crate) fn resolve<T: PartialEq>(custom: Option<Equals<T>>) -> Equals<T> {
    custom.unwrap_or_else(partial_eq)
}
