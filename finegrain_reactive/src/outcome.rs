use crate::error::Error;
use std::error;

/// The result of one run of a reactive computation.
///
/// `Ready` caches a value and marks the node clean. `Pending` leaves the node
/// unset without being an error; downstream readers observe `None`. `Fail`
/// caches the error, which every subsequent fallible read returns until a
/// later run succeeds.
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    /// The computation produced a value.
    Ready(T),
    /// The computation has no value yet.
    Pending,
    /// The computation failed.
    Fail(Error),
}

impl<T> Outcome<T> {
    /// Maps the `Ready` value, passing the other variants through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ready(value) => Outcome::Ready(f(value)),
            Outcome::Pending => Outcome::Pending,
            Outcome::Fail(err) => Outcome::Fail(err),
        }
    }

    /// Returns `true` for `Outcome::Ready`.
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }
}

impl<T> From<Option<T>> for Outcome<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Outcome::Ready(value),
            None => Outcome::Pending,
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T>
where
    E: error::Error + Send + Sync + 'static,
{
    fn from(value: Result<T, E>) -> Self {
        match value {
            Ok(value) => Outcome::Ready(value),
            Err(err) => Outcome::Fail(Error::new(err)),
        }
    }
}
