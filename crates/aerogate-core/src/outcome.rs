//! Success-or-error result type for asynchronous completions.

use crate::error::Error;

/// Uniform completion signature for every asynchronous operation.
pub type Callback<T> = Box<dyn FnOnce(Outcome<T, Error>) + Send + 'static>;

/// Discriminated result holding exactly one of a value or an error.
///
/// Every asynchronous operation in the SDK reports through an `Outcome`
/// delivered to its callback. Unlike `Result`, consuming the wrong side
/// is reported as a `PreconditionViolation` instead of a panic.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<V, E> {
    Value(V),
    Error(E),
}

impl<V, E> Outcome<V, E> {
    pub fn value(v: V) -> Self {
        Outcome::Value(v)
    }

    pub fn error(e: E) -> Self {
        Outcome::Error(e)
    }

    pub fn has_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn has_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn as_value(&self) -> Option<&V> {
        match self {
            Outcome::Value(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&E> {
        match self {
            Outcome::Value(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }

    /// Consume the value side; the error side yields a `PreconditionViolation`.
    pub fn into_value(self) -> Result<V, Error> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Error(_) => Err(Error::PreconditionViolation(
                "accessed value of an error outcome".to_string(),
            )),
        }
    }

    /// Consume the error side; the value side yields a `PreconditionViolation`.
    pub fn into_error(self) -> Result<E, Error> {
        match self {
            Outcome::Value(_) => Err(Error::PreconditionViolation(
                "accessed error of a value outcome".to_string(),
            )),
            Outcome::Error(e) => Ok(e),
        }
    }

    pub fn map<W>(self, f: impl FnOnce(V) -> W) -> Outcome<W, E> {
        match self {
            Outcome::Value(v) => Outcome::Value(f(v)),
            Outcome::Error(e) => Outcome::Error(e),
        }
    }

    pub fn map_error<F>(self, f: impl FnOnce(E) -> F) -> Outcome<V, F> {
        match self {
            Outcome::Value(v) => Outcome::Value(v),
            Outcome::Error(e) => Outcome::Error(f(e)),
        }
    }

    pub fn into_result(self) -> Result<V, E> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Error(e) => Err(e),
        }
    }
}

impl<V, E> From<Result<V, E>> for Outcome<V, E> {
    fn from(result: Result<V, E>) -> Self {
        match result {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sides_are_mutually_exclusive() {
        let ok: Outcome<u32, Error> = Outcome::value(7);
        assert!(ok.has_value());
        assert!(!ok.has_error());

        let err: Outcome<u32, Error> = Outcome::error(Error::transport("down"));
        assert!(err.has_error());
        assert!(!err.has_value());
    }

    #[test]
    fn wrong_side_access_is_a_precondition_violation() {
        let ok: Outcome<u32, Error> = Outcome::value(7);
        assert!(matches!(
            ok.into_error(),
            Err(Error::PreconditionViolation(_))
        ));

        let err: Outcome<u32, Error> = Outcome::error(Error::transport("down"));
        assert!(matches!(
            err.into_value(),
            Err(Error::PreconditionViolation(_))
        ));
    }

    #[test]
    fn map_touches_only_the_value_side() {
        let ok: Outcome<u32, Error> = Outcome::value(7);
        assert_eq!(ok.map(|v| v * 2).as_value(), Some(&14));

        let err: Outcome<u32, Error> = Outcome::error(Error::transport("down"));
        assert!(err.map(|v| v * 2).has_error());
    }

    #[test]
    fn converts_from_result() {
        let out: Outcome<&str, Error> = Ok("fine").into();
        assert_eq!(out.as_value(), Some(&"fine"));
    }
}
