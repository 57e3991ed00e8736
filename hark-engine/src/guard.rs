//! Converts handler failures into [`Rejection`] values.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

/// Why a bound handler produced no reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The handler returned an error
    Failed(String),
    /// The handler panicked
    Panicked(String),
    /// No handler is registered under the command's key
    MissingHandler(String),
    /// Nested invocations exceeded the depth limit
    TooDeep(usize),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Failed(msg) => write!(f, "error: {}", msg),
            Rejection::Panicked(msg) => write!(f, "internal error: {}", msg),
            Rejection::MissingHandler(key) => write!(f, "no handler registered for '{}'", key),
            Rejection::TooDeep(limit) => write!(f, "nesting deeper than {} levels", limit),
        }
    }
}

/// Await a handler future, catching both errors and panics.
pub async fn guarded<F, T>(future: F) -> Result<T, Rejection>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Rejection::Failed(format!("{:#}", e))),
        Err(panic) => Err(Rejection::Panicked(panic_message(panic.as_ref()))),
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_passes_through() {
        assert_eq!(guarded(async { Ok(3) }).await, Ok(3));
    }

    #[tokio::test]
    async fn test_error_becomes_rejection() {
        let result: Result<(), _> = guarded(async {
            Err(anyhow::anyhow!("disk full").context("saving scores"))
        })
        .await;
        assert_eq!(
            result,
            Err(Rejection::Failed("saving scores: disk full".into()))
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_rejection() {
        let result: Result<(), _> = guarded(async {
            if true {
                panic!("boom");
            }
            Ok(())
        })
        .await;
        assert_eq!(result, Err(Rejection::Panicked("boom".into())));
    }
}
