use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use log::error;

use crate::error::{AppError, Result};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs `task`, turning a panic inside it into an `Internal` error carrying the panic message
/// and a backtrace. Nothing else about the result is touched.
pub async fn supervise<T, F>(name: &str, task: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let backtrace = Backtrace::force_capture();
            error!("{} panicked: {}", name, message);
            Err(AppError::internal(format!(
                "{} panicked: {}\nbacktrace:\n{}",
                name, message, backtrace
            )))
        },
    }
}
