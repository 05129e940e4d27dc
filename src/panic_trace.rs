//! Stack capture at the panic site for dispatch tasks.
//!
//! `catch_unwind` only hands back the payload, and by then the stack has
//! unwound. A process-wide panic hook, chained in front of the previous one,
//! records a backtrace into a thread-local while a [`Traced`] future is being
//! polled; the dispatcher picks it up with [`take_stack`] right after the
//! unwind, on the same thread.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

static INSTALL: Once = Once::new();

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Install the capturing hook once per process. The previous hook still runs.
pub(crate) fn install_hook() {
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let stack = Backtrace::force_capture().to_string();
                LAST_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            }
            previous(info);
        }));
    });
}

/// Stack recorded by the most recent panic inside a [`Traced`] poll on this thread.
pub(crate) fn take_stack() -> Option<String> {
    LAST_STACK.with(|slot| slot.borrow_mut().take())
}

/// Future wrapper that enables capture for the duration of each poll.
pub(crate) struct Traced<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Traced<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

/// Resets the capture flag, also when the poll unwinds.
struct CaptureGuard {
    was: bool,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|flag| flag.set(self.was));
    }
}

impl<F: Future> Future for Traced<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _guard = CaptureGuard {
            was: CAPTURING.with(|flag| flag.replace(true)),
        };
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;

    #[inline(never)]
    fn fail_deep_inside() {
        panic!("deep failure");
    }

    #[tokio::test]
    async fn test_stack_names_panic_site() {
        install_hook();

        let outcome = AssertUnwindSafe(Traced::new(async { fail_deep_inside() }))
            .catch_unwind()
            .await;

        assert!(outcome.is_err());
        let stack = take_stack().unwrap();
        assert!(stack.contains("fail_deep_inside"), "{stack}");
        assert!(take_stack().is_none());
    }

    #[test]
    fn test_no_capture_outside_traced() {
        install_hook();

        let result = std::panic::catch_unwind(|| fail_deep_inside());

        assert!(result.is_err());
        assert!(take_stack().is_none());
    }
}
