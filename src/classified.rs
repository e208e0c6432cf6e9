//! Taint-tracking wrapper for classified values.
//!
//! A [`Classified<T>`] carries a value that must never reach logs, the
//! interpreter's output, or unrestricted files. Its display form is always
//! the literal `Classified(***)`; the only reads are pure transforms
//! (`map` / `flat_map`), writes into classified files, and the classified
//! chat overload.
//!
//! Purity of transforms is enforced dynamically: while a transform runs, a
//! thread-local guard is held, and every capability primitive checks it
//! before acting. A transform that smuggles a capability reference in will
//! see nothing but security errors.

use std::cell::Cell;
use std::fmt;

thread_local! {
    static TRANSFORM_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// True while the current thread is inside a classified transform.
///
/// Capability primitives consult this and refuse to act when set.
pub fn transform_active() -> bool {
    TRANSFORM_DEPTH.with(|depth| depth.get() > 0)
}

/// RAII guard marking the dynamic extent of a classified transform.
///
/// Re-entrant: nested transforms stack.
pub struct TransformGuard(());

impl TransformGuard {
    pub fn enter() -> Self {
        TRANSFORM_DEPTH.with(|depth| depth.set(depth.get() + 1));
        TransformGuard(())
    }
}

impl Drop for TransformGuard {
    fn drop(&mut self) {
        TRANSFORM_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Opaque container for a classified value.
#[derive(Clone, PartialEq, Eq)]
pub struct Classified<T> {
    value: T,
}

impl<T> Classified<T> {
    /// Wraps a value. This is the `classify` factory; the other producers
    /// are `read_classified` and the classified `chat` overload.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// Applies a pure transform to the carried value.
    ///
    /// The transform runs under the thread-local guard, so any capability
    /// use inside it fails with a security error.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Classified<U> {
        let _guard = TransformGuard::enter();
        Classified::new(f(self.value))
    }

    /// Applies a pure transform that itself yields a classified value.
    pub fn flat_map<U>(self, f: impl FnOnce(T) -> Classified<U>) -> Classified<U> {
        let _guard = TransformGuard::enter();
        f(self.value)
    }

    /// Hands the carried value to a trusted sink.
    ///
    /// Only `write_classified` and the classified chat overload may call
    /// this; it is `pub(crate)` so user-facing surfaces cannot reach it.
    pub(crate) fn into_inner(self) -> T {
        self.value
    }

    /// Borrows the carried value for a trusted sink.
    pub(crate) fn inner(&self) -> &T {
        &self.value
    }
}

impl<T> fmt::Display for Classified<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Classified(***)")
    }
}

impl<T> fmt::Debug for Classified<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Classified(***)")
    }
}
