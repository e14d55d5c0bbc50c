//! Result combinators for multicast messages.
//!
//! A combinator receives each implementer's result in composition order and
//! produces one value at the end. Returning [`ControlFlow::Break`] from
//! [`Combinator::add`] stops the call before the remaining implementers run.

use std::ops::{AddAssign, ControlFlow};

/// Folds the results of a multicast call.
pub trait Combinator<R> {
    /// Value produced once all implementers ran (or the fold stopped).
    type Output;

    /// Accepts one implementer's result.
    fn add(&mut self, value: R) -> ControlFlow<()>;

    /// Produces the final value.
    fn finish(self) -> Self::Output;
}

/// Ignores every result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl<R> Combinator<R> for Discard {
    type Output = ();

    #[inline]
    fn add(&mut self, _value: R) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    #[inline]
    fn finish(self) {}
}

/// Sums all results, starting from `R::default()`.
#[derive(Debug, Clone, Default)]
pub struct Sum<R> {
    total: R,
}

impl<R: Default> Sum<R> {
    #[must_use]
    pub fn new() -> Self {
        Sum { total: R::default() }
    }
}

impl<R: AddAssign> Combinator<R> for Sum<R> {
    type Output = R;

    fn add(&mut self, value: R) -> ControlFlow<()> {
        self.total += value;
        ControlFlow::Continue(())
    }

    fn finish(self) -> R {
        self.total
    }
}

/// Collects all results in call order.
#[derive(Debug, Clone)]
pub struct Collect<R> {
    values: Vec<R>,
}

impl<R> Collect<R> {
    #[must_use]
    pub fn new() -> Self {
        Collect { values: Vec::new() }
    }
}

impl<R> Default for Collect<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Combinator<R> for Collect<R> {
    type Output = Vec<R>;

    fn add(&mut self, value: R) -> ControlFlow<()> {
        self.values.push(value);
        ControlFlow::Continue(())
    }

    fn finish(self) -> Vec<R> {
        self.values
    }
}

/// Stops at the first result that differs from `R::default()` and returns
/// it, or returns `R::default()` if every result was the default.
#[derive(Debug, Clone)]
pub struct FirstNonDefault<R> {
    found: Option<R>,
}

impl<R> FirstNonDefault<R> {
    #[must_use]
    pub fn new() -> Self {
        FirstNonDefault { found: None }
    }
}

impl<R> Default for FirstNonDefault<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Default + PartialEq> Combinator<R> for FirstNonDefault<R> {
    type Output = R;

    fn add(&mut self, value: R) -> ControlFlow<()> {
        if value == R::default() {
            return ControlFlow::Continue(());
        }
        self.found = Some(value);
        ControlFlow::Break(())
    }

    fn finish(self) -> R {
        self.found.unwrap_or_default()
    }
}

/// Logical AND over boolean results, stopping at the first `false`.
/// An empty call yields `true`.
#[derive(Debug, Clone, Copy)]
pub struct BooleanAnd {
    value: bool,
}

impl Default for BooleanAnd {
    fn default() -> Self {
        BooleanAnd { value: true }
    }
}

impl BooleanAnd {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Combinator<bool> for BooleanAnd {
    type Output = bool;

    fn add(&mut self, value: bool) -> ControlFlow<()> {
        self.value = value;
        if value {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    fn finish(self) -> bool {
        self.value
    }
}

/// Logical OR over boolean results, stopping at the first `true`.
/// An empty call yields `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanOr {
    value: bool,
}

impl BooleanOr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Combinator<bool> for BooleanOr {
    type Output = bool;

    fn add(&mut self, value: bool) -> ControlFlow<()> {
        self.value = value;
        if value {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn finish(self) -> bool {
        self.value
    }
}
