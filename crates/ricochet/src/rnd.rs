// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;

/// Non-cryptographic random number generator used in this crate.
///
/// This RNG is **NOT cryptographically secure**. It drives instance selection
/// and backoff jitter, neither of which needs cryptographic guarantees.
#[derive(Clone, Default)]
pub(crate) enum Rnd {
    #[default]
    Real,

    #[cfg(test)]
    Test(std::sync::Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Rnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            #[cfg(test)]
            Self::Test(_) => write!(f, "Test"),
        }
    }
}

impl Rnd {
    #[cfg(test)]
    pub fn new_fixed(value: f64) -> Self {
        Self::Test(std::sync::Arc::new(move || value))
    }

    #[cfg(test)]
    pub fn new_function<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::Test(std::sync::Arc::new(f))
    }

    /// Returns a value in `[0.0, 1.0)`.
    pub fn next_f64(&self) -> f64 {
        match self {
            Self::Real => fastrand::f64(),
            #[cfg(test)]
            Self::Test(generator) => generator(),
        }
    }

    /// Returns an index in `0..len`. `len` must be non-zero.
    pub fn next_index(&self, len: usize) -> usize {
        debug_assert!(len > 0, "cannot pick from an empty range");

        match self {
            Self::Real => fastrand::usize(..len),
            #[cfg(test)]
            Self::Test(generator) => {
                #[expect(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss,
                    reason = "test generator yields values in [0, 1)"
                )]
                let index = (generator() * len as f64) as usize;
                index.min(len - 1)
            }
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_index_in_range() {
        let rnd = Rnd::Real;
        for _ in 0..1000 {
            assert!(rnd.next_index(3) < 3);
        }
    }

    #[test]
    fn fixed_index_is_clamped() {
        assert_eq!(Rnd::new_fixed(0.0).next_index(4), 0);
        assert_eq!(Rnd::new_fixed(0.5).next_index(4), 2);
        assert_eq!(Rnd::new_fixed(1.0).next_index(4), 3);
    }

    #[test]
    fn function_is_called() {
        let rnd = Rnd::new_function(|| 0.25);
        assert!((rnd.next_f64() - 0.25).abs() < f64::EPSILON);
        assert_eq!(format!("{rnd:?}"), "Test");
        assert_eq!(format!("{:?}", Rnd::Real), "Real");
    }
}
