//! Conditional parallel iteration for the Monte Carlo trial loop.
//!
//! With the `parallel` feature, iteration goes through rayon's pool; without
//! it (or on targets such as WASM) the same closures run sequentially. Each
//! trial owns its RNG, so both paths produce identical results.
//!
//! ```ignore
//! use crate::iter_maybe_parallel;
//!
//! let maxima: Vec<f64> = iter_maybe_parallel!((0..n_trials))
//!     .map(|t| run_trial(seed.wrapping_add(t as u64)))
//!     .collect();
//! ```

/// Iterate a range (or any owned collection) in parallel when the `parallel`
/// feature is enabled, sequentially otherwise.
#[macro_export]
macro_rules! iter_maybe_parallel {
    ($expr:expr) => {{
        #[cfg(feature = "parallel")]
        {
            use rayon::iter::IntoParallelIterator;

            IntoParallelIterator::into_par_iter($expr)
        }
        #[cfg(not(feature = "parallel"))]
        {
            IntoIterator::into_iter($expr)
        }
    }};
}

/// Borrowing counterpart of [`iter_maybe_parallel!`] for slices.
#[macro_export]
macro_rules! slice_maybe_parallel {
    ($expr:expr) => {{
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            $expr.par_iter()
        }
        #[cfg(not(feature = "parallel"))]
        {
            $expr.iter()
        }
    }};
}

pub use iter_maybe_parallel;
pub use slice_maybe_parallel;
