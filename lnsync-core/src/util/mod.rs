/// Clock
pub mod clock;
/// Throttled progress logging
pub mod progress;
/// Test utilities
#[cfg(any(test, feature = "test_utils"))]
#[allow(missing_docs)]
pub mod test_utils;
