//! Logging support, routed through `tracing` when the `tracing` feature
//! is enabled and compiled out otherwise. User code is responsible for
//! subscribing.

#[cfg(feature = "tracing")]
pub(crate) use tracing::debug;
#[cfg(feature = "tracing")]
pub(crate) use tracing::warn;

#[cfg(not(feature = "tracing"))]
mod no_op {
    macro_rules! debug {
        ($($arg:tt)*) => {{
            let _ = format_args!($($arg)*);
        }};
    }

    macro_rules! warn_ {
        ($($arg:tt)*) => {{
            let _ = format_args!($($arg)*);
        }};
    }

    pub(crate) use debug;
    pub(crate) use warn_ as warn;
}

#[cfg(not(feature = "tracing"))]
pub(crate) use no_op::debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use no_op::warn;
