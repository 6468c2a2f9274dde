#![allow(unused_macros)]

// Fallbacks for the `tracing` macros when the feature is turned off.
// The arguments are still type-checked so that call sites compile the same way either way.

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($t: tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! info {
    ($($t: tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn {
    ($($t: tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}

#[cfg(not(feature = "tracing"))]
macro_rules! error {
    ($($t: tt)*) => {{
        let _ = format_args!($($t)*);
    }};
}
