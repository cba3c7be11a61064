/// Log an error, and if a debug build then panic. Used for broken invariants that the simulation
/// can recover from in release builds.
macro_rules! debug_panic {
    ($($x:tt)+) => {
        log::error!($($x)+);
        #[cfg(debug_assertions)]
        panic!($($x)+);
    };
}

/// Like [`debug_panic`], but only if the condition is false.
macro_rules! debug_check {
    ($cond:expr, $($x:tt)+) => {
        if !$cond {
            debug_panic!($($x)+);
        }
    };
}
