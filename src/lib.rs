pub mod error;
pub mod config;
pub mod assets;

pub use config::{EffectiveConfig, GlobalStorageConfig, StorageOverrides};
pub use error::{StorageError, StorageResult};

// Debug-trace printing helper: prints to stderr in test and debug builds, compiled out otherwise.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
