//! Platform Abstraction Layer (PAL). The `Platform` trait and the record type it produces are
//! public so callers can inject their own topology collector; the backends are private.

mod abstractions;
pub use abstractions::*;

mod facade;
pub(crate) use facade::*;

#[cfg(all(target_os = "linux", not(miri)))]
mod linux;
#[cfg(all(target_os = "linux", not(miri)))]
pub(crate) use linux::*;

#[cfg(all(windows, not(miri)))]
mod windows;
#[cfg(all(windows, not(miri)))]
pub(crate) use windows::*;

// The fallback module is compiled in test mode on all platforms, under Miri, and as the primary
// implementation on unsupported platforms. On supported platforms in test mode, it must be
// accessed via the explicit path `fallback::` to avoid ambiguity with the native backend.
#[cfg(any(test, miri, not(any(target_os = "linux", windows))))]
pub(crate) mod fallback;

#[cfg(any(miri, not(any(target_os = "linux", windows))))]
pub(crate) use fallback::*;
