mod platform;

pub use platform::*;
