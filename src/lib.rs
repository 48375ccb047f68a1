// Library exports for the binary, integration tests and embedders

pub mod cache;
pub mod chunking;
pub mod config;
pub mod decoder;
pub mod loader;
pub mod models;
pub mod playback;
pub mod store;

// Test support (only available with test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
