//! Dataset loading

mod loader;

pub use loader::DataLoader;
