//! Gateway implementations

mod builder;
mod orchestrator;

pub use builder::{Huginn, HuginnBuilder};
pub use orchestrator::Gateway;
