pub mod gemini;
pub mod mock;

pub use gemini::*;
pub use mock::*;
