// Output module for shipwright

pub mod errors;
pub mod plan;
pub mod terminal;

pub use errors::*;
pub use plan::{display_plan, prompt_confirmation};
pub use terminal::*;
