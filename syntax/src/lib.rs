#[macro_use]
mod macros;
mod template;
pub use template::{parse, Error, Segment};
