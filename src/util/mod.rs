pub mod a64;
pub mod dates;
pub mod ids;

pub use dates::{DateTs, DAY_MILLIS};
