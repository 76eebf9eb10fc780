mod datetime;

pub use datetime::{DateTime, FIXED_NOW};
