// defines macros, so must be included first
#[macro_use]
pub mod macros;

pub mod units;
