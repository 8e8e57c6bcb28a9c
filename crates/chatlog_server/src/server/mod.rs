#![forbid(unsafe_code)]

pub mod control;
pub mod store;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod test_support;
