mod options;
#[allow(clippy::module_inception)]
mod query;
mod state;
mod subscription;

pub use options::*;
pub use query::*;
pub use state::*;
pub use subscription::*;

#[cfg(test)]
mod options_test;
