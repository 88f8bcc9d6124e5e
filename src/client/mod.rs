//! Query registry: creation on demand, bulk invalidation and removal, and
//! timer-driven garbage collection of unused queries.

mod builder;
#[allow(clippy::module_inception)]
mod client;
pub(crate) mod gc;
mod matcher;
mod observer;

pub use builder::*;
pub use client::*;
pub use matcher::*;
pub use observer::*;

#[cfg(test)]
mod gc_test;
