#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod carriers;
pub mod config;
pub mod entities;
pub mod framework;
pub mod messengers;
pub mod processors;
pub mod tracker;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
