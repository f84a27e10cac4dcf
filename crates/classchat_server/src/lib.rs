#![forbid(unsafe_code)]

pub mod config;
pub mod repository;
pub mod server;
pub mod service;
pub mod store;
pub mod util;

#[cfg(test)]
mod test_support;
