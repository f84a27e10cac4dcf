#![forbid(unsafe_code)]

pub mod delivery;
pub mod health;
pub mod hub;
pub mod subscription;
