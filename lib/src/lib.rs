pub mod action;
pub mod babe;
pub mod connection;
pub mod error;
pub mod flash;
pub mod frame;
pub mod gdfs;
pub mod loader;
pub mod payload;
pub mod phone;
pub mod serial;
pub mod util;
pub mod vkp;

pub use error::{Error, Result};
