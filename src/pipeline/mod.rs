pub mod label;
pub mod thumbnail;
