pub mod cache;
pub mod client;
pub mod key_lock;
