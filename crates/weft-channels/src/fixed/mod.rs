//! Fixed-size channels: every token occupies exactly `token_size` bytes
//! and position `i` of the token buffer occupies bytes
//! `[i * token_size, (i + 1) * token_size)`.

pub mod mpsc;
pub mod spsc;
