//! Protocol implementations.
//!
//! - `shift`: the `^...$` shift-by-one service, spoken by every server mode.

pub mod shift;
