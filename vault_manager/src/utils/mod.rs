//! Utility and helper functions needed for:
//! - Fixed point arithmetic with explicit rounding
//! - Error handling
//! - Type casting between candid and fixed width integers

pub(crate) mod common;
pub(crate) mod error;
