//! Integration test binary, all suites linked into one executable.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod context_overflow;
mod conversation_loop;
