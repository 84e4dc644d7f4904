//! Tests for the driver
//!
//! Organized by feature area

mod helpers;
mod scoped_tests;
