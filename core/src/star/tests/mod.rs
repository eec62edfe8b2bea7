//! Tests for the scripting language
//!
//! Organized by stage: parsing, then evaluation

mod eval_tests;
mod helpers;
mod parser_tests;
