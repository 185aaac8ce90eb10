// This file makes items available to main.rs and integration tests.

pub mod cardinality;
pub mod cli;
pub mod commands;
pub mod config;
pub mod distance;
pub mod errors;
pub mod index;
pub mod kmer;
pub mod manifest;
pub mod pipeline;
pub mod sink;
pub mod sketch;
pub mod utils;
