//! CLI module for chatrag
//!
//! Handles command-line argument parsing; configuration lives in `crate::config`.

pub mod args;

pub use args::{split_passages, Args, ChatArgs, Commands, IndexCommand};
