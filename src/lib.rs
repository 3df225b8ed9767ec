//! Elite Switch Library
//!
//! Core engine for toggling the game between VR and Monitor profiles:
//! graphics-file edits, audio default selection, and tool lifecycle,
//! orchestrated with partial-failure tolerance.

pub mod audio;
pub mod config;
pub mod engine;
pub mod graphics;
pub mod process;
pub mod settings;
