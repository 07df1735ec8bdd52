//! A3S Transfer CLI - copy and pull OCI artifacts.

pub mod commands;
