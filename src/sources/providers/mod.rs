// src/sources/providers/mod.rs
pub mod feed;
