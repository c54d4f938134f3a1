//! Team collaboration session server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod service;
pub mod session;
pub mod state;
pub mod ws;
