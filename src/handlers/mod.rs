//! HTTP request handlers (route handlers).
//!
//! Handlers on protected routes run after the route's pipeline, so the body
//! they receive (`RequestBody`) is already authenticated, rate limited and
//! shape-checked.

/// NSFW classification endpoint
pub mod classify;

/// Public liveness endpoint
pub mod health;
