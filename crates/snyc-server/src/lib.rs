//! # snyc-server
//!
//! HTTP and WebSocket server for Snyc notes.
//!
//! This crate provides:
//! - **Premium v2 API** (axum) for note CRUD and sharing, gated on an
//!   access token and the caller's subscription tier
//! - **Tasks**: an open v1 task list plus per-user v2 tasks with
//!   priorities, tags, categories and recurrence
//! - **Real-time collaboration**: one WebSocket session per (note, user),
//!   fanning content updates out to every other collaborator on the note
//! - **Encrypted note content** at rest for notes flagged encrypted
//! - **Admin API** for tier and role changes on self-hosted instances
//! - **Rate limiting** per user, or per client address for anonymous calls

pub mod api;
pub mod auth;
pub mod collab;
pub mod config;
pub mod error;
pub mod notes;
pub mod premium;
pub mod rate_limit;
pub mod tasks;
