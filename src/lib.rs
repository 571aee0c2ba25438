//! Thumbnail worker for uploaded images.
//!
//! Each uploaded image is rendered into the fixed catalogue in
//! [`thumbnail::THUMBNAIL_FORMATS`]. Runs are idempotent and serialized per
//! attachment, and an image that has never produced a thumbnail and cannot
//! be decoded is deleted rather than retried forever.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;
pub mod store;
pub mod thumbnail;
pub mod worker;
