//! Platform API client for dynoscope
//!
//! This crate provides the authenticated resource client boundary: point
//! queries and lists for apps, dynos, formations and add-ons, plus creation
//! of short-lived log stream sessions.

mod client;
mod error;
mod token;

pub use client::{ByteStream, HttpPlatformApi, LogSessionDescriptor, LogSessionRequest, PlatformApi};
pub use error::{ApiError, ApiResult};
pub use token::{EnvToken, StaticToken, TokenProvider};

// Re-export types used in our public API
pub use dynoscope_types::{AddOn, App, Dyno, Formation};
