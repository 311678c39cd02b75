//! HTTP request handlers organized by functionality

pub mod api;
pub mod stream;

pub use api::{api_health, api_library, api_streams};
pub use stream::{StreamQuery, stream_mkv, stream_mp4, stream_webm};
