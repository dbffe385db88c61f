//! Reddit thread fetching and post content assembly.

pub mod api;
pub mod content;

pub use api::{parse_thread_json, RedditThreadClient, ThreadFetcher, ThreadReference};
pub use content::{
    detect_content_type, strip_html, DisabledOcr, HttpLinkFetcher, LinkContent, LinkFetcher,
    OcrEngine,
};
