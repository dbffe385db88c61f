//! Post content assembly collaborators: linked-article extraction and OCR.

use reqwest::Client;
use std::time::Duration;
use threadlens_core::{ContentType, CoreError, LinkError, OcrError};
use tracing::{debug, info};

const MAX_ARTICLE_CHARS: usize = 8000;

/// Extracted text of a linked page.
#[derive(Debug, Clone)]
pub struct LinkContent {
    pub url: String,
    pub text: String,
}

/// Collaborator seam for fetching text out of an external link.
#[allow(async_fn_in_trait)]
pub trait LinkFetcher {
    async fn fetch_link(&self, url: &str) -> Result<LinkContent, CoreError>;
}

/// Collaborator seam for extracting text out of an image.
#[allow(async_fn_in_trait)]
pub trait OcrEngine {
    async fn extract_text(&self, image_url: &str) -> Result<String, CoreError>;
}

/// Default OCR engine: none configured. Image posts degrade to title-only
/// analysis with a recorded warning.
#[derive(Debug, Clone, Default)]
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    async fn extract_text(&self, _image_url: &str) -> Result<String, CoreError> {
        Err(CoreError::Ocr(OcrError::OcrUnavailable))
    }
}

/// Live link fetcher: pulls the page and strips markup down to visible text.
#[derive(Debug, Clone)]
pub struct HttpLinkFetcher {
    http_client: Client,
}

impl HttpLinkFetcher {
    pub fn new() -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent("threadlens/0.1 (link extraction)")
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::Internal {
                message: format!("http client construction failed: {e}"),
            })?;
        Ok(Self { http_client })
    }
}

impl LinkFetcher for HttpLinkFetcher {
    async fn fetch_link(&self, url: &str) -> Result<LinkContent, CoreError> {
        if is_video_host(url) {
            return Err(CoreError::Link(LinkError::Unsupported {
                url: url.to_string(),
            }));
        }

        info!("Fetching linked article {url}");
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::Link(LinkError::FetchTimeout {
                    url: url.to_string(),
                })
            } else {
                CoreError::Link(LinkError::Unsupported {
                    url: url.to_string(),
                })
            }
        })?;

        let html = response.text().await.map_err(|_| {
            CoreError::Link(LinkError::Unsupported {
                url: url.to_string(),
            })
        })?;

        let mut text = strip_html(&html);
        if text.len() > MAX_ARTICLE_CHARS {
            text.truncate(MAX_ARTICLE_CHARS);
        }
        debug!("Extracted {} chars from {url}", text.len());

        Ok(LinkContent {
            url: url.to_string(),
            text,
        })
    }
}

fn is_video_host(url: &str) -> bool {
    const VIDEO_HOSTS: &[&str] = &["youtube.com", "youtu.be", "v.redd.it", "vimeo.com", "twitch.tv"];
    VIDEO_HOSTS.iter().any(|host| url.contains(host))
}

/// Classify a submission by its URL and listing flags.
pub fn detect_content_type(url: &str, is_self: bool, is_gallery: bool, is_video: bool) -> ContentType {
    if is_self {
        return ContentType::Text;
    }
    if is_gallery {
        return ContentType::Gallery;
    }
    if is_video || is_video_host(url) {
        return ContentType::Video;
    }
    let image_suffix = [".jpg", ".jpeg", ".png", ".gif", ".webp"]
        .iter()
        .any(|ext| url.to_lowercase().ends_with(ext));
    if image_suffix || url.contains("i.redd.it") || url.contains("i.imgur.com") {
        return ContentType::Image;
    }
    ContentType::Link
}

/// Reduce an HTML document to its visible text. Script and style bodies are
/// dropped entirely; remaining tags are replaced by whitespace.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 4);
    let mut chars = html.char_indices().peekable();
    let mut skip_until_close: Option<&str> = None;

    while let Some((i, c)) = chars.next() {
        if c != '<' {
            if skip_until_close.is_none() {
                text.push(c);
            }
            continue;
        }

        let rest = &html[i..];
        if let Some(tag) = skip_until_close {
            if rest.to_lowercase().starts_with(tag) {
                skip_until_close = None;
            }
        } else if rest.to_lowercase().starts_with("<script") {
            skip_until_close = Some("</script");
        } else if rest.to_lowercase().starts_with("<style") {
            skip_until_close = Some("</style");
        }

        // Consume through the end of the tag
        for (_, tc) in chars.by_ref() {
            if tc == '>' {
                break;
            }
        }
        if skip_until_close.is_none() {
            text.push(' ');
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_drops_markup_and_scripts() {
        let html = "<html><head><style>p{color:red}</style>\
                    <script>var x = '<p>';</script></head>\
                    <body><h1>Title</h1><p>First   sentence.</p></body></html>";
        assert_eq!(strip_html(html), "Title First sentence.");
    }

    #[test]
    fn test_detect_content_type() {
        assert_eq!(
            detect_content_type("https://x.com/a", true, false, false),
            ContentType::Text
        );
        assert_eq!(
            detect_content_type("https://i.redd.it/a.png", false, false, false),
            ContentType::Image
        );
        assert_eq!(
            detect_content_type("https://youtu.be/abc", false, false, false),
            ContentType::Video
        );
        assert_eq!(
            detect_content_type("https://example.com/story", false, false, false),
            ContentType::Link
        );
        assert_eq!(
            detect_content_type("https://reddit.com/gallery/x", false, true, false),
            ContentType::Gallery
        );
    }

    #[tokio::test]
    async fn test_disabled_ocr_reports_unavailable() {
        let result = DisabledOcr.extract_text("https://i.redd.it/a.png").await;
        assert!(matches!(
            result,
            Err(CoreError::Ocr(OcrError::OcrUnavailable))
        ));
    }
}
