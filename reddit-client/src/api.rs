use crate::content::detect_content_type;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use threadlens_core::{CoreError, FetchError, Post, RawComment};
use tracing::{debug, info, warn};

const REDDIT_BASE: &str = "https://www.reddit.com";
const USER_AGENT: &str = "threadlens/0.1 (thread analysis)";

/// A reference to one Reddit submission, accepted as a bare id, a full
/// comments URL, or a redd.it shortlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReference {
    pub post_id: String,
}

impl ThreadReference {
    /// Parse a user-supplied thread reference. Rejects anything that does not
    /// resolve to a single post id.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim().trim_end_matches('/');

        if trimmed.is_empty() {
            return Err(FetchError::InvalidResponse {
                details: "empty thread reference".to_string(),
            }
            .into());
        }

        // Bare post id: reddit ids are short base36 tokens
        if !trimmed.contains('/')
            && trimmed.len() <= 10
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Ok(Self {
                post_id: trimmed.to_lowercase(),
            });
        }

        // Full URL: .../comments/{id}/slug or .../comments/{id}
        if let Some(pos) = trimmed.find("/comments/") {
            let rest = &trimmed[pos + "/comments/".len()..];
            let id: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            if !id.is_empty() {
                return Ok(Self {
                    post_id: id.to_lowercase(),
                });
            }
        }

        // Shortlink: redd.it/{id}
        if let Some(pos) = trimmed.find("redd.it/") {
            let rest = &trimmed[pos + "redd.it/".len()..];
            let id: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            if !id.is_empty() {
                return Ok(Self {
                    post_id: id.to_lowercase(),
                });
            }
        }

        Err(FetchError::InvalidResponse {
            details: format!("unrecognized thread reference: {input}"),
        }
        .into())
    }
}

/// Fetch collaborator seam. Implemented by the live client and by test
/// doubles.
#[allow(async_fn_in_trait)]
pub trait ThreadFetcher {
    async fn fetch_thread(
        &self,
        reference: &ThreadReference,
    ) -> Result<(Post, Vec<RawComment>), CoreError>;
}

/// Live client against the public Reddit JSON endpoint.
#[derive(Debug, Clone)]
pub struct RedditThreadClient {
    http_client: Client,
}

impl RedditThreadClient {
    pub fn new() -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Transport {
                message: e.to_string(),
            })?;
        Ok(Self { http_client })
    }
}

impl ThreadFetcher for RedditThreadClient {
    async fn fetch_thread(
        &self,
        reference: &ThreadReference,
    ) -> Result<(Post, Vec<RawComment>), CoreError> {
        let url = format!(
            "{}/comments/{}.json?raw_json=1&limit=500",
            REDDIT_BASE, reference.post_id
        );
        info!("Fetching thread {}", reference.post_id);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::Fetch(FetchError::RequestTimeout)
            } else {
                CoreError::Fetch(FetchError::Transport {
                    message: e.to_string(),
                })
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, reference, &response).into());
        }

        let body: Value = response.json().await.map_err(|e| {
            CoreError::Fetch(FetchError::InvalidResponse {
                details: e.to_string(),
            })
        })?;

        parse_thread_json(&body, &reference.post_id)
    }
}

fn map_status(
    status: StatusCode,
    reference: &ThreadReference,
    response: &reqwest::Response,
) -> FetchError {
    match status.as_u16() {
        404 => FetchError::NotFound {
            reference: reference.post_id.clone(),
        },
        403 => FetchError::Deleted {
            reference: reference.post_id.clone(),
        },
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            warn!("Rate limited fetching thread, retry after {retry_after}s");
            FetchError::RateLimitExceeded { retry_after }
        }
        code if status.is_server_error() => FetchError::ServerError { status_code: code },
        code => FetchError::InvalidResponse {
            details: format!("unexpected status {code}"),
        },
    }
}

/// Parse the two-listing response of `/comments/{id}.json` into a post and
/// its raw nested comments. Pure; the wire quirks live here.
pub fn parse_thread_json(
    body: &Value,
    post_id: &str,
) -> Result<(Post, Vec<RawComment>), CoreError> {
    let listings = body.as_array().ok_or_else(|| invalid("response is not an array"))?;
    if listings.len() < 2 {
        return Err(invalid("expected post and comment listings"));
    }

    let post_data = listings[0]
        .pointer("/data/children/0/data")
        .ok_or_else(|| invalid("missing post record"))?;

    let post = parse_post(post_data, post_id)?;

    // A removed or deleted submission has no analyzable content
    if post.author == "[deleted]" && post.selftext.is_empty() {
        return Err(CoreError::Fetch(FetchError::Deleted {
            reference: post_id.to_string(),
        }));
    }

    let mut comments = Vec::new();
    if let Some(children) = listings[1].pointer("/data/children").and_then(Value::as_array) {
        for child in children {
            if let Some(comment) = parse_comment(child) {
                comments.push(comment);
            }
        }
    }

    debug!(
        "Parsed thread {} with {} top-level comments",
        post.id,
        comments.len()
    );
    Ok((post, comments))
}

fn parse_post(data: &Value, post_id: &str) -> Result<Post, CoreError> {
    let id = data
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(post_id)
        .to_string();
    let title = str_field(data, "title");
    let selftext = str_field(data, "selftext");
    let url = str_field(data, "url");
    let is_self = data.get("is_self").and_then(Value::as_bool).unwrap_or(false);
    let is_gallery = data.get("is_gallery").and_then(Value::as_bool).unwrap_or(false);
    let is_video = data.get("is_video").and_then(Value::as_bool).unwrap_or(false);

    Ok(Post {
        id,
        title,
        // Assembled later from selftext/OCR/link content
        body: String::new(),
        selftext: selftext.clone(),
        author: str_field(data, "author"),
        subreddit: str_field(data, "subreddit"),
        score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
        created_utc: parse_timestamp(data.get("created_utc")),
        permalink: str_field(data, "permalink"),
        content_type: detect_content_type(&url, is_self, is_gallery, is_video),
        url,
        num_comments: data.get("num_comments").and_then(Value::as_u64).unwrap_or(0),
        upvote_ratio: data.get("upvote_ratio").and_then(Value::as_f64),
    })
}

fn parse_comment(child: &Value) -> Option<RawComment> {
    // "more" stubs carry no bodies; depth-limited continuation is out of scope
    if child.get("kind").and_then(Value::as_str) != Some("t1") {
        return None;
    }
    let data = child.get("data")?;
    let id = data.get("id").and_then(Value::as_str)?.to_string();

    // t3_* parents are the post itself; t1_* parents are comments
    let parent_id = data
        .get("parent_id")
        .and_then(Value::as_str)
        .and_then(|p| p.strip_prefix("t1_"))
        .map(str::to_string);

    // The API encodes "no replies" as an empty string instead of a listing
    let mut replies = Vec::new();
    if let Some(children) = data
        .pointer("/replies/data/children")
        .and_then(Value::as_array)
    {
        for grandchild in children {
            if let Some(reply) = parse_comment(grandchild) {
                replies.push(reply);
            }
        }
    }

    Some(RawComment {
        id,
        parent_id,
        author: str_field(data, "author"),
        body: str_field(data, "body"),
        score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
        created_utc: parse_timestamp(data.get("created_utc")),
        replies,
    })
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(Value::as_f64)
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .unwrap_or_else(Utc::now)
}

fn invalid(details: &str) -> CoreError {
    CoreError::Fetch(FetchError::InvalidResponse {
        details: details.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_bare_id() {
        let r = ThreadReference::parse("abc123").unwrap();
        assert_eq!(r.post_id, "abc123");
    }

    #[test]
    fn test_parse_full_url() {
        let r = ThreadReference::parse(
            "https://www.reddit.com/r/rust/comments/1abcd2/some_title_slug/",
        )
        .unwrap();
        assert_eq!(r.post_id, "1abcd2");
    }

    #[test]
    fn test_parse_shortlink() {
        let r = ThreadReference::parse("https://redd.it/1abcd2").unwrap();
        assert_eq!(r.post_id, "1abcd2");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ThreadReference::parse("").is_err());
        assert!(ThreadReference::parse("https://example.com/nothing").is_err());
    }

    fn thread_fixture() -> serde_json::Value {
        json!([
            {
                "kind": "Listing",
                "data": { "children": [ { "kind": "t3", "data": {
                    "id": "1abcd2",
                    "title": "Is sourdough worth the effort?",
                    "selftext": "I bake weekly and wonder about starters.",
                    "author": "bread_fan",
                    "subreddit": "Baking",
                    "score": 321,
                    "created_utc": 1700000000.0,
                    "url": "https://www.reddit.com/r/Baking/comments/1abcd2/",
                    "permalink": "/r/Baking/comments/1abcd2/",
                    "num_comments": 2,
                    "upvote_ratio": 0.93,
                    "is_self": true
                } } ] }
            },
            {
                "kind": "Listing",
                "data": { "children": [
                    { "kind": "t1", "data": {
                        "id": "c1",
                        "parent_id": "t3_1abcd2",
                        "author": "crusty",
                        "body": "Absolutely, the flavor is unmatched.",
                        "score": 45,
                        "created_utc": 1700000100.0,
                        "replies": {
                            "kind": "Listing",
                            "data": { "children": [
                                { "kind": "t1", "data": {
                                    "id": "c2",
                                    "parent_id": "t1_c1",
                                    "author": "doughboy",
                                    "body": "Agreed, once the starter is stable.",
                                    "score": 12,
                                    "created_utc": 1700000200.0,
                                    "replies": ""
                                } }
                            ] }
                        }
                    } },
                    { "kind": "more", "data": { "count": 10, "children": ["c9"] } }
                ] }
            }
        ])
    }

    #[test]
    fn test_parse_thread_json_nested() {
        let (post, comments) = parse_thread_json(&thread_fixture(), "1abcd2").unwrap();
        assert_eq!(post.id, "1abcd2");
        assert_eq!(post.content_type, threadlens_core::ContentType::Text);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, "c1");
        assert_eq!(comments[0].parent_id, None);
        assert_eq!(comments[0].replies.len(), 1);
        assert_eq!(comments[0].replies[0].parent_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_deleted_post_is_an_error() {
        let mut body = thread_fixture();
        body[0]["data"]["children"][0]["data"]["author"] = json!("[deleted]");
        body[0]["data"]["children"][0]["data"]["selftext"] = json!("");
        let result = parse_thread_json(&body, "1abcd2");
        assert!(matches!(
            result,
            Err(CoreError::Fetch(FetchError::Deleted { .. }))
        ));
    }

    #[test]
    fn test_malformed_response_rejected() {
        let result = parse_thread_json(&json!({"not": "a thread"}), "x");
        assert!(matches!(
            result,
            Err(CoreError::Fetch(FetchError::InvalidResponse { .. }))
        ));
    }
}
