/// Outbound page fetching for URL-sourced queries.
///
/// A single GET with a fixed timeout. There is no retry: a failed fetch is terminal for the
/// request that asked for it and is reported back to the caller.
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::error::CommonError;

#[derive(Clone, Debug)]
pub struct PageFetcherConfig {
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for PageFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct PageFetcher {
    config: PageFetcherConfig,
    http: reqwest::Client,
}

impl PageFetcher {
    pub fn new(config: PageFetcherConfig) -> Result<Self, CommonError> {
        let http = reqwest::Client::builder()
            .user_agent("assessment-recommender/0.1")
            .timeout(config.timeout)
            .build()
            .map_err(|e| CommonError::Fetch(format!("http client setup failed: {e}")))?;
        Ok(Self { config, http })
    }

    /// Fetch `url` and return its visible text with markup stripped.
    pub async fn fetch_text(&self, url: &str) -> Result<String, CommonError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| CommonError::Fetch(format!("invalid url {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CommonError::Fetch(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }

        let mut resp = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| CommonError::Fetch(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| CommonError::Fetch(format!("upstream returned error: {e}")))?;

        let cap = self.config.max_body_bytes;
        if let Some(len) = resp.content_length().filter(|&len| len > cap as u64) {
            return Err(CommonError::Fetch(format!(
                "response body of {len} bytes exceeds the {cap} byte limit"
            )));
        }

        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| CommonError::Fetch(format!("reading body failed: {e}")))?
        {
            let room = cap - buf.len();
            if chunk.len() >= room {
                buf.extend_from_slice(&chunk[..room]);
                debug!(url, cap, "response body truncated at size limit");
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(trim_partial_char(&buf));

        let text = html_to_text(&body);
        info!(url, chars = text.chars().count(), "fetched page content");
        Ok(text)
    }
}

/// Reduce an HTML document to whitespace-separated visible text.
///
/// Drops `<script>`, `<style>` and `<noscript>` bodies and comments, strips the remaining
/// tags, decodes the common named entities and collapses whitespace. Plain text passes
/// through with only whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    let [hidden_re, comment_re, tag_re, ws_re] = PATTERNS.get_or_init(|| {
        [
            r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>",
            r"(?s)<!--.*?-->",
            r"(?s)<[^>]*>",
            r"\s+",
        ]
        .map(|p| Regex::new(p).expect("valid regex"))
    });

    let text = hidden_re.replace_all(html, " ");
    let text = comment_re.replace_all(&text, " ");
    let text = tag_re.replace_all(&text, " ");
    let text = decode_entities(&text);
    ws_re.replace_all(&text, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Drop a multi-byte character left incomplete by truncation.
fn trim_partial_char(bytes: &[u8]) -> &[u8] {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => &bytes[..e.valid_up_to()],
        _ => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn strips_markup_and_hidden_blocks() {
        let html = r#"<html><head><title>QA Engineer</title>
            <style>body { color: red; }</style>
            <script>var x = "<b>nope</b>";</script></head>
            <body><!-- nav --><h1>Join&nbsp;us</h1><p>Selenium &amp; SQL</p></body></html>"#;
        assert_eq!(html_to_text(html), "QA Engineer Join us Selenium & SQL");
    }

    #[test]
    fn plain_text_only_collapses_whitespace() {
        assert_eq!(html_to_text("  Java\n\n developer\t40 min "), "Java developer 40 min");
    }

    #[test]
    fn truncation_drops_partial_char() {
        let s = "ab–cd".as_bytes();
        assert_eq!(trim_partial_char(&s[..3]), b"ab");
        assert_eq!(trim_partial_char(s), s);
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let fetcher = PageFetcher::new(PageFetcherConfig::default()).unwrap();
        let err = fetcher.fetch_text("file:///etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("unsupported url scheme"));

        let err = fetcher.fetch_text("not a url").await.unwrap_err();
        assert!(err.to_string().contains("invalid url"));
    }

    /// Serve one canned HTTP response on a local port and return its URL.
    async fn serve_once(head: String, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            // The client may hang up once it has read enough.
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        });
        format!("http://{addr}/job")
    }

    fn small_fetcher(max_body_bytes: usize) -> PageFetcher {
        PageFetcher::new(PageFetcherConfig {
            timeout: Duration::from_secs(5),
            max_body_bytes,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn declared_oversized_body_is_rejected() {
        let body = vec![b'a'; 64 * 1024];
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let url = serve_once(head, body).await;

        let err = small_fetcher(1024).fetch_text(&url).await.unwrap_err();
        assert!(err.to_string().contains("exceeds the 1024 byte limit"), "{err}");
    }

    #[tokio::test]
    async fn undeclared_body_is_cut_at_limit() {
        let mut body = b"<html><body><p>".to_vec();
        body.extend(std::iter::repeat(b'a').take(256 * 1024));
        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n".to_string();
        let url = serve_once(head, body).await;

        let text = small_fetcher(1024).fetch_text(&url).await.unwrap();
        assert!(!text.is_empty());
        assert!(text.len() <= 1024);
        assert!(text.chars().all(|c| c == 'a'));
    }

    #[tokio::test]
    async fn small_page_is_fetched_whole() {
        let body = b"<html><body><h1>Java developer</h1><p>40 minutes</p></body></html>".to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        let url = serve_once(head, body).await;

        let text = small_fetcher(1024).fetch_text(&url).await.unwrap();
        assert_eq!(text, "Java developer 40 minutes");
    }
}
