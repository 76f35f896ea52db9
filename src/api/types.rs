use serde::Deserialize;

/// One page of a board catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub threads: Vec<CatalogThread>,
}

/// Thread summary as listed in the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogThread {
    pub no: u64,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub com: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub last_replies: Vec<CatalogReply>,
}

/// One of the most recent replies carried by a catalog entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogReply {
    pub no: u64,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub com: Option<String>,
}

/// Full thread document.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadDocument {
    pub posts: Vec<ThreadPost>,
}

impl ThreadDocument {
    /// Subject of the thread, carried by its first (root) post.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.posts
            .first()
            .and_then(|p| p.sub.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// A post inside a thread document.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadPost {
    pub no: u64,
    /// Unix timestamp (seconds).
    pub time: i64,
    #[serde(default)]
    pub com: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub fsize: Option<u64>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub tim: Option<u64>,
}

/// Attachment metadata for a post, present only when every field needed to
/// fetch and deduplicate the file was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Original filename without extension, as uploaded.
    pub filename: String,
    /// Extension including the leading dot, lowercased.
    pub ext: String,
    pub size: u64,
    pub digest: String,
    /// Remote file token; the bytes live at `{media_base}/{board}/{tim}{ext}`.
    pub tim: u64,
}

impl ThreadPost {
    /// Attachment metadata, if this post carries a complete attachment.
    #[must_use]
    pub fn attachment(&self) -> Option<Attachment> {
        let ext = self.ext.as_deref()?.to_lowercase();
        let digest = self.md5.as_deref().filter(|d| !d.is_empty())?;
        Some(Attachment {
            filename: self.filename.clone().unwrap_or_default(),
            ext,
            size: self.fsize.unwrap_or(0),
            digest: digest.to_string(),
            tim: self.tim?,
        })
    }
}

impl Attachment {
    /// Remote URL of the attachment bytes.
    #[must_use]
    pub fn url(&self, media_base_url: &str, board: &str) -> String {
        format!("{media_base_url}/{board}/{}{}", self.tim, self.ext)
    }

    /// Filename as the uploader named it, extension included.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}{}", self.filename, self.ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREAD_JSON: &str = r#"{
        "posts": [
            {"no": 100, "time": 1700000000, "sub": "webm thread", "com": "post your webms",
             "filename": "a", "ext": ".WEBM", "fsize": 1234, "md5": "abc==", "tim": 1700000000123},
            {"no": 101, "time": 1700000100, "com": "&gt;&gt;100 nice"},
            {"no": 102, "time": 1700000200, "filename": "b", "ext": ".webm", "fsize": 99, "tim": 1700000200456}
        ]
    }"#;

    #[test]
    fn test_parse_thread_document() {
        let doc: ThreadDocument = serde_json::from_str(THREAD_JSON).unwrap();
        assert_eq!(doc.posts.len(), 3);
        assert_eq!(doc.subject(), Some("webm thread"));

        let attachment = doc.posts[0].attachment().unwrap();
        assert_eq!(attachment.ext, ".webm");
        assert_eq!(attachment.size, 1234);
        assert_eq!(attachment.display_name(), "a.webm");
        assert_eq!(
            attachment.url("https://i.example.org", "g"),
            "https://i.example.org/g/1700000000123.webm"
        );

        assert!(doc.posts[1].attachment().is_none());

        // No digest reported: not usable for dedup
        assert!(doc.posts[2].ext.is_some());
        assert!(doc.posts[2].attachment().is_none());
    }

    #[test]
    fn test_parse_catalog() {
        let json = r#"[
            {"page": 1, "threads": [
                {"no": 1, "ext": ".jpg", "com": "hello", "last_replies": [{"no": 2, "ext": ".webm"}]},
                {"no": 3}
            ]},
            {"page": 2, "threads": []}
        ]"#;
        let pages: Vec<CatalogPage> = serde_json::from_str(json).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].threads[0].last_replies[0].ext.as_deref(), Some(".webm"));
        assert!(pages[0].threads[1].last_replies.is_empty());
    }
}
