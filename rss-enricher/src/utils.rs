/// URL canonicalization and dedup keys
pub mod url {
    use sha2::{Digest, Sha256};
    use url::{form_urlencoded, Url};

    /// Query parameters with this prefix are analytics markers, not content.
    pub const TRACKING_PARAM_PREFIX: &str = "utm_";

    /// Strip tracking parameters from a link so equivalent URLs compare equal.
    ///
    /// Everything outside the query string is left byte-for-byte as given, and
    /// surviving parameters keep their relative order. Strings that do not
    /// parse as absolute URLs are returned unchanged.
    pub fn normalize_url(raw: &str) -> String {
        if Url::parse(raw).is_err() {
            return raw.to_string();
        }

        let (before_fragment, fragment) = match raw.find('#') {
            Some(idx) => raw.split_at(idx),
            None => (raw, ""),
        };
        let (base, query) = match before_fragment.find('?') {
            Some(idx) => (&before_fragment[..idx], &before_fragment[idx + 1..]),
            None => return raw.to_string(),
        };

        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| !is_tracking_pair(pair))
            .collect();

        if kept.is_empty() {
            format!("{}{}", base, fragment)
        } else {
            format!("{}?{}{}", base, kept.join("&"), fragment)
        }
    }

    fn is_tracking_pair(pair: &str) -> bool {
        form_urlencoded::parse(pair.as_bytes())
            .next()
            .map(|(name, _)| name.starts_with(TRACKING_PARAM_PREFIX))
            .unwrap_or(false)
    }

    /// Stable dedup key: hex SHA-256 of the normalized URL followed by the title.
    pub fn content_hash(url: &str, title: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalize_url(url).as_bytes());
        hasher.update(title.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Validate feed URL format
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        match Url::parse(url_str) {
            Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
            Err(_) => false,
        }
    }
}

/// HTML to plain text
pub mod html {
    use scraper::{Html, Node};

    /// Extract the visible text of an HTML fragment.
    ///
    /// `script` and `style` subtrees are dropped entirely, the remaining text
    /// nodes are concatenated and runs of whitespace collapse to one space.
    pub fn clean_html(html: &str) -> String {
        if html.trim().is_empty() {
            return String::new();
        }

        let fragment = Html::parse_fragment(html);
        let mut text = String::with_capacity(html.len());

        for node in fragment.tree.root().descendants() {
            if let Node::Text(chunk) = node.value() {
                let hidden = node.ancestors().any(|ancestor| {
                    matches!(
                        ancestor.value(),
                        Node::Element(el) if matches!(el.name(), "script" | "style")
                    )
                });
                if !hidden {
                    text.push_str(chunk);
                }
            }
        }

        super::text::collapse_whitespace(&text)
    }
}

/// Text processing utilities
pub mod text {
    /// Cut `text` to at most `max_chars` characters, never splitting a code point.
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    pub fn collapse_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Shorten text for log lines and error messages.
    pub fn preview(text: &str, max_chars: usize) -> String {
        let cut = truncate_chars(text, max_chars);
        if cut.len() < text.len() {
            format!("{}...", cut)
        } else {
            cut.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::html::clean_html;
    use super::text::{preview, truncate_chars};
    use super::url::{content_hash, is_valid_feed_url, normalize_url};

    #[test]
    fn strips_only_tracking_params_and_keeps_order() {
        let url = "https://example.com/post?id=7&utm_source=rss&page=2&utm_medium=feed";
        assert_eq!(normalize_url(url), "https://example.com/post?id=7&page=2");
    }

    #[test]
    fn drops_question_mark_when_only_tracking_params() {
        let url = "https://example.com/a/b?utm_source=x&utm_campaign=y#top";
        assert_eq!(normalize_url(url), "https://example.com/a/b#top");
    }

    #[test]
    fn leaves_urls_without_query_untouched() {
        assert_eq!(normalize_url("https://Example.com/path"), "https://Example.com/path");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
    }

    #[test]
    fn malformed_urls_pass_through() {
        assert_eq!(normalize_url("not a url ?utm_source=x"), "not a url ?utm_source=x");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn hash_ignores_tracking_params_but_not_title() {
        let plain = content_hash("https://example.com/p?id=1", "Title");
        let tracked = content_hash("https://example.com/p?id=1&utm_source=tw", "Title");
        let retitled = content_hash("https://example.com/p?id=1", "Other title");

        assert_eq!(plain, tracked);
        assert_ne!(plain, retitled);
        assert_eq!(plain.len(), 64);
        assert!(plain.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(plain, content_hash("https://example.com/p?id=1", "Title"));
    }

    #[test]
    fn clean_html_removes_script_and_style_subtrees() {
        let html = r#"<div><style>p { color: red }</style><p>Hello
            <b>world</b></p><script>alert("x")</script><p>again &amp; again</p></div>"#;
        assert_eq!(clean_html(html), "Hello worldagain & again");
    }

    #[test]
    fn clean_html_handles_plain_and_empty_input() {
        assert_eq!(clean_html(""), "");
        assert_eq!(clean_html("   \n "), "");
        assert_eq!(clean_html("  just   text \n here "), "just text here");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }

    #[test]
    fn feed_url_validation() {
        assert!(is_valid_feed_url("https://example.com/rss.xml"));
        assert!(!is_valid_feed_url("ftp://example.com/rss.xml"));
        assert!(!is_valid_feed_url("example.com/rss.xml"));
    }
}
