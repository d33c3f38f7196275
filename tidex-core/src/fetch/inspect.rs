//! Challenge and HTML detection for fetched pages

use regex::Regex;
use regex::bytes::Regex as BytesRegex;

const CHALLENGE_PATTERN: &str = r"(?i)(just a moment|cf-chl-bypass|under attack)";
const DOCTYPE_PATTERN: &str = r"(?i)<!doctype\s+html";
const HTML_PAIR_PATTERN: &str = r"(?is)<html[\s>].*</html\s*>";
const BODY_PAIR_PATTERN: &str = r"(?is)<body[\s>].*</body\s*>";

/// Classifies response bodies as challenge interstitials or genuine pages.
///
/// Owns its compiled patterns, so every fetcher carries an independent copy.
#[derive(Debug, Clone)]
pub struct PageInspector {
    challenge: BytesRegex,
    doctype: Regex,
    html_pair: Regex,
    body_pair: Regex,
}

impl PageInspector {
    /// Compiles the detection patterns.
    pub fn new() -> Self {
        Self {
            challenge: compile_bytes(CHALLENGE_PATTERN),
            doctype: compile(DOCTYPE_PATTERN),
            html_pair: compile(HTML_PAIR_PATTERN),
            body_pair: compile(BODY_PAIR_PATTERN),
        }
    }

    /// True when the body carries a known anti-bot interstitial marker.
    pub fn has_challenge(&self, body: &[u8]) -> bool {
        self.challenge.is_match(body)
    }

    /// True when the text contains a doctype, an `<html>` pair or a `<body>` pair.
    pub fn is_valid_html(&self, text: &str) -> bool {
        self.doctype.is_match(text) || self.html_pair.is_match(text) || self.body_pair.is_match(text)
    }

    /// True when `body` may be cached and handed to callers.
    pub fn is_acceptable(&self, body: &[u8]) -> bool {
        !body.is_empty()
            && !self.has_challenge(body)
            && self.is_valid_html(&String::from_utf8_lossy(body))
    }
}

impl Default for PageInspector {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in page pattern must compile")
}

fn compile_bytes(pattern: &str) -> BytesRegex {
    BytesRegex::new(pattern).expect("built-in page pattern must compile")
}
