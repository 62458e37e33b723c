//! Recognizes matchmaking profile requests inside raw TCP payloads.
//!
//! Only the HTTP request line is ever interpreted. Anything that does not look
//! like `METHOD /aurora-profile-by-toon/{id}/{gateway} ...` is a miss, never an
//! error: loopback traffic is full of partial and unrelated segments.

use std::sync::LazyLock;

use regex::Regex;

use crate::config;

static PROFILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(config::PROFILE_PATH_PATTERN).expect("profile path pattern is valid")
});

/// `{method, target, version}` view over the first line of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub version: Option<&'a str>,
}

impl<'a> RequestLine<'a> {
    /// Parse the bytes before the first CRLF.
    ///
    /// Returns `None` when there is no CRLF, the line is not UTF-8, or it has
    /// fewer than two space-separated tokens.
    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        let end = find(payload, b"\r\n")?;
        let line = std::str::from_utf8(&payload[..end]).ok()?;

        let mut parts = line.splitn(3, ' ');
        let method = parts.next()?;
        let target = parts.next()?;
        Some(Self {
            method,
            target,
            version: parts.next(),
        })
    }
}

/// A payload that carries a profile request. Borrows the URL from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileRequest<'a> {
    pub url: &'a str,
}

/// Return the request URL if `payload` is a matchmaking profile request.
pub fn match_payload(payload: &[u8]) -> Option<ProfileRequest<'_>> {
    if !contains(payload, config::PROFILE_API_MARKER) {
        return None;
    }

    let line = RequestLine::parse(payload)?;
    if !PROFILE_PATH.is_match(line.target) {
        return None;
    }

    Some(ProfileRequest { url: line.target })
}

/// Pull the player identifier out of a profile URL and percent-decode it.
///
/// Decoding applies to the captured segment only. Invalid UTF-8 after decoding
/// is replaced rather than rejected.
pub fn extract_identifier(url: &str) -> Option<String> {
    let raw = PROFILE_PATH.captures(url)?.get(1)?.as_str();
    let decoded = urlencoding::decode_binary(raw.as_bytes());
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// Byte-exact substring test used for the payload markers.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
