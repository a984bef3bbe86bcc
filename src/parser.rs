//! Request parsing and the small header-manipulation surface the upstream
//! client needs before replaying a request. Mirrors, as an owned Rust type,
//! the `create`/`parse`/`destroy`/`header_get`/`header_set`/`unparse_headers`
//! contract the core was originally built against: `parse` folds
//! `create`+`parse` into one fallible constructor, and `ParsedRequest` being
//! an ordinary owned value (dropped normally) replaces `destroy`.
//!
//! The request line is parsed by hand rather than via `httparse::Request`,
//! which hard-rejects any version token other than `HTTP/1.0`/`HTTP/1.1`:
//! that would conflate a malformed request with one that simply carries an
//! unsupported version, and the two must be distinguishable (`ParseFailed`
//! closes silently; a bad version gets a 500). `httparse::parse_headers` is
//! still used for the header block, which has no such restriction.
//!
//! The request-target is also inspected for absolute-form
//! (`GET http://host:port/path HTTP/1.1`), which carries the upstream host
//! independently of any `Host` header. `host()`/`host_port()` prefer that
//! over the header, which is what makes "inject `Host` if the client didn't
//! send one" (see `upstream::build_outbound_request`) a reachable case
//! rather than dead code.

use std::fmt;

/// Only these two versions are accepted; anything else is still a valid
/// parse, just an unsupported one (see `is_version_supported`).
pub const HTTP_1_0: &str = "HTTP/1.0";
pub const HTTP_1_1: &str = "HTTP/1.1";

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// No `\r\n`-terminated request line, or the request line did not have
    /// exactly three space-separated tokens, or the header block was
    /// incomplete or rejected by `httparse`.
    Malformed,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed request")
    }
}

impl std::error::Error for ParseError {}

/// An owned, parsed HTTP request. Headers are order-preserving so that
/// `unparse_headers` reproduces the client's header ordering for replay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    headers: Vec<(String, String)>,
    /// Host/port recovered from an absolute-form request-target
    /// (`GET http://host:port/path HTTP/1.1`), independent of any `Host`
    /// header. `None` for the ordinary origin-form target (`GET /path ...`).
    target_host: Option<String>,
    target_port: Option<u16>,
}

/// Extracts `(host, port)` from an absolute-form request-target's authority
/// component. Returns `None` for origin-form targets (the common case).
fn parse_absolute_form_authority(target: &str) -> Option<(String, Option<u16>)> {
    let rest = target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))?;
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    if authority.is_empty() {
        return None;
    }
    match authority.rfind(':') {
        Some(idx) => {
            let port = authority[idx + 1..].parse::<u16>().ok();
            Some((authority[..idx].to_string(), port))
        }
        None => Some((authority.to_string(), None)),
    }
}

impl ParsedRequest {
    /// Returns the first header value matching `name`, case-insensitively.
    pub fn header_get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the first header matching `name` (case-insensitively), or
    /// appends a new header if none is present.
    pub fn header_set(&mut self, name: &str, value: &str) {
        if let Some(existing) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            existing.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    /// Serializes all current headers, each terminated by `\r\n`. Does not
    /// append the final blank line that separates headers from body; the
    /// caller appends that when assembling a full request.
    pub fn unparse_headers(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }

    /// The upstream host name: taken from an absolute-form request-target
    /// if one was given, otherwise from the `Host` header's name component
    /// (excluding any `:port` suffix).
    pub fn host(&self) -> Option<&str> {
        if let Some(h) = &self.target_host {
            return Some(h.as_str());
        }
        self.header_get("Host")
            .map(|h| h.split(':').next().unwrap_or(h))
    }

    /// The upstream port: taken from an absolute-form request-target's
    /// authority if it carried one, otherwise from the `Host` header
    /// (`Host: example.com:8080`).
    pub fn host_port(&self) -> Option<u16> {
        if let Some(p) = self.target_port {
            return Some(p);
        }
        let raw = self.header_get("Host")?;
        let colon = raw.rfind(':')?;
        raw[colon + 1..].parse::<u16>().ok()
    }

    pub fn is_version_supported(&self) -> bool {
        self.version == HTTP_1_0 || self.version == HTTP_1_1
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// Parses a client request buffer. `create`+`parse` from the original
/// contract are folded into this single fallible constructor.
pub fn parse(data: &[u8]) -> Result<ParsedRequest, ParseError> {
    let line_end = find_crlf(data).ok_or(ParseError::Malformed)?;
    let line = std::str::from_utf8(&data[..line_end]).map_err(|_| ParseError::Malformed)?;

    let mut tokens = line.split(' ').filter(|p| !p.is_empty());
    let method = tokens.next().ok_or(ParseError::Malformed)?.to_string();
    let path = tokens.next().ok_or(ParseError::Malformed)?.to_string();
    let version = tokens.next().ok_or(ParseError::Malformed)?.to_string();
    if tokens.next().is_some() {
        return Err(ParseError::Malformed);
    }

    let mut raw_headers = [httparse::EMPTY_HEADER; 64];
    let headers_block = &data[line_end + 2..];
    let headers = match httparse::parse_headers(headers_block, &mut raw_headers) {
        Ok(httparse::Status::Complete((_, parsed_headers))) => parsed_headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect(),
        Ok(httparse::Status::Partial) => return Err(ParseError::Malformed),
        Err(_) => return Err(ParseError::Malformed),
    };

    let (target_host, target_port) = match parse_absolute_form_authority(&path) {
        Some((host, port)) => (Some(host), port),
        None => (None, None),
    };

    Ok(ParsedRequest {
        method,
        path,
        version,
        headers,
        target_host,
        target_port,
    })
}
