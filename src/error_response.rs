//! Fixed-format HTTP error responses. Byte layout (status line, header set,
//! HTML body) is observable by tests and intentionally reproduces the
//! source's wording verbatim, typo included, for byte-parity.

use std::time::SystemTime;

const SERVER_HEADER: &str = "VaibhavN/14785";

/// Supported status codes. Anything else is a programming error in this
/// crate, not a client-triggerable condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    BadRequest,
    Forbidden,
    NotFound,
    InternalServerError,
    NotImplemented,
    HttpVersionNotSupported,
}

impl StatusCode {
    fn code(self) -> u16 {
        match self {
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::HttpVersionNotSupported => 505,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// The HTML body, with the source's preserved "Bad Rqeuest" typo on 400
    /// (kept for byte-parity; see DESIGN.md).
    fn body(self) -> String {
        let (code, title_reason, h1_reason) = match self {
            StatusCode::BadRequest => (400, "Bad Request", "Bad Rqeuest"),
            StatusCode::Forbidden => (403, "Forbidden", "Forbidden"),
            StatusCode::NotFound => (404, "Not Found", "Not Found"),
            StatusCode::InternalServerError => {
                (500, "Internal Server Error", "Internal Server Error")
            }
            StatusCode::NotImplemented => (501, "Not Implemented", "Not Implemented"),
            StatusCode::HttpVersionNotSupported => (
                505,
                "HTTP Version Not Supported",
                "HTTP Version Not Supported",
            ),
        };
        format!(
            "<HTML><HEAD><TITLE>{code} {title_reason}</TITLE></HEAD>\n<BODY><H1>{h1_reason}</H1>\n</BODY></HTML>"
        )
    }
}

/// Builds a complete HTTP/1.1 error response: status line, headers, and
/// HTML body. `Content-Length` always matches the body's byte length.
pub fn render(status: StatusCode) -> Vec<u8> {
    render_at(status, SystemTime::now())
}

fn render_at(status: StatusCode, now: SystemTime) -> Vec<u8> {
    let body = status.body();
    let date = httpdate::fmt_http_date(now);

    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Length: {}\r\n\
         Content-Type: text/html\r\n\
         Connection: keep-alive\r\n\
         Date: {}\r\n\
         Server: {}\r\n\
         \r\n",
        status.code(),
        status.reason(),
        body.len(),
        date,
        SERVER_HEADER,
    );

    let mut out = head.into_bytes();
    out.extend_from_slice(body.as_bytes());
    out
}
