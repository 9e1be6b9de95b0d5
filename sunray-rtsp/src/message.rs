//! Request/response grammar.
//!
//! Request: `VERB target RTSP/1.0`, option lines, blank line, optional
//! payload. Response: `RTSP/1.0 <code> <reason>`, option lines, blank
//! line, optional payload. Option names compare case-insensitively.

use crate::error::{Error, Result};

pub const VERSION: &str = "RTSP/1.0";

pub const OPTION_CSEQ: &str = "CSeq";
pub const OPTION_CONTENT_LENGTH: &str = "Content-length";
pub const OPTION_SESSION: &str = "Session";

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Ordered option list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    entries: Vec<(String, String)>,
}

impl Options {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            entry.1 = value;
        } else {
            self.entries.push((name.to_string(), value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn cseq(&self) -> Option<&str> {
        self.get(OPTION_CSEQ)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get(OPTION_CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    fn parse_line(&mut self, line: &str) -> Result<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::ErrMalformedOption(line.to_string()))?;
        self.entries
            .push((name.trim().to_string(), value.trim().to_string()));
        Ok(())
    }

    fn marshal_to(&self, out: &mut String) {
        for (name, value) in &self.entries {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }
}

/// Splits a raw message into head lines and payload at the first blank
/// line. A message without a terminator is all head.
fn split_head(raw: &str) -> (&str, &str) {
    if let Some(pos) = raw.find("\r\n\r\n") {
        (&raw[..pos], &raw[pos + 4..])
    } else if let Some(pos) = raw.find("\n\n") {
        (&raw[..pos], &raw[pos + 2..])
    } else {
        (raw, "")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub options: Options,
    pub payload: String,
}

impl Request {
    pub fn new(method: &str, target: &str) -> Self {
        Request {
            method: method.to_string(),
            target: target.to_string(),
            options: Options::default(),
            payload: String::new(),
        }
    }

    pub fn option(mut self, name: &str, value: impl Into<String>) -> Self {
        self.options.set(name, value);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (head, payload) = split_head(raw);
        let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
        let request_line = lines.next().filter(|l| !l.is_empty()).ok_or(Error::ErrEmptyMessage)?;

        let mut parts = request_line.split_whitespace();
        let (method, target, protocol) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(p), None) => (m, t, p),
            _ => return Err(Error::ErrMalformedRequestLine(request_line.to_string())),
        };
        if !protocol.starts_with("RTSP/") {
            return Err(Error::ErrUnsupportedProtocol(protocol.to_string()));
        }

        let mut options = Options::default();
        for line in lines.filter(|l| !l.is_empty()) {
            options.parse_line(line)?;
        }

        Ok(Request {
            method: method.to_string(),
            target: target.to_string(),
            options,
            payload: payload.to_string(),
        })
    }

    pub fn marshal(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, VERSION);
        self.options.marshal_to(&mut out);
        if !self.payload.is_empty() && self.options.content_length().is_none() {
            out.push_str(&format!("{}: {}\r\n", OPTION_CONTENT_LENGTH, self.payload.len()));
        }
        out.push_str("\r\n");
        out.push_str(&self.payload);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub options: Options,
    pub payload: String,
}

impl Response {
    pub fn with_status(status: u16) -> Self {
        Response {
            status,
            reason: reason_phrase(status).to_string(),
            options: Options::default(),
            payload: String::new(),
        }
    }

    pub fn option(mut self, name: &str, value: impl Into<String>) -> Self {
        self.options.set(name, value);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (head, payload) = split_head(raw);
        let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
        let status_line = lines.next().filter(|l| !l.is_empty()).ok_or(Error::ErrEmptyMessage)?;

        let rest = status_line
            .strip_prefix("RTSP/")
            .and_then(|r| r.split_once(' '))
            .map(|(_, rest)| rest)
            .ok_or_else(|| Error::ErrMalformedStatusLine(status_line.to_string()))?;
        let (code, reason) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        let status = code
            .parse()
            .map_err(|_| Error::ErrMalformedStatusLine(status_line.to_string()))?;

        let mut options = Options::default();
        for line in lines.filter(|l| !l.is_empty()) {
            options.parse_line(line)?;
        }

        Ok(Response {
            status,
            reason: reason.to_string(),
            options,
            payload: payload.to_string(),
        })
    }

    pub fn marshal(&self) -> String {
        let mut out = format!("{} {} {}\r\n", VERSION, self.status, self.reason);
        self.options.marshal_to(&mut out);
        if !self.payload.is_empty() && self.options.content_length().is_none() {
            out.push_str(&format!("{}: {}\r\n", OPTION_CONTENT_LENGTH, self.payload.len()));
        }
        out.push_str("\r\n");
        out.push_str(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = Request::new("SETUP", "streamid=video")
            .option(OPTION_CSEQ, "3")
            .option("Transport", "unicast");
        let raw = req.marshal();
        assert!(raw.starts_with("SETUP streamid=video RTSP/1.0\r\n"));
        assert!(raw.ends_with("\r\n\r\n"));

        let parsed = Request::parse(&raw).unwrap();
        assert_eq!(parsed.method, "SETUP");
        assert_eq!(parsed.target, "streamid=video");
        assert_eq!(parsed.options.cseq(), Some("3"));
        assert_eq!(parsed.options.get("transport"), Some("unicast"));
    }

    #[test]
    fn request_with_payload_carries_content_length() {
        let req = Request::new("ANNOUNCE", "streamid=0")
            .option(OPTION_CSEQ, "6")
            .with_payload("s=client\r\na=x:1\r\n");
        let raw = req.marshal();
        let parsed = Request::parse(&raw).unwrap();
        assert_eq!(parsed.options.content_length(), Some(parsed.payload.len()));
        assert_eq!(parsed.payload, "s=client\r\na=x:1\r\n");
    }

    #[test]
    fn bad_request_line() {
        assert_eq!(
            Request::parse("SETUP RTSP/1.0\r\n\r\n"),
            Err(Error::ErrMalformedRequestLine("SETUP RTSP/1.0".into()))
        );
        assert_eq!(
            Request::parse("GET / HTTP/1.1\r\n\r\n"),
            Err(Error::ErrUnsupportedProtocol("HTTP/1.1".into()))
        );
        assert_eq!(Request::parse(""), Err(Error::ErrEmptyMessage));
    }

    #[test]
    fn option_without_colon_rejected() {
        let raw = "OPTIONS * RTSP/1.0\r\nBogusLine\r\n\r\n";
        assert_eq!(
            Request::parse(raw),
            Err(Error::ErrMalformedOption("BogusLine".into()))
        );
    }

    #[test]
    fn response_roundtrip() {
        let resp = Response::with_status(503).option(OPTION_CSEQ, "4");
        let raw = resp.marshal();
        assert!(raw.starts_with("RTSP/1.0 503 Service Unavailable\r\n"));
        let parsed = Response::parse(&raw).unwrap();
        assert_eq!(parsed.status, 503);
        assert_eq!(parsed.options.cseq(), Some("4"));
    }

    #[test]
    fn response_payload_preserved() {
        let resp = Response::with_status(200)
            .option(OPTION_CSEQ, "2")
            .with_payload("surround-params=NONE");
        let parsed = Response::parse(&resp.marshal()).unwrap();
        assert_eq!(parsed.payload, "surround-params=NONE");
    }

    #[test]
    fn bare_newlines_tolerated() {
        let parsed = Request::parse("PLAY streamid=0 RTSP/1.0\nCSeq: 9\n\n").unwrap();
        assert_eq!(parsed.method, "PLAY");
        assert_eq!(parsed.options.cseq(), Some("9"));
    }
}
