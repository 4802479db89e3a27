//! Request framing and reply encoding (C6, §4.3): the inline and multi-bulk
//! dialects share one per-client input buffer and must be restartable —
//! a partial request simply leaves its bytes in the buffer for the next
//! read event.

use crate::error::{StoreError, StoreResult};

/// Hard caps on request size (§4.3): past these the connection is protocol
/// violating and must be closed, not merely answered with an error.
pub const MAX_INLINE_LINE: usize = 256 * 1024 * 1024;
pub const MAX_BULK_LEN: usize = 1024 * 1024 * 1024;

#[derive(Debug)]
pub enum ParseOutcome {
    /// A full request was framed; `argv` holds its arguments.
    Complete { argv: Vec<Vec<u8>> },
    /// Not enough bytes buffered yet.
    NeedMoreData,
    /// The client violated the protocol and must be disconnected.
    ProtocolError(String),
}

/// Multi-bulk framing state carried across partial reads, per §3's "Client"
/// fields `bulklen`/`multibulk`.
#[derive(Default)]
struct MultiBulkState {
    expected_args: Option<i64>,
    args: Vec<Vec<u8>>,
    pending_bulk_len: Option<i64>,
}

/// State kept across reads while an inline request's last token turned out
/// to be a bulk-length escape hatch (§4.3's "old protocol": a handful of
/// write commands ending their inline line in a byte count instead of the
/// payload itself, with the binary-safe payload following on its own
/// line). `prefix` already holds every inline token except that count.
struct PendingInlineBulk {
    prefix: Vec<Vec<u8>>,
    expected_len: usize,
}

#[derive(Default)]
pub struct RequestParser {
    buf: Vec<u8>,
    multi: MultiBulkState,
    inline_bulk: Option<PendingInlineBulk>,
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Attempts to parse one full request out of the buffer, consuming the
    /// bytes it used. Call repeatedly after each read — multiple pipelined
    /// requests may be present.
    pub fn try_parse(&mut self, is_bulk: impl Fn(&[u8]) -> bool) -> ParseOutcome {
        if self.inline_bulk.is_some() {
            return self.continue_inline_bulk();
        }
        if self.buf.is_empty() {
            return ParseOutcome::NeedMoreData;
        }
        if self.buf[0] == b'*' {
            self.try_parse_multibulk()
        } else {
            self.try_parse_inline(is_bulk)
        }
    }

    fn try_parse_inline(&mut self, is_bulk: impl Fn(&[u8]) -> bool) -> ParseOutcome {
        if self.buf.len() > MAX_INLINE_LINE {
            return ParseOutcome::ProtocolError("too big inline request".into());
        }
        let Some(pos) = find_crlf(&self.buf) else {
            return ParseOutcome::NeedMoreData;
        };
        let line: Vec<u8> = self.buf[..pos].to_vec();
        self.buf.drain(..pos + 2);
        let mut argv: Vec<Vec<u8>> = split_inline(&line);

        if argv.len() >= 2 && is_bulk(&argv[0]) {
            let len_tok = argv.pop().unwrap();
            let Ok(expected_len) = std::str::from_utf8(&len_tok).unwrap_or("").parse::<usize>() else {
                return ParseOutcome::ProtocolError("invalid bulk length".into());
            };
            if expected_len > MAX_BULK_LEN {
                return ParseOutcome::ProtocolError("invalid bulk length".into());
            }
            self.inline_bulk = Some(PendingInlineBulk { prefix: argv, expected_len });
            return self.continue_inline_bulk();
        }

        ParseOutcome::Complete { argv }
    }

    /// Finishes an inline request whose bulk payload may still be arriving;
    /// safe to call repeatedly across partial reads.
    fn continue_inline_bulk(&mut self) -> ParseOutcome {
        let expected_len = self.inline_bulk.as_ref().unwrap().expected_len;
        if self.buf.len() < expected_len + 2 {
            return ParseOutcome::NeedMoreData;
        }
        if &self.buf[expected_len..expected_len + 2] != b"\r\n" {
            self.inline_bulk = None;
            return ParseOutcome::ProtocolError("missing CRLF after bulk payload".into());
        }
        let payload = self.buf[..expected_len].to_vec();
        self.buf.drain(..expected_len + 2);
        let mut pending = self.inline_bulk.take().unwrap();
        pending.prefix.push(payload);
        ParseOutcome::Complete { argv: pending.prefix }
    }

    fn try_parse_multibulk(&mut self) -> ParseOutcome {
        if self.multi.expected_args.is_none() {
            let Some(pos) = find_crlf(&self.buf) else {
                return ParseOutcome::NeedMoreData;
            };
            let line = &self.buf[1..pos];
            let Ok(n) = std::str::from_utf8(line).unwrap_or("").parse::<i64>() else {
                return ParseOutcome::ProtocolError("invalid multibulk length".into());
            };
            self.buf.drain(..pos + 2);
            if n > 1024 * 1024 {
                return ParseOutcome::ProtocolError("invalid multibulk length".into());
            }
            self.multi.expected_args = Some(n.max(0));
            self.multi.args = Vec::with_capacity(n.max(0) as usize);
            if n <= 0 {
                self.multi = MultiBulkState::default();
                return ParseOutcome::Complete { argv: Vec::new() };
            }
        }

        while (self.multi.args.len() as i64) < self.multi.expected_args.unwrap() {
            if self.multi.pending_bulk_len.is_none() {
                if self.buf.is_empty() {
                    return ParseOutcome::NeedMoreData;
                }
                if self.buf[0] != b'$' {
                    self.multi = MultiBulkState::default();
                    return ParseOutcome::ProtocolError(
                        "expected '$', got something else".into(),
                    );
                }
                let Some(pos) = find_crlf(&self.buf) else {
                    return ParseOutcome::NeedMoreData;
                };
                let Ok(len) = std::str::from_utf8(&self.buf[1..pos]).unwrap_or("").parse::<i64>()
                else {
                    self.multi = MultiBulkState::default();
                    return ParseOutcome::ProtocolError("invalid bulk length".into());
                };
                if len < 0 || len as usize > MAX_BULK_LEN {
                    self.multi = MultiBulkState::default();
                    return ParseOutcome::ProtocolError("invalid bulk length".into());
                }
                self.buf.drain(..pos + 2);
                self.multi.pending_bulk_len = Some(len);
            }
            let len = self.multi.pending_bulk_len.unwrap() as usize;
            if self.buf.len() < len + 2 {
                return ParseOutcome::NeedMoreData;
            }
            let arg = self.buf[..len].to_vec();
            self.buf.drain(..len + 2);
            self.multi.args.push(arg);
            self.multi.pending_bulk_len = None;
        }

        let argv = std::mem::take(&mut self.multi.args);
        self.multi = MultiBulkState::default();
        ParseOutcome::Complete { argv }
    }
}

/// Splits an inline request on runs of ASCII space, honoring no quoting —
/// the original's inline dialect is plain space-tokenised text (§4.3).
fn split_inline(line: &[u8]) -> Vec<Vec<u8>> {
    line.split(|b| *b == b' ')
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_vec())
        .collect()
}

/// A reply atom (§4.3). `Bulk`/`MultiBulk` may hold `None` to mean the null
/// forms (`$-1\r\n` / `*-1\r\n`).
#[derive(Debug, Clone)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    MultiBulk(Option<Vec<Reply>>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".into())
    }

    pub fn from_error(e: StoreError) -> Self {
        Reply::Error(e.to_string())
    }

    pub fn nil_bulk() -> Self {
        Reply::Bulk(None)
    }

    pub fn nil_multibulk() -> Self {
        Reply::MultiBulk(None)
    }

    pub fn bulk(bytes: Vec<u8>) -> Self {
        Reply::Bulk(Some(bytes))
    }

    pub fn multibulk(items: Vec<Reply>) -> Self {
        Reply::MultiBulk(Some(items))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.push(b'-');
                if !s.starts_with("ERR") && !s.contains(' ') {
                    out.extend_from_slice(b"ERR ");
                } else if !s.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false) {
                    out.extend_from_slice(b"ERR ");
                }
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(bytes)) => {
                out.push(b'$');
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            Reply::MultiBulk(None) => out.extend_from_slice(b"*-1\r\n"),
            Reply::MultiBulk(Some(items)) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// Encodes a command as a synthetic multi-bulk request, used by the AOL and
/// replication fan-out to mirror mutations (§4.6, §4.11).
pub fn encode_multibulk_command(argv: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'*');
    out.extend_from_slice(argv.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in argv {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

pub fn parse_integer(bytes: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(StoreError::NotAnInteger)
}

pub fn parse_float(bytes: &[u8]) -> StoreResult<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or(StoreError::NotAFloat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipelined_multibulk_requests() {
        let mut p = RequestParser::new();
        p.feed(b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        match p.try_parse(|_: &[u8]| false) {
            ParseOutcome::Complete { argv } => assert_eq!(argv, vec![b"PING".to_vec()]),
            other => panic!("unexpected: {other:?}"),
        }
        match p.try_parse(|_: &[u8]| false) {
            ParseOutcome::Complete { argv } => {
                assert_eq!(argv, vec![b"GET".to_vec(), b"foo".to_vec()])
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn yields_on_partial_bulk_payload() {
        let mut p = RequestParser::new();
        p.feed(b"*2\r\n$3\r\nGET\r\n$3\r\nfo");
        assert!(matches!(p.try_parse(|_: &[u8]| false), ParseOutcome::NeedMoreData));
        p.feed(b"o\r\n");
        match p.try_parse(|_: &[u8]| false) {
            ParseOutcome::Complete { argv } => assert_eq!(argv[1], b"foo"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inline_request_is_space_tokenised() {
        let mut p = RequestParser::new();
        p.feed(b"PING\r\n");
        match p.try_parse(|_: &[u8]| false) {
            ParseOutcome::Complete { argv } => assert_eq!(argv, vec![b"PING".to_vec()]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inline_bulk_escape_hatch_waits_for_its_payload_line() {
        let mut p = RequestParser::new();
        p.feed(b"SET foo 3\r\n");
        assert!(matches!(p.try_parse(|name| name == b"SET"), ParseOutcome::NeedMoreData));
        p.feed(b"bar\r\n");
        match p.try_parse(|name| name == b"SET") {
            ParseOutcome::Complete { argv } => {
                assert_eq!(argv, vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()])
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn inline_bulk_escape_hatch_resolves_in_one_call_when_fully_buffered() {
        let mut p = RequestParser::new();
        p.feed(b"SET foo 3\r\nbar\r\n");
        match p.try_parse(|name| name == b"SET") {
            ParseOutcome::Complete { argv } => {
                assert_eq!(argv, vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()])
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn reply_encoding_matches_wire_forms() {
        let mut out = Vec::new();
        Reply::ok().encode(&mut out);
        assert_eq!(out, b"+OK\r\n");
        out.clear();
        Reply::bulk(b"bar".to_vec()).encode(&mut out);
        assert_eq!(out, b"$3\r\nbar\r\n");
        out.clear();
        Reply::nil_bulk().encode(&mut out);
        assert_eq!(out, b"$-1\r\n");
    }
}
