//! Reading and parsing of HTTP/1.1 upgrade heads.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{PipelineError, ProtocolError};

/// Upper bound on the size of a request or response head.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

const READ_CHUNK: usize = 1024;
const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Parsed start line and header fields of an HTTP message head.
#[derive(Debug)]
pub(super) struct Head {
    pub(super) start_line: String,
    headers: Vec<(String, String)>,
}

impl Head {
    fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::MalformedHead("head is not UTF-8"))?;
        let mut lines = text.split("\r\n").filter(|line| !line.is_empty());
        let start_line = lines
            .next()
            .ok_or(ProtocolError::MalformedHead("missing start line"))?
            .to_owned();
        let headers = lines
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                    .ok_or(ProtocolError::MalformedHead("header line without colon"))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            start_line,
            headers,
        })
    }

    /// First value of header `name`, compared case-insensitively.
    pub(super) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Comma-separated tokens across every occurrence of header `name`.
    pub(super) fn tokens<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, value)| value.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Returns `true` if header `name` lists `token`, ignoring case.
    pub(super) fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).any(|t| t.eq_ignore_ascii_case(token))
    }
}

/// Read one head from `reader`, returning it with any bytes read past it.
pub(super) async fn read_head<R>(reader: &mut R) -> Result<(Head, Vec<u8>), PipelineError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut scanned = 0;
    loop {
        if let Some(pos) = find_terminator(&buf, scanned) {
            let leftover = buf.split_off(pos + TERMINATOR.len());
            return Ok((Head::parse(&buf)?, leftover));
        }
        scanned = buf.len().saturating_sub(TERMINATOR.len() - 1);
        if buf.len() >= MAX_HEAD_LEN {
            return Err(ProtocolError::MalformedHead("head too long").into());
        }
        let start = buf.len();
        buf.resize((start + READ_CHUNK).min(MAX_HEAD_LEN), 0);
        let read = reader.read(&mut buf[start..]).await?;
        buf.truncate(start + read);
        if read == 0 {
            return Err(ProtocolError::MalformedHead("stream ended inside head").into());
        }
    }
}

fn find_terminator(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_head_from_trailing_bytes() {
        let mut input: &[u8] = b"GET / HTTP/1.1\r\nHost: a\r\nConnection: keep-alive, Upgrade\r\n\r\n\x81\x00";
        let (head, leftover) = read_head(&mut input).await.expect("head");
        assert_eq!(head.start_line, "GET / HTTP/1.1");
        assert_eq!(head.header("host"), Some("a"));
        assert!(head.has_token("connection", "upgrade"));
        assert_eq!(leftover, vec![0x81, 0x00]);
    }

    #[tokio::test]
    async fn rejects_oversized_head() {
        let data = vec![b'a'; MAX_HEAD_LEN + 10];
        let mut input: &[u8] = &data;
        let err = read_head(&mut input).await.expect_err("too long");
        assert!(
            matches!(err, PipelineError::Protocol(ProtocolError::MalformedHead("head too long"))),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn rejects_truncated_head() {
        let mut input: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n";
        let err = read_head(&mut input).await.expect_err("truncated");
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolError::MalformedHead(_))
        ));
    }
}
