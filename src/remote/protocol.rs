//! AMCP-like ASCII reply grammar (spec §6).
//!
//! `2xx` status lines are success, `4xx`/`5xx` are failure. The parser
//! tolerates a multi-line payload between status lines — only `CALL ...
//! FRAME` carries one (the integer frame number); every other command's
//! reply body, if any, is read and discarded.

use tokio::io::{AsyncBufReadExt, BufReader};

/// One parsed reply: status code, message, and any body lines read before
/// the next status line (or a blank terminator).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: u16,
    pub message: String,
    pub body: Vec<String>,
}

/// Failure reading a reply: either the peer closed the socket (a transport
/// condition the connection layer maps to [`crate::error::NetworkError`]) or
/// the bytes didn't parse as a reply (mapped to
/// [`crate::error::ProtocolError`]).
#[derive(Debug)]
pub enum ReadError {
    Closed,
    Io(std::io::Error),
    Malformed(String),
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

fn parse_status_line(line: &str) -> Option<(u16, String)> {
    let mut parts = line.splitn(2, ' ');
    let code_str = parts.next()?;
    if code_str.len() != 3 || !code_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let code: u16 = code_str.parse().ok()?;
    let message = parts.next().unwrap_or("").trim_end().to_string();
    Some((code, message))
}

/// Reads one reply from `reader`: a status line followed by zero or more
/// body lines, terminated by a blank line.
pub async fn read_reply<R>(reader: &mut BufReader<R>) -> Result<Reply, ReadError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut status_line = String::new();
    let n = reader
        .read_line(&mut status_line)
        .await
        .map_err(ReadError::Io)?;
    if n == 0 {
        return Err(ReadError::Closed);
    }
    let trimmed = status_line.trim_end_matches(['\r', '\n']);
    let (code, message) = parse_status_line(trimmed)
        .ok_or_else(|| ReadError::Malformed(format!("malformed status line: {trimmed:?}")))?;

    let mut body = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(ReadError::Io)?;
        if n == 0 {
            break; // connection closed right after the reply — tolerate, body is what we have
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        body.push(trimmed.to_string());
    }

    Ok(Reply { code, message, body })
}

/// Parses the integer body of a `CALL <ch>-<layer> FRAME` reply.
///
/// Returns `None` on a missing or non-numeric body — the caller treats this
/// as an `unknown`/`null` drift sample (spec §4.6 step 2), never an error.
pub fn parse_frame_reply(reply: &Reply) -> Option<i64> {
    reply.body.first()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn parses_single_line_success() {
        let data = b"202 PLAY OK\r\n\r\n".to_vec();
        let mut reader = BufReader::new(&data[..]);
        let reply = read_reply(&mut reader).await.unwrap();
        assert_eq!(reply.code, 202);
        assert!(reply.is_success());
        assert!(reply.body.is_empty());
    }

    #[tokio::test]
    async fn parses_multiline_frame_reply() {
        let data = b"201 CALL OK\r\n1234\r\n\r\n".to_vec();
        let mut reader = BufReader::new(&data[..]);
        let reply = read_reply(&mut reader).await.unwrap();
        assert_eq!(reply.code, 201);
        assert_eq!(parse_frame_reply(&reply), Some(1234));
    }

    #[tokio::test]
    async fn failure_code_is_not_success() {
        let data = b"501 ERROR\r\n\r\n".to_vec();
        let mut reader = BufReader::new(&data[..]);
        let reply = read_reply(&mut reader).await.unwrap();
        assert_eq!(reply.code, 501);
        assert!(!reply.is_success());
    }

    #[tokio::test]
    async fn malformed_status_line_is_protocol_error() {
        let data = b"not-a-status-line\r\n\r\n".to_vec();
        let mut reader = BufReader::new(&data[..]);
        assert!(read_reply(&mut reader).await.is_err());
    }

    #[test]
    fn non_numeric_frame_body_is_none() {
        let reply = Reply {
            code: 201,
            message: "CALL OK".into(),
            body: vec!["not-a-number".into()],
        };
        assert_eq!(parse_frame_reply(&reply), None);
    }
}
