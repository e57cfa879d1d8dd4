use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;
use redmux_error::ConnectionError;
use tracing::trace;

use super::RespFrame;

/// Максимальная длина строкового элемента (64kb).
pub const MAX_LINE_LENGTH: usize = 64 * 1024;
/// Максимальный размер bulk-строки (512mb), как у брокера.
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;
/// Максимальная вложенность массивов.
pub const MAX_ARRAY_DEPTH: usize = 32;

/// Инкрементальный декодер RESP2.
///
/// Между вызовами состояния не хранит: либо находит один полный кадр в
/// начале буфера и забирает его, либо оставляет буфер нетронутым и
/// возвращает `Ok(None)`, чтобы вызывающий дочитал байты.
#[derive(Debug, Default)]
pub struct RespDecoder;

impl RespDecoder {
    pub fn new() -> Self {
        RespDecoder
    }

    pub fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<RespFrame>, ConnectionError> {
        match parse_frame(&buf[..], 0, 0)? {
            Some((frame, consumed)) => {
                buf.advance(consumed);
                trace!(consumed, "decoded frame");
                Ok(Some(frame))
            }
            None => {
                if buf.len() > MAX_BULK_LENGTH + MAX_LINE_LENGTH {
                    return Err(ConnectionError::protocol("frame exceeds size limit"));
                }
                Ok(None)
            }
        }
    }
}

type Parsed = Option<(RespFrame, usize)>;

// --- Разбор отдельных типов кадров ---

fn parse_frame(
    buf: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Parsed, ConnectionError> {
    if depth > MAX_ARRAY_DEPTH {
        return Err(ConnectionError::protocol(format!(
            "array nesting exceeds {MAX_ARRAY_DEPTH}"
        )));
    }
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1)? else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some((RespFrame::Simple(utf8(line)?), next))),
        b'-' => Ok(Some((RespFrame::Error(utf8(line)?), next))),
        b':' => Ok(Some((RespFrame::Integer(integer(line)?), next))),
        b'$' => parse_bulk(buf, line, next),
        b'*' => parse_array(buf, line, next, depth),
        other => Err(ConnectionError::protocol(format!(
            "unknown RESP type byte 0x{other:02x} at offset {pos}"
        ))),
    }
}

fn parse_bulk(
    buf: &[u8],
    header: &[u8],
    start: usize,
) -> Result<Parsed, ConnectionError> {
    let len = integer(header)?;
    if len == -1 {
        return Ok(Some((RespFrame::Bulk(None), start)));
    }
    if len < 0 {
        return Err(ConnectionError::protocol(format!("invalid bulk length {len}")));
    }
    let len = len as usize;
    if len > MAX_BULK_LENGTH {
        return Err(ConnectionError::protocol(format!(
            "bulk string too long ({len} > {MAX_BULK_LENGTH})"
        )));
    }
    let end = start + len;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(ConnectionError::protocol("bulk string not terminated by CRLF"));
    }
    let data = Bytes::copy_from_slice(&buf[start..end]);
    Ok(Some((RespFrame::Bulk(Some(data)), end + 2)))
}

fn parse_array(
    buf: &[u8],
    header: &[u8],
    start: usize,
    depth: usize,
) -> Result<Parsed, ConnectionError> {
    let len = integer(header)?;
    if len == -1 {
        return Ok(Some((RespFrame::Array(None), start)));
    }
    if len < 0 {
        return Err(ConnectionError::protocol(format!("invalid array length {len}")));
    }
    let mut items = Vec::with_capacity((len as usize).min(64));
    let mut pos = start;
    for _ in 0..len {
        match parse_frame(buf, pos, depth + 1)? {
            Some((item, next)) => {
                items.push(item);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespFrame::Array(Some(items)), pos)))
}

/// Возвращает строку от `pos` (без CRLF) и смещение сразу после неё.
fn read_line(
    buf: &[u8],
    pos: usize,
) -> Result<Option<(&[u8], usize)>, ConnectionError> {
    let rest = buf.get(pos..).unwrap_or_default();
    match memchr(b'\r', rest) {
        Some(i) if i + 1 < rest.len() => {
            if rest[i + 1] != b'\n' {
                return Err(ConnectionError::protocol("CR not followed by LF"));
            }
            Ok(Some((&rest[..i], pos + i + 2)))
        }
        Some(_) => Ok(None),
        None if rest.len() > MAX_LINE_LENGTH => {
            Err(ConnectionError::protocol("line exceeds maximum length"))
        }
        None => Ok(None),
    }
}

fn utf8(line: &[u8]) -> Result<String, ConnectionError> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|e| ConnectionError::protocol(format!("invalid UTF-8 in line: {e}")))
}

fn integer(line: &[u8]) -> Result<i64, ConnectionError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ConnectionError::protocol(format!(
                "invalid integer '{}'",
                String::from_utf8_lossy(line)
            ))
        })
}
