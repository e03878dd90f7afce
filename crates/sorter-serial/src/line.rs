//! 字节流到行的切分

use crate::SerialError;
use std::io::{ErrorKind, Read};

const CHUNK_SIZE: usize = 256;

/// 单行长度上限，超过后丢弃缓冲（防止噪声导致无限增长）
pub const MAX_LINE_LEN: usize = 4096;

/// 按 `\n` 切分的行读取器
///
/// 底层 `read` 返回 0 字节或 `WouldBlock`/`TimedOut` 时视为读超时。
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// 读取下一行（去除 `\r\n`），行内非 UTF-8 字节按替换字符处理
    ///
    /// # 错误
    /// - `SerialError::Timeout`: 本次读取没有凑齐一行
    /// - `SerialError::Io`: 底层 IO 错误
    pub fn read_line(&mut self) -> Result<String, SerialError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                    .trim_end_matches('\r')
                    .to_string();
                return Ok(line);
            }

            let mut chunk = [0u8; CHUNK_SIZE];
            let n = match self.inner.read(&mut chunk) {
                Ok(0) => return Err(SerialError::Timeout),
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(SerialError::Timeout);
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SerialError::Io(e)),
            };
            self.buf.extend_from_slice(&chunk[..n]);

            if self.buf.len() > MAX_LINE_LEN && !self.buf.contains(&b'\n') {
                tracing::warn!(
                    "Discarding {} bytes of unterminated serial input",
                    self.buf.len()
                );
                self.buf.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_splits_lines_and_strips_cr() {
        let mut reader = LineReader::new(Cursor::new(b"T done id=1\r\nENC,3\n".to_vec()));
        assert_eq!(reader.read_line().unwrap(), "T done id=1");
        assert_eq!(reader.read_line().unwrap(), "ENC,3");
        assert!(matches!(reader.read_line(), Err(SerialError::Timeout)));
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let mut reader = LineReader::new(Cursor::new(b"ERR,T,4".to_vec()));
        assert!(matches!(reader.read_line(), Err(SerialError::Timeout)));
        // 剩余部分到达后再拼接
        reader.inner = Cursor::new(b",stall\n".to_vec());
        assert_eq!(reader.read_line().unwrap(), "ERR,T,4,stall");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut reader = LineReader::new(Cursor::new(vec![b'a', 0xff, b'b', b'\n']));
        assert_eq!(reader.read_line().unwrap(), "a\u{fffd}b");
    }

    #[test]
    fn test_overlong_garbage_is_dropped() {
        let mut data = vec![b'x'; MAX_LINE_LEN + 300];
        data.extend_from_slice(b"\nok\n");
        let mut reader = LineReader::new(Cursor::new(data));
        let first = reader.read_line().unwrap();
        assert!(first.len() < MAX_LINE_LEN);
        assert_eq!(reader.read_line().unwrap(), "ok");
    }
}
