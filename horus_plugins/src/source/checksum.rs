//! Incremental sha256 verification of a download stream.

use crate::error::PluginError;
use sha2::{Digest, Sha256};
use std::io::{self, Read};

enum State {
    Reading,
    Verified,
    Mismatch { expected: String, actual: String },
}

/// Hashes everything read through it and checks the digest at end of stream.
///
/// A mismatch is only reported once the final byte has been consumed, and
/// is reported again on every later read.
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Sha256,
    expected: Vec<u8>,
    state: State,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R, expected: Vec<u8>) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            expected,
            state: State::Reading,
        }
    }

    fn mismatch_error(expected: &str, actual: &str) -> io::Error {
        PluginError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into_io()
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.state {
            State::Verified => return Ok(0),
            State::Mismatch { expected, actual } => {
                return Err(Self::mismatch_error(expected, actual))
            }
            State::Reading => {}
        }
        // an empty buffer says nothing about end of stream
        if buf.is_empty() {
            return Ok(0);
        }

        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            return Ok(n);
        }

        let actual = self.hasher.clone().finalize();
        if actual.as_slice() == self.expected.as_slice() {
            self.state = State::Verified;
            return Ok(0);
        }

        let expected = hex::encode(&self.expected);
        let actual = hex::encode(actual);
        log::debug!("checksum mismatch: expected {} actual {}", expected, actual);
        let err = Self::mismatch_error(&expected, &actual);
        self.state = State::Mismatch { expected, actual };
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn digest(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    #[test]
    fn test_matching_checksum_reads_everything() {
        let data = b"plugin bytes".to_vec();
        let mut reader = ChecksumReader::new(Cursor::new(data.clone()), digest(&data));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_mismatch_fails_only_after_last_byte() {
        let data = vec![7u8; 10_000];
        let mut reader = ChecksumReader::new(Cursor::new(data.clone()), digest(b"other"));

        let mut buf = [0u8; 4096];
        let mut total = 0;
        let err = loop {
            match reader.read(&mut buf) {
                Ok(n) => {
                    assert!(n > 0, "stream must not end cleanly");
                    total += n;
                }
                Err(e) => break e,
            }
        };
        assert_eq!(total, data.len());

        let err = PluginError::from_read(err);
        match err {
            PluginError::ChecksumMismatch { expected, actual } => {
                assert_eq!(expected, hex::encode(digest(b"other")));
                assert_eq!(actual, hex::encode(digest(&data)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_buffer_read_does_not_finish_stream() {
        let data = b"plugin bytes".to_vec();
        let mut reader = ChecksumReader::new(Cursor::new(data.clone()), digest(&data));

        assert_eq!(reader.read(&mut []).unwrap(), 0);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.read(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_mismatch_is_sticky() {
        let mut reader = ChecksumReader::new(Cursor::new(Vec::new()), vec![0u8; 32]);
        let mut buf = [0u8; 16];
        assert!(reader.read(&mut buf).is_err());
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_mismatch_message() {
        let err = PluginError::ChecksumMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.to_string(), "invalid checksum, expected aa, actual bb");
    }
}
