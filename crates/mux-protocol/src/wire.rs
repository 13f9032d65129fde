// SPDX-License-Identifier: MIT

//! Wire framing: 4-byte big-endian length prefix + JSON payload, matching
//! the teacher's `oj-daemon/src/protocol` framing exactly.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted message body. Guards a malformed or hostile peer from
/// making the daemon allocate an unbounded buffer off a forged length
/// prefix.
pub const MAX_MESSAGE_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message of {0} bytes exceeds the {1}-byte limit")]
    TooLarge(u32, u32),
}

/// Serializes `value` to its length-prefixed wire form.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(value)?;
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge(len, MAX_MESSAGE_BYTES));
    }
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parses a length-prefixed buffer (prefix + body, exactly) back into `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    if bytes.len() < 4 {
        return Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "message shorter than the length prefix",
        )));
    }
    let body = &bytes[4..];
    Ok(serde_json::from_slice(body)?)
}

/// Reads one length-prefixed message off an async stream.
pub async fn read_message<R: AsyncRead + Unpin, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<T, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge(len, MAX_MESSAGE_BYTES));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Writes one length-prefixed message to an async stream.
pub async fn write_message<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), ProtocolError> {
    let framed = encode(value)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn encode_decode_round_trips() {
        let v = Sample { a: 7, b: "hi".into() };
        let framed = encode(&v).unwrap();
        let back: Sample = decode(&framed).unwrap();
        assert_eq!(back, v);
    }

    #[tokio::test]
    async fn read_write_message_round_trips_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let v = Sample { a: 1, b: "x".into() };
        write_message(&mut client, &v).await.unwrap();
        let got: Sample = read_message(&mut server).await.unwrap();
        assert_eq!(got, v);
    }

    #[test]
    fn decode_rejects_truncated_prefix() {
        let err = decode::<Sample>(&[0, 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
