//! Newline-delimited text codec with no handshake.

use bytes::{BufMut, BytesMut};

use super::Codec;
use crate::error::CodecError;

/// Longest line accepted, excluding the terminator.
pub const MAX_LINE: usize = 64 * 1024;

/// One UTF-8 line per request and per response. A trailing `\r` is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCodec;

impl Codec for LineCodec {
    type Request = String;
    type Response = String;

    fn encode(&self, request: &String, dst: &mut BytesMut) -> Result<(), CodecError> {
        if request.contains('\n') {
            return Err(CodecError::Malformed("line contains a newline".into()));
        }
        dst.reserve(request.len() + 1);
        dst.put_slice(request.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }

    fn decode(&self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        let Some(end) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > MAX_LINE {
                return Err(CodecError::TooLarge {
                    size: src.len(),
                    limit: MAX_LINE,
                });
            }
            return Ok(None);
        };
        let mut line = src.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| CodecError::Malformed("line is not UTF-8".into()))
    }
}
