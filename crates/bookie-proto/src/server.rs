//! Server side of the V2 protocol: decode requests, encode responses.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, warn};

use crate::error::{FrameError, FrameResult};
use crate::frame::{ensure, CodecConfig, ENTRY_ID_FIELDS, LENGTH_FIELD, RESPONSE_FIXED_BODY};
use crate::header::{OpCode, PacketHeader, HEADER_LENGTH};
use crate::types::{Request, Response};

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerCodec {
    config: CodecConfig,
}

impl ServerCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> CodecConfig {
        self.config
    }

    /// Decode one request from a frame body (length prefix already removed).
    ///
    /// Any error means the frame is malformed; close the connection without
    /// responding. The add-entry payload and master key are zero-copy slices
    /// of `frame`.
    pub fn decode_request(&self, frame: Bytes) -> FrameResult<Request> {
        self.decode(frame).map_err(|e| {
            warn!("event=malformed_request error={}", e);
            e
        })
    }

    fn decode(&self, mut frame: Bytes) -> FrameResult<Request> {
        ensure(&frame, HEADER_LENGTH, "request header")?;
        let header = PacketHeader::from_int(frame.get_i32())?;

        let mut request = Request {
            protocol_version: header.version,
            op_code: header.op_code,
            flags: header.flags,
            ledger_id: 0,
            entry_id: 0,
            master_key: Bytes::new(),
            data: None,
        };

        let key_length = self.config.master_key_length;
        match header.op_code {
            OpCode::AddEntry => {
                ensure(&frame, key_length + ENTRY_ID_FIELDS, "add entry request")?;
                // Carried through unvalidated; authentication happens elsewhere
                request.master_key = frame.split_to(key_length);
                request.ledger_id = frame.get_i64();
                request.entry_id = frame.get_i64();
                request.data = Some(frame);
            }
            OpCode::ReadEntry => {
                let fencing = header.is_fencing();
                let needed = ENTRY_ID_FIELDS + if fencing { key_length } else { 0 };
                ensure(&frame, needed, "read entry request")?;
                request.ledger_id = frame.get_i64();
                request.entry_id = frame.get_i64();
                if fencing {
                    // Fencing reads carry the master key; it is consumed and dropped
                    frame.advance(key_length);
                }
            }
            OpCode::Auth => {}
        }

        debug!("event=request_decoded request={}", request);
        Ok(request)
    }

    /// Encode a response as a complete frame, length prefix included.
    pub fn encode_response(&self, response: &Response) -> FrameResult<Bytes> {
        let payload = match response.op_code {
            OpCode::ReadEntry => response.data.as_ref().map_or(0, |d| d.len()),
            _ => 0,
        };
        let body = match response.op_code {
            OpCode::AddEntry | OpCode::ReadEntry => RESPONSE_FIXED_BODY + payload,
            OpCode::Auth => 0,
        };
        let frame_length = HEADER_LENGTH + body;
        let limit = self.config.frame_limit();
        if frame_length > limit {
            return Err(FrameError::FrameTooLarge { length: frame_length, limit });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_FIELD + frame_length);
        buf.put_i32(frame_length as i32);
        buf.put_i32(PacketHeader::new(response.protocol_version, response.op_code, 0).to_int());

        match response.op_code {
            OpCode::AddEntry => {
                buf.put_i32(response.error_code.code());
                buf.put_i64(response.ledger_id);
                buf.put_i64(response.entry_id);
            }
            OpCode::ReadEntry => {
                buf.put_i32(response.error_code.code());
                buf.put_i64(response.ledger_id);
                buf.put_i64(response.entry_id);
                if let Some(data) = &response.data {
                    buf.put_slice(data);
                }
            }
            OpCode::Auth => {}
        }

        debug!("event=response_encoded response={}", response);
        Ok(buf.freeze())
    }
}
