//! Client side of the V2 protocol: encode requests, decode responses.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, warn};

use crate::error::{FrameError, FrameResult};
use crate::frame::{ensure, CodecConfig, ENTRY_ID_FIELDS, LENGTH_FIELD, RESPONSE_FIXED_BODY};
use crate::header::{OpCode, PacketHeader, HEADER_LENGTH};
use crate::types::{ErrorCode, Request, Response};

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientCodec {
    config: CodecConfig,
}

impl ClientCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    fn check_master_key(&self, master_key: &Bytes) -> FrameResult<()> {
        if master_key.len() != self.config.master_key_length {
            return Err(FrameError::InvalidMasterKey {
                expected: self.config.master_key_length,
                actual: master_key.len(),
            });
        }
        Ok(())
    }

    /// Encode a request as a complete frame, length prefix included.
    pub fn encode_request(&self, request: &Request) -> FrameResult<Bytes> {
        let key_length = self.config.master_key_length;
        let body = match request.op_code {
            OpCode::AddEntry => {
                self.check_master_key(&request.master_key)?;
                let data = request.data.as_ref().ok_or(FrameError::MissingPayload)?;
                key_length + ENTRY_ID_FIELDS + data.len()
            }
            OpCode::ReadEntry if request.is_fencing() => {
                self.check_master_key(&request.master_key)?;
                ENTRY_ID_FIELDS + key_length
            }
            OpCode::ReadEntry => ENTRY_ID_FIELDS,
            OpCode::Auth => 0,
        };
        let frame_length = HEADER_LENGTH + body;
        let limit = self.config.frame_limit();
        if frame_length > limit {
            return Err(FrameError::FrameTooLarge { length: frame_length, limit });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_FIELD + frame_length);
        buf.put_i32(frame_length as i32);
        buf.put_i32(PacketHeader::new(request.protocol_version, request.op_code, request.flags).to_int());

        match request.op_code {
            OpCode::AddEntry => {
                buf.put_slice(&request.master_key);
                buf.put_i64(request.ledger_id);
                buf.put_i64(request.entry_id);
                if let Some(data) = &request.data {
                    buf.put_slice(data);
                }
            }
            OpCode::ReadEntry => {
                buf.put_i64(request.ledger_id);
                buf.put_i64(request.entry_id);
                if request.is_fencing() {
                    buf.put_slice(&request.master_key);
                }
            }
            OpCode::Auth => {}
        }

        debug!("event=request_encoded request={}", request);
        Ok(buf.freeze())
    }

    /// Decode one response from a frame body (length prefix already removed).
    ///
    /// A read response's trailing bytes are its entry payload; an empty
    /// trailer decodes as `None`.
    pub fn decode_response(&self, frame: Bytes) -> FrameResult<Response> {
        decode(frame).map_err(|e| {
            warn!("event=malformed_response error={}", e);
            e
        })
    }
}

fn decode(mut frame: Bytes) -> FrameResult<Response> {
    ensure(&frame, HEADER_LENGTH, "response header")?;
    let header = PacketHeader::from_int(frame.get_i32())?;

    let mut response = Response {
        protocol_version: header.version,
        op_code: header.op_code,
        error_code: ErrorCode::Ok,
        ledger_id: 0,
        entry_id: 0,
        data: None,
    };

    match header.op_code {
        OpCode::AddEntry | OpCode::ReadEntry => {
            ensure(&frame, RESPONSE_FIXED_BODY, "entry response")?;
            response.error_code = ErrorCode::from_code(frame.get_i32())?;
            response.ledger_id = frame.get_i64();
            response.entry_id = frame.get_i64();
            if header.op_code == OpCode::ReadEntry && frame.has_remaining() {
                response.data = Some(frame);
            }
        }
        OpCode::Auth => {}
    }

    debug!("event=response_decoded response={}", response);
    Ok(response)
}
