//! Dispatch decoded requests onto the storage write path.
//!
//! Add requests are answered only after the entry is durable, so `handle`
//! returns a `PendingResponse` the transport waits on before encoding.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, error};

use bookie_core::{Completion, Storage};

use crate::error::FrameResult;
use crate::frame::{take_frame, CodecConfig};
use crate::header::OpCode;
use crate::server::ServerCodec;
use crate::types::{ErrorCode, Request, Response};

/// A response that may still be waiting on a journal sync.
#[derive(Debug)]
pub enum PendingResponse {
    Ready(Response),
    /// Holds an `Ok` response; it turns into `Io` if the write fails.
    Durable { response: Response, completion: Completion },
}

impl PendingResponse {
    pub fn is_ready(&self) -> bool {
        match self {
            PendingResponse::Ready(_) => true,
            PendingResponse::Durable { completion, .. } => completion.is_resolved(),
        }
    }

    /// Block until the response is final.
    pub fn wait(self) -> Response {
        match self {
            PendingResponse::Ready(response) => response,
            PendingResponse::Durable { response, completion } => settle(response, completion.wait()),
        }
    }

    /// `None` if the write is still unsynced after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Response> {
        match self {
            PendingResponse::Ready(response) => Some(response.clone()),
            PendingResponse::Durable { response, completion } => {
                completion.wait_timeout(timeout).map(|result| settle(response.clone(), result))
            }
        }
    }
}

fn settle(mut response: Response, result: bookie_core::StorageResult<()>) -> Response {
    if let Err(e) = result {
        error!(
            "event=add_entry_failed ledger_id={} entry_id={} error={}",
            response.ledger_id, response.entry_id, e
        );
        response.error_code = ErrorCode::Io;
    }
    response
}

#[derive(Clone)]
pub struct RequestHandler {
    storage: Arc<Storage>,
    codec: ServerCodec,
}

impl RequestHandler {
    pub fn new(storage: Arc<Storage>, config: CodecConfig) -> Self {
        Self { storage, codec: ServerCodec::new(config) }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn handle(&self, request: Request) -> PendingResponse {
        match request.op_code {
            OpCode::AddEntry => {
                let data = request.data.clone().unwrap_or_default();
                let completion = self.storage.put(request.key(), &data);
                PendingResponse::Durable { response: Response::for_request(&request, ErrorCode::Ok), completion }
            }
            OpCode::ReadEntry => {
                let response = match self.storage.get(&request.key()) {
                    Ok(Some(data)) => Response::for_request(&request, ErrorCode::Ok).with_data(data),
                    Ok(None) => Response::for_request(&request, ErrorCode::NoEntry),
                    Err(e) => {
                        error!("event=read_entry_failed key={} error={}", request.key(), e);
                        Response::for_request(&request, ErrorCode::Io)
                    }
                };
                PendingResponse::Ready(response)
            }
            OpCode::Auth => PendingResponse::Ready(Response::for_request(&request, ErrorCode::Ok)),
        }
    }

    /// Decode, dispatch and wait; returns the encoded response frame.
    pub fn handle_frame(&self, frame: Bytes) -> FrameResult<Bytes> {
        let request = self.codec.decode_request(frame)?;
        let response = self.handle(request).wait();
        self.codec.encode_response(&response)
    }

    /// Answer every complete frame in `buf`, leaving any partial tail.
    ///
    /// An error means the stream is unusable and the connection must close;
    /// responses for frames before the bad one are dropped with it.
    pub fn process_frames(&self, buf: &mut BytesMut) -> FrameResult<Vec<Bytes>> {
        let mut out = Vec::new();
        while let Some(frame) = take_frame(buf, self.codec.config().frame_limit())? {
            out.push(self.handle_frame(frame)?);
        }
        debug!("event=frames_processed count={} buffered={}", out.len(), buf.len());
        Ok(out)
    }
}
