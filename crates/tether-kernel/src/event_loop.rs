//! Single-threaded cooperative event loop of the kernel.
//!
//! One iteration: read a request line, process it (possibly suspending for
//! nested host callbacks), drain the finalized set into a `release`
//! notification, then write the response. The drain-before-response order
//! is what gives the host causal ordering: a release produced by a request
//! is always observed before that request's response. `exit` (or EOF on
//! the input channel) terminates the loop.

use std::io::{self, BufRead, Write};

use serde::Serialize;
use serde_json::Value;

use crate::error::KernelError;
use crate::protocol::{
    CallbackFrame, CallbackResponse, ErrorResponse, HelloFrame, KernelRequest, OkResponse,
    ReleaseNotification, API_DEL, API_EXIT,
};
use crate::store::ObjectStore;

// ---------------------------------------------------------------------------
// Embedder contracts
// ---------------------------------------------------------------------------

/// Kernel→host side channel available while a request is being processed.
pub trait HostChannel {
    /// Send a nested callback to the host and block until it answers. A
    /// host exception surfaces as [`KernelError::HostException`].
    fn callback(&mut self, payload: Value) -> Result<Value, KernelError>;
}

/// Handler for every `api` the store does not own (`create`, `invoke`,
/// `get`, …). The handler sees the store and may suspend into the host.
pub trait RequestHandler {
    fn handle(
        &mut self,
        store: &mut ObjectStore,
        host: &mut dyn HostChannel,
        api: &str,
        request: &Value,
    ) -> Result<Value, KernelError>;
}

/// Handler for kernels that only ever speak the store-native protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAllHandler;

impl RequestHandler for RejectAllHandler {
    fn handle(
        &mut self,
        _store: &mut ObjectStore,
        _host: &mut dyn HostChannel,
        api: &str,
        _request: &Value,
    ) -> Result<Value, KernelError> {
        Err(KernelError::Protocol {
            message: format!("unsupported api '{api}'"),
        })
    }
}

// ---------------------------------------------------------------------------
// KernelEventLoop
// ---------------------------------------------------------------------------

/// The cooperative request/response loop owning the store.
pub struct KernelEventLoop<R, W, H> {
    reader: R,
    writer: W,
    handler: H,
    store: ObjectStore,
}

impl<R: BufRead, W: Write, H: RequestHandler> KernelEventLoop<R, W, H> {
    pub fn new(store: ObjectStore, handler: H, reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            handler,
            store,
        }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ObjectStore {
        &mut self.store
    }

    /// Reclaim the store once the loop has finished.
    pub fn into_store(self) -> ObjectStore {
        self.store
    }

    /// Reclaim the store and the output channel, e.g. to inspect what was
    /// written after a scripted run.
    pub fn into_parts(self) -> (ObjectStore, W) {
        (self.store, self.writer)
    }

    /// Run to `exit` or EOF. Wire-level failures abort the loop; request
    /// failures become error responses and never corrupt the store.
    pub fn run(&mut self) -> io::Result<()> {
        write_line(&mut self.writer, &HelloFrame::for_kernel())?;
        self.writer.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }

            let (outcome, exit) = Self::dispatch(
                &mut self.store,
                &mut self.handler,
                &mut self.reader,
                &mut self.writer,
                frame,
            );

            let release = self.store.finalized_instance_ids();
            if !release.is_empty() {
                write_line(&mut self.writer, &ReleaseNotification { release })?;
            }
            match outcome {
                Ok(ok) => write_line(&mut self.writer, &OkResponse { ok })?,
                Err(err) => write_line(&mut self.writer, &ErrorResponse::from(&err))?,
            }
            self.writer.flush()?;

            if exit {
                break;
            }
        }
        Ok(())
    }

    fn dispatch(
        store: &mut ObjectStore,
        handler: &mut H,
        reader: &mut R,
        writer: &mut W,
        frame: &str,
    ) -> (Result<Value, KernelError>, bool) {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(err) => {
                return (
                    Err(KernelError::Protocol {
                        message: format!("unreadable request frame: {err}"),
                    }),
                    false,
                )
            }
        };
        let Some(api) = value.get("api").and_then(Value::as_str) else {
            return (
                Err(KernelError::Protocol {
                    message: "request frame has no 'api' field".to_string(),
                }),
                false,
            );
        };

        match api {
            API_EXIT => (Ok(OkResponse::empty().ok), true),
            API_DEL => {
                let parsed: Result<KernelRequest, _> = serde_json::from_value(value.clone());
                match parsed {
                    Ok(KernelRequest::Del { objref }) => (
                        store.delete(&objref).map(|()| OkResponse::empty().ok),
                        false,
                    ),
                    Ok(KernelRequest::Exit) => (Ok(OkResponse::empty().ok), true),
                    Err(err) => (
                        Err(KernelError::Protocol {
                            message: format!("malformed del request: {err}"),
                        }),
                        false,
                    ),
                }
            }
            other => {
                let mut channel = WireChannel { reader, writer };
                (handler.handle(store, &mut channel, other, &value), false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WireChannel — nested callback plumbing
// ---------------------------------------------------------------------------

struct WireChannel<'a, R, W> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<R: BufRead, W: Write> HostChannel for WireChannel<'_, R, W> {
    fn callback(&mut self, payload: Value) -> Result<Value, KernelError> {
        write_line(&mut *self.writer, &CallbackFrame { callback: payload })
            .and_then(|()| self.writer.flush())
            .map_err(|err| KernelError::Protocol {
                message: format!("failed to write callback frame: {err}"),
            })?;

        let mut line = String::new();
        let frame = loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|err| KernelError::Protocol {
                    message: format!("failed to read callback response: {err}"),
                })?;
            if read == 0 {
                return Err(KernelError::Protocol {
                    message: "input channel closed during callback".to_string(),
                });
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                break trimmed;
            }
        };

        match serde_json::from_str::<CallbackResponse>(frame) {
            Ok(CallbackResponse::Ok { ok }) => Ok(ok),
            Ok(CallbackResponse::Exception { exception }) => {
                Err(KernelError::HostException { message: exception })
            }
            Err(err) => Err(KernelError::Protocol {
                message: format!("unreadable callback response: {err}"),
            }),
        }
    }
}

fn write_line<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, frame)?;
    writer.write_all(b"\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
