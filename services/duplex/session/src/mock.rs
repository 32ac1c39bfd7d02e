//! Scripted transport, callback and sink for driver tests.

use crate::callback::{Callback, Decision};
use crate::error::{SessionError, TransportError};
use crate::sink::FailureSink;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use duplex_wire::CloseCode;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Transport operation as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    ReadFull,
    ReadPartial(usize),
    Write(Bytes, bool),
    Close(CloseCode),
}

#[derive(Debug, Default)]
struct MockState {
    ops: Vec<Op>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Read-only view on what a [`MockTransport`] was asked to do
#[derive(Clone, Default)]
pub(crate) struct Probe {
    state: Arc<Mutex<MockState>>,
}

impl Probe {
    pub(crate) fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn begin(&self, op: Op) {
        let mut state = self.state.lock().unwrap();
        state.ops.push(op);
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
    }

    fn end(&self) {
        self.state.lock().unwrap().in_flight -= 1;
    }
}

/// In-memory transport fed from a script of fragments and errors
///
/// Reads past the end of the script never complete.
pub(crate) struct MockTransport {
    incoming: VecDeque<Result<(Bytes, bool), TransportError>>,
    pending: Option<(Bytes, bool)>,
    complete: bool,
    fail_writes: bool,
    fail_close: bool,
    probe: Probe,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            incoming: VecDeque::new(),
            pending: None,
            complete: true,
            fail_writes: false,
            fail_close: false,
            probe: Probe::default(),
        }
    }

    pub(crate) fn fragment(mut self, data: &'static str, fin: bool) -> Self {
        self.incoming.push_back(Ok((Bytes::from_static(data.as_bytes()), fin)));
        self
    }

    pub(crate) fn error(mut self, err: TransportError) -> Self {
        self.incoming.push_back(Err(err));
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub(crate) fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub(crate) fn probe(&self) -> Probe {
        self.probe.clone()
    }

    async fn chunk(&mut self, buf: &mut BytesMut, max: usize) -> Result<usize, TransportError> {
        let (mut data, fin) = match self.pending.take() {
            Some(pending) => pending,
            None => match self.incoming.pop_front() {
                Some(next) => next?,
                None => std::future::pending().await,
            },
        };

        let chunk = data.split_to(data.len().min(max));
        buf.extend_from_slice(&chunk);
        if data.is_empty() {
            self.complete = fin;
        } else {
            self.complete = false;
            self.pending = Some((data, fin));
        }
        tokio::task::yield_now().await;
        Ok(chunk.len())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read_full(&mut self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        self.probe.begin(Op::ReadFull);
        let mut total = 0;
        let result = loop {
            match self.chunk(buf, usize::MAX).await {
                Ok(n) => total += n,
                Err(e) => break Err(e),
            }
            if self.complete {
                break Ok(total);
            }
        };
        self.probe.end();
        result
    }

    async fn read_partial(
        &mut self,
        buf: &mut BytesMut,
        max: usize,
    ) -> Result<usize, TransportError> {
        self.probe.begin(Op::ReadPartial(max));
        let result = self.chunk(buf, max).await;
        self.probe.end();
        result
    }

    async fn write(&mut self, data: &[u8], fin: bool) -> Result<usize, TransportError> {
        self.probe
            .begin(Op::Write(Bytes::copy_from_slice(data), fin));
        tokio::task::yield_now().await;
        self.probe.end();
        if self.fail_writes {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }
        Ok(data.len())
    }

    async fn close(&mut self, code: CloseCode) -> Result<(), TransportError> {
        self.probe.begin(Op::Close(code));
        self.probe.end();
        if self.fail_close {
            return Err(TransportError::Eof);
        }
        Ok(())
    }

    fn is_message_complete(&self) -> bool {
        self.complete
    }
}

/// Arguments of one callback invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub(crate) buffer: Vec<u8>,
    pub(crate) bytes: usize,
    pub(crate) complete: bool,
}

impl Call {
    pub(crate) fn new(buffer: &str, bytes: usize, complete: bool) -> Self {
        Self {
            buffer: buffer.as_bytes().to_vec(),
            bytes,
            complete,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub(crate) fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Callback replaying a fixed list of decisions, then closing
pub(crate) struct Scripted {
    script: VecDeque<anyhow::Result<Decision>>,
    panic_with: Option<&'static str>,
    calls: CallLog,
}

impl Scripted {
    pub(crate) fn new(script: Vec<anyhow::Result<Decision>>) -> Self {
        Self {
            script: script.into(),
            panic_with: None,
            calls: CallLog::default(),
        }
    }

    pub(crate) fn panicking(message: &'static str) -> Self {
        Self {
            panic_with: Some(message),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl Callback for Scripted {
    fn decide(
        &mut self,
        buffer: &[u8],
        bytes: usize,
        message_complete: bool,
    ) -> anyhow::Result<Decision> {
        self.calls.0.lock().unwrap().push(Call {
            buffer: buffer.to_vec(),
            bytes,
            complete: message_complete,
        });
        if let Some(message) = self.panic_with {
            panic!("{}", message);
        }
        self.script.pop_front().unwrap_or(Ok(Decision::Close))
    }
}

/// Sink remembering `(message, what)` of every report
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    reports: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingSink {
    pub(crate) fn shared(&self) -> Arc<dyn FailureSink> {
        Arc::new(self.clone())
    }

    pub(crate) fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.reports.lock().unwrap().is_empty()
    }
}

impl FailureSink for RecordingSink {
    fn notify(&self, error: &SessionError) {
        self.reports
            .lock()
            .unwrap()
            .push((error.code().message().to_string(), error.what().to_string()));
    }
}
