// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use dd_tracing::{dd_debug, dd_error, Config, Error, Result};
use dd_tracing_sampling::{AgentRatesResponse, ServiceRates};

use crate::{
    agent::{request_headers, AgentUrl, HttpClient, TRACES_ENDPOINT},
    msgpack,
    span::SpanData,
};

/// Receives complete traces from finishing segments. Implementations must
/// never block the caller on I/O.
pub trait Collector: Send + Sync {
    fn send(&self, trace: Vec<SpanData>);
}

/// Serializes one trace (an array of spans) into its v0.4 wire form.
pub(crate) fn serialize_trace(spans: &[SpanData]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    msgpack::pack_array(&mut buffer, spans.len())?;
    for span in spans {
        serialize_span(&mut buffer, span)?;
    }
    Ok(buffer)
}

fn serialize_span(buffer: &mut Vec<u8>, span: &SpanData) -> Result<()> {
    let has_type = !span.service_type.is_empty();
    msgpack::pack_map(buffer, 11 + has_type as usize)?;

    msgpack::pack_str(buffer, "service")?;
    msgpack::pack_str(buffer, &span.service)?;

    msgpack::pack_str(buffer, "name")?;
    msgpack::pack_str(buffer, &span.name)?;

    msgpack::pack_str(buffer, "resource")?;
    msgpack::pack_str(buffer, &span.resource)?;

    msgpack::pack_str(buffer, "trace_id")?;
    msgpack::pack_unsigned(buffer, span.trace_id);

    msgpack::pack_str(buffer, "span_id")?;
    msgpack::pack_unsigned(buffer, span.span_id);

    msgpack::pack_str(buffer, "parent_id")?;
    msgpack::pack_unsigned(buffer, span.parent_id);

    msgpack::pack_str(buffer, "start")?;
    let start_ns = span
        .start
        .wall
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    msgpack::pack_integer(buffer, start_ns);

    msgpack::pack_str(buffer, "duration")?;
    msgpack::pack_integer(buffer, span.duration.unwrap_or_default().as_nanos() as i64);

    msgpack::pack_str(buffer, "error")?;
    msgpack::pack_integer(buffer, span.error as i64);

    msgpack::pack_str(buffer, "meta")?;
    msgpack::pack_map(buffer, span.tags.len())?;
    for (key, value) in &span.tags {
        msgpack::pack_str(buffer, key)?;
        msgpack::pack_str(buffer, value)?;
    }

    msgpack::pack_str(buffer, "metrics")?;
    msgpack::pack_map(buffer, span.numeric_tags.len())?;
    for (key, value) in &span.numeric_tags {
        msgpack::pack_str(buffer, key)?;
        msgpack::pack_double(buffer, *value);
    }

    if has_type {
        msgpack::pack_str(buffer, "type")?;
        msgpack::pack_str(buffer, &span.service_type)?;
    }

    Ok(())
}

/// Wraps the per-trace chunks into the outer traces array.
fn assemble_payload(chunks: &[Vec<u8>]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(5 + chunks.iter().map(Vec::len).sum::<usize>());
    msgpack::pack_array(&mut payload, chunks.len())?;
    for chunk in chunks {
        payload.extend_from_slice(chunk);
    }
    Ok(payload)
}

struct MutexPoisonedError;

#[derive(Debug, PartialEq, Eq)]
enum SenderError {
    AlreadyShutdown,
    TimedOut,
    MutexPoisoned,
}

enum WorkerMessage {
    Traces,
    Flush,
    Timeout,
    Shutdown,
}

struct SharedState {
    flush_needed: bool,
    shutdown_needed: bool,
    has_shutdown: bool,
    /// Bounded queue of complete traces; the oldest is evicted on overflow
    traces: VecDeque<Vec<SpanData>>,
    dropped_traces: u64,
}

struct Waiter {
    state: Mutex<SharedState>,
    notifier: Condvar,
}

fn channel(max_queued_traces: usize) -> (Sender, Receiver) {
    let waiter = Arc::new(Waiter {
        state: Mutex::new(SharedState {
            flush_needed: false,
            shutdown_needed: false,
            has_shutdown: false,
            traces: VecDeque::new(),
            dropped_traces: 0,
        }),
        notifier: Condvar::new(),
    });
    (
        Sender {
            waiter: waiter.clone(),
            max_queued_traces,
        },
        Receiver { waiter },
    )
}

struct Sender {
    waiter: Arc<Waiter>,
    max_queued_traces: usize,
}

impl Sender {
    fn get_state(&self) -> std::result::Result<MutexGuard<'_, SharedState>, SenderError> {
        self.waiter
            .state
            .lock()
            .map_err(|_| SenderError::MutexPoisoned)
    }

    fn get_running_state(&self) -> std::result::Result<MutexGuard<'_, SharedState>, SenderError> {
        let state = self.get_state()?;
        if state.has_shutdown {
            return Err(SenderError::AlreadyShutdown);
        }
        Ok(state)
    }

    fn add_trace(&self, trace: Vec<SpanData>) -> std::result::Result<u64, SenderError> {
        let mut state = self.get_running_state()?;
        if state.traces.len() >= self.max_queued_traces {
            // Tracing never flow-controls the business path: shed the oldest
            state.traces.pop_front();
            state.dropped_traces += 1;
        }
        state.traces.push_back(trace);
        let dropped = state.dropped_traces;
        self.waiter.notifier.notify_all();
        Ok(dropped)
    }

    fn trigger_flush(&self) -> std::result::Result<(), SenderError> {
        let mut state = self.get_running_state()?;
        state.flush_needed = true;
        self.waiter.notifier.notify_all();
        Ok(())
    }

    fn trigger_shutdown(&self) -> std::result::Result<(), SenderError> {
        let mut state = self.get_running_state()?;
        state.shutdown_needed = true;
        self.waiter.notifier.notify_all();
        Ok(())
    }

    fn wait_shutdown_done(&self, timeout: Duration) -> std::result::Result<(), SenderError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.get_state()?;
        while !state.has_shutdown {
            let leftover = deadline.saturating_duration_since(Instant::now());
            if leftover.is_zero() {
                return Err(SenderError::TimedOut);
            }
            let res;
            (state, res) = self
                .waiter
                .notifier
                .wait_timeout(state, leftover)
                .map_err(|_| SenderError::MutexPoisoned)?;
            if res.timed_out() && !state.has_shutdown {
                return Err(SenderError::TimedOut);
            }
        }
        Ok(())
    }

    fn dropped_traces(&self) -> u64 {
        self.get_state().map(|state| state.dropped_traces).unwrap_or(0)
    }
}

struct Receiver {
    waiter: Arc<Waiter>,
}

impl Drop for Receiver {
    fn drop(&mut self) {
        let _ = self.shutdown_done();
    }
}

impl Receiver {
    fn shutdown_done(&self) -> std::result::Result<(), MutexPoisonedError> {
        let mut state = self.waiter.state.lock().map_err(|_| MutexPoisonedError)?;
        state.has_shutdown = true;
        self.waiter.notifier.notify_all();
        Ok(())
    }

    fn receive(
        &self,
        timeout: Duration,
    ) -> std::result::Result<(WorkerMessage, Vec<Vec<SpanData>>), MutexPoisonedError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.waiter.state.lock().map_err(|_| MutexPoisonedError)?;
        loop {
            if state.shutdown_needed {
                return Ok((WorkerMessage::Shutdown, state.traces.drain(..).collect()));
            }
            if state.flush_needed {
                state.flush_needed = false;
                return Ok((WorkerMessage::Flush, state.traces.drain(..).collect()));
            }
            if !state.traces.is_empty() {
                return Ok((WorkerMessage::Traces, state.traces.drain(..).collect()));
            }

            let leftover = deadline.saturating_duration_since(Instant::now());
            if leftover.is_zero() {
                return Ok((WorkerMessage::Timeout, Vec::new()));
            }
            let timeout_result;
            (state, timeout_result) = self
                .waiter
                .notifier
                .wait_timeout(state, leftover)
                .map_err(|_| MutexPoisonedError)?;
            if timeout_result.timed_out() {
                return Ok((WorkerMessage::Timeout, state.traces.drain(..).collect()));
            }
        }
    }
}

/// The production collector: one background worker that serializes batches
/// and delivers them to the agent, refreshing the sampler's agent rates from
/// each response.
///
/// Batches are flushed when the serialized payload reaches the configured
/// byte budget, when the flush interval elapses, and on shutdown. Delivery
/// failures drop the batch; there is no retry queue.
pub struct AgentCollector {
    tx: Sender,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl AgentCollector {
    pub fn new(
        config: Arc<Config>,
        http_client: Arc<dyn HttpClient>,
        service_rates: ServiceRates,
    ) -> Result<Self> {
        let url = AgentUrl::parse(config.agent_url())?;
        let (tx, rx) = channel(config.max_queued_traces());
        let shutdown_timeout = config.shutdown_timeout();

        let worker = CollectorWorker {
            config,
            url,
            http_client,
            service_rates,
            rx,
        };
        let handle = thread::spawn(move || worker.run());

        Ok(AgentCollector {
            tx,
            worker: Mutex::new(Some(handle)),
            shutdown_timeout,
        })
    }

    /// Asks the worker to flush whatever it has buffered.
    pub fn force_flush(&self) {
        if let Err(e) = self.tx.trigger_flush() {
            dd_debug!("AgentCollector.force_flush: {e:?}");
        }
    }

    /// Number of traces shed because the outbound queue was full.
    pub fn dropped_traces(&self) -> u64 {
        self.tx.dropped_traces()
    }

    /// Flushes the queue and stops the worker, waiting up to the configured
    /// shutdown timeout.
    pub fn shutdown(&self) -> Result<()> {
        match self.tx.trigger_shutdown() {
            Ok(()) | Err(SenderError::AlreadyShutdown) => {}
            Err(e) => {
                dd_debug!("AgentCollector.shutdown: failed to trigger shutdown: {e:?}");
            }
        }

        match self.tx.wait_shutdown_done(self.shutdown_timeout) {
            Ok(()) | Err(SenderError::AlreadyShutdown) => {}
            Err(SenderError::TimedOut) => {
                let error = Error::ShutdownTimeout(self.shutdown_timeout);
                dd_error!("{error}");
                return Err(error);
            }
            Err(SenderError::MutexPoisoned) => {}
        }

        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    dd_error!("AgentCollector.shutdown: worker panicked");
                }
            }
        }
        Ok(())
    }
}

impl Collector for AgentCollector {
    fn send(&self, trace: Vec<SpanData>) {
        match self.tx.add_trace(trace) {
            Ok(_) => {}
            Err(e) => {
                dd_debug!("AgentCollector.send: trace dropped: {e:?}");
            }
        }
    }
}

impl Drop for AgentCollector {
    fn drop(&mut self) {
        let _ = self.tx.trigger_shutdown();
    }
}

struct CollectorWorker {
    config: Arc<Config>,
    url: AgentUrl,
    http_client: Arc<dyn HttpClient>,
    service_rates: ServiceRates,
    rx: Receiver,
}

impl CollectorWorker {
    fn run(self) {
        let mut pending: Vec<Vec<u8>> = Vec::new();
        let mut pending_bytes = 0usize;
        let mut last_flush = Instant::now();

        loop {
            let timeout = self
                .config
                .flush_interval()
                .saturating_sub(last_flush.elapsed());
            let Ok((message, traces)) = self.rx.receive(timeout) else {
                break;
            };

            for trace in traces {
                match serialize_trace(&trace) {
                    Ok(chunk) => {
                        pending_bytes += chunk.len();
                        pending.push(chunk);
                    }
                    // Surfaced synchronously: an overflowing trace is a
                    // programming error, not a transport problem
                    Err(e) => dd_error!("Collector: dropping unserializable trace: {e}"),
                }
            }

            let shutdown = matches!(message, WorkerMessage::Shutdown);
            let flush_due = shutdown
                || matches!(message, WorkerMessage::Flush | WorkerMessage::Timeout)
                || pending_bytes >= self.config.flush_byte_budget()
                || last_flush.elapsed() >= self.config.flush_interval();

            if flush_due {
                self.flush(std::mem::take(&mut pending));
                pending_bytes = 0;
                last_flush = Instant::now();
            }

            if shutdown {
                break;
            }
        }

        let _ = self.rx.shutdown_done();
    }

    /// Delivers one payload. Logs at most once per flush cycle.
    fn flush(&self, chunks: Vec<Vec<u8>>) {
        if chunks.is_empty() {
            return;
        }

        let payload = match assemble_payload(&chunks) {
            Ok(payload) => payload,
            Err(e) => {
                dd_error!("Collector: dropping batch that failed to assemble: {e}");
                return;
            }
        };

        let headers = request_headers(chunks.len(), self.config.container_id());

        match self
            .http_client
            .put(&self.url, TRACES_ENDPOINT, &headers, &payload)
        {
            Ok(response) if (200..300).contains(&response.status) => {
                self.handle_agent_response(&response.body);
            }
            Ok(response) => {
                dd_error!(
                    "{}",
                    Error::AgentHttpStatus {
                        status: response.status,
                        body: response.body,
                    }
                );
            }
            Err(e) => {
                dd_error!("{e}");
            }
        }
    }

    fn handle_agent_response(&self, body: &str) {
        match serde_json::from_str::<AgentRatesResponse>(body) {
            Ok(AgentRatesResponse {
                rate_by_service: Some(rates),
            }) => {
                self.service_rates.update_rates(rates);
            }
            Ok(_) => {}
            Err(e) => {
                dd_debug!("{}", Error::AgentResponseMalformed(e.to_string()));
            }
        }
    }
}
