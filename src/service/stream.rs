//! Exhaustive iteration over repeated forwards.
//!
//! A [`QueryStream`] fetches one batch at a time through
//! [`QueryService::forward`], yields its rows, and moves on to the next batch
//! until a batch comes back empty (or reports nothing further). A failed batch
//! is retried per the configured policy; the failure counter resets after
//! every successful batch.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use super::QueryService;
use crate::error::{ErrorKind, QueryResult};
use crate::querier::QueryParameter;
use crate::value::Row;

/// Pause before a retry, by 1-based attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(interval) => interval,
            Backoff::Exponential { base, max } => {
                let exp = 1u32 << attempt.saturating_sub(1).min(16);
                base.saturating_mul(exp).min(max)
            }
        }
    }
}

type Reviser<'a> = Box<dyn FnMut(&mut QueryParameter, &Row) + 'a>;
type Terminator<'a> = Box<dyn FnMut(&Row) -> bool + 'a>;
type Sleeper<'a> = Box<dyn FnMut(Duration) + 'a>;
type Release<'a> = Box<dyn FnOnce() + 'a>;

/// Single-pass, single-consumer row iterator. Not restartable.
pub struct QueryStream<'a> {
    service: &'a QueryService,
    name: String,
    parameter: QueryParameter,
    buffer: VecDeque<Row>,
    last_batch: bool,
    closed: bool,
    retry_times: u32,
    backoff: Backoff,
    abort_on: HashSet<ErrorKind>,
    failures: u32,
    total_retries: u32,
    batches: u32,
    reviser: Option<Reviser<'a>>,
    terminator: Option<Terminator<'a>>,
    sleeper: Sleeper<'a>,
    release: Option<Release<'a>>,
}

impl<'a> QueryStream<'a> {
    pub(super) fn new(service: &'a QueryService, name: &str, mut parameter: QueryParameter) -> Self {
        let config = &service.config().stream;
        if parameter.limit.is_none() {
            parameter.limit = Some(config.batch_size);
        }
        Self {
            service,
            name: name.to_string(),
            parameter,
            buffer: VecDeque::new(),
            last_batch: false,
            closed: false,
            retry_times: config.retry_times,
            backoff: Backoff::Fixed(Duration::from_millis(config.retry_interval_ms)),
            abort_on: HashSet::new(),
            failures: 0,
            total_retries: 0,
            batches: 0,
            reviser: None,
            terminator: None,
            sleeper: Box::new(std::thread::sleep),
            release: None,
        }
    }

    /// Retries per failed batch; 0 disables retry.
    pub fn retry(mut self, times: u32, backoff: Backoff) -> Self {
        self.retry_times = times;
        self.backoff = backoff;
        self
    }

    /// Fail immediately, without retry, on these error kinds.
    pub fn abort_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.abort_on.extend(kinds);
        self
    }

    /// Revise the parameter for the next batch from the last row seen.
    ///
    /// With a reviser the offset is no longer advanced automatically; the
    /// reviser owns it (keyset paging typically leaves it at 0).
    pub fn revise_with<F>(mut self, reviser: F) -> Self
    where
        F: FnMut(&mut QueryParameter, &Row) + 'a,
    {
        self.reviser = Some(Box::new(reviser));
        self
    }

    /// End the stream at the first row for which `predicate` holds. That row
    /// is not yielded.
    pub fn terminate_when<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&Row) -> bool + 'a,
    {
        self.terminator = Some(Box::new(predicate));
        self
    }

    /// Replace the blocking sleep used between retries.
    pub fn sleep_with<F>(mut self, sleeper: F) -> Self
    where
        F: FnMut(Duration) + 'a,
    {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Run `hook` exactly once when the stream closes or is dropped.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + 'a,
    {
        self.release = Some(Box::new(hook));
        self
    }

    /// Consecutive failures of the current batch.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn total_retries(&self) -> u32 {
        self.total_retries
    }

    pub fn batches(&self) -> u32 {
        self.batches
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffer.clear();
        if let Some(release) = self.release.take() {
            release();
        }
        tracing::debug!(
            "Stream over {} closed after {} batches",
            self.name,
            self.batches
        );
    }

    /// Fetch the next batch into the buffer, retrying per policy.
    fn fill(&mut self) -> QueryResult<()> {
        loop {
            let mut path = vec![self.name.clone()];
            match self
                .service
                .forward_inner(&self.name, self.parameter.clone(), &mut path)
            {
                Ok(forwarding) => {
                    self.failures = 0;
                    self.batches += 1;
                    self.last_batch = !forwarding.has_next;
                    if let Some(last) = forwarding.rows.last() {
                        match self.reviser.as_mut() {
                            Some(reviser) => reviser(&mut self.parameter, last),
                            None => {
                                let offset = self.parameter.offset.unwrap_or(0);
                                self.parameter.offset = Some(offset + forwarding.rows.len());
                            }
                        }
                    }
                    self.buffer.extend(forwarding.rows);
                    return Ok(());
                }
                Err(err) => {
                    let retryable = !self.abort_on.contains(&err.kind());
                    if retryable && self.failures < self.retry_times {
                        self.failures += 1;
                        self.total_retries += 1;
                        let delay = self.backoff.delay(self.failures);
                        tracing::warn!(
                            "Stream batch of {} failed (attempt {}/{}), retrying in {:?}: {}",
                            self.name,
                            self.failures,
                            self.retry_times,
                            delay,
                            err
                        );
                        (self.sleeper)(delay);
                        continue;
                    }
                    tracing::error!("Stream over {} failed: {}", self.name, err);
                    return Err(err);
                }
            }
        }
    }
}

impl Iterator for QueryStream<'_> {
    type Item = QueryResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        if self.buffer.is_empty() {
            if self.last_batch {
                self.close();
                return None;
            }
            if let Err(err) = self.fill() {
                self.close();
                return Some(Err(err));
            }
        }

        let Some(row) = self.buffer.pop_front() else {
            self.close();
            return None;
        };
        if let Some(terminator) = self.terminator.as_mut() {
            if terminator(&row) {
                self.close();
                return None;
            }
        }
        Some(Ok(row))
    }
}

impl Drop for QueryStream<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
