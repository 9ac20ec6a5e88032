//! Tail a stack's event history into a channel
//!
//! The history API returns events newest first in pages. Each tick walks the
//! pages from the top until it reaches the last event already forwarded (the
//! watermark), then forwards what it collected oldest first.
//!
//! Until the first event of our own request shows up, the walk also stops at
//! any event that does not carry the bundle's client request token, so older
//! operations by other callers stay hidden. After that the filter is dropped,
//! which lets cancels and rollbacks issued by anyone come through.
//!
//! [`EventStreamer::finish`] asks for one last fetch before the stream ends,
//! so events written just before a stack settled are still delivered.

use stackctl_common::{Aimd, AimdConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::aws::{AwsError, ClientBundle, CloudFormationOperations};
use crate::error::EngineError;
use crate::model::StackEvent;
use crate::wait::{cancellable, sleep_or_cancel};

/// Stops an [`EventStreamer`] from another task
#[derive(Debug, Clone)]
pub struct StreamerHandle {
    stop: CancellationToken,
    finish: CancellationToken,
}

impl StreamerHandle {
    /// Stop the stream. Calling this more than once has no further effect.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// End the stream after one final fetch
    pub fn finish(&self) {
        self.finish.cancel();
    }
}

#[derive(Debug)]
pub struct EventStreamer {
    config: AimdConfig,
    stop: CancellationToken,
    finish: CancellationToken,
}

impl Default for EventStreamer {
    fn default() -> Self {
        Self::new(AimdConfig::default())
    }
}

impl EventStreamer {
    pub fn new(config: AimdConfig) -> Self {
        Self {
            config,
            stop: CancellationToken::new(),
            finish: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> StreamerHandle {
        StreamerHandle {
            stop: self.stop.clone(),
            finish: self.finish.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// End the stream after one more fetch, without waiting for the next tick
    pub fn finish(&self) {
        self.finish.cancel();
    }

    /// Forward new events of `stack_id` into `sink`.
    ///
    /// Runs until stopped, finished, cancelled or the receiver is dropped;
    /// all of these end the stream with `Ok`. Throttled fetches slow the stream down and
    /// are retried. Any other fetch error ends it with an error.
    pub async fn stream(
        &self,
        bundle: &ClientBundle,
        stack_id: &str,
        sink: mpsc::Sender<StackEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let result = tokio::select! {
            biased;
            _ = self.stop.cancelled() => Ok(()),
            result = self.run(bundle, stack_id, &sink, cancel) => result,
        };
        match result {
            Err(e) if e.is_cancelled() => {
                debug!(stack = %stack_id, "Event stream cancelled");
                Ok(())
            }
            other => other,
        }
    }

    async fn run(
        &self,
        bundle: &ClientBundle,
        stack_id: &str,
        sink: &mpsc::Sender<StackEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let cf = bundle.cloudformation();
        let mut backoff = Aimd::new(self.config);
        let mut watermark: Option<String> = None;
        let mut token_filter = Some(bundle.token().to_string());

        loop {
            let last = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = self.finish.cancelled() => true,
                _ = tokio::time::sleep(backoff.current()) => false,
            };

            let fetched = cancellable(
                cancel,
                fetch_new_events(
                    cf.as_ref(),
                    stack_id,
                    watermark.as_deref(),
                    token_filter.as_deref(),
                ),
            )
            .await?;
            let fresh = match fetched {
                Ok(fresh) => {
                    backoff.on_success();
                    fresh
                }
                Err(e) if e.is_throttled() => {
                    backoff.on_error();
                    debug!(
                        stack = %stack_id,
                        interval = ?backoff.current(),
                        "Event fetch throttled, slowing down"
                    );
                    if last {
                        sleep_or_cancel(backoff.current(), cancel).await?;
                    }
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::remote(
                        format!("unable to fetch events for stack {stack_id}"),
                        e,
                    ));
                }
            };

            trace!(stack = %stack_id, count = fresh.len(), "Fetched stack events");
            for event in fresh {
                watermark = Some(event.event_id.clone());
                token_filter = None;
                if cancellable(cancel, sink.send(event)).await?.is_err() {
                    debug!(stack = %stack_id, "Event receiver dropped");
                    return Ok(());
                }
            }
            if last {
                debug!(stack = %stack_id, "Event stream finished");
                return Ok(());
            }
        }
    }
}

/// Walk the newest-first history page by page and return the new events,
/// oldest first
async fn fetch_new_events(
    cf: &dyn CloudFormationOperations,
    stack_id: &str,
    watermark: Option<&str>,
    token_filter: Option<&str>,
) -> Result<Vec<StackEvent>, AwsError> {
    let mut fresh = Vec::new();
    let mut next_token = None;
    loop {
        let page = cf.describe_stack_events(stack_id, next_token.take()).await?;
        if scan_page(page.events, watermark, token_filter, &mut fresh) {
            break;
        }
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }
    fresh.reverse();
    Ok(fresh)
}

/// Append the page's new events to `fresh`. Returns true once the walk
/// reached the watermark or an event filtered out by token.
fn scan_page(
    events: Vec<StackEvent>,
    watermark: Option<&str>,
    token_filter: Option<&str>,
    fresh: &mut Vec<StackEvent>,
) -> bool {
    for event in events {
        if watermark == Some(event.event_id.as_str()) {
            return true;
        }
        if token_filter.is_some() && event.client_request_token.as_deref() != token_filter {
            return true;
        }
        fresh.push(event);
    }
    false
}

/// The events newer than `watermark` in a newest-first sequence of pages,
/// returned oldest first
pub fn collect_new_events<I>(
    pages: I,
    watermark: Option<&str>,
    token_filter: Option<&str>,
) -> Vec<StackEvent>
where
    I: IntoIterator<Item = Vec<StackEvent>>,
{
    let mut fresh = Vec::new();
    for page in pages {
        if scan_page(page, watermark, token_filter, &mut fresh) {
            break;
        }
    }
    fresh.reverse();
    fresh
}
