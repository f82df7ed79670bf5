//! The event hub: the single point every event passes through on its
//! way from producers (the validator, the state monitor, the ingestor) to
//! subscribers (the server's SSE routes). Each subscriber gets its own
//! bounded queue so one slow reader can never stall another; when a
//! subscriber's queue is full the incoming event is dropped for *that*
//! subscriber only, and publishing carries on for everyone else.
//!
//! A single `tokio::sync::broadcast` channel would drop the same events
//! for every subscriber; per-subscriber bounded `tokio::sync::mpsc`
//! queues keep one reader's backpressure from costing anyone else.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use agentctl_core::{DaemonConfig, Event, EngineError, RunId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct RunChannel {
    subscribers: Vec<mpsc::Sender<Event>>,
    replay: VecDeque<Event>,
    next_seq: u64,
}

impl RunChannel {
    fn new() -> Self {
        Self { subscribers: Vec::new(), replay: VecDeque::new(), next_seq: 0 }
    }
}

/// Publishes events for every run and lets subscribers replay history then
/// follow the live stream. One hub instance is shared by the whole daemon.
pub struct EventHub {
    runs: Mutex<HashMap<RunId, RunChannel>>,
    stream_buffer_size: usize,
    max_clients_per_run: usize,
    replay_buffer_size: usize,
}

impl EventHub {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            stream_buffer_size: config.stream_buffer_size,
            max_clients_per_run: config.max_clients_per_run,
            replay_buffer_size: config.replay_buffer_size,
        }
    }

    /// Assigns the next sequence number for `event.run_id`, appends it to
    /// that run's replay buffer (evicting the oldest entry once the buffer
    /// is full), and fans it out to every live subscriber. Returns the
    /// event with its assigned `sequence_num` set.
    pub fn publish(&self, mut event: Event) -> Event {
        let mut runs = self.runs.lock().unwrap();
        let channel = runs.entry(event.run_id.clone()).or_insert_with(RunChannel::new);

        let seq = channel.next_seq;
        channel.next_seq += 1;
        event.sequence_num = Some(seq);

        if channel.replay.len() >= self.replay_buffer_size {
            channel.replay.pop_front();
        }
        channel.replay.push_back(event.clone());

        channel.subscribers.retain_mut(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(run_id = %event.run_id, "subscriber queue full, dropping event for this subscriber");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        event
    }

    /// Subscribes to `run_id`: the returned receiver first yields a
    /// synthetic `connected` event, then every buffered event still held in
    /// the replay window, then live events as they're published.
    pub fn subscribe(&self, run_id: RunId) -> Result<mpsc::Receiver<Event>, EngineError> {
        let mut runs = self.runs.lock().unwrap();
        let channel = runs.entry(run_id.clone()).or_insert_with(RunChannel::new);

        if channel.subscribers.len() >= self.max_clients_per_run {
            return Err(EngineError::Overload(format!(
                "run {run_id} already has {} subscribers",
                channel.subscribers.len()
            )));
        }

        let (tx, rx) = mpsc::channel(self.stream_buffer_size.max(1));

        let _ = tx.try_send(Event::connected(run_id.clone()));
        for buffered in &channel.replay {
            if tx.try_send(buffered.clone()).is_err() {
                warn!(run_id = %run_id, "replay overflowed a fresh subscriber's queue");
                break;
            }
        }

        channel.subscribers.push(tx);
        debug!(run_id = %run_id, subscriber_count = channel.subscribers.len(), "subscribed to run");
        Ok(rx)
    }

    /// Drops bookkeeping for a finished run. Safe to call even if
    /// subscribers are still attached; they keep their already-delivered
    /// queue but won't receive further events.
    pub fn cleanup(&self, run_id: &RunId) {
        self.runs.lock().unwrap().remove(run_id);
    }

    #[cfg(test)]
    fn subscriber_count(&self, run_id: &RunId) -> usize {
        self.runs.lock().unwrap().get(run_id).map(|c| c.subscribers.len()).unwrap_or(0)
    }
}
