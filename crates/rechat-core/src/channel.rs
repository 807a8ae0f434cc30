//! Per-stream pub/sub channels with replay-then-live subscription.
//!
//! A channel is keyed by the triggering user message id. The producer
//! appends every event to the persistent stream log before fanning it out
//! over an in-process broadcast sender, so a subscriber can always replay
//! the retained prefix and then switch to live delivery. Sequence numbers
//! travel with every broadcast event; the subscriber drops duplicates at
//! the replay/live seam and re-reads the log to fill any gap, which also
//! covers broadcast lag.

use dashmap::DashMap;
use futures::Stream;
use rechat_storage::StreamLogStorage;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::ChunkEvent;

const CHANNEL_BUFFER: usize = 256;

/// A chunk event paired with its position in the channel's log.
#[derive(Debug, Clone)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: ChunkEvent,
}

/// Registry of live stream channels backed by the retained event log.
pub struct ChannelRegistry {
    log: StreamLogStorage,
    senders: DashMap<String, broadcast::Sender<SequencedEvent>>,
}

impl ChannelRegistry {
    pub fn new(log: StreamLogStorage) -> Self {
        Self {
            log,
            senders: DashMap::new(),
        }
    }

    /// Publish an event to a channel.
    ///
    /// Retains the event in the log, then fans it out to live
    /// subscribers. Publishing to a finished channel is a no-op: the
    /// terminal event is final and late duplicate publishes (e.g. from a
    /// retried producer) must not reopen the stream. Returns the assigned
    /// sequence number, or `None` when the publish was dropped.
    pub fn publish(&self, channel_id: &str, event: ChunkEvent) -> Result<Option<u64>> {
        if self.is_finished(channel_id)? {
            warn!(channel_id, "Dropping publish to finished channel");
            return Ok(None);
        }

        let data = serde_json::to_vec(&event)?;
        let seq = self.log.append_raw(channel_id, &data)?;

        let terminal = event.is_terminal();
        if let Some(sender) = self.senders.get(channel_id) {
            // A send error only means no live subscribers right now;
            // they will pick the event up from the log.
            let _ = sender.send(SequencedEvent { seq, event });
        }
        if terminal {
            self.senders.remove(channel_id);
            debug!(channel_id, last_seq = seq, "Channel finished");
        }

        Ok(Some(seq))
    }

    /// Whether the channel has any retained events.
    pub fn exists(&self, channel_id: &str) -> Result<bool> {
        if self.senders.contains_key(channel_id) {
            return Ok(true);
        }
        Ok(self.log.exists(channel_id)?)
    }

    /// Whether the channel's retained log ends in a terminal event.
    pub fn is_finished(&self, channel_id: &str) -> Result<bool> {
        Ok(self
            .last_event(channel_id)?
            .is_some_and(|event| event.is_terminal()))
    }

    /// Concatenated text of all retained text deltas.
    pub fn retained_text(&self, channel_id: &str) -> Result<String> {
        let mut text = String::new();
        for (_, data) in self.log.read_all(channel_id)? {
            if let ChunkEvent::TextDelta { delta } = serde_json::from_slice(&data)? {
                text.push_str(&delta);
            }
        }
        Ok(text)
    }

    /// Number of characters of text already retained for a channel.
    pub fn retained_text_len(&self, channel_id: &str) -> Result<usize> {
        Ok(self.retained_text(channel_id)?.chars().count())
    }

    /// Subscribe to a channel: replay every retained event, then deliver
    /// live events until the terminal one.
    ///
    /// Subscribing to an unknown channel yields a stream that waits for
    /// the first publish; subscribing to a finished channel replays the
    /// full log and ends. The returned stream always ends with `finish`
    /// unless the storage layer errors out.
    pub fn subscribe(&self, channel_id: &str) -> impl Stream<Item = Result<ChunkEvent>> + use<> {
        // Attach to the live feed before reading the log so no event can
        // fall between replay and live delivery. Duplicates across the
        // seam are dropped by sequence number.
        let receiver = self
            .senders
            .entry(channel_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER).0)
            .subscribe();

        let log = self.log.clone();
        let channel_id = channel_id.to_string();

        async_stream::try_stream! {
            let mut receiver = receiver;
            let mut next_seq: u64 = 0;

            for (seq, data) in log.read_all(&channel_id)? {
                let event: ChunkEvent = serde_json::from_slice(&data)?;
                let terminal = event.is_terminal();
                next_seq = seq + 1;
                yield event;
                if terminal {
                    return;
                }
            }

            loop {
                let sequenced = match receiver.recv().await {
                    Ok(sequenced) => sequenced,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(channel_id = %channel_id, skipped, "Subscriber lagged, refilling from log");
                        for (seq, data) in log.read_from(&channel_id, next_seq)? {
                            let event: ChunkEvent = serde_json::from_slice(&data)?;
                            let terminal = event.is_terminal();
                            next_seq = seq + 1;
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        // Producer finished (or registry dropped the
                        // sender); whatever we missed is in the log.
                        for (seq, data) in log.read_from(&channel_id, next_seq)? {
                            let event: ChunkEvent = serde_json::from_slice(&data)?;
                            let terminal = event.is_terminal();
                            next_seq = seq + 1;
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                        return;
                    }
                };

                if sequenced.seq < next_seq {
                    continue;
                }
                if sequenced.seq > next_seq {
                    for (seq, data) in log.read_from(&channel_id, next_seq)? {
                        if seq >= sequenced.seq {
                            break;
                        }
                        let event: ChunkEvent = serde_json::from_slice(&data)?;
                        let terminal = event.is_terminal();
                        next_seq = seq + 1;
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                }

                let terminal = sequenced.event.is_terminal();
                next_seq = sequenced.seq + 1;
                yield sequenced.event;
                if terminal {
                    return;
                }
            }
        }
    }

    fn last_event(&self, channel_id: &str) -> Result<Option<ChunkEvent>> {
        let len = self.log.len(channel_id)?;
        if len == 0 {
            return Ok(None);
        }
        let mut events = self.log.read_from(channel_id, len - 1)?;
        match events.pop() {
            Some((_, data)) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }
}
