//! Timestep assembler: gathers resampled channels per nominal timestamp.
//!
//! The arena holds one slot per timestamp, created up front from the catalog.
//! Each slot sits behind its own lock, so arrivals for different timestamps
//! never contend and arrivals for the same timestamp only serialize on the
//! slot mutation.
//!
//! ```text
//! Awaiting ──(complete | subset policy)──► HandedOff
//!    │  ▲
//!    │  └──(late arrival, reopen policy)──┐
//!    └──(insufficient | timeout | deadline)──► Dropped
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sat_common::{ResampledChannelFrame, TimestepFrame};
use tracing::{debug, info, warn};

use crate::config::{ConversionConfig, LateArrivalPolicy};

/// Completeness rules for handing a timestep to the writer.
#[derive(Debug, Clone)]
pub struct AssemblerPolicy {
    /// Required channels in record order.
    pub required: Vec<String>,
    /// Channels needed for a partial record; equal to `required.len()` when
    /// partial records are not allowed.
    pub min_channels: usize,
    /// How long to wait for the remaining channels once `min_channels` is met.
    pub subset_wait: Duration,
    /// How long a timestep may sit below `min_channels` after its first
    /// arrival before it is dropped with channels still outstanding.
    pub assembly_timeout: Option<Duration>,
    pub late_arrival: LateArrivalPolicy,
}

impl AssemblerPolicy {
    pub fn from_config(required: Vec<String>, config: &ConversionConfig) -> Self {
        let min_channels = config
            .subset
            .min_channels
            .unwrap_or(required.len())
            .clamp(1, required.len().max(1));
        Self {
            required,
            min_channels,
            subset_wait: Duration::from_secs(config.subset.wait_secs),
            assembly_timeout: config.assembly_timeout(),
            late_arrival: config.late_arrival,
        }
    }
}

#[derive(Debug)]
enum SlotState {
    Awaiting {
        received: BTreeMap<String, ResampledChannelFrame>,
        failed: BTreeSet<String>,
        first_arrival: Option<Instant>,
        subset_met_at: Option<Instant>,
    },
    HandedOff {
        channels: Vec<String>,
        missing: Vec<String>,
    },
    Dropped {
        reason: String,
        received: BTreeMap<String, ResampledChannelFrame>,
        failed: BTreeSet<String>,
    },
}

impl SlotState {
    fn awaiting() -> Self {
        Self::Awaiting {
            received: BTreeMap::new(),
            failed: BTreeSet::new(),
            first_arrival: None,
            subset_met_at: None,
        }
    }
}

/// Read-only view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotSummary {
    Awaiting {
        received: Vec<String>,
        failed: Vec<String>,
    },
    HandedOff {
        channels: Vec<String>,
        missing: Vec<String>,
    },
    Dropped {
        reason: String,
    },
}

/// What an arrival, failure or sweep did to a slot.
#[derive(Debug)]
pub enum AssemblyEvent {
    /// Still waiting for channels.
    Pending { timestamp: DateTime<Utc> },
    /// The timestep is complete (or the subset policy allows it) and must be
    /// written.
    Ready(TimestepFrame),
    /// The timestep can no longer be assembled.
    Dropped {
        timestamp: DateTime<Utc>,
        reason: String,
    },
    /// The arrival was not used.
    Discarded {
        timestamp: DateTime<Utc>,
        channel: String,
        reason: String,
    },
}

/// Arena of per-timestamp accumulators.
pub struct TimestepAssembler {
    policy: AssemblerPolicy,
    slots: BTreeMap<DateTime<Utc>, Mutex<SlotState>>,
    closed: AtomicBool,
}

impl TimestepAssembler {
    pub fn new(timestamps: impl IntoIterator<Item = DateTime<Utc>>, policy: AssemblerPolicy) -> Self {
        let slots = timestamps
            .into_iter()
            .map(|ts| (ts, Mutex::new(SlotState::awaiting())))
            .collect();
        Self {
            policy,
            slots,
            closed: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &AssemblerPolicy {
        &self.policy
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.slots.keys().copied()
    }

    /// Hand a resampled channel to its timestamp's slot.
    pub fn deliver(&self, frame: ResampledChannelFrame, now: Instant) -> AssemblyEvent {
        let timestamp = frame.timestamp();
        let channel = frame.channel().to_string();

        let Some(slot) = self.slots.get(&timestamp) else {
            return discarded(timestamp, channel, "timestamp is not part of this run");
        };
        if !self.policy.required.contains(&channel) {
            return discarded(timestamp, channel, "channel is not required");
        }

        let mut state = lock(slot);
        match &mut *state {
            SlotState::Awaiting {
                received,
                failed,
                first_arrival,
                ..
            } => {
                if received.contains_key(&channel) {
                    warn!(%timestamp, %channel, "Duplicate channel arrival discarded");
                    return discarded(timestamp, channel, "duplicate arrival");
                }
                failed.remove(&channel);
                first_arrival.get_or_insert(now);
                received.insert(channel, frame);
            }
            SlotState::HandedOff { .. } => {
                warn!(%timestamp, %channel, "Channel arrived after hand-off, discarded");
                return discarded(timestamp, channel, "timestep already handed off");
            }
            SlotState::Dropped {
                reason,
                received,
                failed,
            } => {
                if self.policy.late_arrival == LateArrivalPolicy::Discard
                    || self.closed.load(Ordering::SeqCst)
                {
                    warn!(%timestamp, %channel, dropped = %reason, "Channel arrived after drop, discarded");
                    let reason = format!("timestep dropped: {}", reason);
                    return discarded(timestamp, channel, &reason);
                }

                info!(%timestamp, %channel, "Late channel reopens dropped timestep");
                let mut received = std::mem::take(received);
                let mut failed = std::mem::take(failed);
                failed.remove(&channel);
                received.insert(channel, frame);
                *state = SlotState::Awaiting {
                    received,
                    failed,
                    first_arrival: Some(now),
                    subset_met_at: None,
                };
            }
        }

        self.evaluate(timestamp, &mut state, now)
    }

    /// Record that a channel will not arrive (acquisition, decode or
    /// coverage failure).
    pub fn fail(&self, timestamp: DateTime<Utc>, channel: &str, now: Instant) -> AssemblyEvent {
        let Some(slot) = self.slots.get(&timestamp) else {
            return discarded(timestamp, channel.to_string(), "timestamp is not part of this run");
        };

        let mut state = lock(slot);
        match &mut *state {
            SlotState::Awaiting { received, failed, .. } => {
                if !received.contains_key(channel) {
                    failed.insert(channel.to_string());
                }
            }
            SlotState::Dropped { failed, .. } => {
                failed.insert(channel.to_string());
                return AssemblyEvent::Pending { timestamp };
            }
            SlotState::HandedOff { .. } => return AssemblyEvent::Pending { timestamp },
        }

        self.evaluate(timestamp, &mut state, now)
    }

    /// Promote slots whose subset wait has elapsed and drop slots whose
    /// assembly timeout has elapsed. Returns only `Ready` and `Dropped`
    /// events.
    pub fn poll_expired(&self, now: Instant) -> Vec<AssemblyEvent> {
        let mut events = Vec::new();
        for (timestamp, slot) in &self.slots {
            let mut state = lock(slot);
            if matches!(*state, SlotState::Awaiting { .. }) {
                match self.evaluate(*timestamp, &mut state, now) {
                    AssemblyEvent::Pending { .. } => {}
                    event => events.push(event),
                }
            }
        }
        events
    }

    /// Drop every slot still awaiting (run deadline). No slot reopens
    /// afterwards.
    pub fn expire_all(&self, reason: &str) -> Vec<AssemblyEvent> {
        self.closed.store(true, Ordering::SeqCst);

        let mut events = Vec::new();
        for (timestamp, slot) in &self.slots {
            let mut state = lock(slot);
            if let SlotState::Awaiting { received, failed, .. } = &mut *state {
                let received = std::mem::take(received);
                let failed = std::mem::take(failed);
                info!(%timestamp, received = received.len(), reason, "Dropping unresolved timestep");
                *state = SlotState::Dropped {
                    reason: reason.to_string(),
                    received,
                    failed,
                };
                events.push(AssemblyEvent::Dropped {
                    timestamp: *timestamp,
                    reason: reason.to_string(),
                });
            }
        }
        events
    }

    /// Resolve stragglers at the end of a run: slots that meet the subset
    /// policy are handed off, the rest are dropped.
    pub fn finish(&self) -> Vec<AssemblyEvent> {
        self.closed.store(true, Ordering::SeqCst);

        let mut events = Vec::new();
        for (timestamp, slot) in &self.slots {
            let mut state = lock(slot);
            let SlotState::Awaiting { received, .. } = &*state else {
                continue;
            };
            if received.len() >= self.policy.min_channels {
                events.push(self.hand_off(*timestamp, &mut state));
            } else {
                events.push(self.drop_slot(*timestamp, &mut state, "channels unresolved at run end"));
            }
        }
        events
    }

    pub fn summary(&self, timestamp: DateTime<Utc>) -> Option<SlotSummary> {
        let state = lock(self.slots.get(&timestamp)?);
        Some(match &*state {
            SlotState::Awaiting { received, failed, .. } => SlotSummary::Awaiting {
                received: received.keys().cloned().collect(),
                failed: failed.iter().cloned().collect(),
            },
            SlotState::HandedOff { channels, missing } => SlotSummary::HandedOff {
                channels: channels.clone(),
                missing: missing.clone(),
            },
            SlotState::Dropped { reason, .. } => SlotSummary::Dropped {
                reason: reason.clone(),
            },
        })
    }

    /// Number of slots still awaiting channels.
    pub fn pending(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(*lock(slot), SlotState::Awaiting { .. }))
            .count()
    }

    fn evaluate(
        &self,
        timestamp: DateTime<Utc>,
        state: &mut MutexGuard<'_, SlotState>,
        now: Instant,
    ) -> AssemblyEvent {
        let SlotState::Awaiting {
            received,
            failed,
            first_arrival,
            subset_met_at,
        } = &mut **state
        else {
            return AssemblyEvent::Pending { timestamp };
        };

        let required = self.policy.required.len();
        let got = received.len();
        let resolved = got + failed.len();

        if got >= required {
            return self.hand_off(timestamp, state);
        }

        if got >= self.policy.min_channels {
            let met_at = *subset_met_at.get_or_insert(now);
            if resolved >= required || now.saturating_duration_since(met_at) >= self.policy.subset_wait {
                return self.hand_off(timestamp, state);
            }
            return AssemblyEvent::Pending { timestamp };
        }

        if resolved >= required {
            let reason = format!(
                "insufficient channels: {} of {} required arrived, {} needed",
                got, required, self.policy.min_channels
            );
            return self.drop_slot(timestamp, state, &reason);
        }

        if let (Some(timeout), Some(first)) = (self.policy.assembly_timeout, *first_arrival) {
            if now.saturating_duration_since(first) >= timeout {
                let reason = format!(
                    "assembly timeout: {} of {} required arrived after {} ms",
                    got,
                    required,
                    timeout.as_millis()
                );
                return self.drop_slot(timestamp, state, &reason);
            }
        }

        AssemblyEvent::Pending { timestamp }
    }

    fn hand_off(
        &self,
        timestamp: DateTime<Utc>,
        state: &mut MutexGuard<'_, SlotState>,
    ) -> AssemblyEvent {
        let received = match &mut **state {
            SlotState::Awaiting { received, .. } => std::mem::take(received),
            _ => return AssemblyEvent::Pending { timestamp },
        };

        let missing: Vec<String> = self
            .policy
            .required
            .iter()
            .filter(|c| !received.contains_key(*c))
            .cloned()
            .collect();
        let channels: Vec<String> = received.keys().cloned().collect();

        debug!(%timestamp, channels = channels.len(), missing = missing.len(), "Timestep ready");
        **state = SlotState::HandedOff {
            channels,
            missing: missing.clone(),
        };

        AssemblyEvent::Ready(TimestepFrame::new(timestamp, received, missing))
    }

    fn drop_slot(
        &self,
        timestamp: DateTime<Utc>,
        state: &mut MutexGuard<'_, SlotState>,
        reason: &str,
    ) -> AssemblyEvent {
        let (received, failed) = match &mut **state {
            SlotState::Awaiting { received, failed, .. } => {
                (std::mem::take(received), std::mem::take(failed))
            }
            _ => return AssemblyEvent::Pending { timestamp },
        };

        info!(%timestamp, reason, "Timestep dropped");
        **state = SlotState::Dropped {
            reason: reason.to_string(),
            received,
            failed,
        };

        AssemblyEvent::Dropped {
            timestamp,
            reason: reason.to_string(),
        }
    }
}

fn lock(slot: &Mutex<SlotState>) -> MutexGuard<'_, SlotState> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn discarded(timestamp: DateTime<Utc>, channel: String, reason: &str) -> AssemblyEvent {
    AssemblyEvent::Discarded {
        timestamp,
        channel,
        reason: reason.to_string(),
    }
}
