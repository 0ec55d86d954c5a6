use crate::command::types::{SubmissionKey, SubmissionKeyPair};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Identifies one worker's private task queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskProcessorMediatorKey {
    pub queue_name: String,
    /// Worker slot on its node.
    pub partition: u32,
    pub worker_id: String,
}

impl TaskProcessorMediatorKey {
    pub fn new(queue_name: impl Into<String>, partition: u32, worker_id: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            partition,
            worker_id: worker_id.into(),
        }
    }
}

impl fmt::Display for TaskProcessorMediatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.queue_name, self.partition, self.worker_id)
    }
}

impl FromStr for TaskProcessorMediatorKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(queue_name), Some(partition), Some(worker_id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("malformed mediator key: {}", s));
        };
        let partition = partition
            .parse()
            .map_err(|e| format!("bad partition in mediator key {}: {}", s, e))?;
        Ok(Self::new(queue_name, partition, worker_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub duration_ms: u64,
    /// Wall-clock milliseconds.
    pub expires_at: u64,
}

impl Lease {
    pub fn new(holder: impl Into<String>, duration_ms: u64, now: u64) -> Self {
        Self {
            holder: holder.into(),
            duration_ms,
            expires_at: now.saturating_add(duration_ms),
        }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseGrant {
    Granted(Lease),
    Renewed(Lease),
    /// The previous holder let its lease lapse.
    TakenOver { lease: Lease, previous: String },
    /// The caller's own lease lapsed; it no longer owns the queue.
    Expired,
    Held { holder: String, expires_at: u64 },
}

/// Whether a caller may operate on a mediator's queue right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseCheck {
    /// No lease has been taken yet.
    Open,
    Valid,
    Expired,
    Held { holder: String, expires_at: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub completed: u64,
    pub failed: u64,
    pub total_duration_ms: u64,
    pub last_duration_ms: u64,
}

/// Stored state of one mediator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediatorState {
    pub queue: VecDeque<SubmissionKeyPair>,
    pub in_progress: Vec<SubmissionKeyPair>,
    pub lease: Option<Lease>,
    pub stats: TaskStats,
}

impl MediatorState {
    pub fn acquire_lease(&mut self, holder: &str, duration_ms: u64, now: u64) -> LeaseGrant {
        let grant = match &self.lease {
            None => LeaseGrant::Granted(Lease::new(holder, duration_ms, now)),
            Some(current) if current.holder == holder => {
                if current.is_expired_at(now) {
                    return LeaseGrant::Expired;
                }
                LeaseGrant::Renewed(Lease::new(holder, duration_ms, now))
            }
            Some(current) if !current.is_expired_at(now) => {
                return LeaseGrant::Held {
                    holder: current.holder.clone(),
                    expires_at: current.expires_at,
                };
            }
            Some(current) => LeaseGrant::TakenOver {
                lease: Lease::new(holder, duration_ms, now),
                previous: current.holder.clone(),
            },
        };

        let lease = match &grant {
            LeaseGrant::Granted(lease) | LeaseGrant::Renewed(lease) | LeaseGrant::TakenOver { lease, .. } => {
                lease.clone()
            }
            LeaseGrant::Expired | LeaseGrant::Held { .. } => return grant,
        };
        self.lease = Some(lease);
        grant
    }

    pub fn authorize(&self, holder: &str, now: u64) -> LeaseCheck {
        match &self.lease {
            None => LeaseCheck::Open,
            Some(lease) if lease.holder == holder => {
                if lease.is_expired_at(now) {
                    LeaseCheck::Expired
                } else {
                    LeaseCheck::Valid
                }
            }
            Some(lease) => LeaseCheck::Held {
                holder: lease.holder.clone(),
                expires_at: lease.expires_at,
            },
        }
    }

    pub fn enqueue(&mut self, pair: SubmissionKeyPair) {
        self.queue.push_back(pair);
    }

    pub fn dequeue(&mut self) -> Option<SubmissionKeyPair> {
        let pair = self.queue.pop_front()?;
        self.in_progress.push(pair.clone());
        Some(pair)
    }

    /// Takes everything still owed: in-progress first, then queued.
    pub fn drain(&mut self) -> Vec<SubmissionKeyPair> {
        let mut drained = std::mem::take(&mut self.in_progress);
        drained.extend(self.queue.drain(..));
        drained
    }

    pub fn complete(&mut self, key: &SubmissionKey, duration_ms: u64, succeeded: bool) -> bool {
        let Some(position) = self.in_progress.iter().position(|pair| &pair.key == key) else {
            return false;
        };
        self.in_progress.remove(position);

        if succeeded {
            self.stats.completed += 1;
        } else {
            self.stats.failed += 1;
        }
        self.stats.total_duration_ms += duration_ms;
        self.stats.last_duration_ms = duration_ms;
        true
    }
}

/// What running one execution turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub succeeded: bool,
    /// Token for the context's next command, to be queued by the same worker.
    pub follow_up: Option<SubmissionKeyPair>,
}

impl TaskOutcome {
    /// Nothing ran: the token was stale or the queue was empty.
    pub fn nothing_to_do() -> Self {
        Self {
            succeeded: true,
            follow_up: None,
        }
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
