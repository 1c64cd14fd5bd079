use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::burst::{Burst, BurstId, ReqId};
use crate::error::{Result, SimError};
use crate::timeq::Time;

/// What happens to bookkeeping of a burst once it has been handed back to its port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Drop the burst and its request entries on delivery.
    #[default]
    EvictDelivered,
    /// Keep a payload-less record of every burst and request for the whole run.
    KeepAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqStatus {
    Queued,
    Submitted,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstStatus {
    Open,
    AwaitingChildren,
    Ready,
    Delivered,
}

#[derive(Debug)]
pub struct BurstEntry {
    pub burst: Burst,
    pub status: BurstStatus,
    completed: usize,
    // write payload already copied into the backing store
    pub applied: bool,
    arrive_min: Option<Time>,
    depart_max: Time,
}

impl BurstEntry {
    pub fn is_ready(&self) -> bool {
        self.status == BurstStatus::Ready
    }

    pub fn completed_children(&self) -> usize {
        self.completed
    }
}

/// Owner of every in-flight burst, keyed by burst id, plus the per-request status table.
#[derive(Debug, Default)]
pub struct BurstArena {
    entries: HashMap<BurstId, BurstEntry>,
    // child request -> (parent burst, status)
    requests: HashMap<ReqId, (BurstId, ReqStatus)>,
    retention: Retention,
    delivered: u64,
}

impl BurstArena {
    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    /// Take ownership of a freshly submitted burst. It starts out `Open`.
    pub fn insert(&mut self, burst: Burst) -> Result<()> {
        if self.entries.contains_key(&burst.id) {
            return Err(SimError::InvalidBurst {
                id: burst.id,
                reason: "burst id submitted twice".to_string(),
            });
        }
        self.entries.insert(
            burst.id,
            BurstEntry {
                burst,
                status: BurstStatus::Open,
                completed: 0,
                applied: false,
                arrive_min: None,
                depart_max: 0,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: BurstId) -> Result<&BurstEntry> {
        self.entries.get(&id).ok_or(SimError::UnknownBurst(id))
    }

    pub fn get_mut(&mut self, id: BurstId) -> Result<&mut BurstEntry> {
        self.entries.get_mut(&id).ok_or(SimError::UnknownBurst(id))
    }

    /// Register the burst's children as queued and move it to `AwaitingChildren`.
    pub fn open_children(&mut self, id: BurstId) -> Result<()> {
        let entry = self.entries.get_mut(&id).ok_or(SimError::UnknownBurst(id))?;
        for &req in entry.burst.req_ids.iter() {
            if self.requests.insert(req, (id, ReqStatus::Queued)).is_some() {
                return Err(SimError::InvalidBurst {
                    id,
                    reason: format!("request id {} already in use", req),
                });
            }
        }
        entry.status = BurstStatus::AwaitingChildren;
        Ok(())
    }

    pub fn request_status(&self, req: ReqId) -> Option<ReqStatus> {
        self.requests.get(&req).map(|&(_, status)| status)
    }

    pub fn mark_submitted(&mut self, req: ReqId) -> Result<()> {
        match self.requests.get_mut(&req) {
            Some((_, status @ ReqStatus::Queued)) => {
                *status = ReqStatus::Submitted;
                Ok(())
            }
            Some((burst, status)) => Err(SimError::InvalidBurst {
                id: *burst,
                reason: format!("request {} submitted while {:?}", req, status),
            }),
            None => Err(SimError::UnknownRequest(req)),
        }
    }

    /// Record one child completion with its memory-side times. Returns true on the completion that
    /// makes the parent burst ready; that happens exactly once per burst.
    pub fn complete_child(
        &mut self,
        req: ReqId,
        burst_id: BurstId,
        arrive: Time,
        depart: Time,
    ) -> Result<bool> {
        match self.requests.get_mut(&req) {
            Some((_, ReqStatus::Completed)) => return Err(SimError::DuplicateCompletion(req)),
            Some((parent, _)) if *parent != burst_id => {
                return Err(SimError::InvalidBurst {
                    id: burst_id,
                    reason: format!("request {} belongs to burst {}", req, parent),
                })
            }
            Some((_, status)) => *status = ReqStatus::Completed,
            None => return Err(SimError::UnknownRequest(req)),
        }
        let entry = self
            .entries
            .get_mut(&burst_id)
            .ok_or(SimError::UnknownBurst(burst_id))?;
        if entry.status != BurstStatus::AwaitingChildren {
            return Err(SimError::InvalidBurst {
                id: burst_id,
                reason: format!("completion of request {} while {:?}", req, entry.status),
            });
        }

        entry.completed += 1;
        entry.arrive_min = Some(entry.arrive_min.map_or(arrive, |t| t.min(arrive)));
        entry.depart_max = entry.depart_max.max(depart);
        if entry.completed < entry.burst.num_requests() {
            return Ok(false);
        }
        entry.burst.times.arrive_mem = entry.arrive_min.unwrap_or(arrive);
        entry.burst.times.depart_mem = entry.depart_max;
        entry.status = BurstStatus::Ready;
        debug!(
            "burst {} ready, arrive_mem {} depart_mem {}",
            burst_id, entry.burst.times.arrive_mem, entry.burst.times.depart_mem
        );
        Ok(true)
    }

    /// Hand a ready burst back to its owner, applying the retention policy.
    pub fn deliver(&mut self, id: BurstId) -> Result<Burst> {
        let status = self.get(id)?.status;
        if status != BurstStatus::Ready {
            return Err(SimError::InvalidBurst {
                id,
                reason: format!("delivered while {:?}", status),
            });
        }
        self.delivered += 1;
        match self.retention {
            Retention::EvictDelivered => {
                let entry = self.entries.remove(&id).ok_or(SimError::UnknownBurst(id))?;
                for req in entry.burst.req_ids.iter() {
                    self.requests.remove(req);
                }
                Ok(entry.burst)
            }
            Retention::KeepAll => {
                let entry = self.get_mut(id)?;
                entry.status = BurstStatus::Delivered;
                let mut record = entry.burst.clone();
                record.data = Vec::new();
                Ok(std::mem::replace(&mut entry.burst, record))
            }
        }
    }

    /// Bursts still owned by the scheduler.
    pub fn live(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status != BurstStatus::Delivered)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tracked_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::{Alignment, IdSource, MemOp};

    fn opened(arena: &mut BurstArena, ids: &IdSource, addr: u64, len: usize) -> Burst {
        let mut burst = Burst::new(MemOp::Read, ids.next_burst(), 0, 0, addr, len);
        burst.decompose(Alignment::new(64).unwrap(), ids).unwrap();
        arena.insert(burst.clone()).unwrap();
        arena.open_children(burst.id).unwrap();
        burst
    }

    #[test]
    fn ready_fires_once_on_last_child() {
        let ids = IdSource::new();
        let mut arena = BurstArena::new(Retention::EvictDelivered);
        let burst = opened(&mut arena, &ids, 100, 40);
        let (a, b) = (burst.req_ids[0], burst.req_ids[1]);
        assert_eq!(Some(ReqStatus::Queued), arena.request_status(a));
        arena.mark_submitted(a).unwrap();
        arena.mark_submitted(b).unwrap();
        assert_eq!(Some(ReqStatus::Submitted), arena.request_status(b));

        assert!(!arena.complete_child(b, burst.id, 12, 40).unwrap());
        assert_eq!(Some(ReqStatus::Completed), arena.request_status(b));
        assert_eq!(Some(ReqStatus::Submitted), arena.request_status(a));
        assert!(arena.complete_child(a, burst.id, 10, 30).unwrap());
        let entry = arena.get(burst.id).unwrap();
        assert!(entry.is_ready());
        assert_eq!(10, entry.burst.times.arrive_mem);
        assert_eq!(40, entry.burst.times.depart_mem);

        assert!(matches!(
            arena.complete_child(a, burst.id, 10, 30),
            Err(SimError::DuplicateCompletion(r)) if r == a
        ));
    }

    #[test]
    fn unknown_ids_are_faults() {
        let mut arena = BurstArena::new(Retention::EvictDelivered);
        assert!(matches!(arena.get(3), Err(SimError::UnknownBurst(3))));
        assert!(matches!(
            arena.complete_child(9, 3, 0, 0),
            Err(SimError::UnknownRequest(9))
        ));
    }

    #[test]
    fn retention_policies() {
        let ids = IdSource::new();
        for (retention, kept) in [(Retention::EvictDelivered, 0), (Retention::KeepAll, 1)] {
            let mut arena = BurstArena::new(retention);
            let burst = opened(&mut arena, &ids, 0, 64);
            assert!(matches!(arena.deliver(burst.id), Err(SimError::InvalidBurst { .. })));
            arena.complete_child(burst.req_ids[0], burst.id, 0, 5).unwrap();
            let out = arena.deliver(burst.id).unwrap();
            assert_eq!(burst.id, out.id);
            assert_eq!(kept, arena.len());
            assert_eq!(kept, arena.tracked_requests());
            let status = arena.request_status(burst.req_ids[0]);
            assert_eq!(kept == 1, status == Some(ReqStatus::Completed));
            assert_eq!(kept == 0, status.is_none());
            assert_eq!(0, arena.live());
            assert_eq!(1, arena.delivered());
        }
    }

    #[test]
    fn duplicate_burst_id_is_rejected() {
        let mut arena = BurstArena::new(Retention::KeepAll);
        let burst = Burst::new(MemOp::Read, 4, 0, 0, 0, 8);
        arena.insert(burst.clone()).unwrap();
        assert!(arena.insert(burst).is_err());
    }
}
