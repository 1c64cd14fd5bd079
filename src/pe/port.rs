use std::collections::{BTreeMap, VecDeque};

use crate::burst::{Addr, Burst, BurstId, PortId};
use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    ReadA,
    ReadB,
    WriteP,
}

impl PortKind {
    pub const ALL: [PortKind; 3] = [PortKind::ReadA, PortKind::ReadB, PortKind::WriteP];

    pub fn index(self) -> usize {
        match self {
            PortKind::ReadA => 0,
            PortKind::ReadB => 1,
            PortKind::WriteP => 2,
        }
    }

    pub fn is_read(self) -> bool {
        !matches!(self, PortKind::WriteP)
    }
}

/// Issue side of one logical port of a PE: where its stream lives, how far it got, and which of its
/// bursts have been answered.
#[derive(Debug)]
pub struct PortState {
    pub kind: PortKind,
    pub id: PortId,
    base: Addr,
    total_words: usize,
    issued_words: usize,
    // every burst issued on this port has been generated
    generated: bool,
    // burst id -> response observed
    status: BTreeMap<BurstId, bool>,
    // formed but not yet won arbitration
    pub outgoing: VecDeque<Burst>,
}

impl PortState {
    pub fn new(kind: PortKind, id: PortId, base: Addr, total_words: usize) -> Self {
        Self {
            kind,
            id,
            base,
            total_words,
            issued_words: 0,
            generated: total_words == 0,
            status: BTreeMap::new(),
            outgoing: VecDeque::new(),
        }
    }

    pub fn remaining_words(&self) -> usize {
        self.total_words - self.issued_words
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Address of the next word to issue, given the word width in bytes.
    pub fn next_addr(&self, word_bytes: usize) -> Addr {
        self.base + (self.issued_words * word_bytes) as Addr
    }

    /// Account for a new burst of `words` words. Latches `generated` when the range is exhausted.
    pub fn record_issue(&mut self, burst: Burst, words: usize) {
        self.status.insert(burst.id, false);
        self.issued_words += words;
        if self.issued_words >= self.total_words {
            self.generated = true;
        }
        self.outgoing.push_back(burst);
    }

    pub fn record_response(&mut self, id: BurstId) -> Result<()> {
        match self.status.get_mut(&id) {
            Some(seen @ false) => {
                *seen = true;
                Ok(())
            }
            Some(true) => Err(SimError::InvalidBurst {
                id,
                reason: format!("response delivered twice to port {}", self.id),
            }),
            None => Err(SimError::UnknownBurst(id)),
        }
    }

    pub fn all_responded(&self) -> bool {
        self.status.values().all(|&seen| seen)
    }

    pub fn done(&self) -> bool {
        self.generated && self.all_responded()
    }

    pub fn bursts_issued(&self) -> usize {
        self.status.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::MemOp;

    #[test]
    fn done_needs_both_latches() {
        let mut port = PortState::new(PortKind::ReadA, 0, 0x100, 8);
        assert!(!port.done());
        port.record_issue(Burst::new(MemOp::Read, 1, 0, 0, 0x100, 16), 4);
        assert_eq!(0x110, port.next_addr(4));
        port.record_response(1).unwrap();
        // all answered, but the range is not exhausted yet
        assert!(port.all_responded());
        assert!(!port.done());

        port.record_issue(Burst::new(MemOp::Read, 2, 0, 0, 0x110, 16), 4);
        assert!(port.is_generated());
        assert!(!port.done());
        port.record_response(2).unwrap();
        assert!(port.done());
    }

    #[test]
    fn responses_must_match_issued_bursts() {
        let mut port = PortState::new(PortKind::WriteP, 2, 0, 4);
        assert!(matches!(port.record_response(9), Err(SimError::UnknownBurst(9))));
        port.record_issue(Burst::new(MemOp::Write, 3, 0, 2, 0, 16), 4);
        port.record_response(3).unwrap();
        assert!(port.record_response(3).is_err());
    }

    #[test]
    fn empty_range_is_done_immediately() {
        let port = PortState::new(PortKind::ReadB, 1, 0, 0);
        assert!(port.done());
    }
}
