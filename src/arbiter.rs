/// Round-robin choice among `n` requesters: each pick starts from the requester after the previous
/// winner, so a requester that keeps asking is served at least once every `n` picks.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinArbiter {
    rr_cursor: usize,
}

impl RoundRobinArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick<F>(&mut self, n: usize, mut ready: F) -> Option<usize>
    where
        F: FnMut(usize) -> bool,
    {
        if n == 0 {
            return None;
        }
        let start = self.rr_cursor % n;
        for offset in 0..n {
            let idx = (start + offset) % n;
            if ready(idx) {
                self.rr_cursor = (idx + 1) % n;
                return Some(idx);
            }
        }
        None
    }

    pub fn pick_from(&mut self, eligible: &[bool]) -> Option<usize> {
        self.pick(eligible.len(), |idx| eligible[idx])
    }
}
