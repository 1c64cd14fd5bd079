/*
Time-queue for the memory timing model.

Two notions of time coexist in the simulator:
    - `Time` is the global simulated timeline in nanoseconds, shared by both clock domains.
    - `Cycle` counts ticks of a single clock domain (the memory clock inside a timing model).

Each shared resource in the reference timing model is wrapped by a TimedServer, which enforces a
service law: a base latency plus a throughput component expressed in bytes-per-cycle.  Service is
pipelined: the bandwidth component occupies the server, the latency component does not.

When the server cannot accept more work it returns a Backpressure carrying the request back, so the
caller can retry it unchanged on a later tick.  Accepted requests yield a `Ticket` describing when
the service will complete.
*/

pub type Cycle = u64;
pub type Time = u64;

// Result of queueing a request with a timed server
#[derive(Debug, Clone, Copy)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
    size_bytes: u32,
}

impl Ticket {
    fn new(issued_at: Cycle, ready_at: Cycle, size_bytes: u32) -> Self {
        Self {
            issued_at,
            ready_at,
            size_bytes,
        }
    }

    // Cycle at which the request entered the server.
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    // Cycle at which the server will make the payload available to downstream consumers.
    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }

    pub fn latency(&self) -> Cycle {
        self.ready_at.saturating_sub(self.issued_at)
    }
}

// The request carries the payload and metadata that is required to compute the service time
#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    pub size_bytes: u32,
    // Latency added on top of the configured base latency, e.g. a write penalty or jitter
    pub extra_latency: Cycle,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self {
            payload,
            size_bytes,
            extra_latency: 0,
        }
    }

    pub fn with_extra_latency(mut self, extra: Cycle) -> Self {
        self.extra_latency = extra;
        self
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

// Reasons why the server rejected a request
#[derive(Debug)]
pub enum Backpressure<T> {
    // The bounded queue is full
    QueueFull { request: ServiceRequest<T>, capacity: usize },
}

impl<T> Backpressure<T> {
    // Recover the underlying request so it can be retried later.
    pub fn into_request(self) -> ServiceRequest<T> {
        match self {
            Backpressure::QueueFull { request, .. } => request,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    // Fixed latency added to every request
    pub base_latency: Cycle,
    // Throughput
    pub bytes_per_cycle: u32,
    // Maximum number of outstanding requests the server will accept
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_latency: 0,
            bytes_per_cycle: 1,
            queue_capacity: 1,
        }
    }
}

#[derive(Debug)]
struct Inflight<T> {
    payload: T,
    ticket: Ticket,
}

// Single-lane server that enforces the configured latency/bandwidth budget and keeps track of
// outstanding work.  Requests with different extra latencies may finish out of order.
#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    inflight: Vec<Inflight<T>>,
    busy_until: Cycle,
}

impl<T> TimedServer<T> {
    pub fn new(config: ServerConfig) -> Self {
        assert!(config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            config,
            inflight: Vec::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    // Attempt to enqueue a request at the provided cycle.
    // Returns a Ticket on success or a Backpressure handing the request back.
    pub fn try_enqueue(
        &mut self,
        now: Cycle,
        request: ServiceRequest<T>,
    ) -> Result<Ticket, Backpressure<T>> {
        if self.inflight.len() >= self.config.queue_capacity {
            return Err(Backpressure::QueueFull {
                request,
                capacity: self.config.queue_capacity,
            });
        }

        let start = self.busy_until.max(now);
        let service_cycles = ceil_div_u64(
            request.size_bytes as u64,
            self.config.bytes_per_cycle as u64,
        );
        let ready_at = start
            .saturating_add(service_cycles)
            .saturating_add(self.config.base_latency)
            .saturating_add(request.extra_latency);
        let ticket = Ticket::new(now, ready_at, request.size_bytes);

        self.busy_until = start.saturating_add(service_cycles);
        self.inflight.push(Inflight {
            payload: request.payload,
            ticket,
        });

        Ok(ticket)
    }

    // Drain every request that has completed by "now", earliest ready first, and invoke the
    // supplied callback with the results.
    pub fn service_ready<F>(&mut self, now: Cycle, mut callback: F)
    where
        F: FnMut(ServiceResult<T>),
    {
        let mut ready = Vec::new();
        let mut idx = 0;
        while idx < self.inflight.len() {
            if self.inflight[idx].ticket.is_ready(now) {
                ready.push(self.inflight.remove(idx));
            } else {
                idx += 1;
            }
        }
        // stable: equal ready cycles keep enqueue order
        ready.sort_by_key(|inflight| inflight.ticket.ready_at());
        for inflight in ready {
            callback(ServiceResult {
                payload: inflight.payload,
                ticket: inflight.ticket,
            });
        }
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_full(&self) -> bool {
        self.inflight.len() >= self.config.queue_capacity
    }

    // Returns the earliest cycle at which a new request could begin service.
    pub fn available_at(&self) -> Cycle {
        self.busy_until
    }
}

pub fn ceil_div_u64(nom: u64, denom: u64) -> u64 {
    debug_assert!(denom > 0);
    nom.div_ceil(denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(base_latency: Cycle, bytes_per_cycle: u32, queue_capacity: usize) -> TimedServer<u32> {
        TimedServer::new(ServerConfig {
            base_latency,
            bytes_per_cycle,
            queue_capacity,
        })
    }

    #[test]
    fn ticket_accounts_for_latency_and_bandwidth() {
        let mut srv = server(3, 16, 4);
        let ticket = srv.try_enqueue(10, ServiceRequest::new(1, 64)).unwrap();
        assert_eq!(10, ticket.issued_at());
        assert_eq!(10 + 4 + 3, ticket.ready_at());
        assert_eq!(7, ticket.latency());
    }

    #[test]
    fn bandwidth_is_pipelined_not_latency() {
        let mut srv = server(10, 64, 4);
        let first = srv.try_enqueue(0, ServiceRequest::new(1, 64)).unwrap();
        let second = srv.try_enqueue(0, ServiceRequest::new(2, 64)).unwrap();
        assert_eq!(11, first.ready_at());
        assert_eq!(12, second.ready_at());
        assert_eq!(2, srv.available_at());
    }

    #[test]
    fn full_queue_hands_request_back() {
        let mut srv = server(1, 4, 1);
        srv.try_enqueue(0, ServiceRequest::new(1, 4)).unwrap();
        let err = srv.try_enqueue(0, ServiceRequest::new(2, 4)).unwrap_err();
        assert_eq!(2, err.into_request().payload);
        assert_eq!(1, srv.outstanding());
        assert!(srv.is_full());
    }

    #[test]
    fn extra_latency_reorders_completions() {
        let mut srv = server(0, 64, 4);
        srv.try_enqueue(0, ServiceRequest::new(1, 64).with_extra_latency(10))
            .unwrap();
        srv.try_enqueue(0, ServiceRequest::new(2, 64)).unwrap();
        let mut order = Vec::new();
        srv.service_ready(20, |result| order.push(result.payload));
        assert_eq!(vec![2, 1], order);
        assert_eq!(0, srv.outstanding());
    }

    #[test]
    fn service_ready_leaves_pending_requests() {
        let mut srv = server(5, 64, 2);
        let ticket = srv.try_enqueue(0, ServiceRequest::new(7, 64)).unwrap();
        let mut seen = 0;
        srv.service_ready(ticket.ready_at() - 1, |_| seen += 1);
        assert_eq!(0, seen);
        srv.service_ready(ticket.ready_at(), |_| seen += 1);
        assert_eq!(1, seen);
    }
}
