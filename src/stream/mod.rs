//! Word-granular adapters in front of a scheduler link, for consumers that move one value per tick.
//!
//! A `ReadStream` turns a read command into a burst and plays the response back one word per tick.
//! A `WriteStream` collects words as they are produced and, on a write enable, packs exactly the
//! requested length of them into a write burst.

use std::collections::VecDeque;

use log::debug;

use crate::base::behavior::ModuleBehaviors;
use crate::base::port::{Input, Output, Port};
use crate::burst::payload::check_word_aligned;
use crate::burst::{Addr, Alignment, Burst, IdSource, MemOp, PeId, PortId, Word};
use crate::error::{Result, SimError};
use crate::sched::BurstLink;
use crate::timeq::Time;

pub mod vector_pe;

pub use vector_pe::VectorPe;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadCmd {
    pub ena: bool,
    pub addr: Addr,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCmd {
    pub wen: bool,
    pub addr: Addr,
    pub length: usize,
}

/// One word of read data as seen by the consumer. `complete` pulses with the last word of a burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadBeat<T> {
    pub data: T,
    pub valid: bool,
    pub complete: bool,
}

impl<T: Word> Default for ReadBeat<T> {
    fn default() -> Self {
        Self {
            data: T::IDLE,
            valid: false,
            complete: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteBeat<T> {
    pub data: T,
    pub valid: bool,
}

impl<T: Word> Default for WriteBeat<T> {
    fn default() -> Self {
        Self {
            data: T::IDLE,
            valid: false,
        }
    }
}

/// Identity shared by both stream directions.
#[derive(Debug, Clone)]
pub struct StreamPort {
    pub pe_id: PeId,
    pub port_id: PortId,
    pub alignment: Alignment,
    pub ids: IdSource,
}

impl StreamPort {
    fn burst(&self, op: MemOp, addr: Addr, length: usize, now: Time) -> Result<Burst> {
        let mut burst = Burst::new(op, self.ids.next_burst(), self.pe_id, self.port_id, addr, length);
        burst.decompose(self.alignment, &self.ids)?;
        burst.times.depart_pe = now;
        Ok(burst)
    }

    fn check_response(&self, burst: &Burst) -> Result<()> {
        if burst.port_id != self.port_id {
            return Err(SimError::InvalidBurst {
                id: burst.id,
                reason: format!(
                    "response for port {} delivered to stream port {}",
                    burst.port_id, self.port_id
                ),
            });
        }
        Ok(())
    }
}

pub struct ReadStream<T: Word> {
    port: StreamPort,
    pub cmd: Port<Input, ReadCmd>,
    pub dout: Port<Output, ReadBeat<T>>,
    pub link: BurstLink,
    responses: VecDeque<Burst>,
    outstanding: usize,
    words: u64,
}

impl<T: Word> ReadStream<T> {
    pub fn new(port: StreamPort) -> Self {
        Self {
            port,
            cmd: Port::new(),
            dout: Port::new(),
            link: BurstLink::new(),
            responses: VecDeque::new(),
            outstanding: 0,
            words: 0,
        }
    }

    pub fn port_id(&self) -> PortId {
        self.port.port_id
    }

    pub fn words_delivered(&self) -> u64 {
        self.words
    }

    fn play_back(&mut self) -> Result<()> {
        let Some(front) = self.responses.front_mut() else {
            self.dout.put(ReadBeat::default());
            return Ok(());
        };
        let Some(data) = front.pop_word::<T>() else {
            return Err(SimError::InvalidBurst {
                id: front.id,
                reason: "read response carries no data".to_string(),
            });
        };
        let complete = !front.has_unread::<T>();
        if complete {
            self.responses.pop_front();
        }
        self.words += 1;
        self.dout.put(ReadBeat {
            data,
            valid: true,
            complete,
        });
        Ok(())
    }
}

impl<T: Word> ModuleBehaviors for ReadStream<T> {
    fn tick_one(&mut self, now: Time) -> Result<()> {
        self.play_back()?;

        if let Some(burst) = self.link.recv() {
            self.port.check_response(&burst)?;
            check_word_aligned::<T>(burst.length)?;
            self.outstanding = self.outstanding.saturating_sub(1);
            self.responses.push_back(burst);
        }

        let cmd = self.cmd.get();
        if cmd.ena {
            check_word_aligned::<T>(cmd.length)?;
            let burst = self.port.burst(MemOp::Read, cmd.addr, cmd.length, now)?;
            debug!("@{}ns read stream {} issues {}", now, self.port.port_id, burst);
            self.outstanding += 1;
            self.link.send(burst);
        } else {
            self.link.idle();
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.outstanding == 0 && self.responses.is_empty()
    }
}

pub struct WriteStream<T: Word> {
    port: StreamPort,
    pub cmd: Port<Input, WriteCmd>,
    pub din: Port<Input, WriteBeat<T>>,
    pub complete: Port<Output, bool>,
    pub link: BurstLink,
    buffer: VecDeque<T>,
    outstanding: usize,
}

impl<T: Word> WriteStream<T> {
    pub fn new(port: StreamPort) -> Self {
        Self {
            port,
            cmd: Port::new(),
            din: Port::new(),
            complete: Port::new(),
            link: BurstLink::new(),
            buffer: VecDeque::new(),
            outstanding: 0,
        }
    }

    pub fn port_id(&self) -> PortId {
        self.port.port_id
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn form_burst(&mut self, cmd: WriteCmd, now: Time) -> Result<Burst> {
        check_word_aligned::<T>(cmd.length)?;
        let words = cmd.length / T::BYTES;
        if self.buffer.len() < words {
            return Err(SimError::BufferUnderflow {
                needed: cmd.length,
                available: self.buffer.len() * T::BYTES,
            });
        }
        let mut burst = self.port.burst(MemOp::Write, cmd.addr, cmd.length, now)?;
        let payload: Vec<T> = self.buffer.drain(..words).collect();
        burst.set_words(&payload)?;
        Ok(burst)
    }
}

impl<T: Word> ModuleBehaviors for WriteStream<T> {
    fn tick_one(&mut self, now: Time) -> Result<()> {
        // a word and the enable that covers it may arrive on the same tick
        let beat = self.din.get();
        if beat.valid {
            self.buffer.push_back(beat.data);
        }

        let cmd = self.cmd.get();
        if cmd.wen {
            let burst = self.form_burst(cmd, now)?;
            debug!("@{}ns write stream {} issues {}", now, self.port.port_id, burst);
            self.outstanding += 1;
            self.link.send(burst);
        } else {
            self.link.idle();
        }

        match self.link.recv() {
            Some(burst) => {
                self.port.check_response(&burst)?;
                self.outstanding = self.outstanding.saturating_sub(1);
                self.complete.put(true);
            }
            None => self.complete.put(false),
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.outstanding == 0 && self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::port::{link, Latch};

    fn stream_port(port_id: PortId) -> StreamPort {
        StreamPort {
            pe_id: 0,
            port_id,
            alignment: Alignment::new(64).unwrap(),
            ids: IdSource::new(),
        }
    }

    struct ReadBench {
        stream: ReadStream<f32>,
        cmd: Port<Output, ReadCmd>,
        dout: Port<Input, ReadBeat<f32>>,
        mem_req: Port<Input, Burst>,
        mem_resp: Port<Output, Burst>,
        latches: Vec<Box<dyn Latch>>,
    }

    impl ReadBench {
        fn new() -> Self {
            let mut stream = ReadStream::new(stream_port(4));
            let mut cmd = Port::new();
            let mut dout = Port::new();
            let mut mem_req = Port::new();
            let mut mem_resp = Port::new();
            let latches: Vec<Box<dyn Latch>> = vec![
                Box::new(link(&mut stream.cmd, &mut cmd)),
                Box::new(link(&mut dout, &mut stream.dout)),
                Box::new(link(&mut mem_req, &mut stream.link.req)),
                Box::new(link(&mut stream.link.resp, &mut mem_resp)),
            ];
            Self {
                stream,
                cmd,
                dout,
                mem_req,
                mem_resp,
                latches,
            }
        }

        fn step(&mut self, now: Time) -> ReadBeat<f32> {
            self.stream.tick_one(now).unwrap();
            self.latches.iter().for_each(|l| l.latch());
            self.dout.get()
        }
    }

    fn response(port_id: PortId, words: &[f32]) -> Burst {
        let mut burst = Burst::new(MemOp::Read, 1, 0, port_id, 0, words.len() * 4);
        burst.set_words(words).unwrap();
        burst
    }

    #[test]
    fn read_stream_issues_on_enable() {
        let mut bench = ReadBench::new();
        bench.cmd.put(ReadCmd {
            ena: true,
            addr: 0x40,
            length: 32,
        });
        bench.latches.iter().for_each(|l| l.latch());
        bench.step(1);
        let burst = bench.mem_req.get();
        assert!(burst.valid);
        assert_eq!(MemOp::Read, burst.op);
        assert_eq!((0x40, 32, 4), (burst.addr, burst.length, burst.port_id));
        assert_eq!(1, burst.num_requests());
        assert_eq!(1, burst.times.depart_pe);
        assert!(!bench.stream.finished());

        // no enable: the link carries the idle marker
        bench.step(2);
        assert!(!bench.mem_req.get().valid);
    }

    #[test]
    fn read_stream_rejects_range_past_address_space() {
        let mut bench = ReadBench::new();
        bench.cmd.put(ReadCmd {
            ena: true,
            addr: u64::MAX - 10,
            length: 40,
        });
        bench.latches.iter().for_each(|l| l.latch());
        assert!(matches!(
            bench.stream.tick_one(1),
            Err(SimError::OutOfBounds { len: 40, .. })
        ));
        assert!(bench.stream.finished());
    }

    #[test]
    fn read_stream_plays_words_back_one_per_tick() {
        let mut bench = ReadBench::new();
        bench.mem_resp.put(response(4, &[1.0, 2.0]));
        bench.latches.iter().for_each(|l| l.latch());
        bench.mem_resp.put(response(4, &[3.0]));

        // response is queued on the tick it arrives, played back from the next
        let idle = bench.step(1);
        assert_eq!(ReadBeat::default(), idle);
        assert_eq!(-1.0, idle.data);

        let beats: Vec<_> = (2..=5).map(|now| bench.step(now)).collect();
        let seen: Vec<_> = beats.iter().map(|b| (b.data, b.valid, b.complete)).collect();
        assert_eq!(
            vec![
                (1.0, true, false),
                (2.0, true, true),
                (3.0, true, true),
                (-1.0, false, false)
            ],
            seen
        );
        assert_eq!(3, bench.stream.words_delivered());
    }

    #[test]
    fn read_stream_rejects_foreign_response() {
        let mut bench = ReadBench::new();
        bench.mem_resp.put(response(9, &[1.0]));
        bench.latches.iter().for_each(|l| l.latch());
        assert!(matches!(
            bench.stream.tick_one(1),
            Err(SimError::InvalidBurst { .. })
        ));
    }

    struct WriteBench {
        stream: WriteStream<f32>,
        cmd: Port<Output, WriteCmd>,
        din: Port<Output, WriteBeat<f32>>,
        complete: Port<Input, bool>,
        mem_req: Port<Input, Burst>,
        mem_resp: Port<Output, Burst>,
        latches: Vec<Box<dyn Latch>>,
    }

    impl WriteBench {
        fn new() -> Self {
            let mut stream = WriteStream::new(stream_port(2));
            let mut cmd = Port::new();
            let mut din = Port::new();
            let mut complete = Port::new();
            let mut mem_req = Port::new();
            let mut mem_resp = Port::new();
            let latches: Vec<Box<dyn Latch>> = vec![
                Box::new(link(&mut stream.cmd, &mut cmd)),
                Box::new(link(&mut stream.din, &mut din)),
                Box::new(link(&mut complete, &mut stream.complete)),
                Box::new(link(&mut mem_req, &mut stream.link.req)),
                Box::new(link(&mut stream.link.resp, &mut mem_resp)),
            ];
            Self {
                stream,
                cmd,
                din,
                complete,
                mem_req,
                mem_resp,
                latches,
            }
        }

        fn latch(&self) {
            self.latches.iter().for_each(|l| l.latch());
        }

        fn push(&mut self, data: f32) {
            self.din.put(WriteBeat { data, valid: true });
        }
    }

    #[test]
    fn write_stream_packs_word_arriving_with_enable() {
        let mut bench = WriteBench::new();
        for (now, data) in [(1, 0.5f32), (2, 1.5)] {
            bench.push(data);
            bench.latch();
            bench.stream.tick_one(now).unwrap();
        }
        bench.push(2.5);
        bench.cmd.put(WriteCmd {
            wen: true,
            addr: 0x100,
            length: 12,
        });
        bench.latch();
        bench.stream.tick_one(3).unwrap();
        bench.latch();

        let burst = bench.mem_req.get();
        assert!(burst.valid && burst.op.is_write());
        assert_eq!(vec![0.5, 1.5, 2.5], burst.words::<f32>().unwrap());
        assert_eq!(0, bench.stream.buffered());
        assert!(!bench.stream.finished());

        bench.mem_resp.put(burst);
        bench.latch();
        bench.stream.tick_one(4).unwrap();
        bench.latch();
        assert!(bench.complete.get());
        assert!(bench.stream.finished());
    }

    #[test]
    fn write_enable_without_enough_words_underflows() {
        let mut bench = WriteBench::new();
        bench.push(1.0);
        bench.cmd.put(WriteCmd {
            wen: true,
            addr: 0,
            length: 8,
        });
        bench.latch();
        assert!(matches!(
            bench.stream.tick_one(1),
            Err(SimError::BufferUnderflow {
                needed: 8,
                available: 4
            })
        ));
    }

    #[test]
    fn write_length_must_be_word_multiple() {
        let mut bench = WriteBench::new();
        bench.push(1.0);
        bench.cmd.put(WriteCmd {
            wen: true,
            addr: 0,
            length: 6,
        });
        bench.latch();
        assert!(matches!(
            bench.stream.tick_one(1),
            Err(SimError::Alignment { .. })
        ));
    }
}
