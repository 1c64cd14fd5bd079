use std::collections::VecDeque;

use log::info;

use crate::base::behavior::ModuleBehaviors;
use crate::base::port::{Input, Output, Port};
use crate::burst::{PeId, Word};
use crate::error::{Result, SimError};
use crate::pe::PeRange;
use crate::sim::summary::{PeSummary, RunSummary};
use crate::sim::workload::Kernel;
use crate::timeq::Time;

use super::{ReadBeat, ReadCmd, WriteBeat, WriteCmd};

const WORD_BYTES: usize = <f32 as Word>::BYTES;

/// Operand side of the word-level PE: drives one read stream and keeps its receive buffer.
#[derive(Default)]
pub struct OperandPort {
    pub cmd: Port<Output, ReadCmd>,
    pub din: Port<Input, ReadBeat<f32>>,
    base: u64,
    issued: usize,
    // words not yet reserved by an issued read
    avail: usize,
    queue: VecDeque<f32>,
    bursts: usize,
}

impl OperandPort {
    fn new(base: u64, depth: usize) -> Self {
        Self {
            base,
            avail: depth,
            ..Self::default()
        }
    }

    fn tick(&mut self, total: usize, chunk: usize) {
        let remaining = total - self.issued;
        let words = chunk.min(remaining);
        if remaining > 0 && words <= self.avail {
            self.cmd.put(ReadCmd {
                ena: true,
                addr: self.base + (self.issued * WORD_BYTES) as u64,
                length: words * WORD_BYTES,
            });
            self.issued += words;
            self.avail -= words;
            self.bursts += 1;
        } else {
            self.cmd.put(ReadCmd::default());
        }

        let beat = self.din.get();
        if beat.valid {
            self.queue.push_back(beat.data);
        }
    }
}

/// Word-level vector PE: fetches A and B through read streams, applies the kernel one element per
/// tick and pushes results to a write stream, enabling a write for each full burst or the tail.
pub struct VectorPe {
    id: PeId,
    kernel: Kernel,
    elements: usize,
    chunk: usize,
    pub operands: [OperandPort; 2],
    pub write_cmd: Port<Output, WriteCmd>,
    pub dout: Port<Output, WriteBeat<f32>>,
    pub write_done: Port<Input, bool>,
    result_base: u64,
    results: VecDeque<f32>,
    // words handed to the write stream but not yet covered by a write enable
    pending: usize,
    written: usize,
    writes_issued: usize,
    writes_done: usize,
    computed: usize,
    done: bool,
}

impl VectorPe {
    pub fn new(
        id: PeId,
        range: PeRange,
        kernel: Kernel,
        buffer_depth: usize,
        burst_bytes: usize,
    ) -> Result<Self> {
        let chunk = burst_bytes / WORD_BYTES;
        if chunk == 0 || burst_bytes % WORD_BYTES != 0 || buffer_depth < chunk {
            return Err(SimError::config(format!(
                "burst of {} bytes does not fit a {}-word buffer of {}-byte words",
                burst_bytes, buffer_depth, WORD_BYTES
            )));
        }
        Ok(Self {
            id,
            kernel,
            elements: range.elements,
            chunk,
            operands: [
                OperandPort::new(range.a, buffer_depth),
                OperandPort::new(range.b, buffer_depth),
            ],
            write_cmd: Port::new(),
            dout: Port::new(),
            write_done: Port::new(),
            result_base: range.p,
            results: VecDeque::new(),
            pending: 0,
            written: 0,
            writes_issued: 0,
            writes_done: 0,
            computed: 0,
            done: range.elements == 0,
        })
    }

    pub fn id(&self) -> PeId {
        self.id
    }

    fn compute(&mut self) {
        let [a, b] = &mut self.operands;
        if let (Some(x), Some(y)) = (a.queue.front().copied(), b.queue.front().copied()) {
            a.queue.pop_front();
            b.queue.pop_front();
            a.avail += 1;
            b.avail += 1;
            self.results.push_back(self.kernel.apply(x, y));
            self.computed += 1;
        }
    }

    fn write_back(&mut self) {
        match self.results.pop_front() {
            Some(data) => {
                self.dout.put(WriteBeat { data, valid: true });
                self.pending += 1;
            }
            None => self.dout.put(WriteBeat::default()),
        }

        let tail = self.elements - self.written;
        if self.pending > 0 && (self.pending == self.chunk || self.pending == tail) {
            self.write_cmd.put(WriteCmd {
                wen: true,
                addr: self.result_base + (self.written * WORD_BYTES) as u64,
                length: self.pending * WORD_BYTES,
            });
            self.written += self.pending;
            self.pending = 0;
            self.writes_issued += 1;
        } else {
            self.write_cmd.put(WriteCmd::default());
        }
    }
}

impl ModuleBehaviors for VectorPe {
    fn tick_one(&mut self, now: Time) -> Result<()> {
        for port in self.operands.iter_mut() {
            port.tick(self.elements, self.chunk);
        }
        self.compute();
        self.write_back();

        if self.write_done.get() {
            self.writes_done += 1;
        }
        if !self.done && self.written == self.elements && self.writes_done == self.writes_issued {
            info!("@{}ns pe {} computation done", now, self.id);
            self.done = true;
        }
        Ok(())
    }

    fn finished(&self) -> bool {
        self.done
    }

    fn summarize(&self, summary: &mut RunSummary) {
        summary.pes.push(PeSummary {
            pe: self.id,
            elements: self.computed,
            bursts_issued: self.operands.iter().map(|p| p.bursts).sum::<usize>() + self.writes_issued,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::port::{link, Latch};

    struct Bench {
        pe: VectorPe,
        reads: [Port<Input, ReadCmd>; 2],
        beats: [Port<Output, ReadBeat<f32>>; 2],
        write_cmd: Port<Input, WriteCmd>,
        dout: Port<Input, WriteBeat<f32>>,
        write_done: Port<Output, bool>,
        latches: Vec<Box<dyn Latch>>,
    }

    impl Bench {
        fn new(elements: usize, depth: usize) -> Self {
            let range = PeRange {
                a: 0,
                b: 0x100,
                p: 0x200,
                elements,
            };
            let mut pe = VectorPe::new(0, range, Kernel::Add, depth, 16).unwrap();
            let mut reads = [Port::new(), Port::new()];
            let mut beats = [Port::new(), Port::new()];
            let mut write_cmd = Port::new();
            let mut dout = Port::new();
            let mut write_done = Port::new();
            let mut latches: Vec<Box<dyn Latch>> = Vec::new();
            for i in 0..2 {
                latches.push(Box::new(link(&mut reads[i], &mut pe.operands[i].cmd)));
                latches.push(Box::new(link(&mut pe.operands[i].din, &mut beats[i])));
            }
            latches.push(Box::new(link(&mut write_cmd, &mut pe.write_cmd)));
            latches.push(Box::new(link(&mut dout, &mut pe.dout)));
            latches.push(Box::new(link(&mut pe.write_done, &mut write_done)));
            Self {
                pe,
                reads,
                beats,
                write_cmd,
                dout,
                write_done,
                latches,
            }
        }

        fn latch(&self) {
            self.latches.iter().for_each(|l| l.latch());
        }
    }

    fn beat(data: f32) -> ReadBeat<f32> {
        ReadBeat {
            data,
            valid: true,
            complete: false,
        }
    }

    #[test]
    fn reads_wait_for_buffer_space() {
        let mut bench = Bench::new(12, 8);
        let mut cmds = Vec::new();
        for now in 1..=4 {
            bench.pe.tick_one(now).unwrap();
            bench.latch();
            cmds.push(bench.reads[0].get());
        }
        let issued: Vec<_> = cmds.iter().filter(|c| c.ena).map(|c| (c.addr, c.length)).collect();
        // two 4-word reads fill the 8-word buffer; the third must wait
        assert_eq!(vec![(0, 16), (16, 16)], issued);

        bench.beats[0].put(beat(1.0));
        bench.beats[1].put(beat(2.0));
        bench.latch();
        bench.pe.tick_one(5).unwrap();
        bench.latch();
        assert!(!bench.reads[0].get().ena);
        // one element consumed frees one word; still short of a whole burst
        bench.pe.tick_one(6).unwrap();
        bench.latch();
        assert!(!bench.reads[0].get().ena);
    }

    #[test]
    fn write_enable_follows_full_burst_and_tail() {
        let mut bench = Bench::new(5, 8);
        let mut enables = Vec::new();
        let mut words = Vec::new();
        for now in 1..=12 {
            let i = now as usize;
            if i <= 5 {
                bench.beats[0].put(beat(i as f32));
                bench.beats[1].put(beat(10.0));
            }
            bench.latch();
            bench.pe.tick_one(now).unwrap();
            bench.latch();
            let out = bench.dout.get();
            if out.valid {
                words.push(out.data);
            }
            let cmd = bench.write_cmd.get();
            if cmd.wen {
                enables.push((cmd.addr, cmd.length, words.len()));
            }
        }
        assert_eq!(vec![11.0, 12.0, 13.0, 14.0, 15.0], words);
        // the enable goes out on the same tick as the last word it covers
        assert_eq!(vec![(0x200, 16, 4), (0x210, 4, 5)], enables);
        assert!(!bench.pe.finished());

        for now in 13..=14 {
            bench.write_done.put(true);
            bench.latch();
            bench.pe.tick_one(now).unwrap();
        }
        assert!(bench.pe.finished());
        let mut summary = RunSummary::default();
        bench.pe.summarize(&mut summary);
        assert_eq!(5, summary.pes[0].elements);
    }

    #[test]
    fn empty_range_is_done() {
        let bench = Bench::new(0, 4);
        assert!(bench.pe.finished());
    }
}
