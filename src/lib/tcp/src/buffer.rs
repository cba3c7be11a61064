use std::collections::LinkedList;

use bytes::{Buf, Bytes};

use crate::seq::{Seq, SeqRange};

/// Segments that have been assigned sequence numbers but not yet acknowledged by the peer. Data
/// enters this queue one segment at a time from the connection's send buffer, so the queue only
/// ever holds at most a window's worth of bytes.
#[derive(Debug)]
pub(crate) struct SendQueue {
    segments: LinkedList<Segment>,
    // exclusive
    transmitted_up_to: Seq,
    // inclusive; this is snd_una
    start_seq: Seq,
    // exclusive
    end_seq: Seq,
    fin_added: bool,
}

impl SendQueue {
    pub fn new(initial_seq: Seq) -> Self {
        let mut queue = Self {
            segments: LinkedList::new(),
            transmitted_up_to: initial_seq,
            start_seq: initial_seq,
            end_seq: initial_seq,
            fin_added: false,
        };

        queue.add_segment(Segment::Syn);

        queue
    }

    pub fn add_fin(&mut self) {
        self.add_segment(Segment::Fin);
    }

    pub fn add_data(&mut self, data: Bytes) {
        self.add_segment(Segment::Data(data));
    }

    fn add_segment(&mut self, seg: Segment) {
        assert!(!self.fin_added);

        if matches!(seg, Segment::Fin) {
            self.fin_added = true;
        }

        if seg.len() == 0 {
            return;
        }

        self.end_seq += seg.len();
        self.segments.push_back(seg);
    }

    pub fn fin_added(&self) -> bool {
        self.fin_added
    }

    pub fn start_seq(&self) -> Seq {
        self.start_seq
    }

    /// The sequence number that the next added segment will start at.
    pub fn next_seq(&self) -> Seq {
        self.end_seq
    }

    pub fn transmitted_up_to(&self) -> Seq {
        self.transmitted_up_to
    }

    pub fn len(&self) -> u32 {
        self.end_seq - self.start_seq
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `seq` is one of the sequence numbers that the peer could acknowledge, which
    /// is any sequence number from the start of the queue to the end of the queue (inclusive).
    pub fn is_ackable(&self, seq: Seq) -> bool {
        SeqRange::new(self.start_seq, self.end_seq).contains(seq) || seq == self.end_seq
    }

    /// Drop all data before `new_start`, which has been acknowledged by the peer.
    pub fn advance_start(&mut self, new_start: Seq) {
        assert!(self.is_ackable(new_start));

        while self.start_seq != new_start {
            let advance_by = new_start - self.start_seq;

            // can't be empty due to the assertion above
            let Some(front) = self.segments.front_mut() else {
                unreachable!();
            };

            if front.len() <= advance_by {
                self.start_seq += front.len();
                self.segments.pop_front();
                continue;
            }

            let Segment::Data(data) = front else {
                // syn and fin segments have a length of 1 so were removed above
                unreachable!();
            };

            data.advance(advance_by as usize);
            self.start_seq += advance_by;
        }

        // acked data may not have been marked as transmitted if we rewound after a timeout
        if self.transmitted_up_to.is_before(self.start_seq) {
            self.transmitted_up_to = self.start_seq;
        }
    }

    /// Get the segment starting at the first sequence number that hasn't been transmitted. Data
    /// segments may be partially transmitted, in which case only the remaining bytes are returned.
    pub fn next_not_transmitted(&self) -> Option<(Seq, Segment)> {
        let target_seq = self.transmitted_up_to;

        if !SeqRange::new(self.start_seq, self.end_seq).contains(target_seq) {
            return None;
        }

        let mut seq_cursor = self.start_seq;
        for seg in &self.segments {
            let len = seg.len();

            if SeqRange::with_len(seq_cursor, len).contains(target_seq) {
                let seg = match seg {
                    Segment::Syn => Segment::Syn,
                    Segment::Fin => Segment::Fin,
                    Segment::Data(chunk) => {
                        let chunk_offset = (target_seq - seq_cursor) as usize;
                        Segment::Data(chunk.slice(chunk_offset..))
                    }
                };

                return Some((target_seq, seg));
            }

            seq_cursor += len;
        }

        unreachable!();
    }

    pub fn mark_as_transmitted(&mut self, up_to: Seq) {
        assert!(self.is_ackable(up_to));
        self.transmitted_up_to = up_to;
    }

    /// Go back to the first unacknowledged sequence number so that every outstanding segment will be
    /// transmitted again.
    pub fn rewind(&mut self) {
        self.transmitted_up_to = self.start_seq;
    }
}

#[derive(Debug)]
pub(crate) enum Segment {
    Data(Bytes),
    Syn,
    Fin,
}

impl Segment {
    pub fn len(&self) -> u32 {
        match self {
            Segment::Syn | Segment::Fin => 1,
            Segment::Data(data) => data.len().try_into().unwrap(),
        }
    }
}

/// Received segments that start after the next expected sequence number. They're held here until
/// the gap before them is filled.
#[derive(Debug, Default)]
pub(crate) struct ReassemblyQueue {
    // sorted by sequence number; entries may overlap
    segments: Vec<(Seq, Bytes)>,
    num_bytes: usize,
}

impl ReassemblyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn num_bytes(&self) -> usize {
        self.num_bytes
    }

    pub fn insert(&mut self, seq: Seq, data: Bytes) {
        if data.is_empty() {
            return;
        }

        let pos = self
            .segments
            .iter()
            .position(|(other, _)| seq.is_before(*other))
            .unwrap_or(self.segments.len());

        // identical retransmissions of an already-queued segment are common, so skip those
        if pos > 0 {
            let (prev_seq, prev) = &self.segments[pos - 1];
            if *prev_seq == seq && prev.len() >= data.len() {
                return;
            }
        }

        self.num_bytes += data.len();
        self.segments.insert(pos, (seq, data));
    }

    /// Pop the bytes starting exactly at `next`, if the gap before them has been filled. Entries that
    /// lie entirely before `next` are discarded along the way.
    pub fn pop_ready(&mut self, next: Seq) -> Option<Bytes> {
        while let Some((seq, _)) = self.segments.first() {
            if seq.is_after(next) {
                return None;
            }

            let (seq, mut data) = self.segments.remove(0);
            self.num_bytes -= data.len();

            let end = seq + u32::try_from(data.len()).unwrap();
            if !end.is_after(next) {
                // already have all of these bytes
                continue;
            }

            data.advance((next - seq) as usize);
            return Some(data);
        }

        None
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.num_bytes = 0;
    }
}
