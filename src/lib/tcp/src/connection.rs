use std::io::{Read, Write};
use std::net::SocketAddrV4;

use byte_queue::ByteQueue;
use bytes::Bytes;

use crate::buffer::{ReassemblyQueue, Segment, SendQueue};
use crate::seq::{Seq, SeqRange};
use crate::states::TimerId;
use crate::util::time::{Duration, Instant};
use crate::{
    Ipv4Header, Payload, PopPacketError, RecvError, SegmentStats, SendError, TcpConfig, TcpFlags,
    TcpHeader,
};

/// The send and receive halves of a TCP connection: sequence numbers, windows, buffers, and the
/// retransmission state. The individual TCP states decide what to do based on what this reports
/// (for example [`received_fin`](Self::received_fin)).
#[derive(Debug)]
pub(crate) struct Connection<I: Instant> {
    pub(crate) local_addr: SocketAddrV4,
    pub(crate) remote_addr: SocketAddrV4,
    config: TcpConfig,
    send: SendHalf,
    recv: RecvHalf,
    reset: Option<Reset>,
    need_to_send_rst: bool,
    need_to_ack: bool,
    send_rst_if_recv_payload: bool,
    rto: I::Duration,
    consecutive_timeouts: u32,
    /// The acked sequence number advanced, so the retransmission timer should be restarted.
    ack_progress: bool,
    pub(crate) retransmit_timer: Option<TimerId>,
}

#[derive(Debug)]
struct SendHalf {
    /// Bytes written by the application that haven't been given a sequence number yet.
    buffer: ByteQueue,
    /// SYN, data, and FIN segments from `snd_una` onwards.
    queue: SendQueue,
    /// The highest sequence number we've ever transmitted (exclusive).
    max_sent: Seq,
    /// The peer's most recently advertised receive window.
    window: u32,
    fin_requested: bool,
    /// The syn is the first segment in the queue, so any ack that advances the queue acks it.
    syn_acked: bool,
}

#[derive(Debug)]
struct RecvHalf {
    /// The peer's initial sequence number, once we've received its SYN.
    irs: Option<Seq>,
    /// The next sequence number we expect (`rcv_nxt`).
    next: Seq,
    buffer: ByteQueue,
    reassembly: ReassemblyQueue,
    /// The sequence number of the peer's FIN, if we've seen it (possibly out of order).
    fin_seq: Option<Seq>,
    fin_received: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Reset {
    Sent,
    Received,
}

impl<I: Instant> Connection<I> {
    pub fn new(
        local_addr: SocketAddrV4,
        remote_addr: SocketAddrV4,
        iss: Seq,
        config: TcpConfig,
    ) -> Self {
        Self {
            local_addr,
            remote_addr,
            config,
            send: SendHalf {
                buffer: ByteQueue::new(config.chunk_capacity),
                queue: SendQueue::new(iss),
                max_sent: iss,
                window: 0,
                fin_requested: false,
                syn_acked: false,
            },
            recv: RecvHalf {
                irs: None,
                next: Seq::new(0),
                buffer: ByteQueue::new(config.chunk_capacity),
                reassembly: ReassemblyQueue::new(),
                fin_seq: None,
                fin_received: false,
            },
            reset: None,
            need_to_send_rst: false,
            need_to_ack: false,
            send_rst_if_recv_payload: false,
            rto: I::Duration::from_millis(config.initial_rto_ms),
            consecutive_timeouts: 0,
            ack_progress: false,
            retransmit_timer: None,
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Returns `true` if the packet header src/dst addresses match this connection.
    pub fn packet_addrs_match(&self, header: &TcpHeader) -> bool {
        header.src() == self.remote_addr && header.dst() == self.local_addr
    }

    pub fn received_syn(&self) -> bool {
        self.recv.irs.is_some()
    }

    pub fn syn_was_acked(&self) -> bool {
        self.send.syn_acked
    }

    pub fn received_fin(&self) -> bool {
        self.recv.fin_received
    }

    pub fn fin_was_acked(&self) -> bool {
        self.send.queue.fin_added() && self.send.queue.is_empty()
    }

    pub fn is_reset(&self) -> bool {
        self.reset.is_some()
    }

    pub fn rst_was_received(&self) -> bool {
        self.reset == Some(Reset::Received)
    }

    pub fn recv_buf_has_data(&self) -> bool {
        self.recv.buffer.has_bytes()
    }

    pub fn send_buf_has_space(&self) -> bool {
        self.send_buffer_space() > 0
    }

    fn send_buffer_space(&self) -> usize {
        let used = self.send.buffer.num_bytes() + self.send.queue.len() as usize;
        self.config.send_buffer_size.saturating_sub(used)
    }

    /// The receive window, clamped to what fits in the header's 16-bit window field. Data in the
    /// reassembly queue already lies within the window, so it doesn't shrink it.
    fn recv_window(&self) -> u32 {
        let space = self
            .config
            .recv_buffer_size
            .saturating_sub(self.recv.buffer.num_bytes());
        std::cmp::min(space, u16::MAX as usize) as u32
    }

    /// Start closing the sending side. The FIN is sent after all buffered data.
    pub fn send_fin(&mut self) {
        self.send.fin_requested = true;
        self.add_fin_if_ready();
    }

    fn add_fin_if_ready(&mut self) {
        if self.send.fin_requested && !self.send.queue.fin_added() && !self.send.buffer.has_bytes()
        {
            self.send.queue.add_fin();
        }
    }

    /// Abort the connection. An RST will be the next (and last) packet popped.
    pub fn send_rst(&mut self) {
        if self.reset.is_some() {
            return;
        }

        self.reset = Some(Reset::Sent);
        self.need_to_send_rst = true;
        self.clear_buffers();
    }

    /// Any further payload from the peer will cause an RST (the application won't read it).
    pub fn send_rst_if_recv_payload(&mut self) {
        self.send_rst_if_recv_payload = true;
    }

    fn clear_buffers(&mut self) {
        self.send.buffer.clear();
        self.recv.buffer.clear();
        self.recv.reassembly.clear();
    }

    pub fn send(&mut self, reader: impl Read, len: usize) -> Result<usize, SendError> {
        if self.send.fin_requested {
            return Err(SendError::StreamClosed);
        }

        if len == 0 {
            return Ok(0);
        }

        let space = self.send_buffer_space();
        if space == 0 {
            return Err(SendError::Full);
        }

        let len = std::cmp::min(len, space);
        self.send
            .buffer
            .push_from(reader, len)
            .map_err(SendError::Io)
    }

    pub fn recv(&mut self, writer: impl Write, len: usize) -> Result<usize, RecvError> {
        if !self.recv.buffer.has_bytes() {
            if self.recv.fin_received {
                return Err(RecvError::StreamClosed);
            }
            return Err(RecvError::Empty);
        }

        let window_before = self.recv_window();

        let copied = self
            .recv
            .buffer
            .pop_into(writer, len)
            .map_err(RecvError::Io)?;

        // tell the peer that the window has re-opened if it was too small to send a full segment
        if window_before < self.config.mss && self.recv_window() >= self.config.mss {
            self.need_to_ack = true;
        }

        Ok(copied)
    }

    /// Process an incoming packet. Returns the number of bytes added to the receive buffer.
    pub fn push_packet(
        &mut self,
        header: &TcpHeader,
        payload: Payload,
        stats: &mut SegmentStats,
    ) -> u32 {
        let seq = Seq::new(header.seq);
        let ack = Seq::new(header.ack);

        if self.need_to_send_rst || self.reset == Some(Reset::Received) {
            return 0;
        }

        if header.flags.contains(TcpFlags::RST) {
            if self.rst_is_acceptable(header) {
                log::trace!("{} received RST from {}", self.local_addr, self.remote_addr);
                self.reset = Some(Reset::Received);
                self.clear_buffers();
            } else {
                stats.dropped_out_of_window += 1;
            }
            return 0;
        }

        if self.reset.is_some() {
            return 0;
        }

        // check the ack before acting on anything else in the packet
        if header.flags.contains(TcpFlags::ACK) && !self.send.queue.is_ackable(ack) {
            let acks_old_data = ack.is_before(self.send.queue.start_seq());
            if !acks_old_data {
                // acks something we never sent
                stats.dropped_out_of_window += 1;
                self.need_to_ack = self.received_syn();
                return 0;
            }
        }

        if header.flags.contains(TcpFlags::SYN) {
            match self.recv.irs {
                None => {
                    self.recv.irs = Some(seq);
                    self.recv.next = seq + 1;
                }
                // a retransmitted SYN; our response must have been lost
                Some(irs) if irs == seq => {}
                Some(_) => {
                    stats.dropped_malformed += 1;
                    return 0;
                }
            }
            self.need_to_ack = true;
        }

        if !self.received_syn() || !header.flags.intersects(TcpFlags::ACK | TcpFlags::SYN) {
            // nothing but a SYN is valid before the peer's SYN, and nothing but a SYN is valid
            // without an ACK
            stats.dropped_malformed += 1;
            return 0;
        }

        if header.flags.contains(TcpFlags::ACK) {
            self.process_ack(ack, header.window_size);
        } else {
            // the peer's window in a bare SYN
            self.send.window = header.window_size.into();
        }

        let data_seq = if header.flags.contains(TcpFlags::SYN) {
            seq + 1
        } else {
            seq
        };

        let fin = header.flags.contains(TcpFlags::FIN);

        if payload.is_empty() && !fin {
            return 0;
        }

        if self.send_rst_if_recv_payload && !payload.is_empty() {
            self.send_rst();
            return 0;
        }

        self.process_payload(data_seq, payload, fin, stats)
    }

    fn rst_is_acceptable(&self, header: &TcpHeader) -> bool {
        let seq = Seq::new(header.seq);
        let ack = Seq::new(header.ack);

        if !self.received_syn() {
            // in "syn-sent" an RST must acknowledge our SYN
            return header.flags.contains(TcpFlags::ACK) && ack == self.send.max_sent;
        }

        let window = SeqRange::with_len(self.recv.next, std::cmp::max(self.recv_window(), 1));
        window.contains(seq)
    }

    fn process_ack(&mut self, ack: Seq, window: u16) {
        if !self.send.queue.is_ackable(ack) {
            // an old duplicate ack; its window may be stale
            return;
        }

        if ack != self.send.queue.start_seq() {
            self.send.queue.advance_start(ack);
            self.send.syn_acked = true;
            self.consecutive_timeouts = 0;
            self.rto = I::Duration::from_millis(self.config.initial_rto_ms);
            self.ack_progress = true;
        }

        self.send.window = window.into();
    }

    fn process_payload(
        &mut self,
        data_seq: Seq,
        payload: Payload,
        fin: bool,
        stats: &mut SegmentStats,
    ) -> u32 {
        // every segment with data or a FIN gets an ACK, even if it's dropped
        self.need_to_ack = true;

        if self.recv.fin_received {
            stats.dropped_duplicate += 1;
            return 0;
        }

        let data = payload.concat();
        let len: u32 = data.len().try_into().unwrap();
        let segment = SeqRange::with_len(data_seq, len);

        // record the FIN even if it arrives before the data in front of it, but only if it's
        // within the window
        if fin
            && !segment.end.is_before(self.recv.next)
            && segment.end - self.recv.next <= self.recv_window()
        {
            self.recv.fin_seq.get_or_insert(segment.end);
        }

        let mut pushed = 0;

        if len > 0 {
            let window = SeqRange::with_len(self.recv.next, self.recv_window());

            match segment.clip_to(&window) {
                Some(accepted) => {
                    let offset = (accepted.start - data_seq) as usize;
                    let data = data.slice(offset..offset + accepted.len() as usize);

                    if accepted.start == self.recv.next {
                        pushed += self.append_in_order(data);
                    } else {
                        self.recv.reassembly.insert(accepted.start, data);
                    }
                }
                None if !segment.end.is_after(self.recv.next) => {
                    stats.dropped_duplicate += 1;
                }
                None => {
                    stats.dropped_out_of_window += 1;
                }
            }
        } else if fin && data_seq.is_before(self.recv.next) {
            stats.dropped_duplicate += 1;
        }

        if self.recv.fin_seq == Some(self.recv.next) {
            self.recv.fin_received = true;
            self.recv.next += 1;
        }

        pushed
    }

    /// Append bytes that start exactly at `rcv_nxt`, then anything in the reassembly queue that has
    /// become contiguous.
    fn append_in_order(&mut self, data: Bytes) -> u32 {
        let mut pushed = 0;
        let mut next_data = Some(data);

        while let Some(data) = next_data {
            let len: u32 = data.len().try_into().unwrap();
            self.recv.buffer.push(&data);
            self.recv.next += len;
            pushed += len;

            next_data = self.recv.reassembly.pop_ready(self.recv.next);
        }

        pushed
    }

    /// Returns `true` if there's a packet to pop.
    pub fn wants_to_send(&self) -> bool {
        if self.need_to_send_rst {
            return true;
        }

        if self.reset.is_some() {
            return false;
        }

        self.need_to_ack || self.can_transmit()
    }

    fn window_end(&self) -> Seq {
        self.send.queue.start_seq() + self.send.window
    }

    /// The number of bytes starting at `seq` that the peer's window allows us to send. With a
    /// closed window and nothing in flight we allow a single byte so that the retransmission timer
    /// keeps probing the window.
    fn window_allows(&self, seq: Seq) -> u32 {
        let end = self.window_end();
        let allowed = if seq.is_before(end) { end - seq } else { 0 };

        let nothing_in_flight = self.send.queue.transmitted_up_to() == self.send.queue.start_seq();
        if allowed == 0 && nothing_in_flight {
            return 1;
        }

        allowed
    }

    fn can_transmit(&self) -> bool {
        match self.send.queue.next_not_transmitted() {
            Some((_, Segment::Syn | Segment::Fin)) => true,
            Some((seq, Segment::Data(_))) => self.window_allows(seq) > 0,
            None => {
                let fin_ready = self.send.fin_requested && !self.send.queue.fin_added();
                let next = self.send.queue.next_seq();
                (self.send.buffer.has_bytes() && self.window_allows(next) > 0)
                    || (fin_ready && !self.send.buffer.has_bytes())
            }
        }
    }

    /// Move application bytes into the in-flight queue if everything queued has been transmitted.
    fn refill_send_queue(&mut self) {
        if self.send.queue.next_not_transmitted().is_none() {
            let allowed = self.window_allows(self.send.queue.next_seq());
            let max_len = std::cmp::min(allowed, self.config.mss) as usize;

            if let Some(chunk) = self.send.buffer.pop_chunk(max_len) {
                self.send.queue.add_data(chunk);
            }
        }

        self.add_fin_if_ready();
    }

    pub fn pop_packet(
        &mut self,
        stats: &mut SegmentStats,
    ) -> Result<(TcpHeader, Payload), PopPacketError> {
        if self.need_to_send_rst {
            self.need_to_send_rst = false;
            let header = self.new_header(TcpFlags::RST, self.send.max_sent);
            return Ok((header, Payload::default()));
        }

        if self.reset.is_some() {
            return Err(PopPacketError::NoPacket);
        }

        self.refill_send_queue();

        let next = self.send.queue.next_not_transmitted();

        let (seq, flags, payload) = match next {
            Some((seq, Segment::Syn)) => (seq, TcpFlags::SYN, Payload::default()),
            Some((seq, Segment::Fin)) => (seq, TcpFlags::FIN, Payload::default()),
            Some((seq, Segment::Data(data))) if self.window_allows(seq) > 0 => {
                let len = std::cmp::min(self.window_allows(seq), self.config.mss);
                let len = std::cmp::min(len as usize, data.len());
                (seq, TcpFlags::PSH, Payload::from(data.slice(..len)))
            }
            _ if self.need_to_ack => {
                let header = self.new_header(TcpFlags::empty(), self.send.queue.transmitted_up_to());
                self.need_to_ack = false;
                return Ok((header, Payload::default()));
            }
            _ => return Err(PopPacketError::NoPacket),
        };

        let len = if payload.is_empty() { 1 } else { payload.len() };
        let end = seq + len;

        if seq.is_before(self.send.max_sent) {
            stats.retransmitted += 1;
        }

        self.send.queue.mark_as_transmitted(end);
        self.send.max_sent = self.send.max_sent.max(end);

        let header = self.new_header(flags, seq);

        // the ack was piggybacked
        if header.flags.contains(TcpFlags::ACK) {
            self.need_to_ack = false;
        }

        Ok((header, payload))
    }

    /// Build a header from this connection. The ACK flag, acknowledgement number, and window are
    /// filled in once we've received the peer's SYN.
    fn new_header(&self, mut flags: TcpFlags, seq: Seq) -> TcpHeader {
        let ack = if self.received_syn() {
            flags.insert(TcpFlags::ACK);
            self.recv.next
        } else {
            Seq::new(0)
        };

        TcpHeader {
            ip: Ipv4Header {
                src: *self.local_addr.ip(),
                dst: *self.remote_addr.ip(),
            },
            flags,
            src_port: self.local_addr.port(),
            dst_port: self.remote_addr.port(),
            seq: seq.into(),
            ack: ack.into(),
            window_size: self.recv_window().try_into().unwrap(),
        }
    }

    /// Returns `true` if there are transmitted segments that the peer hasn't acknowledged, which
    /// is when the retransmission timer should be running.
    pub fn has_unacked(&self) -> bool {
        self.reset.is_none() && self.send.queue.start_seq() != self.send.max_sent
    }

    pub fn rto(&self) -> I::Duration {
        self.rto
    }

    /// Returns `true` once if the peer acknowledged new data since the last call.
    pub fn take_ack_progress(&mut self) -> bool {
        std::mem::take(&mut self.ack_progress)
    }

    /// The retransmission timer fired: back off and resend everything from `snd_una`. Returns
    /// `false` if we've retransmitted too many times and should give up on the connection.
    pub fn on_retransmit_timeout(&mut self) -> bool {
        self.retransmit_timer = None;

        if !self.has_unacked() {
            return true;
        }

        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts > self.config.max_retransmits {
            return false;
        }

        let max_rto = I::Duration::from_millis(self.config.max_rto_ms);
        self.rto = std::cmp::min(self.rto.saturating_mul(2), max_rto);
        self.send.queue.rewind();

        log::trace!(
            "{} retransmission timeout #{} for {}, next rto {:?}",
            self.local_addr,
            self.consecutive_timeouts,
            self.remote_addr,
            self.rto,
        );

        true
    }
}
