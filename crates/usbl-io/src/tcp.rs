//! TCP streamer: accepts one client, negotiates an application-level heartbeat, and
//! streams channel frames with a CRC32-checked wire format. Recovers after peer loss by draining
//! the net queue and returning to LISTENING.
//!
//! Built on blocking `std::net` with read/write timeouts: the concurrency model here is
//! condvar/thread-blocking end to end, so there is no async runtime anywhere else in this crate
//! for a TCP task to interoperate with.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use usbl_core::{ChannelFrame, Queue, UsblError, UsblResult};

use crate::wire::{WireFrame, SIGNAL_TYPE_HEARTBEAT_ACK};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_ACK_TIMEOUT: Duration = Duration::from_millis(300);
const MAX_HEARTBEAT_MISSES: u32 = 3;
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerPhase {
    Listening,
    Connected,
    Streaming,
}

pub struct TcpStreamer {
    listener: TcpListener,
    connect_timeout: Duration,
    send_timeout: Duration,
    phase: StreamerPhase,
}

impl TcpStreamer {
    pub fn bind(port: u16, connect_timeout: Duration, send_timeout: Duration) -> UsblResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            connect_timeout,
            send_timeout,
            phase: StreamerPhase::Listening,
        })
    }

    pub fn local_addr(&self) -> UsblResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn phase(&self) -> StreamerPhase {
        self.phase
    }

    /// Run until `enabled` is cleared: alternate between LISTENING and STREAMING for as long as
    /// clients come and go.
    pub fn run(&mut self, queue: &Queue<ChannelFrame>, enabled: &AtomicBool) {
        while enabled.load(Ordering::Acquire) {
            self.phase = StreamerPhase::Listening;
            match self.wait_for_connection(enabled) {
                Some(stream) => {
                    self.phase = StreamerPhase::Connected;
                    self.phase = StreamerPhase::Streaming;
                    self.stream_loop(stream, queue, enabled);
                }
                None => queue.drain(),
            }
        }
    }

    /// `waitForConnection(connectTimeoutMs)`: poll the nonblocking listener until a client
    /// arrives or the timeout elapses, draining the net queue on timeout so a long idle
    /// LISTENING phase doesn't build up stale backlog.
    fn wait_for_connection(&mut self, enabled: &AtomicBool) -> Option<TcpStream> {
        let deadline = Instant::now() + self.connect_timeout;
        while Instant::now() < deadline && enabled.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, _addr)) => return Some(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::warn!("TCP accept error: {e}");
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
        None
    }

    fn stream_loop(&mut self, mut stream: TcpStream, queue: &Queue<ChannelFrame>, enabled: &AtomicBool) {
        if let Err(e) = stream.set_read_timeout(Some(HEARTBEAT_ACK_TIMEOUT)) {
            log::warn!("failed to set read timeout: {e}");
        }

        let mut misses = 0u32;
        // Negotiate the heartbeat immediately on connect rather than waiting out the first
        // interval, so peer liveness is confirmed before any data is trusted to flow.
        let mut last_heartbeat = Instant::now() - HEARTBEAT_INTERVAL;

        while enabled.load(Ordering::Acquire) {
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                match self.send_heartbeat_and_check(&mut stream) {
                    Ok(()) => misses = 0,
                    Err(err) => {
                        misses += 1;
                        log::warn!("heartbeat miss {misses}/{MAX_HEARTBEAT_MISSES}: {err}");
                        if misses >= MAX_HEARTBEAT_MISSES {
                            log::warn!("TCP peer lost, returning to LISTENING");
                            let _ = stream.shutdown(Shutdown::Both);
                            queue.drain();
                            return;
                        }
                    }
                }
                last_heartbeat = Instant::now();
            }

            // A blocking wait_and_pop here would stall the heartbeat check indefinitely when no
            // frames arrive, so the data side polls non-blockingly between heartbeat checks.
            match queue.try_pop() {
                Some(frame) => {
                    if let Err(err) = self.send_frame(&mut stream, &frame) {
                        log::warn!("TCP send failed, returning to LISTENING: {err}");
                        let _ = stream.shutdown(Shutdown::Both);
                        queue.drain();
                        return;
                    }
                }
                None => std::thread::sleep(QUEUE_POLL_INTERVAL),
            }
        }
    }

    fn send_heartbeat_and_check(&self, stream: &mut TcpStream) -> UsblResult<()> {
        let hb = WireFrame::heartbeat();
        send_all_with_timeout(stream, &hb.encode(), self.send_timeout)?;

        let mut header = [0u8; 21];
        stream
            .read_exact(&mut header)
            .map_err(|e| UsblError::PeerLost(e.to_string()))?;
        let ack = WireFrame::decode(&header)?;
        if ack.signal_type != SIGNAL_TYPE_HEARTBEAT_ACK {
            return Err(UsblError::ProtocolMismatch);
        }
        Ok(())
    }

    fn send_frame(&self, stream: &mut TcpStream, frame: &ChannelFrame) -> UsblResult<()> {
        let wire = WireFrame::data(frame);
        send_all_with_timeout(stream, &wire.encode(), self.send_timeout)
    }
}

/// `send_all` with a per-call write timeout; every byte of one frame is emitted contiguously.
fn send_all_with_timeout(stream: &mut TcpStream, buf: &[u8], timeout: Duration) -> UsblResult<()> {
    stream.set_write_timeout(Some(timeout))?;
    stream
        .write_all(buf)
        .map_err(|e| UsblError::PeerLost(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn heartbeat_exchange_keeps_connection_alive() {
        let mut streamer =
            TcpStreamer::bind(0, Duration::from_millis(500), Duration::from_millis(500)).unwrap();
        let addr = streamer.local_addr().unwrap();
        let queue = Arc::new(Queue::new());
        let enabled = Arc::new(AtomicBool::new(true));
        let enabled_run = Arc::clone(&enabled);
        let queue_run = Arc::clone(&queue);

        let server = thread::spawn(move || streamer.run(&queue_run, &enabled_run));

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut header = [0u8; 21];
        client.read_exact(&mut header).unwrap();
        let hb = WireFrame::decode(&header).unwrap();
        assert_eq!(hb.signal_type, 0);

        let ack = WireFrame::heartbeat_ack();
        client.write_all(&ack.encode()).unwrap();

        enabled.store(false, Ordering::Release);
        let _ = server.join();
    }

    #[test]
    fn data_frame_is_delivered_to_client() {
        let mut streamer =
            TcpStreamer::bind(0, Duration::from_millis(500), Duration::from_millis(500)).unwrap();
        let addr = streamer.local_addr().unwrap();
        let queue = Arc::new(Queue::new());
        let enabled = Arc::new(AtomicBool::new(true));
        let enabled_run = Arc::clone(&enabled);
        let queue_run = Arc::clone(&queue);

        let server = thread::spawn(move || streamer.run(&queue_run, &enabled_run));

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // The server negotiates a heartbeat immediately on connect; ack it like a real client
        // before looking for the data frame.
        let mut hb_header = [0u8; 21];
        client.read_exact(&mut hb_header).unwrap();
        let hb = WireFrame::decode(&hb_header).unwrap();
        assert_eq!(hb.signal_type, 0);
        client.write_all(&WireFrame::heartbeat_ack().encode()).unwrap();

        let frame = ChannelFrame::from_rows(vec![vec![1.0, 2.0, 3.0]]).unwrap();
        queue.push(frame.clone());

        let mut header = [0u8; 17];
        client.read_exact(&mut header).unwrap();
        let packet_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let mut rest = vec![0u8; packet_length as usize - 17];
        client.read_exact(&mut rest).unwrap();
        let mut full = header.to_vec();
        full.extend_from_slice(&rest);
        let decoded = WireFrame::decode(&full).unwrap();
        assert_eq!(decoded.signal_type, 1);
        assert_eq!(decoded.payload, vec![1.0, 2.0, 3.0]);

        enabled.store(false, Ordering::Release);
        let _ = server.join();
    }
}
