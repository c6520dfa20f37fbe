//! Client sessions and per-session audio buffering.

use crate::clock::Clock;
use crate::defaults;
use crate::hub::protocol::ServerMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch, Notify};
use uuid::Uuid;

/// One frame of client audio with arrival metadata. Immutable after entry.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub client_id: Uuid,
    pub sequence: u64,
    pub received_at: Instant,
    /// Raw 16-bit little-endian mono PCM at 16kHz.
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    /// Number of samples in this frame.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Frame duration in milliseconds at the given sample rate.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        (self.sample_count() as u32 * 1000) / sample_rate
    }
}

/// Result of pushing a frame into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// The oldest frame was dropped; `warn` is true only for the first
    /// overflow of a burst.
    DroppedOldest { warn: bool },
}

/// Bounded drop-oldest FIFO of audio frames.
#[derive(Debug)]
pub struct AudioBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
    overflowing: bool,
    dropped_total: u64,
}

impl AudioBuffer {
    /// Creates a buffer holding up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            overflowing: false,
            dropped_total: 0,
        }
    }

    /// Push a frame, dropping the oldest on overflow.
    pub fn push(&mut self, frame: AudioFrame) -> PushOutcome {
        if self.frames.len() >= self.capacity {
            self.frames.pop_front();
            self.frames.push_back(frame);
            self.dropped_total += 1;
            let warn = !self.overflowing;
            self.overflowing = true;
            PushOutcome::DroppedOldest { warn }
        } else {
            self.overflowing = false;
            self.frames.push_back(frame);
            PushOutcome::Stored
        }
    }

    /// Pop the oldest frame.
    pub fn pop(&mut self) -> Option<AudioFrame> {
        self.frames.pop_front()
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames dropped over the buffer's lifetime.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// Release all buffered frames.
    pub fn drain(&mut self) {
        self.frames.clear();
    }
}

/// Outbound item on a session's send queue.
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    /// Protocol-level ping carrying no payload.
    Ping,
}

#[derive(Debug)]
struct LivenessState {
    alive: bool,
    last_heartbeat: Instant,
}

/// Heartbeat bookkeeping for one session.
#[derive(Debug)]
pub struct Liveness {
    state: Mutex<LivenessState>,
}

impl Liveness {
    fn new(now: Instant) -> Self {
        Self {
            state: Mutex::new(LivenessState {
                alive: true,
                last_heartbeat: now,
            }),
        }
    }

    /// Mark the peer alive and refresh its heartbeat instant.
    pub fn refresh(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();
        state.alive = true;
        state.last_heartbeat = now;
    }

    /// Clear the alive flag ahead of a ping; returns the previous value.
    pub fn take_alive(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        std::mem::replace(&mut state.alive, false)
    }

    /// Time since the last heartbeat.
    pub fn since_last_heartbeat(&self, now: Instant) -> std::time::Duration {
        now.duration_since(self.state.lock().unwrap().last_heartbeat)
    }
}

/// Server-side state for one connected client.
pub struct ClientSession {
    pub id: Uuid,
    outbound: mpsc::Sender<Outbound>,
    pub buffer: Mutex<AudioBuffer>,
    pub buffer_notify: Notify,
    pub liveness: Liveness,
    sequence: AtomicU64,
    send_failures: AtomicU64,
    terminated: AtomicBool,
    cancel_tx: watch::Sender<bool>,
}

impl ClientSession {
    /// Creates a session and its outbound queue receiver.
    pub fn new(clock: &dyn Clock) -> (Arc<Self>, mpsc::Receiver<Outbound>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            outbound,
            buffer: Mutex::new(AudioBuffer::new(defaults::AUDIO_BUFFER_FRAMES)),
            buffer_notify: Notify::new(),
            liveness: Liveness::new(clock.now()),
            sequence: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            cancel_tx,
        });
        (session, outbound_rx, cancel_rx)
    }

    /// Next frame sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue a message for delivery, best-effort.
    ///
    /// A saturated or closed queue drops the message and records a failure;
    /// the pipeline is never blocked by a slow client.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.send_outbound(Outbound::Message(message))
    }

    /// Queue a protocol ping, best-effort.
    pub fn send_ping(&self) -> bool {
        self.send_outbound(Outbound::Ping)
    }

    fn send_outbound(&self, outbound: Outbound) -> bool {
        if self.outbound.try_send(outbound).is_ok() {
            true
        } else {
            self.send_failures.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    /// Dropped outbound messages so far.
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::SeqCst)
    }

    /// Flag the session terminated; true only for the first caller.
    pub fn begin_termination(&self) -> bool {
        !self.terminated.swap(true, Ordering::SeqCst)
    }

    /// Signal session tasks to stop and release the audio buffer.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        self.buffer.lock().unwrap().drain();
        self.buffer_notify.notify_waiters();
    }
}
