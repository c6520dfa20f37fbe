//! Volume-command dispatcher.
//!
//! Turns the verdict stream into dim/restore commands with debouncing and a
//! silence timer driving auto-restore. The transition logic is synchronous
//! and clock-parameterized; a small actor task serializes verdict delivery
//! and timer expiry so dispatcher state has exactly one mutator.

use crate::attention::{AttentionVerdict, VerdictKind};
use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Volume command kind, in wire spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "LOWER_VOLUME")]
    Dim,
    #[serde(rename = "RESTORE_VOLUME")]
    Restore,
}

/// A volume command sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCommand {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub timestamp: DateTime<Utc>,
    pub trigger_reason: VerdictKind,
    pub confidence: f32,
}

impl VolumeCommand {
    fn new(kind: CommandKind, trigger_reason: VerdictKind, confidence: f32) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            trigger_reason,
            confidence,
        }
    }
}

/// Dispatcher volume state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Normal,
    Dimmed,
}

/// Synchronous dispatcher core.
pub struct Dispatcher<C: Clock = SystemClock> {
    state: DispatcherState,
    timer_deadline: Option<Instant>,
    last_command_at: Option<Instant>,
    silence_timeout: Duration,
    sensitivity: f32,
    clock: C,
}

impl Dispatcher<SystemClock> {
    /// Creates a dispatcher on the system clock.
    pub fn new(silence_timeout: Duration, sensitivity: f32) -> Self {
        Self::with_clock(silence_timeout, sensitivity, SystemClock)
    }
}

impl<C: Clock> Dispatcher<C> {
    /// Creates a dispatcher with the given clock (for deterministic tests).
    pub fn with_clock(silence_timeout: Duration, sensitivity: f32, clock: C) -> Self {
        Self {
            state: DispatcherState::Normal,
            timer_deadline: None,
            last_command_at: None,
            silence_timeout,
            sensitivity: sensitivity.clamp(0.0, 1.0),
            clock,
        }
    }

    /// Apply one verdict; returns the command to emit, if any.
    pub fn on_verdict(&mut self, verdict: &AttentionVerdict) -> Option<VolumeCommand> {
        match (self.state, verdict.kind) {
            (DispatcherState::Normal, VerdictKind::DefinitelyToMe) => {
                Some(self.dim(VerdictKind::DefinitelyToMe, 0.95))
            }
            (DispatcherState::Normal, VerdictKind::ProbablyToMe) => {
                if self.sensitivity > 0.5 {
                    Some(self.dim(VerdictKind::ProbablyToMe, 0.7))
                } else {
                    None
                }
            }
            (DispatcherState::Normal, VerdictKind::Ignore) => None,
            (DispatcherState::Dimmed, VerdictKind::DefinitelyToMe) => {
                // Already dimmed: debounce, keep the dim alive
                self.start_timer();
                None
            }
            (DispatcherState::Dimmed, VerdictKind::ProbablyToMe) => {
                if self.sensitivity > 0.5 {
                    self.start_timer();
                }
                None
            }
            (DispatcherState::Dimmed, VerdictKind::Ignore) => {
                if self.timer_deadline.is_none() {
                    self.start_timer();
                }
                None
            }
        }
    }

    /// Handle silence-timer expiry; restores when still dimmed.
    pub fn on_timer_expired(&mut self) -> Option<VolumeCommand> {
        self.timer_deadline = None;
        if self.state != DispatcherState::Dimmed {
            return None;
        }
        self.state = DispatcherState::Normal;
        self.last_command_at = Some(self.clock.now());
        info!("silence timeout, restoring volume");
        Some(VolumeCommand::new(
            CommandKind::Restore,
            VerdictKind::Ignore,
            1.0,
        ))
    }

    /// Cancel the timer and restore if dimmed.
    pub fn force_restore(&mut self) -> Option<VolumeCommand> {
        self.timer_deadline = None;
        if self.state != DispatcherState::Dimmed {
            return None;
        }
        self.state = DispatcherState::Normal;
        self.last_command_at = Some(self.clock.now());
        Some(VolumeCommand::new(
            CommandKind::Restore,
            VerdictKind::Ignore,
            1.0,
        ))
    }

    /// Emit a dim unconditionally and start a fresh timer.
    pub fn force_dim(&mut self) -> VolumeCommand {
        self.timer_deadline = None;
        self.state = DispatcherState::Dimmed;
        self.last_command_at = Some(self.clock.now());
        self.start_timer();
        VolumeCommand::new(CommandKind::Dim, VerdictKind::DefinitelyToMe, 1.0)
    }

    fn dim(&mut self, reason: VerdictKind, confidence: f32) -> VolumeCommand {
        self.state = DispatcherState::Dimmed;
        self.last_command_at = Some(self.clock.now());
        self.start_timer();
        debug!(?reason, "dimming");
        VolumeCommand::new(CommandKind::Dim, reason, confidence)
    }

    fn start_timer(&mut self) {
        self.timer_deadline = Some(self.clock.now() + self.silence_timeout);
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Pending timer deadline, if one exists.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer_deadline
    }

    /// Instant of the last emitted command.
    pub fn last_command_at(&self) -> Option<Instant> {
        self.last_command_at
    }

    /// Update the escalation sensitivity.
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
    }

    /// Update the silence timeout; affects the next timer start.
    pub fn set_silence_timeout(&mut self, timeout: Duration) {
        self.silence_timeout = timeout;
    }
}

/// Control messages for the dispatcher actor.
#[derive(Debug)]
pub enum DispatcherMsg {
    Verdict(AttentionVerdict),
    ForceDim,
    ForceRestore,
    SetSensitivity(f32),
    SetSilenceTimeout(Duration),
}

/// Handle to a running dispatcher actor.
#[derive(Clone)]
pub struct DispatcherHandle {
    msg_tx: mpsc::Sender<DispatcherMsg>,
}

impl DispatcherHandle {
    /// Deliver a verdict.
    pub async fn deliver(&self, verdict: AttentionVerdict) {
        let _ = self.msg_tx.send(DispatcherMsg::Verdict(verdict)).await;
    }

    /// Send a control message.
    pub async fn send(&self, msg: DispatcherMsg) {
        let _ = self.msg_tx.send(msg).await;
    }
}

/// Spawn the dispatcher actor.
///
/// Commands are pushed into `command_tx`; the hub owns delivery from there
/// (unidirectional wiring, no cycle back into the dispatcher).
pub fn spawn(
    silence_timeout: Duration,
    sensitivity: f32,
    command_tx: mpsc::Sender<VolumeCommand>,
) -> DispatcherHandle {
    let (msg_tx, mut msg_rx) = mpsc::channel::<DispatcherMsg>(64);
    let mut dispatcher = Dispatcher::new(silence_timeout, sensitivity);

    tokio::spawn(async move {
        loop {
            let command = {
                let deadline = dispatcher.timer_deadline();
                let sleep_for = deadline.map(|at| at.saturating_duration_since(Instant::now()));

                tokio::select! {
                    msg = msg_rx.recv() => match msg {
                        Some(DispatcherMsg::Verdict(verdict)) => dispatcher.on_verdict(&verdict),
                        Some(DispatcherMsg::ForceDim) => Some(dispatcher.force_dim()),
                        Some(DispatcherMsg::ForceRestore) => dispatcher.force_restore(),
                        Some(DispatcherMsg::SetSensitivity(s)) => {
                            dispatcher.set_sensitivity(s);
                            None
                        }
                        Some(DispatcherMsg::SetSilenceTimeout(t)) => {
                            dispatcher.set_silence_timeout(t);
                            None
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep(sleep_for.unwrap_or_default()), if sleep_for.is_some() => {
                        dispatcher.on_timer_expired()
                    }
                }
            };

            if let Some(command) = command {
                if command_tx.send(command).await.is_err() {
                    break;
                }
            }
        }
    });

    DispatcherHandle { msg_tx }
}
