//! Connectivity state machines for sharedkv.
//!
//! [`ChannelState`] is the lifecycle of a single channel instance.
//! [`ConnectivityState`] is the supervisor's view across instances: it
//! takes events (host online/offline, endpoint changes, channel outcomes,
//! timers) and produces a new state plus a list of actions to execute.
//!
//! The actual I/O (opening channels, running timers) is performed by
//! sharedkv-client, not by this module.

use std::time::Duration;

/// Delay between a failed or lost connection and the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle of one channel instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    /// No transport. Initial state, and terminal once the instance is done.
    #[default]
    Closed,
    /// Transport handshake in progress.
    Connecting,
    /// Transport ready; messages flow both ways.
    Open,
}

impl ChannelState {
    /// Whether outbound changes may be sent.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// What the supervisor is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No channel and none wanted (endpoint unset or host offline).
    Closed,
    /// A channel is being opened.
    Connecting {
        /// Attempt number since the last successful open.
        attempt: u32,
    },
    /// A channel is open.
    Open,
    /// Waiting for the retry timer after a failure.
    Waiting {
        /// Attempt that failed.
        attempt: u32,
    },
    /// Torn down; ignores every further event.
    Stopped,
}

/// Supervisor state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
    phase: Phase,
    configured: bool,
    online: bool,
    retry_delay: Duration,
}

impl ConnectivityState {
    /// Create a machine with no endpoint, assuming the host is online.
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            phase: Phase::Closed,
            configured: false,
            online: true,
            retry_delay,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether an endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Whether the host last reported network availability.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Whether a channel is open.
    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open)
    }

    /// Whether the machine has been torn down.
    pub fn is_stopped(&self) -> bool {
        matches!(self.phase, Phase::Stopped)
    }

    fn wants_channel(&self) -> bool {
        self.configured && self.online
    }

    /// Actions that release whatever the current phase holds.
    fn release(&self) -> Vec<Action> {
        match self.phase {
            Phase::Connecting { .. } | Phase::Open => vec![Action::CloseChannel],
            Phase::Waiting { .. } => vec![Action::CancelRetry],
            Phase::Closed | Phase::Stopped => vec![],
        }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller is
    /// responsible for executing the returned actions in order.
    pub fn on_event(mut self, event: Event) -> (Self, Vec<Action>) {
        if self.is_stopped() {
            return (self, vec![]);
        }

        match event {
            Event::Shutdown => {
                let mut actions = self.release();
                actions.push(Action::Notify(LinkNotice::Stopped));
                self.phase = Phase::Stopped;
                (self, actions)
            }

            Event::EndpointChanged { configured } => {
                let mut actions = self.release();
                self.configured = configured;
                if self.wants_channel() {
                    self.phase = Phase::Connecting { attempt: 1 };
                    actions.push(Action::OpenChannel);
                } else {
                    self.phase = Phase::Closed;
                }
                (self, actions)
            }

            Event::NetworkOffline => {
                let mut actions = self.release();
                self.online = false;
                if !matches!(self.phase, Phase::Closed) {
                    actions.push(Action::Notify(LinkNotice::Disconnected {
                        reason: "host offline".into(),
                    }));
                }
                self.phase = Phase::Closed;
                (self, actions)
            }

            Event::NetworkOnline => {
                self.online = true;
                match self.phase {
                    Phase::Closed | Phase::Waiting { .. } if self.configured => {
                        let mut actions = self.release();
                        self.phase = Phase::Connecting { attempt: 1 };
                        actions.push(Action::OpenChannel);
                        (self, actions)
                    }
                    _ => (self, vec![]),
                }
            }

            Event::ConnectSucceeded => match self.phase {
                Phase::Connecting { .. } => {
                    self.phase = Phase::Open;
                    (self, vec![Action::Notify(LinkNotice::Connected)])
                }
                _ => (self, vec![]),
            },

            Event::ConnectFailed { error } => match self.phase {
                Phase::Connecting { attempt } => {
                    self.phase = Phase::Waiting { attempt };
                    (
                        self.clone(),
                        vec![
                            Action::Notify(LinkNotice::ConnectFailed { attempt, error }),
                            Action::ScheduleRetry {
                                delay: self.retry_delay,
                            },
                        ],
                    )
                }
                _ => (self, vec![]),
            },

            Event::TransportClosed { reason } => match self.phase {
                Phase::Open => {
                    self.phase = Phase::Waiting { attempt: 0 };
                    (
                        self.clone(),
                        vec![
                            Action::Notify(LinkNotice::Disconnected { reason }),
                            Action::ScheduleRetry {
                                delay: self.retry_delay,
                            },
                        ],
                    )
                }
                Phase::Connecting { attempt } => {
                    self.phase = Phase::Waiting { attempt };
                    (
                        self.clone(),
                        vec![
                            Action::Notify(LinkNotice::ConnectFailed {
                                attempt,
                                error: reason,
                            }),
                            Action::ScheduleRetry {
                                delay: self.retry_delay,
                            },
                        ],
                    )
                }
                _ => (self, vec![]),
            },

            Event::RetryTimer => match self.phase {
                Phase::Waiting { attempt } if self.wants_channel() => {
                    self.phase = Phase::Connecting {
                        attempt: attempt.saturating_add(1),
                    };
                    (self, vec![Action::OpenChannel])
                }
                Phase::Waiting { .. } => {
                    self.phase = Phase::Closed;
                    (self, vec![])
                }
                _ => (self, vec![]),
            },
        }
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

/// Inputs to the supervisor state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The endpoint setting changed (or was read at startup).
    EndpointChanged {
        /// Whether the new endpoint is non-empty.
        configured: bool,
    },
    /// Host reports network availability.
    NetworkOnline,
    /// Host reports loss of network.
    NetworkOffline,
    /// The channel being opened is now open.
    ConnectSucceeded,
    /// The channel being opened failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The open channel closed on its own.
    TransportClosed {
        /// Reason for the close.
        reason: String,
    },
    /// Retry timer fired.
    RetryTimer,
    /// Tear everything down.
    Shutdown,
}

/// Actions to be executed by the supervisor.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a new channel for the configured endpoint.
    OpenChannel,
    /// Close the current channel, ignoring errors.
    CloseChannel,
    /// Fire [`Event::RetryTimer`] after the delay.
    ScheduleRetry {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Cancel any pending retry timer.
    CancelRetry,
    /// Report a notice to observers.
    Notify(LinkNotice),
}

/// Notices emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    /// A channel opened.
    Connected,
    /// Opening a channel failed.
    ConnectFailed {
        /// Which attempt failed.
        attempt: u32,
        /// Error message describing the failure.
        error: String,
    },
    /// An open channel went away.
    Disconnected {
        /// Reason for the disconnect.
        reason: String,
    },
    /// The supervisor was torn down.
    Stopped,
}
