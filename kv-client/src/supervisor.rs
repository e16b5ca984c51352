//! Connection supervision.
//!
//! [`ConnectivitySupervisor`] owns at most one [`SyncChannel`] at a time and
//! decides when to open or close it. Decisions come from the pure
//! [`ConnectivityState`] machine in sharedkv-core; this module is the actor
//! that feeds it events and executes its actions.
//!
//! Channel reports carry the id the channel was opened with. Reports from
//! any channel other than the current one are stale and dropped, so an old
//! channel winding down can never disturb its replacement.

use sharedkv_core::{Action, ConnectivityState, Event, LinkNotice, Phase, DEFAULT_RETRY_DELAY};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::channel::{ChannelConfig, ChannelOutcome, ChannelReport, SyncChannel};
use crate::kv::SharedKv;
use crate::transport::Transport;

const NOTICE_CAPACITY: usize = 64;

/// How long shutdown waits for the live channel to flush and close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Fixed delay before reconnecting after a failure.
    pub retry_delay: Duration,
    /// Settings for every channel the supervisor opens.
    pub channel: ChannelConfig,
    /// Whether the host starts out online.
    pub start_online: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            channel: ChannelConfig::default(),
            start_online: true,
        }
    }
}

/// Snapshot of the supervisor's view, published on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Current phase.
    pub phase: Phase,
    /// Configured endpoint; empty when sync is disabled.
    pub endpoint: String,
    /// Whether the host is online.
    pub online: bool,
    /// Id of the most recently opened channel, 0 before the first.
    pub generation: u64,
}

enum Command {
    SetEndpoint(String),
    Online,
    Offline,
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Handle to the supervisor task.
///
/// Dropping the handle shuts the supervisor down.
#[derive(Debug)]
pub struct ConnectivitySupervisor {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SupervisorStatus>,
    notices: broadcast::Sender<LinkNotice>,
}

impl ConnectivitySupervisor {
    /// Start supervising sync for `kv`.
    ///
    /// `factory` builds a fresh transport for every channel. A non-empty
    /// `endpoint` is connected to immediately if the host is online.
    pub fn spawn<T, F>(
        kv: SharedKv,
        endpoint: impl Into<String>,
        factory: F,
        config: SupervisorConfig,
    ) -> Self
    where
        T: Transport + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let endpoint = endpoint.into().trim().to_string();
        let machine = ConnectivityState::new(config.retry_delay);
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SupervisorStatus {
            phase: machine.phase(),
            endpoint: endpoint.clone(),
            online: machine.is_online(),
            generation: 0,
        });
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (reports_tx, reports) = mpsc::unbounded_channel();

        let worker = Worker {
            kv,
            factory,
            config,
            machine,
            endpoint,
            channel: None,
            generation: 0,
            retry_at: None,
            reports_tx,
            status: status_tx,
            notices: notices.clone(),
        };
        tokio::spawn(worker.run(receiver, reports));

        Self {
            commands,
            status,
            notices,
        }
    }

    /// Switch to a new endpoint. The live channel, if any, is closed; an
    /// empty endpoint disables sync.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        self.send(Command::SetEndpoint(endpoint.into()));
    }

    /// Host regained network access.
    pub fn network_online(&self) {
        self.send(Command::Online);
    }

    /// Host lost network access.
    pub fn network_offline(&self) {
        self.send(Command::Offline);
    }

    /// Close the live channel and stop reacting to anything.
    ///
    /// Returns once changes already queued on the channel have been handed
    /// to the transport. Never fails and may be called repeatedly.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Shutdown(Some(done))).is_ok() {
            let _ = wait.await;
        }
    }

    /// Latest status.
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Subscribe to connection notices.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkNotice> {
        self.notices.subscribe()
    }

    fn send(&self, command: Command) {
        // After shutdown the task is gone and signals are meaningless.
        let _ = self.commands.send(command);
    }
}

impl Drop for ConnectivitySupervisor {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown(None));
    }
}

struct Worker<F> {
    kv: SharedKv,
    factory: F,
    config: SupervisorConfig,
    machine: ConnectivityState,
    endpoint: String,
    channel: Option<SyncChannel>,
    generation: u64,
    retry_at: Option<Instant>,
    reports_tx: mpsc::UnboundedSender<ChannelReport>,
    status: watch::Sender<SupervisorStatus>,
    notices: broadcast::Sender<LinkNotice>,
}

impl<T, F> Worker<F>
where
    T: Transport + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<ChannelReport>,
    ) {
        if !self.config.start_online {
            self.dispatch(Event::NetworkOffline);
        }
        let configured = !self.endpoint.is_empty();
        self.dispatch(Event::EndpointChanged { configured });

        let done = loop {
            let retry_at = self.retry_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SetEndpoint(endpoint)) => {
                        self.endpoint = endpoint.trim().to_string();
                        info!(endpoint = %self.endpoint, "sync endpoint changed");
                        let configured = !self.endpoint.is_empty();
                        self.dispatch(Event::EndpointChanged { configured });
                    }
                    Some(Command::Online) => self.dispatch(Event::NetworkOnline),
                    Some(Command::Offline) => self.dispatch(Event::NetworkOffline),
                    Some(Command::Shutdown(done)) => break done,
                    None => break None,
                },
                Some(report) = reports.recv() => self.on_report(report),
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.dispatch(Event::RetryTimer);
                }
            }
        };

        if let Some(channel) = self.channel.take() {
            if timeout(SHUTDOWN_GRACE, channel.close_and_wait()).await.is_err() {
                warn!("sync channel did not close in time");
            }
        }
        self.dispatch(Event::Shutdown);
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn on_report(&mut self, report: ChannelReport) {
        let current = self.channel.as_ref().map(SyncChannel::id);
        if current != Some(report.channel) {
            debug!(channel = report.channel, "ignoring report from stale channel");
            return;
        }
        let event = match report.outcome {
            ChannelOutcome::Opened => Event::ConnectSucceeded,
            ChannelOutcome::ConnectFailed(error) => {
                self.channel = None;
                Event::ConnectFailed { error }
            }
            ChannelOutcome::Closed(reason) => {
                self.channel = None;
                Event::TransportClosed { reason }
            }
        };
        self.dispatch(event);
    }

    fn dispatch(&mut self, event: Event) {
        let (next, actions) = self.machine.clone().on_event(event);
        self.machine = next;
        for action in actions {
            self.execute(action);
        }
        self.publish_status();
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::OpenChannel => {
                self.close_channel();
                self.generation += 1;
                debug!(channel = self.generation, endpoint = %self.endpoint, "opening sync channel");
                self.channel = Some(SyncChannel::open(
                    self.generation,
                    self.endpoint.clone(),
                    (self.factory)(),
                    self.kv.clone(),
                    self.config.channel.clone(),
                    self.reports_tx.clone(),
                ));
            }
            Action::CloseChannel => self.close_channel(),
            Action::ScheduleRetry { delay } => {
                debug!(?delay, "scheduling reconnect");
                self.retry_at = Some(Instant::now() + delay);
            }
            Action::CancelRetry => self.retry_at = None,
            Action::Notify(notice) => {
                match &notice {
                    LinkNotice::Connected => info!(endpoint = %self.endpoint, "sync connected"),
                    LinkNotice::ConnectFailed { attempt, error } => {
                        warn!(endpoint = %self.endpoint, attempt, %error, "sync connect failed")
                    }
                    LinkNotice::Disconnected { reason } => {
                        info!(endpoint = %self.endpoint, %reason, "sync disconnected")
                    }
                    LinkNotice::Stopped => debug!("sync supervisor stopped"),
                }
                let _ = self.notices.send(notice);
            }
        }
    }

    fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(SupervisorStatus {
            phase: self.machine.phase(),
            endpoint: self.endpoint.clone(),
            online: self.machine.is_online(),
            generation: self.generation,
        });
    }
}
