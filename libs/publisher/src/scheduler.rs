use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerEvent, BrokerSession, ConnectResult, Connection};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::records::RecordSequence;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_CONNECT_TIMEOUT: i32 = 42;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every record was offered to the broker.
    Completed { published: usize },
    /// The broker did not acknowledge the connection before the watchdog fired.
    ConnectTimeout,
    Cancelled { published: usize },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed { .. } => EXIT_SUCCESS,
            Outcome::ConnectTimeout => EXIT_CONNECT_TIMEOUT,
            Outcome::Cancelled { .. } => EXIT_INTERRUPTED,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Two-phase publish timer
// ═══════════════════════════════════════════════════════════════

/// One-shot initial delay followed by a repeating interval. The end
/// of the initial delay is itself the first tick.
enum PublishTimer {
    Idle,
    InitialDelay { delay: Pin<Box<Sleep>>, period: Duration },
    Repeating(Interval),
    Stopped,
}

impl PublishTimer {
    fn start(initial_delay: Duration, period: Duration) -> Self {
        Self::InitialDelay { delay: Box::pin(sleep(initial_delay)), period }
    }

    /// Cancel safe: the pending delay or interval survives a dropped call.
    async fn tick(&mut self) {
        match self {
            Self::InitialDelay { delay, period } => {
                delay.as_mut().await;
                let period = *period;
                let mut interval = interval_at(delay.deadline() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                *self = Self::Repeating(interval);
            }
            Self::Repeating(interval) => {
                interval.tick().await;
            }
            Self::Idle | Self::Stopped => pending().await,
        }
    }

    fn stop(&mut self) {
        *self = Self::Stopped;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

/// Drives connect → subscribe → publish-one-record-per-tick → stop.
///
/// All mutable state lives here and is only touched from the single
/// `select!` loop in [`Scheduler::run`]: broker events, the connect
/// watchdog, the publish timer and cancellation never run concurrently.
pub struct Scheduler {
    config: SchedulerConfig,
    records: RecordSequence,
    state: ConnectionState,
    cursor: usize,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, records: RecordSequence) -> Self {
        Self {
            config,
            records,
            state: ConnectionState::Disconnected,
            cursor: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Index of the next record to publish.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub async fn run<B: Broker + ?Sized>(
        &mut self,
        broker: &mut B,
        cancel: CancellationToken,
    ) -> Result<Outcome, SchedulerError> {
        let url = self.config.broker_url.clone();
        tracing::info!(url = %url, "connecting to broker");
        self.state = ConnectionState::Connecting;

        let watchdog = sleep(self.config.connect_watchdog);
        tokio::pin!(watchdog);

        let Connection { mut session, mut events } = match broker.connect(&url, &self.config.broker_options()) {
            Ok(c) => c,
            Err(e) => {
                self.state = ConnectionState::Failed;
                return Err(e.into());
            }
        };

        let mut watchdog_armed = true;
        let mut events_open = true;
        let mut timer = PublishTimer::Idle;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    timer.stop();
                    self.shutdown(session.as_mut()).await;
                    tracing::info!(topic = %self.config.topic, published = self.cursor, "file data publisher interrupted");
                    return Ok(Outcome::Cancelled { published: self.cursor });
                }

                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_event(event, session.as_mut(), &mut timer),
                    None => {
                        events_open = false;
                        tracing::warn!("broker event channel closed");
                    }
                },

                _ = &mut watchdog, if watchdog_armed => {
                    watchdog_armed = false;
                    if self.state != ConnectionState::Connected {
                        self.state = ConnectionState::Failed;
                        tracing::error!(url = %url, timeout_s = self.config.connect_watchdog.as_secs(), "failed to connect to broker");
                        return Ok(Outcome::ConnectTimeout);
                    }
                }

                _ = timer.tick() => {
                    if let Some(outcome) = self.on_tick(session.as_mut(), &mut timer)? {
                        self.shutdown(session.as_mut()).await;
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    fn on_event(&mut self, event: BrokerEvent, session: &mut dyn BrokerSession, timer: &mut PublishTimer) {
        match event {
            BrokerEvent::Connect(ConnectResult::Success) => {
                if self.state == ConnectionState::Connected {
                    tracing::info!(url = %self.config.broker_url, "reconnected to broker");
                    self.subscribe(session);
                    return;
                }
                self.state = ConnectionState::Connected;
                tracing::info!(url = %self.config.broker_url, "connected to broker");
                self.subscribe(session);
                *timer = PublishTimer::start(self.config.initial_delay, self.config.value_interval);
            }
            BrokerEvent::Connect(ConnectResult::Timeout) => {
                tracing::warn!(url = %self.config.broker_url, "connect attempt timed out");
            }
            BrokerEvent::Connect(ConnectResult::Error(e)) => {
                tracing::error!(url = %self.config.broker_url, error = %e, "connect attempt failed");
            }
            BrokerEvent::Error(e) => {
                tracing::error!(error = %e, "broker error");
            }
        }
    }

    fn subscribe(&self, session: &mut dyn BrokerSession) {
        let topic = &self.config.topic;
        tracing::debug!(topic = %topic, "subscribing");
        match session.subscribe(topic) {
            Ok(()) => tracing::debug!(topic = %topic, "subscribed"),
            Err(e) => tracing::warn!(topic = %topic, error = %e, "subscribe failed"),
        }
    }

    /// Exhaustion is checked before reading, so an empty sequence stops
    /// on the first tick without publishing.
    fn on_tick(
        &mut self,
        session: &mut dyn BrokerSession,
        timer: &mut PublishTimer,
    ) -> Result<Option<Outcome>, SchedulerError> {
        if self.cursor >= self.records.len() {
            timer.stop();
            tracing::info!(topic = %self.config.topic, published = self.cursor, "file data publisher stopped");
            return Ok(Some(Outcome::Completed { published: self.cursor }));
        }

        let index = self.cursor;
        let payload = self
            .records
            .at(index)
            .payload()
            .map_err(|source| SchedulerError::Encode { index, source })?;
        self.cursor += 1;

        let topic = &self.config.topic;
        tracing::debug!(topic = %topic, index, value = %String::from_utf8_lossy(&payload), "publish value");
        if let Err(e) = session.publish(topic, payload) {
            tracing::warn!(topic = %topic, index, error = %e, "publish failed");
        }
        Ok(None)
    }

    async fn shutdown(&self, session: &mut dyn BrokerSession) {
        if let Err(e) = session.disconnect().await {
            tracing::debug!(error = %e, "disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;
    use crate::broker::{BrokerError, BrokerOptions};

    #[derive(Default)]
    struct Log {
        subscribed: Vec<String>,
        published: Vec<(Instant, String, String)>,
        disconnected: bool,
        close_delay: Duration,
    }

    struct MockSession(Arc<Mutex<Log>>);

    impl BrokerSession for MockSession {
        fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
            self.0.lock().unwrap().subscribed.push(topic.to_string());
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
            let payload = String::from_utf8(payload).unwrap();
            self.0.lock().unwrap().published.push((Instant::now(), topic.to_string(), payload));
            Ok(())
        }

        fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
            let log = self.0.clone();
            Box::pin(async move {
                let delay = log.lock().unwrap().close_delay;
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                log.lock().unwrap().disconnected = true;
                Ok(())
            })
        }
    }

    struct MockBroker {
        log: Arc<Mutex<Log>>,
        events: Option<mpsc::UnboundedReceiver<BrokerEvent>>,
        options: Option<BrokerOptions>,
    }

    impl Broker for MockBroker {
        fn connect(&mut self, _url: &str, options: &BrokerOptions) -> Result<Connection, BrokerError> {
            self.options = Some(options.clone());
            Ok(Connection {
                session: Box::new(MockSession(self.log.clone())),
                events: self.events.take().expect("connect called once"),
            })
        }
    }

    struct RefusingBroker;

    impl Broker for RefusingBroker {
        fn connect(&mut self, url: &str, _options: &BrokerOptions) -> Result<Connection, BrokerError> {
            Err(BrokerError::InvalidUrl { url: url.to_string(), detail: "unsupported scheme".into() })
        }
    }

    fn mock() -> (MockBroker, mpsc::UnboundedSender<BrokerEvent>, Arc<Mutex<Log>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(Log::default()));
        let broker = MockBroker { log: log.clone(), events: Some(rx), options: None };
        (broker, tx, log)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn config(initial_delay: u64, value_interval: u64) -> SchedulerConfig {
        SchedulerConfig::new("mqtt://localhost:1883", "sensors/temperature", "replay-1", secs(initial_delay), secs(value_interval))
    }

    fn records(dates: &[&str]) -> RecordSequence {
        let values = dates
            .iter()
            .enumerate()
            .map(|(i, d)| json!({"endDate": d, "value": i}))
            .collect();
        RecordSequence::from_values(values).unwrap()
    }

    fn connected() -> BrokerEvent {
        BrokerEvent::Connect(ConnectResult::Success)
    }

    fn offsets(log: &Arc<Mutex<Log>>, start: Instant) -> Vec<Duration> {
        log.lock().unwrap().published.iter().map(|(at, _, _)| *at - start).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_sorted_records_one_per_tick_then_completes() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();
        let seq = records(&["2017-01-01T00:00:00Z", "2017-01-03T00:00:00Z", "2017-01-02T00:00:00Z"]);
        let expected: Vec<String> = seq
            .iter()
            .map(|r| String::from_utf8(r.payload().unwrap()).unwrap())
            .collect();

        let start = Instant::now();
        let mut scheduler = Scheduler::new(config(5, 2), seq);
        let outcome = scheduler.run(&mut broker, CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 3 });
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(Instant::now() - start, secs(11));
        assert_eq!(offsets(&log, start), [secs(5), secs(7), secs(9)]);

        let log = log.lock().unwrap();
        let payloads: Vec<_> = log.published.iter().map(|(_, _, p)| p.clone()).collect();
        assert_eq!(payloads, expected);
        // Latest end date first.
        assert!(payloads[0].contains("2017-01-03"));
        assert!(payloads[2].contains("2017-01-01"));
        assert!(log.published.iter().all(|(_, t, _)| t == "sensors/temperature"));
        assert_eq!(log.subscribed, ["sensors/temperature"]);
        assert!(log.disconnected);
        assert_eq!(scheduler.cursor(), 3);
        assert_eq!(scheduler.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_waits_for_disconnect() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();
        log.lock().unwrap().close_delay = Duration::from_millis(500);

        let start = Instant::now();
        let outcome = Scheduler::new(config(1, 1), records(&["2017-01-01"]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 1 });
        assert_eq!(Instant::now() - start, Duration::from_millis(2500));
        assert!(log.lock().unwrap().disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn passes_broker_options_from_config() {
        let (mut broker, tx, _log) = mock();
        tx.send(connected()).unwrap();

        Scheduler::new(config(1, 1), records(&[]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        let options = broker.options.unwrap();
        assert_eq!(options.client_id, "replay-1");
        assert_eq!(options.connect_timeout, secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_sequence_stops_at_end_of_initial_delay() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();

        let start = Instant::now();
        let outcome = Scheduler::new(config(5, 2), records(&[]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 0 });
        // Not immediately: exhaustion is only checked once the first tick fires.
        assert_eq!(Instant::now() - start, secs(5));
        assert!(log.lock().unwrap().published.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fails_run_without_connection() {
        let (mut broker, tx, log) = mock();
        tx.send(BrokerEvent::Connect(ConnectResult::Timeout)).unwrap();
        tx.send(BrokerEvent::Connect(ConnectResult::Error("connection refused".into()))).unwrap();

        let start = Instant::now();
        let mut scheduler = Scheduler::new(config(1, 1), records(&["2017-01-01"]));
        let outcome = scheduler.run(&mut broker, CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, Outcome::ConnectTimeout);
        assert_eq!(outcome.exit_code(), 42);
        assert_eq!(Instant::now() - start, secs(30));
        assert_eq!(scheduler.state(), ConnectionState::Failed);

        let log = log.lock().unwrap();
        assert!(log.published.is_empty());
        assert!(log.subscribed.is_empty());
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_is_a_noop_once_connected() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();

        let start = Instant::now();
        let outcome = Scheduler::new(config(10, 10), records(&["2017-01-01", "2017-01-02", "2017-01-03", "2017-01-04"]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 4 });
        assert_eq!(Instant::now() - start, secs(50));
        assert_eq!(offsets(&log, start), [secs(10), secs(20), secs(30), secs(40)]);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_delay_counts_from_connection_success() {
        let (mut broker, tx, log) = mock();
        tokio::spawn(async move {
            sleep(secs(20)).await;
            tx.send(connected()).unwrap();
            pending::<()>().await;
        });

        let start = Instant::now();
        let outcome = Scheduler::new(config(5, 1), records(&["2017-01-01", "2017-01-02"]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 2 });
        assert_eq!(offsets(&log, start), [secs(25), secs(26)]);
        assert_eq!(Instant::now() - start, secs(27));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_do_not_disturb_publishing() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();
        tokio::spawn(async move {
            sleep(secs(6)).await;
            tx.send(BrokerEvent::Error("connection reset by peer".into())).unwrap();
            sleep(Duration::from_millis(1500)).await;
            tx.send(BrokerEvent::Error("keep alive timeout".into())).unwrap();
            tx.send(BrokerEvent::Connect(ConnectResult::Error("connection refused".into()))).unwrap();
            pending::<()>().await;
        });

        let start = Instant::now();
        let outcome = Scheduler::new(config(5, 2), records(&["2017-01-01", "2017-01-02", "2017-01-03"]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 3 });
        assert_eq!(offsets(&log, start), [secs(5), secs(7), secs(9)]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_acknowledgement_does_not_restart_timer() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();
        tokio::spawn(async move {
            sleep(secs(6)).await;
            tx.send(connected()).unwrap();
            pending::<()>().await;
        });

        let start = Instant::now();
        let outcome = Scheduler::new(config(5, 2), records(&["2017-01-01", "2017-01-02", "2017-01-03"]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 3 });
        assert_eq!(offsets(&log, start), [secs(5), secs(7), secs(9)]);
        assert_eq!(log.lock().unwrap().subscribed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_event_channel_keeps_publishing() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();
        drop(tx);

        let outcome = Scheduler::new(config(1, 1), records(&["2017-01-01", "2017-01-02"]))
            .run(&mut broker, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed { published: 2 });
        assert_eq!(log.lock().unwrap().published.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_ticks() {
        let (mut broker, tx, log) = mock();
        tx.send(connected()).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(secs(8)).await;
            trigger.cancel();
        });

        let outcome = Scheduler::new(config(5, 2), records(&["2017-01-01", "2017-01-02", "2017-01-03"]))
            .run(&mut broker, cancel)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled { published: 2 });
        assert_eq!(outcome.exit_code(), 130);
        let log = log.lock().unwrap();
        assert_eq!(log.published.len(), 2);
        assert!(log.disconnected);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_rejection_is_an_error() {
        let mut scheduler = Scheduler::new(config(1, 1), records(&[]));
        let err = scheduler.run(&mut RefusingBroker, CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SchedulerError::Broker(BrokerError::InvalidUrl { .. })));
        assert_eq!(scheduler.state(), ConnectionState::Failed);
    }
}
