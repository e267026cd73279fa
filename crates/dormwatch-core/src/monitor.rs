//! The polling loop: fetch, decide, notify, sleep
//!
//! A cycle never fails. Every error is logged and folded into a
//! [`CycleOutcome`] so the loop keeps running until it is told to stop.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::alerting::{cooldown_elapsed, message, should_alert, AlertSender};
use crate::config::Config;
use crate::fetcher::{BalanceSource, FetchError, FetchErrorKind};
use crate::models::{AlertMessage, AlertState, BalanceReading};

/// Knobs the loop needs from the configuration
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Alert below this many kWh
    pub threshold: f64,
    /// Minimum gap between two alerts of the same kind
    pub cooldown: chrono::Duration,
    /// Time between cycles
    pub interval: Duration,
    /// Email once when the cookie expires
    pub notify_on_auth_expired: bool,
    /// Email after this many failed cycles in a row (0 disables)
    pub failure_alert_threshold: u32,
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.electricity_threshold,
            cooldown: config.alert_cooldown(),
            interval: config.check_interval(),
            notify_on_auth_expired: config.notify_on_auth_expired,
            failure_alert_threshold: config.failure_alert_threshold,
        }
    }
}

/// What a single cycle ended with
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Balance at or above the threshold
    Healthy {
        /// Remaining kWh
        balance: f64,
    },
    /// Balance low and an alert email went out
    AlertSent {
        /// Remaining kWh
        balance: f64,
    },
    /// Balance low but an alert was sent within the cooldown window
    AlertSuppressed {
        /// Remaining kWh
        balance: f64,
    },
    /// Balance low and the alert email could not be delivered
    AlertFailed {
        /// Remaining kWh
        balance: f64,
    },
    /// No balance could be read this cycle
    FetchFailed(FetchErrorKind),
}

/// Periodic balance monitor
pub struct Monitor<S, N> {
    source: S,
    notifier: N,
    settings: MonitorSettings,
    state: AlertState,
    consecutive_failures: u32,
}

impl<S: BalanceSource, N: AlertSender> Monitor<S, N> {
    /// Create a monitor with empty alert history
    pub fn new(source: S, notifier: N, settings: MonitorSettings) -> Self {
        Self {
            source,
            notifier,
            settings,
            state: AlertState::default(),
            consecutive_failures: 0,
        }
    }

    /// What has been sent so far
    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Failed cycles since the last successful fetch
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run cycles every `interval` until `shutdown` resolves.
    ///
    /// The first cycle runs immediately. A cycle in progress is always
    /// finished before shutdown is honoured.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        info!(
            interval = %humantime::format_duration(self.settings.interval),
            threshold = self.settings.threshold,
            cooldown_hours = cooldown_hours(self.settings.cooldown),
            "Electricity monitor started"
        );

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping monitor");
                    break;
                }
            }

            self.check_once(Utc::now()).await;

            if let Some(next) = next_check_at(Local::now(), self.settings.interval) {
                info!(next_check = %next.format("%Y-%m-%d %H:%M:%S"), "Waiting for next check");
            }
        }
    }

    /// Run one fetch/decide/notify cycle as of `now`
    pub async fn check_once(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        info!("Starting balance check");

        match self.source.fetch().await {
            Ok(reading) => {
                self.consecutive_failures = 0;
                self.state.clear_auth_expiry();
                info!(%reading, "Balance fetched");
                self.evaluate(&reading, now).await
            }
            Err(err) => self.handle_fetch_failure(&err, now).await,
        }
    }

    async fn evaluate(&mut self, reading: &BalanceReading, now: DateTime<Utc>) -> CycleOutcome {
        let balance = reading.remaining_kwh;
        let threshold = self.settings.threshold;

        if balance >= threshold || balance.is_nan() {
            info!(balance, threshold, "Balance is above threshold");
            return CycleOutcome::Healthy { balance };
        }

        warn!(balance, threshold, "Balance is below threshold");

        if !should_alert(
            balance,
            threshold,
            self.state.last_alert_at,
            now,
            self.settings.cooldown,
        ) {
            info!(
                last_alert_at = ?self.state.last_alert_at,
                "Alert cooldown active, skipping email"
            );
            return CycleOutcome::AlertSuppressed { balance };
        }

        let alert = message::low_balance(reading, threshold, cooldown_hours(self.settings.cooldown));
        if self.deliver(&alert, now).await {
            CycleOutcome::AlertSent { balance }
        } else {
            CycleOutcome::AlertFailed { balance }
        }
    }

    async fn handle_fetch_failure(&mut self, err: &FetchError, now: DateTime<Utc>) -> CycleOutcome {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let failures = self.consecutive_failures;

        match err {
            FetchError::AuthExpired(detail) => {
                error!(
                    error = %err,
                    consecutive_failures = failures,
                    "Portal rejected the session cookie; update USER_COOKIE and restart"
                );
                if self.settings.notify_on_auth_expired && !self.state.auth_expiry_notified {
                    self.deliver(&message::auth_expired(detail, now), now).await;
                }
            }
            FetchError::Network(_) | FetchError::Parse(_) => {
                warn!(error = %err, consecutive_failures = failures, "Balance check failed");
            }
        }

        let threshold = self.settings.failure_alert_threshold;
        if threshold > 0
            && failures >= threshold
            && cooldown_elapsed(self.state.last_failure_alert_at, now, self.settings.cooldown)
        {
            let alert = message::repeated_failures(failures, &err.to_string(), now);
            self.deliver(&alert, now).await;
        }

        CycleOutcome::FetchFailed(err.kind())
    }

    /// Send and record on success; failures are only logged
    async fn deliver(&mut self, alert: &AlertMessage, now: DateTime<Utc>) -> bool {
        match self.notifier.send(alert).await {
            Ok(()) => {
                self.state.record_sent(alert.kind, now);
                true
            }
            Err(e) => {
                error!(kind = ?alert.kind, error = %e, "Failed to send alert email, will retry next cycle");
                false
            }
        }
    }
}

/// `None` when the interval does not fit on the calendar
fn next_check_at(now: DateTime<Local>, interval: Duration) -> Option<DateTime<Local>> {
    let step = chrono::Duration::from_std(interval).ok()?;
    now.checked_add_signed(step)
}

fn cooldown_hours(cooldown: chrono::Duration) -> f64 {
    cooldown.num_seconds() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::NotifyError;
    use crate::models::AlertKind;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// Replays scripted results; repeats the last one when the script runs out
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<f64, FetchError>>>,
        calls: Arc<Mutex<u32>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<f64, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn balance(kwh: f64) -> Self {
            Self::new(vec![Ok(kwh)])
        }
    }

    #[async_trait::async_trait]
    impl BalanceSource for ScriptedSource {
        async fn fetch(&self) -> Result<BalanceReading, FetchError> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            next.expect("empty script")
                .map(|kwh| BalanceReading::new(kwh, Utc::now()))
        }
    }

    /// Log sink shared between a test and its fmt subscriber
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    #[derive(Clone, Default)]
    struct RecordingSender {
        sent: Arc<Mutex<Vec<AlertMessage>>>,
        attempts: Arc<Mutex<u32>>,
        fail: Arc<Mutex<bool>>,
    }

    impl RecordingSender {
        fn failing() -> Self {
            let sender = Self::default();
            *sender.fail.lock().unwrap() = true;
            sender
        }

        fn sent_kinds(&self) -> Vec<AlertKind> {
            self.sent.lock().unwrap().iter().map(|m| m.kind).collect()
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    #[async_trait::async_trait]
    impl AlertSender for RecordingSender {
        async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
            *self.attempts.lock().unwrap() += 1;
            if *self.fail.lock().unwrap() {
                return Err(NotifyError::Connection("connection refused".to_string()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            threshold: 20.0,
            cooldown: chrono::Duration::hours(6),
            interval: Duration::from_secs(3600),
            notify_on_auth_expired: false,
            failure_alert_threshold: 0,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_low_balance_without_history_sends_one_email() {
        let sender = RecordingSender::default();
        let mut monitor = Monitor::new(ScriptedSource::balance(15.0), sender.clone(), settings());

        let outcome = monitor.check_once(t0()).await;

        assert_eq!(outcome, CycleOutcome::AlertSent { balance: 15.0 });
        assert_eq!(sender.sent_kinds(), vec![AlertKind::LowBalance]);
        assert_eq!(monitor.state().last_alert_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_healthy_balance_sends_nothing() {
        let sender = RecordingSender::default();
        let mut monitor = Monitor::new(ScriptedSource::balance(25.0), sender.clone(), settings());

        let outcome = monitor.check_once(t0()).await;

        assert_eq!(outcome, CycleOutcome::Healthy { balance: 25.0 });
        assert_eq!(sender.attempts(), 0);
        assert_eq!(monitor.state(), &AlertState::default());
    }

    #[tokio::test]
    async fn test_within_cooldown_is_suppressed() {
        let sender = RecordingSender::default();
        let mut monitor = Monitor::new(ScriptedSource::balance(15.0), sender.clone(), settings());

        monitor.check_once(t0()).await;
        let outcome = monitor.check_once(t0() + chrono::Duration::hours(3)).await;

        assert_eq!(outcome, CycleOutcome::AlertSuppressed { balance: 15.0 });
        assert_eq!(sender.attempts(), 1);
        assert_eq!(monitor.state().last_alert_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_repeated_low_cycles_send_once_per_window() {
        let sender = RecordingSender::default();
        let mut monitor = Monitor::new(ScriptedSource::balance(15.0), sender.clone(), settings());

        // Hourly for twelve hours: alerts at 0h and 6h
        for hour in 0..12 {
            monitor.check_once(t0() + chrono::Duration::hours(hour)).await;
        }

        assert_eq!(sender.sent_kinds().len(), 2);
        assert_eq!(
            monitor.state().last_alert_at,
            Some(t0() + chrono::Duration::hours(6))
        );
    }

    #[tokio::test]
    async fn test_auth_expired_skips_email_and_keeps_going() {
        let sender = RecordingSender::default();
        let source = ScriptedSource::new(vec![
            Err(FetchError::AuthExpired("请重新登录".to_string())),
            Ok(15.0),
        ]);
        let mut monitor = Monitor::new(source, sender.clone(), settings());
        let (logs, _guard) = capture_logs();

        let outcome = monitor.check_once(t0()).await;
        assert_eq!(outcome, CycleOutcome::FetchFailed(FetchErrorKind::AuthExpired));
        assert_eq!(sender.attempts(), 0);
        assert_eq!(monitor.consecutive_failures(), 1);

        let logged = logs.contents();
        let line = logged
            .lines()
            .find(|l| l.contains("rejected the session cookie"))
            .expect("auth expiry was not logged");
        assert!(line.contains("ERROR"), "expected an ERROR event, got: {line}");
        assert!(line.contains("USER_COOKIE"));

        let outcome = monitor.check_once(t0() + chrono::Duration::hours(1)).await;
        assert_eq!(outcome, CycleOutcome::AlertSent { balance: 15.0 });
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[test]
    fn test_next_check_time() {
        let now = Local.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(
            next_check_at(now, Duration::from_secs(3600)),
            Some(Local.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(next_check_at(now, Duration::from_secs(u64::MAX)), None);
        assert_eq!(next_check_at(now, Duration::from_secs(i64::MAX as u64 / 1000)), None);
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_next_cycle() {
        let sender = RecordingSender::failing();
        let mut monitor = Monitor::new(ScriptedSource::balance(15.0), sender.clone(), settings());

        let outcome = monitor.check_once(t0()).await;
        assert_eq!(outcome, CycleOutcome::AlertFailed { balance: 15.0 });
        assert_eq!(monitor.state().last_alert_at, None);

        sender.set_failing(false);
        let later = t0() + chrono::Duration::hours(1);
        let outcome = monitor.check_once(later).await;

        assert_eq!(outcome, CycleOutcome::AlertSent { balance: 15.0 });
        assert_eq!(sender.attempts(), 2);
        assert_eq!(monitor.state().last_alert_at, Some(later));
    }

    #[tokio::test]
    async fn test_fetch_failures_are_silent_by_default() {
        let sender = RecordingSender::default();
        let source = ScriptedSource::new(vec![Err(FetchError::Network("timed out".to_string()))]);
        let mut monitor = Monitor::new(source, sender.clone(), settings());

        for hour in 0..10 {
            let outcome = monitor.check_once(t0() + chrono::Duration::hours(hour)).await;
            assert_eq!(outcome, CycleOutcome::FetchFailed(FetchErrorKind::Network));
        }

        assert_eq!(sender.attempts(), 0);
        assert_eq!(monitor.consecutive_failures(), 10);
    }

    #[tokio::test]
    async fn test_repeated_failures_escalate_when_enabled() {
        let sender = RecordingSender::default();
        let source = ScriptedSource::new(vec![Err(FetchError::Parse("no leftEle".to_string()))]);
        let mut monitor = Monitor::new(
            source,
            sender.clone(),
            MonitorSettings {
                failure_alert_threshold: 3,
                ..settings()
            },
        );

        for hour in 0..5 {
            monitor.check_once(t0() + chrono::Duration::hours(hour)).await;
        }

        // Third failure at 2h escalates, cooldown holds back 3h and 4h
        assert_eq!(sender.sent_kinds(), vec![AlertKind::RepeatedFailures]);
        assert_eq!(
            monitor.state().last_failure_alert_at,
            Some(t0() + chrono::Duration::hours(2))
        );
        assert_eq!(monitor.state().last_alert_at, None);
    }

    #[tokio::test]
    async fn test_auth_expiry_notice_sent_once_per_episode() {
        let sender = RecordingSender::default();
        let expired = || Err(FetchError::AuthExpired("token invalid".to_string()));
        let source = ScriptedSource::new(vec![expired(), expired(), Ok(30.0), expired()]);
        let mut monitor = Monitor::new(
            source,
            sender.clone(),
            MonitorSettings {
                notify_on_auth_expired: true,
                ..settings()
            },
        );

        for hour in 0..4 {
            monitor.check_once(t0() + chrono::Duration::hours(hour)).await;
        }

        assert_eq!(
            sender.sent_kinds(),
            vec![AlertKind::AuthExpired, AlertKind::AuthExpired]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let source = ScriptedSource::balance(25.0);
        let calls = source.calls.clone();
        let mut monitor = Monitor::new(source, RecordingSender::default(), settings());

        // Immediate first cycle, then at 1h, 2h and 3h
        let shutdown = tokio::time::sleep(Duration::from_secs(3 * 3600 + 60));
        monitor.run(shutdown).await;

        assert_eq!(*calls.lock().unwrap(), 4);
    }
}
