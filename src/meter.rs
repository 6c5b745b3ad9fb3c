//! Timed measurement loop
//!
//! [`Meter::start`] spawns one producer task that owns a freshly opened
//! [`Sampler`]. Each period the task reads one buffer on the blocking pool,
//! reduces it to decibels and hands the value to [`Readings`]. The sampler
//! never leaves the task, so every way the task can end closes the device.

use crate::cancel::CancellationToken;
use crate::error::{MeterError, MeterResult};
use crate::level::LevelEstimator;
use crate::sampler::Sampler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Builds a closed sampler for each new session
pub type SamplerFactory = Arc<dyn Fn() -> Sampler + Send + Sync>;

/// Decibel readings of one session, in acquisition order.
///
/// Ends after a terminal error, after `stop`, or when the session is dropped.
#[derive(Debug)]
pub struct Readings {
    receiver: mpsc::Receiver<MeterResult<f64>>,
}

impl Readings {
    pub async fn next(&mut self) -> Option<MeterResult<f64>> {
        self.receiver.recv().await
    }
}

struct Session {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Start/stop control over the measurement loop
pub struct Meter {
    factory: SamplerFactory,
    estimator: LevelEstimator,
    period: Duration,
    session: Mutex<Option<Session>>,
}

impl Meter {
    pub fn new(factory: SamplerFactory, estimator: LevelEstimator, period: Duration) -> Self {
        Self {
            factory,
            estimator,
            period,
            session: Mutex::new(None),
        }
    }

    /// Begin a fresh session.
    ///
    /// Fails with `AlreadyRunning` while a previous session is live. Open
    /// failures arrive as the first and only item of the returned readings.
    pub async fn start(&self) -> MeterResult<Readings> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            if !previous.task.is_finished() {
                *session = Some(previous);
                return Err(MeterError::AlreadyRunning);
            }
            if let Err(err) = previous.task.await {
                warn!(error = %err, "previous measurement task ended abnormally");
            }
        }

        // One slot: the producer never runs more than a reading ahead.
        let (sender, receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        let task = tokio::spawn(produce(
            Arc::clone(&self.factory),
            self.estimator,
            self.period,
            token.clone(),
            sender,
        ));
        *session = Some(Session { token, task });
        Ok(Readings { receiver })
    }

    /// Stop the live session. Returns once its device has been released.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if let Some(Session { token, task }) = session.take() {
            token.cancel();
            if let Err(err) = task.await {
                warn!(error = %err, "measurement task ended abnormally");
            }
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }
}

impl Drop for Meter {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.token.cancel();
        }
    }
}

struct Acquisition {
    sampler: Sampler,
    buffer: Vec<i16>,
}

/// Run a blocking sampler call off the async workers. `None` if it panicked,
/// in which case unwinding has already dropped (and closed) the sampler.
async fn on_capture_thread<T, F>(mut acquisition: Acquisition, op: F) -> Option<(Acquisition, T)>
where
    F: FnOnce(&mut Acquisition) -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = op(&mut acquisition);
        (acquisition, out)
    })
    .await
    .ok()
}

/// Hand one item to the consumer unless the session is cancelled first.
async fn deliver(
    readings: &mpsc::Sender<MeterResult<f64>>,
    token: &CancellationToken,
    item: MeterResult<f64>,
) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = readings.send(item) => sent.is_ok(),
    }
}

fn capture_panicked() -> MeterError {
    MeterError::ReadFailed("capture worker panicked".to_string())
}

async fn produce(
    factory: SamplerFactory,
    estimator: LevelEstimator,
    period: Duration,
    token: CancellationToken,
    readings: mpsc::Sender<MeterResult<f64>>,
) {
    let acquisition = Acquisition {
        sampler: factory(),
        buffer: Vec::new(),
    };
    let Some((mut acquisition, opened)) =
        on_capture_thread(acquisition, |a| a.sampler.open()).await
    else {
        deliver(&readings, &token, Err(capture_panicked())).await;
        return;
    };
    if let Err(err) = opened {
        warn!(error = %err, "failed to open sampler");
        deliver(&readings, &token, Err(err)).await;
        return;
    }
    acquisition.buffer = vec![0; acquisition.sampler.buffer_len()];
    info!(
        period_ms = period.as_millis() as u64,
        method = ?estimator.method(),
        "measurement started"
    );

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Hold a slot before reading so a slow consumer never has a reading
        // queued behind one that is already waiting.
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = readings.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let Some((next, read)) =
            on_capture_thread(acquisition, |a| a.sampler.read(&mut a.buffer)).await
        else {
            permit.send(Err(capture_panicked()));
            return;
        };
        acquisition = next;
        if token.is_cancelled() {
            break;
        }

        match read {
            Ok(count) if count < acquisition.buffer.len() => {
                debug!(count, "short read, reporting 0 dB");
                permit.send(Ok(0.0));
            }
            Ok(_) => permit.send(Ok(estimator.decibel(&acquisition.buffer))),
            Err(err) => {
                // The sampler closed itself before returning the error.
                permit.send(Err(err));
                break;
            }
        }
    }

    acquisition.sampler.close();
    info!("measurement stopped");
}
