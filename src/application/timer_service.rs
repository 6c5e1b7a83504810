use crate::domain::models::TimerDurations;
use crate::domain::timer::{ModeCompletion, PomodoroTimer, TimerSnapshot};
use crate::infrastructure::error::InfraError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Fired once per finished mode (the completion chime in the desktop shell).
pub trait CompletionNotifier: Send + Sync {
    fn notify(&self, completion: &ModeCompletion) -> Result<(), InfraError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl CompletionNotifier for LogNotifier {
    fn notify(&self, completion: &ModeCompletion) -> Result<(), InfraError> {
        log::info!(
            "{} finished, next up {} ({} work sessions done)",
            completion.finished.label(),
            completion.next.label(),
            completion.completed_sessions
        );
        Ok(())
    }
}

/// Emits `timer-completed` to the webview.
#[cfg(feature = "desktop")]
pub struct TauriEventNotifier {
    app: tauri::AppHandle,
}

#[cfg(feature = "desktop")]
impl TauriEventNotifier {
    pub fn new(app: tauri::AppHandle) -> Self {
        Self { app }
    }
}

#[cfg(feature = "desktop")]
impl CompletionNotifier for TauriEventNotifier {
    fn notify(&self, completion: &ModeCompletion) -> Result<(), InfraError> {
        use tauri::Emitter;
        self.app
            .emit("timer-completed", completion)
            .map_err(|error| InfraError::InvalidConfig(format!("timer event emit failed: {error}")))
    }
}

/// Owns the pomodoro state and the one-second ticker task driving it.
pub struct TimerService {
    timer: Arc<Mutex<PomodoroTimer>>,
    notifier: Arc<dyn CompletionNotifier>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new(durations: TimerDurations, notifier: Arc<dyn CompletionNotifier>) -> Self {
        Self {
            timer: Arc::new(Mutex::new(PomodoroTimer::new(durations))),
            notifier,
            ticker: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Result<TimerSnapshot, InfraError> {
        Ok(lock_timer(&self.timer)?.snapshot())
    }

    /// Starts or pauses the countdown. Starting needs a tokio runtime.
    pub fn toggle(&self) -> Result<TimerSnapshot, InfraError> {
        let snapshot = {
            let mut timer = lock_timer(&self.timer)?;
            if !timer.is_active() {
                // Fail before flipping state so a missing runtime never leaves
                // an active timer with no ticker.
                Handle::try_current()
                    .map_err(|error| InfraError::InvalidConfig(format!("timer needs an async runtime: {error}")))?;
            }
            timer.toggle();
            timer.snapshot()
        };

        self.stop_ticker()?;
        if snapshot.is_active {
            let handle = self.spawn_ticker();
            *self.lock_ticker()? = Some(handle);
        }
        Ok(snapshot)
    }

    pub fn reset(&self) -> Result<TimerSnapshot, InfraError> {
        self.stop_ticker()?;
        let mut timer = lock_timer(&self.timer)?;
        timer.reset();
        Ok(timer.snapshot())
    }

    pub fn apply_settings(&self, durations: TimerDurations) -> Result<TimerSnapshot, InfraError> {
        let mut timer = lock_timer(&self.timer)?;
        timer.apply_settings(durations);
        Ok(timer.snapshot())
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let timer = Arc::clone(&self.timer);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
            loop {
                interval.tick().await;
                let completion = match lock_timer(&timer) {
                    Ok(mut timer) if timer.is_active() => timer.tick(),
                    Ok(_) => return,
                    Err(error) => {
                        log::error!("timer tick skipped: {error}");
                        return;
                    }
                };
                if let Some(completion) = completion {
                    if let Err(error) = notifier.notify(&completion) {
                        log::debug!("completion notification failed: {error}");
                    }
                    return;
                }
            }
        })
    }

    fn stop_ticker(&self) -> Result<(), InfraError> {
        if let Some(handle) = self.lock_ticker()?.take() {
            handle.abort();
        }
        Ok(())
    }

    fn lock_ticker(&self) -> Result<MutexGuard<'_, Option<JoinHandle<()>>>, InfraError> {
        self.ticker
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("ticker lock poisoned: {error}")))
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let handle = match self.ticker.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

fn lock_timer(timer: &Mutex<PomodoroTimer>) -> Result<MutexGuard<'_, PomodoroTimer>, InfraError> {
    timer
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("timer lock poisoned: {error}")))
}
