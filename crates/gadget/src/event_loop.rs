//! Readiness loop
//!
//! Waits on the device for pending control events (priority readiness) and
//! for free output buffers (write readiness), dispatches events to the
//! session and paces frame delivery to the configured frame rate.

use crate::uvc::{GadgetDevice, Session};
use common::{Error, Result};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::unix::AsyncFd;
use tokio::io::{Interest, Ready};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause at the top of every iteration
const LOOP_DELAY: Duration = Duration::from_millis(1);

const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct ShutdownState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable termination flag that can also be awaited
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<ShutdownState>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

/// Cancel `token` on SIGINT or SIGTERM
pub fn spawn_signal_handler(token: ShutdownToken) -> Result<JoinHandle<()>> {
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT, shutting down"),
                Err(e) => error!("Error waiting for SIGINT: {}", e),
            },
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
        token.cancel();
    }))
}

/// Earliest time the next frame may go out
#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    next: Option<Instant>,
}

impl FrameClock {
    pub fn new(framerate: u32) -> Self {
        Self {
            interval: Duration::from_millis(1000 / u64::from(framerate.max(1))),
            next: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn due(&self, now: Instant) -> bool {
        self.next.is_none_or(|next| now >= next)
    }

    /// Record a delivery at `now`
    pub fn mark(&mut self, now: Instant) {
        self.next = Some(now + self.interval);
    }
}

/// Frames delivered per one-second window
#[derive(Debug)]
pub struct FpsCounter {
    log: bool,
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(log: bool, now: Instant) -> Self {
        Self {
            log,
            frames: 0,
            window_start: now,
        }
    }

    pub fn record(&mut self) {
        self.frames += 1;
    }

    /// Close the window if a second has passed; returns its frame count
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.duration_since(self.window_start) < FPS_WINDOW {
            return None;
        }
        let frames = std::mem::take(&mut self.frames);
        self.window_start = now;
        if self.log {
            info!("FPS: {}", frames);
        }
        Some(frames)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub framerate: u32,
    pub show_fps: bool,
}

/// Raw descriptor registered with the reactor; the device keeps ownership
struct DeviceFd(RawFd);

impl AsRawFd for DeviceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Drive `session` until shutdown is requested by the host or by `shutdown`
pub async fn run<D>(session: &mut Session<D>, options: LoopOptions, shutdown: &ShutdownToken) -> Result<()>
where
    D: GadgetDevice + AsRawFd,
{
    let interest = Interest::PRIORITY | Interest::WRITABLE;
    let device_fd = AsyncFd::with_interest(DeviceFd(session.device().as_raw_fd()), interest)?;

    let mut clock = FrameClock::new(options.framerate);
    let mut fps = FpsCounter::new(options.show_fps, Instant::now());
    info!("event loop running at {} fps", options.framerate);

    loop {
        if shutdown.is_cancelled() || session.shutdown_requested() {
            break;
        }
        tokio::time::sleep(LOOP_DELAY).await;

        let mut guard = tokio::select! {
            _ = shutdown.cancelled() => break,
            guard = device_fd.ready(interest) => guard?,
        };
        let ready = guard.ready();

        if ready.is_priority() {
            match session.process_event() {
                Ok(true) => {}
                Ok(false) => guard.clear_ready_matching(Ready::PRIORITY),
                Err(Error::Protocol(e)) => warn!("undecodable event dropped: {}", e),
                Err(e) => {
                    error!("event dequeue failed: {}", e);
                    guard.clear_ready_matching(Ready::PRIORITY);
                }
            }
        }

        if ready.is_writable() {
            let now = Instant::now();
            if !session.is_streaming() {
                guard.clear_ready_matching(Ready::WRITABLE);
            } else if clock.due(now) {
                match session.deliver_frame() {
                    Ok(true) => {
                        fps.record();
                        clock.mark(now);
                    }
                    Ok(false) => guard.clear_ready_matching(Ready::WRITABLE),
                    Err(e) => {
                        warn!("frame delivery failed: {}", e);
                        clock.mark(now);
                    }
                }
            }
        }

        let now = Instant::now();
        fps.tick(now);
        session.indicator_mut().blink_tick(now);
    }

    debug!(
        "event loop stopped (cancelled: {}, host disconnect: {})",
        shutdown.is_cancelled(),
        session.shutdown_requested()
    );
    Ok(())
}
