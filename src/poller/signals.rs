//! Shutdown plumbing between OS signals and the poll loop.
//!
//! The run owns one [`ShutdownFlag`]. [`SignalBridge::arm`] spawns a listener
//! that flips the flag on SIGINT/SIGTERM instead of letting the process die;
//! the loop only ever reads it. The returned [`SignalGuard`] stops the
//! listener and reinstalls the previous SIGINT/SIGTERM dispositions when
//! disarmed or dropped, so every exit path of a run hands them back.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Write-once shutdown request shared between the signal listener and the loop.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    inner: Arc<FlagInner>,
}

#[derive(Default)]
struct FlagInner {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the call that set the flag.
    pub fn request(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early if shutdown is requested.
    /// Returns `true` when shutdown was requested before or during the sleep.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request in between is not missed.
        notified.as_mut().enable();
        if self.is_requested() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_requested(),
            _ = notified => true,
        }
    }
}

/// Anything that yields termination signals; `None` means no more will arrive.
#[async_trait]
pub trait SignalSource: Send + 'static {
    async fn recv(&mut self) -> Option<&'static str>;
}

/// SIGINT + SIGTERM on unix, Ctrl-C elsewhere.
pub struct OsSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl OsSignals {
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(OsSignals {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(OsSignals {})
        }
    }
}

#[async_trait]
impl SignalSource for OsSignals {
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            r = self.interrupt.recv() => r.map(|_| "SIGINT"),
            r = self.terminate.recv() => r.map(|_| "SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|_| "Ctrl-C")
    }
}

/// Process signal dispositions for SIGINT/SIGTERM.
#[cfg(unix)]
mod disposition {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::sync::OnceLock;

    pub(super) type Saved = Vec<(Signal, SigAction)>;

    const HANDLED: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

    /// tokio's handlers as installed the first time this process armed.
    static RUNTIME: OnceLock<Saved> = OnceLock::new();

    /// Read the current disposition of `sig`. The kernel only hands it back
    /// from a swap, so SIG_IGN is held for the instant between the two calls.
    pub(super) fn current(sig: Signal) -> nix::Result<SigAction> {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // SAFETY: SIG_IGN has no handler code, and `old` is reinstalled verbatim.
        let old = unsafe { sigaction(sig, &ignore)? };
        unsafe { sigaction(sig, &old)? };
        Ok(old)
    }

    pub(super) fn snapshot() -> nix::Result<Saved> {
        HANDLED.iter().map(|&sig| current(sig).map(|act| (sig, act))).collect()
    }

    pub(super) fn install(saved: &[(Signal, SigAction)]) -> nix::Result<()> {
        for (sig, act) in saved {
            // SAFETY: every entry was read back from the kernel by `current`.
            unsafe { sigaction(*sig, act)? };
        }
        Ok(())
    }

    /// Make tokio's handlers the active ones. tokio installs them once per
    /// process, so after a previous disarm they have to be put back by hand.
    pub(super) fn activate_runtime() -> nix::Result<()> {
        match RUNTIME.get() {
            Some(saved) => install(saved),
            None => {
                let _ = RUNTIME.set(snapshot()?);
                Ok(())
            }
        }
    }
}

pub struct SignalBridge;

impl SignalBridge {
    /// Start intercepting SIGINT/SIGTERM for the lifetime of the returned guard.
    /// Whatever handled them before is reinstalled when the guard is released.
    #[cfg(unix)]
    pub fn arm(flag: ShutdownFlag) -> std::io::Result<SignalGuard> {
        let prior = disposition::snapshot()?;
        let signals = OsSignals::new()?;
        if let Err(e) = disposition::activate_runtime() {
            let _ = disposition::install(&prior);
            return Err(e.into());
        }
        let mut guard = Self::arm_with(flag, signals);
        guard.prior = Some(prior);
        Ok(guard)
    }

    #[cfg(not(unix))]
    pub fn arm(flag: ShutdownFlag) -> std::io::Result<SignalGuard> {
        Ok(Self::arm_with(flag, OsSignals::new()?))
    }

    pub fn arm_with<S: SignalSource>(flag: ShutdownFlag, mut source: S) -> SignalGuard {
        let task = tokio::spawn(async move {
            while let Some(name) = source.recv().await {
                if flag.request() {
                    info!("{} received, finishing the current cycle before stopping", name);
                } else {
                    warn!("{} received again, shutdown already in progress", name);
                }
            }
        });
        debug!("Signal handlers armed");
        SignalGuard {
            task: Some(task),
            #[cfg(unix)]
            prior: None,
        }
    }
}

/// Releases the signal listener exactly once: on [`SignalGuard::disarm`] or drop.
pub struct SignalGuard {
    task: Option<JoinHandle<()>>,
    /// Dispositions to reinstall; only set when real OS signals were armed
    #[cfg(unix)]
    prior: Option<disposition::Saved>,
}

impl SignalGuard {
    /// Stop the listener, wait until it has released its signal streams and
    /// put the previous handlers back.
    pub async fn disarm(mut self) {
        if let Some(task) = self.release() {
            let _ = task.await;
            debug!("Signal handlers disarmed");
        }
    }

    fn release(&mut self) -> Option<JoinHandle<()>> {
        let task = self.task.take()?;
        task.abort();
        #[cfg(unix)]
        if let Some(prior) = self.prior.take() {
            if let Err(e) = disposition::install(&prior) {
                warn!("Failed to restore previous signal handlers: {}", e);
            }
        }
        Some(task)
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if self.release().is_some() {
            debug!("Signal handlers disarmed on drop");
        }
    }
}
