//! OS signal → shutdown token.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {tokio_util::sync::CancellationToken, tracing::info};

/// Set once a shutdown signal has been received.
#[derive(Debug, Clone, Default)]
pub struct SignalFlag(Arc<AtomicBool>);

impl SignalFlag {
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM. The returned flag tells the caller
/// whether the exit was signal-driven.
pub fn install(shutdown: CancellationToken) -> SignalFlag {
    let flag = SignalFlag::default();
    let raised = flag.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = wait_for_signal() => {
                raised.0.store(true, Ordering::SeqCst);
                info!("shutdown signal received, finishing current cycle");
                shutdown.cancel();
            },
            () = shutdown.cancelled() => {},
        }
    });
    flag
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
