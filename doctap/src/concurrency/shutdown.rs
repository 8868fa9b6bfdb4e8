use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
///
/// A single [`ShutdownTx::shutdown`] call is observed by every subscribed receiver.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    pub fn new(tx: watch::Sender<()>) -> Self {
        Self(tx)
    }

    /// Signals shutdown to all receivers.
    pub fn shutdown(&self) {
        // Infallible so shutdown can be requested while no receiver is alive.
        self.0.send_replace(());
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver side of the shutdown channel. `changed()` resolves once shutdown was requested.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx::new(tx), rx)
}
