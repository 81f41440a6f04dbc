use async_trait::async_trait;
use tokio::task::JoinHandle;

/// A long-running task with explicit lifecycle phases.
///
/// `start` performs one-time setup, `run` is the service's event loop and is
/// expected to run until shutdown, `stop` releases held resources.
#[async_trait]
pub trait Service: Send + 'static {
    type Error: std::error::Error + Send;

    async fn start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn run(&mut self) -> Result<(), Self::Error>;

    async fn stop(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Drive a service on its own tokio task. A failing `start` aborts the
/// service; a `run` that returns (with or without error) is logged and
/// followed by `stop`.
pub fn spawn<S: Service>(name: &'static str, mut service: S) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = service.start().await {
            log::error!("[{name}] failed to start: {err}");
            return;
        }
        log::debug!("[{name}] started");

        match service.run().await {
            Ok(()) => log::warn!("[{name}] exited"),
            Err(err) => log::error!("[{name}] exited with error: {err}"),
        }

        if let Err(err) = service.stop().await {
            log::warn!("[{name}] error during stop: {err}");
        }
    })
}
