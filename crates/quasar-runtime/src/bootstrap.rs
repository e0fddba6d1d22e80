//! The bootstrapper.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use quasar_service::{ReloadState, Service, ServiceError};

use crate::config::RuntimeConfig;

/// Fatal lifecycle failures.
#[derive(Debug, Error)]
pub enum BootError {
    /// A service failed to configure or start at boot.
    #[error("service {service} failed to start: {source}")]
    Start {
        service: String,
        #[source]
        source: ServiceError,
    },

    /// A service failed while rotating its bus connection. The process
    /// cannot continue safely without a valid connection.
    #[error("service {service} failed during reload: {source}")]
    Reload {
        service: String,
        #[source]
        source: ServiceError,
    },
}

/// Starts, monitors and shuts down the registered services.
pub struct Bootstrapper {
    services: Vec<Arc<dyn Service>>,
    config: RuntimeConfig,
    fatal_tx: mpsc::Sender<BootError>,
    fatal_rx: mpsc::Receiver<BootError>,
}

impl Bootstrapper {
    /// Create a bootstrapper with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a bootstrapper with explicit configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        Self {
            services: Vec::new(),
            config,
            fatal_tx,
            fatal_rx,
        }
    }

    /// Register a service for the next [`bootstrap`](Self::bootstrap).
    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    /// Configure and start every registered service, then spawn its
    /// reload monitor.
    ///
    /// # Errors
    ///
    /// `BootError::Start` on the first configure/start failure; boot is
    /// aborted and already-started services are left for `run`'s caller
    /// (or the interrupt path) to shut down.
    pub async fn bootstrap(&self) -> Result<(), BootError> {
        for service in &self.services {
            info!(service = service.name(), "Configuring");
            if let Err(source) = service.configure(false).await {
                error!(service = service.name(), error = %source, "Configure failed, aborting boot");
                return Err(BootError::Start {
                    service: service.name().to_string(),
                    source,
                });
            }

            info!(service = service.name(), "Starting");
            if let Err(source) = service.start().await {
                error!(service = service.name(), error = %source, "Start failed, aborting boot");
                return Err(BootError::Start {
                    service: service.name().to_string(),
                    source,
                });
            }
            info!(service = service.name(), "Started");

            self.spawn_monitor(Arc::clone(service));
        }
        Ok(())
    }

    /// Boot, then wait for an interrupt or a fatal monitor report, then
    /// shut every service down.
    ///
    /// # Errors
    ///
    /// Boot failures and fatal reload failures.
    pub async fn run(mut self) -> Result<(), BootError> {
        self.bootstrap().await?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
            }
            Some(err) = self.fatal_rx.recv() => {
                error!(error = %err, "Fatal service failure");
                self.shutdown_all().await;
                return Err(err);
            }
        }

        self.shutdown_all().await;
        Ok(())
    }

    async fn shutdown_all(&self) {
        for service in &self.services {
            if let Err(err) = service.shutdown().await {
                error!(service = service.name(), error = %err, "Shutdown failed");
            }
        }
        // Give in-flight handler tasks time to finish their replies.
        tokio::time::sleep(self.config.shutdown_grace).await;
        info!("Shutdown complete");
    }

    fn spawn_monitor(&self, service: Arc<dyn Service>) {
        let Some(mut handle) = service.reload_handle() else {
            warn!(
                service = service.name(),
                "Reload handle already taken, monitor not started"
            );
            return;
        };
        let fatal = self.fatal_tx.clone();

        tokio::spawn(async move {
            while let Some(state) = handle.next().await {
                match state {
                    ReloadState::Reloading => {
                        info!(service = service.name(), "Reloading");
                        match service.shutdown().await {
                            Ok(()) => {
                                let _ = handle.ack(ReloadState::Ready).await;
                                info!(service = service.name(), "Reloading done");
                            }
                            Err(source) => {
                                error!(service = service.name(), error = %source, "Shutdown for reload failed");
                                let _ = handle.ack(ReloadState::Error).await;
                                let _ = fatal
                                    .send(BootError::Reload {
                                        service: service.name().to_string(),
                                        source,
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                    ReloadState::Reloaded => {
                        info!(service = service.name(), "Reconfiguring");
                        let restarted = async {
                            service.configure(true).await?;
                            service.start().await
                        }
                        .await;
                        match restarted {
                            Ok(()) => info!(service = service.name(), "Restarted"),
                            Err(source) => {
                                error!(service = service.name(), error = %source, "Restart after reload failed");
                                let _ = fatal
                                    .send(BootError::Reload {
                                        service: service.name().to_string(),
                                        source,
                                    })
                                    .await;
                                return;
                            }
                        }
                    }
                    ReloadState::Ready | ReloadState::Error => {}
                }
            }
        });
    }
}

impl Default for Bootstrapper {
    fn default() -> Self {
        Self::new()
    }
}
