// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Experiment runtime orchestration.
//!
//! The runtime loads the configuration, assembles the experiment, starts
//! it, waits for shutdown or the configured duration, then finishes it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ccb_config::{build_manager, ConfigLoader, ExperimentConfig};
use ccb_core::{experiment_failure, CcbError, ExperimentManager};
use tracing::{error, info, warn};

use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// ExperimentRuntime
// =============================================================================

/// Runs one experiment from start to finish.
pub struct ExperimentRuntime {
    config: ExperimentConfig,
    manager: ExperimentManager,
    shutdown: ShutdownCoordinator,
    duration: Option<Duration>,
}

impl ExperimentRuntime {
    /// Assembles the experiment described by `config`.
    pub fn new(config: ExperimentConfig) -> BinResult<Self> {
        let manager = build_manager(&config)?;
        Ok(Self {
            config,
            manager,
            shutdown: ShutdownCoordinator::new(),
            duration: None,
        })
    }

    /// Finishes the experiment after `duration` unless shut down earlier.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Returns the loaded configuration.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Returns the experiment manager.
    pub fn manager(&self) -> &ExperimentManager {
        &self.manager
    }

    /// Returns the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Runs the experiment until shutdown or the end of the duration.
    ///
    /// # Errors
    ///
    /// Returns [`BinError::Experiment`] when starting or finishing failed.
    /// Devices are still stopped when starting failed.
    pub async fn run(&self) -> BinResult<()> {
        let name = &self.config.experiment.name;
        info!(experiment = %name, "Starting experiment (ccb v{})", ccb_core::VERSION);

        if let Err(e) = self.manager.run().await {
            self.log_failure("start", &e);
            for device in self.manager.devices_failed_start().await {
                error!(experiment = %name, device = %device, "Device failed to start");
            }
            if let Err(stop_err) = self.manager.finish().await {
                warn!(experiment = %name, error = %stop_err, "Teardown after failed start reported errors");
            }
            return Err(BinError::Experiment(e));
        }

        info!(
            experiment = %name,
            devices = ?self.manager.device_names().await,
            "Experiment is running"
        );
        self.wait().await;

        info!(experiment = %name, "Finishing experiment");
        let result = self.manager.finish().await;
        match result {
            Ok(()) => {
                info!(experiment = %name, status = %self.manager.status(), "Experiment finished");
                Ok(())
            }
            Err(e) => {
                self.log_failure("finish", &e);
                for device in self.manager.devices_failed_stop().await {
                    error!(experiment = %name, device = %device, "Device failed to stop");
                }
                Err(BinError::Experiment(e))
            }
        }
    }

    /// Resolves on shutdown or, if set, once the duration has elapsed.
    async fn wait(&self) {
        let Some(duration) = self.duration else {
            return self.shutdown.wait_for_shutdown().await;
        };
        tokio::select! {
            _ = self.shutdown.wait_for_shutdown() => {}
            _ = tokio::time::sleep(duration) => {
                info!(duration = ?duration, "Experiment duration elapsed");
            }
        }
    }

    fn log_failure(&self, phase: &str, error: &CcbError) {
        let cause = experiment_failure(error).unwrap_or(error);
        error!(
            experiment = %self.config.experiment.name,
            phase,
            error_type = cause.error_type(),
            error = %cause,
            "Experiment failed"
        );
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for constructing the experiment runtime.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<ExperimentConfig>,
    duration: Option<Duration>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: ExperimentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the run duration.
    pub fn duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Loads the configuration, if only a path was given.
    pub fn load(self) -> BinResult<(ExperimentConfig, Option<Duration>)> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::config("No configuration provided"))?;
                ConfigLoader::new()
                    .load(&path)
                    .map_err(|e| BinError::from(e).with_context(format!("Loading {}", path.display())))?
            }
        };
        Ok((config, self.duration))
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<ExperimentRuntime> {
        let (config, duration) = self.load()?;
        Ok(ExperimentRuntime::new(config)?.with_duration(duration))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ccb_core::ExperimentStatus;

    #[test]
    fn test_runtime_builder_requires_config() {
        assert!(RuntimeBuilder::new().build().is_err());
    }

    #[tokio::test]
    async fn test_empty_experiment_runs_for_duration() {
        let runtime = RuntimeBuilder::new()
            .config(ExperimentConfig::default())
            .duration(Some(Duration::from_millis(20)))
            .build()
            .unwrap();

        runtime.run().await.unwrap();
        assert_eq!(runtime.manager().status(), ExperimentStatus::Finished);
    }

    #[tokio::test]
    async fn test_manual_shutdown_finishes() {
        let runtime = RuntimeBuilder::new()
            .config(ExperimentConfig::default())
            .build()
            .unwrap();
        runtime.shutdown().initiate_shutdown();

        runtime.run().await.unwrap();
        assert!(runtime.manager().is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_wait_before_duration() {
        let runtime = RuntimeBuilder::new()
            .config(ExperimentConfig::default())
            .duration(Some(Duration::from_secs(3600)))
            .build()
            .unwrap();
        let trigger = runtime.shutdown().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.initiate_shutdown();
        });

        let started = tokio::time::Instant::now();
        runtime.run().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(runtime.manager().status(), ExperimentStatus::Finished);
    }
}
