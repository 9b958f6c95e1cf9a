//! Device simulator commands
//!
//! `start` builds a fresh run: its own event stream, interpolator cache,
//! token, live-job set and cancellation root. Starting again cancels the
//! previous run first. `stop` cancels every job of the current run and closes
//! its stream with `stop` then `end`.

use crate::config::SimulationConfig;
use crate::dispatcher::{DispatchTargets, UpdateDispatcher};
use crate::error::Result;
use crate::events::{EventNotifier, EventStream, SimulationEvent};
use crate::expander::expand_all;
use crate::resolver::{ContextLookup, ValueResolver};
use crate::scheduler::{build_jobs, Job, JobScheduler};
use crate::token::{SharedToken, TokenManager};
use crate::transport::{HttpTransport, MqttTransport, ReqwestHttpTransport, RumqttcTransport};
use crate::validation::validate;
use devsim_calc::InterpolatorRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Handles of the run in progress
struct RunControl {
    cancel: CancellationToken,
    scheduler: Arc<JobScheduler>,
    notifier: EventNotifier,
}

impl RunControl {
    fn cancel(&self) {
        self.scheduler.cancel_all();
        self.cancel.cancel();
    }
}

/// Everything one run owns, assembled from its configuration
struct SimulationRun {
    scheduler: Arc<JobScheduler>,
    jobs: Vec<Job>,
    token_manager: Option<TokenManager>,
}

pub struct DeviceSimulator {
    http: Arc<dyn HttpTransport>,
    mqtt: Arc<dyn MqttTransport>,
    current: Mutex<Option<RunControl>>,
}

impl DeviceSimulator {
    pub fn new(http: Arc<dyn HttpTransport>, mqtt: Arc<dyn MqttTransport>) -> Self {
        Self {
            http,
            mqtt,
            current: Mutex::new(None),
        }
    }

    /// Simulator with the reqwest and rumqttc transports
    pub fn with_default_transports() -> Result<Self> {
        Ok(Self::new(
            Arc::new(ReqwestHttpTransport::new()?),
            Arc::new(RumqttcTransport::new()),
        ))
    }

    /// Start a simulation run and return its event stream
    ///
    /// Must be called within a tokio runtime. Configuration errors are
    /// reported on the returned stream as `error` followed by `end`.
    pub fn start(&self, config: SimulationConfig) -> EventStream {
        let (notifier, stream) = EventNotifier::channel();
        let cancel = CancellationToken::new();

        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            info!("Cancelling the previous simulation run");
            previous.cancel();
            previous.notifier.end();
        }

        let run = match self.prepare(&config, &notifier, &cancel) {
            Ok(run) => run,
            Err(e) => {
                warn!("Simulation not started: {}", e);
                notifier.emit(SimulationEvent::error(e));
                notifier.end();
                return stream;
            },
        };

        *self.current.lock() = Some(RunControl {
            cancel: cancel.clone(),
            scheduler: Arc::clone(&run.scheduler),
            notifier: notifier.clone(),
        });

        let SimulationRun {
            scheduler,
            jobs,
            token_manager,
        } = run;
        info!("Simulation started with {} jobs", jobs.len());

        match token_manager {
            Some(manager) => {
                tokio::spawn(async move {
                    let jobs_scheduler = Arc::clone(&scheduler);
                    let outcome = manager
                        .run(cancel.clone(), move || jobs_scheduler.schedule_all(jobs))
                        .await;
                    if let Err(e) = outcome {
                        error!("Authorization token not available, ending the simulation: {}", e);
                        scheduler.cancel_all();
                        cancel.cancel();
                        notifier.end();
                    }
                });
            },
            None => scheduler.schedule_all(jobs),
        }

        stream
    }

    fn prepare(&self, config: &SimulationConfig, notifier: &EventNotifier, cancel: &CancellationToken) -> Result<SimulationRun> {
        let registry = Arc::new(InterpolatorRegistry::new());
        validate(config, &registry)?;
        let jobs = build_jobs(expand_all(config))?;

        let token = SharedToken::default();
        let resolver = ValueResolver::new(registry).with_lookup(ContextLookup {
            http: Arc::clone(&self.http),
            context_broker: config.context_broker.clone(),
            domain: config.domain.clone(),
            token: token.clone(),
        });
        let targets = DispatchTargets {
            context_broker: config.context_broker.clone(),
            domain: config.domain.clone(),
            iota: config.iota.clone(),
        };
        let dispatcher = UpdateDispatcher::new(
            targets,
            resolver,
            Arc::clone(&self.http),
            Arc::clone(&self.mqtt),
            token.clone(),
            notifier.clone(),
        );
        let scheduler = Arc::new(JobScheduler::new(Arc::new(dispatcher), notifier.clone(), cancel.clone()));

        let token_manager = config.authentication.clone().map(|authentication| {
            TokenManager::new(
                Arc::clone(&self.http),
                authentication,
                config.domain.clone(),
                token,
                notifier.clone(),
            )
        });

        Ok(SimulationRun {
            scheduler,
            jobs,
            token_manager,
        })
    }

    /// Stop the current run; returns false when nothing was running
    pub fn stop(&self) -> bool {
        let Some(run) = self.current.lock().take() else {
            debug!("No simulation to stop");
            return false;
        };

        info!("Stopping the simulation");
        run.cancel();
        run.notifier.emit(SimulationEvent::Stop);
        run.notifier.end();

        let mqtt = Arc::clone(&self.mqtt);
        tokio::spawn(async move { mqtt.disconnect_all().await });
        true
    }

    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|run| !run.notifier.has_ended())
    }
}
