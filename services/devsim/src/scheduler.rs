//! Job Scheduler - one timer task per schedule group
//!
//! Each job owns a child of the run's cancellation token and a slot in the
//! live-job set. One-shot jobs leave the set once their firing completes;
//! the set becoming empty ends the run. Recurring jobs only stop when the
//! run is cancelled.

use crate::config::Attribute;
use crate::error::Result;
use crate::events::{ElementSummary, EventNotifier, SimulationEvent};
use crate::expander::Element;
use crate::grouper::group;
use crate::schedule::Schedule;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

pub type JobId = usize;

/// Work performed at every firing of a job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn fire(&self, element: &Element, attributes: &[Attribute]);
}

/// One element's attribute group bound to one schedule
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub schedule: Schedule,
    pub element: Arc<Element>,
    pub attributes: Vec<Attribute>,
}

impl Job {
    fn summary(&self) -> ElementSummary {
        match self.element.as_ref() {
            Element::Entity(entity) => ElementSummary::Entity {
                entity_name: entity.entity_name.clone(),
                entity_type: entity.entity_type.clone(),
            },
            Element::Device(device) => ElementSummary::Device {
                device_id: device.device_id.clone(),
                protocol: device.protocol.clone(),
                api_key: device.api_key.clone(),
            },
        }
    }
}

/// Build the jobs of a set of elements, in element then group order
pub fn build_jobs(elements: Vec<Element>) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for element in elements {
        let element = Arc::new(element);
        for schedule_group in group(&element) {
            let schedule: Schedule = schedule_group.schedule.parse()?;
            jobs.push(Job {
                id: jobs.len(),
                schedule,
                element: Arc::clone(&element),
                attributes: schedule_group.attributes,
            });
        }
    }
    Ok(jobs)
}

/// Next firing after `now`, never at or before the previous one
///
/// Timers sleep on the monotonic clock while schedules follow the wall clock,
/// which may still read slightly earlier than the instant that just fired.
fn next_firing(
    schedule: &Schedule,
    now: DateTime<Local>,
    last_fired: Option<DateTime<Local>>,
) -> Option<DateTime<Local>> {
    let after = last_fired.map_or(now, |last| now.max(last));
    schedule.next_after(&after)
}

pub struct JobScheduler {
    handler: Arc<dyn JobHandler>,
    notifier: EventNotifier,
    /// Root token of the run; every job token is a child of it
    root: CancellationToken,
    live: Mutex<HashMap<JobId, CancellationToken>>,
}

impl JobScheduler {
    pub fn new(handler: Arc<dyn JobHandler>, notifier: EventNotifier, root: CancellationToken) -> Self {
        Self {
            handler,
            notifier,
            root,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Register every job, then start their timers
    ///
    /// All jobs are in the live set before the first one can fire, so an
    /// early one-shot completion never ends the run prematurely.
    pub fn schedule_all(self: &Arc<Self>, jobs: Vec<Job>) {
        if self.root.is_cancelled() {
            debug!("Run already cancelled, not scheduling {} jobs", jobs.len());
            return;
        }
        if jobs.is_empty() {
            info!("Nothing to schedule");
            self.finish();
            return;
        }

        let mut tokens = Vec::with_capacity(jobs.len());
        {
            let mut live = self.live.lock();
            for job in &jobs {
                let token = self.root.child_token();
                live.insert(job.id, token.clone());
                tokens.push(token);
            }
        }

        for job in &jobs {
            let mut attributes = job.element.static_attributes().to_vec();
            attributes.extend(job.attributes.iter().cloned());
            self.notifier.emit(SimulationEvent::UpdateScheduled {
                schedule: job.schedule.to_string(),
                element: job.summary(),
                attributes,
            });
        }

        info!("Scheduled {} update jobs", jobs.len());
        for (job, token) in jobs.into_iter().zip(tokens) {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.run_job(job, token).await });
        }
    }

    async fn run_job(self: Arc<Self>, job: Job, token: CancellationToken) {
        let mut last_fired = None;
        loop {
            let now = Local::now();
            let Some(next) = next_firing(&job.schedule, now, last_fired) else {
                debug!("Job {} ({}) has no further firings", job.id, job.schedule);
                break;
            };
            let delay = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = token.cancelled() => {
                    trace!("Job {} cancelled", job.id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            last_fired = Some(next);

            debug!("Firing job {} of '{}' ({})", job.id, job.element.id(), job.schedule);
            let handler = Arc::clone(&self.handler);
            let element = Arc::clone(&job.element);
            let attributes = job.attributes.clone();
            let firing = tokio::spawn(async move { handler.fire(&element, &attributes).await });

            if job.schedule.is_once() {
                if let Err(e) = firing.await {
                    error!("Job {} of '{}' aborted: {}", job.id, job.element.id(), e);
                }
                break;
            }
        }
        self.complete(job.id);
    }

    /// Remove a finished job; the last one out ends the run
    fn complete(&self, id: JobId) {
        let now_empty = {
            let mut live = self.live.lock();
            live.remove(&id).is_some() && live.is_empty()
        };
        if now_empty && !self.root.is_cancelled() {
            info!("All jobs completed");
            self.finish();
        }
    }

    fn finish(&self) {
        self.root.cancel();
        self.notifier.end();
    }

    /// Stop every timer and clear the live set
    pub fn cancel_all(&self) {
        let jobs: Vec<CancellationToken> = self.live.lock().drain().map(|(_, token)| token).collect();
        for token in &jobs {
            token.cancel();
        }
        self.root.cancel();
        if !jobs.is_empty() {
            debug!("Cancelled {} jobs", jobs.len());
        }
    }

    pub fn live_jobs(&self) -> usize {
        self.live.lock().len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::config::EntityTemplate;
    use crate::expander::expand_entity;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn fire(&self, _element: &Element, _attributes: &[Attribute]) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entities(count: u32, schedule: &str) -> Vec<Element> {
        let template: EntityTemplate = serde_json::from_value(json!({
            "count": count,
            "entity_type": "Sensor",
            "schedule": schedule,
            "active": [{"name": "temperature", "type": "Number", "value": 21}]
        }))
        .unwrap();
        expand_entity(&template)
    }

    #[test]
    fn test_build_jobs_per_group() {
        let template: EntityTemplate = serde_json::from_value(json!({
            "entity_name": "Room1",
            "entity_type": "Room",
            "schedule": "once",
            "active": [
                {"name": "a", "type": "Number", "value": 1},
                {"name": "b", "type": "Number", "value": 2, "schedule": "*/5 * * * *"},
                {"name": "c", "type": "Number", "value": 3}
            ]
        }))
        .unwrap();
        let jobs = build_jobs(expand_entity(&template)).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].schedule.is_once());
        assert_eq!(jobs[0].attributes.len(), 2);
        assert_eq!(jobs[1].schedule.as_str(), "*/5 * * * *");
    }

    #[tokio::test]
    async fn test_once_jobs_end_the_run() {
        let handler = Arc::new(CountingHandler::default());
        let (notifier, mut stream) = EventNotifier::channel();
        let scheduler = Arc::new(JobScheduler::new(handler.clone(), notifier, CancellationToken::new()));

        scheduler.schedule_all(build_jobs(entities(3, "once")).unwrap());
        let events = stream.collect_until_end().await;

        let names: Vec<&str> = events.iter().map(SimulationEvent::name).collect();
        assert_eq!(names, ["update-scheduled", "update-scheduled", "update-scheduled", "end"]);
        assert_eq!(handler.fired.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.live_jobs(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_stops_recurring_jobs() {
        let handler = Arc::new(CountingHandler::default());
        let (notifier, _stream) = EventNotifier::channel();
        let scheduler = Arc::new(JobScheduler::new(handler.clone(), notifier.clone(), CancellationToken::new()));

        scheduler.schedule_all(build_jobs(entities(2, "*/1 * * * * *")).unwrap());
        assert_eq!(scheduler.live_jobs(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(2200)).await;
        scheduler.cancel_all();
        assert_eq!(scheduler.live_jobs(), 0);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let fired = handler.fired.load(Ordering::SeqCst);
        assert!(fired >= 2, "fired {} times", fired);

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert_eq!(handler.fired.load(Ordering::SeqCst), fired);
        assert!(!notifier.has_ended());
    }

    #[tokio::test]
    async fn test_no_jobs_ends_immediately() {
        let handler = Arc::new(CountingHandler::default());
        let (notifier, mut stream) = EventNotifier::channel();
        let scheduler = Arc::new(JobScheduler::new(handler, notifier, CancellationToken::new()));
        scheduler.schedule_all(Vec::new());
        assert_eq!(stream.recv().await.unwrap().name(), "end");
    }

    struct PanickingHandler;

    #[async_trait]
    impl JobHandler for PanickingHandler {
        async fn fire(&self, element: &Element, _attributes: &[Attribute]) {
            panic!("handler failed for {}", element.id());
        }
    }

    #[tokio::test]
    async fn test_panicking_once_job_still_ends_the_run() {
        let (notifier, mut stream) = EventNotifier::channel();
        let scheduler = Arc::new(JobScheduler::new(Arc::new(PanickingHandler), notifier, CancellationToken::new()));

        scheduler.schedule_all(build_jobs(entities(2, "once")).unwrap());
        let events = tokio::time::timeout(std::time::Duration::from_secs(5), stream.collect_until_end())
            .await
            .unwrap();

        assert_eq!(events.last().map(SimulationEvent::name), Some("end"));
        assert_eq!(scheduler.live_jobs(), 0);
    }

    #[test]
    fn test_next_firing_never_repeats_the_last_instant() {
        let schedule: Schedule = "*/1 * * * * *".parse().unwrap();
        let fired = Local.with_ymd_and_hms(2026, 3, 1, 12, 0, 10).unwrap();
        // Wall clock reading behind the instant that just fired
        let lagging = fired - chrono::Duration::milliseconds(3);

        let next = next_firing(&schedule, lagging, Some(fired)).unwrap();
        assert_eq!(next, fired + chrono::Duration::seconds(1));
        assert_eq!(next_firing(&schedule, lagging, None), Some(fired));
    }
}
