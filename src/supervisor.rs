//! Job Supervisor: drives a whole job against one marketplace session.
//!
//! Everything runs on the calling task. Engagements, pipelines, releases and
//! offer refreshes are futures in one [`FuturesUnordered`]; the supervisor
//! alone mutates the queue, the blacklist and the busy set, between polls.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::artifact;
use crate::config::{JobConfig, Timeouts};
use crate::error::FarmError;
use crate::market::{Activity, MarketError, Marketplace, Offer, ProviderId, SessionRequest};
use crate::monitor::{EventMonitor, LifecycleEvent};
use crate::pipeline::{PipelineExecutor, PipelineReport, RenderPlan, Stage, StageMachine};
use crate::policy::{Blacklist, SelectionPolicy};
use crate::progress::ProgressSender;
use crate::queue::FrameQueue;
use crate::requirement::ComputeRequirement;

/// Limit for opening and closing the marketplace session.
pub const SESSION_CALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Structured summary produced when a job ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub finished: Vec<u32>,
    pub outstanding: Vec<u32>,
    pub blacklisted: Vec<ProviderId>,
    /// The global timeout fired before the queue drained.
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobReport {
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Runs a job to completion, to the global timeout, or to the attempt limit.
///
/// Configuration and artifact errors surface before the marketplace is
/// touched and without any progress message. A failed session open is a
/// payment bootstrap error. After that only the global timeout ends the job
/// early; provider failures are absorbed by blacklisting and requeueing.
pub async fn run<M: Marketplace>(
    config: &JobConfig,
    market: &M,
    progress: ProgressSender,
) -> Result<JobReport, FarmError> {
    let started_at = Utc::now();
    config.validate()?;
    let requirement = ComputeRequirement::from_resources(&config.settings.resources)?;

    std::fs::create_dir_all(&config.output_dir)?;
    let plan = RenderPlan::from_config(config);
    artifact::build_archive(&config.project_dir, &plan.archive)?;

    let settings = &config.settings;
    let request = SessionRequest {
        job_id: config.job_id.clone(),
        budget: settings.budget,
        network: settings.network,
        payment_driver: settings.market.payment_driver.clone(),
        subnet_tag: settings.market.subnet_tag.clone(),
        requirement,
    };
    match tokio::time::timeout(SESSION_CALL_TIMEOUT, market.open(&request)).await {
        Ok(opened) => opened.map_err(FarmError::PaymentBootstrap)?,
        Err(_) => {
            return Err(FarmError::PaymentBootstrap(MarketError::Session(format!(
                "session open timed out after {}s",
                SESSION_CALL_TIMEOUT.as_secs()
            ))));
        }
    }
    tracing::info!(
        job_id = %config.job_id,
        frames = config.frames.len(),
        workers = settings.resources.workers,
        budget = settings.budget,
        network = %settings.network,
        "Session opened"
    );

    let mut supervisor = Supervisor::new(config, market, &plan, progress);
    let timed_out = supervisor.drive().await;

    match tokio::time::timeout(SESSION_CALL_TIMEOUT, market.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to close session"),
        Err(_) => tracing::warn!(
            limit_secs = SESSION_CALL_TIMEOUT.as_secs(),
            "Session close timed out, leaving it to expire"
        ),
    }

    let report = supervisor.into_report(config.job_id.clone(), started_at, timed_out);
    tracing::info!(
        finished = report.finished.len(),
        outstanding = report.outstanding.len(),
        blacklisted = report.blacklisted.len(),
        timed_out = report.timed_out,
        duration_ms = report.duration_ms,
        "Job ended"
    );
    Ok(report)
}

/// Completion of one in-flight future.
enum Step<A> {
    Offers(Result<Vec<Offer>, MarketError>),
    Engaged {
        offer: Offer,
        result: Result<A, MarketError>,
    },
    Finished {
        activity: A,
        report: PipelineReport,
    },
    Released {
        provider: ProviderId,
        result: Result<(), MarketError>,
    },
}

type InFlight<'a, A> = FuturesUnordered<LocalBoxFuture<'a, Step<A>>>;

struct Supervisor<'a, M: Marketplace> {
    market: &'a M,
    plan: &'a RenderPlan,
    policy: SelectionPolicy,
    monitor: EventMonitor,
    queue: FrameQueue,
    blacklist: Blacklist,
    offers: Vec<Offer>,
    /// Providers being engaged, running a pipeline, or being released.
    busy: HashSet<ProviderId>,
    engaging: usize,
    refreshing: bool,
    workers: usize,
    max_attempts: Option<u32>,
    timeouts: Timeouts,
    offer_poll: Duration,
}

impl<'a, M> Supervisor<'a, M>
where
    M: Marketplace + 'a,
    M::Activity: 'a,
{
    fn new(config: &JobConfig, market: &'a M, plan: &'a RenderPlan, progress: ProgressSender) -> Self {
        let settings = &config.settings;
        Self {
            market,
            plan,
            policy: SelectionPolicy::new(settings.prices.per_second()),
            monitor: EventMonitor::new(progress),
            queue: FrameQueue::new(&config.frames),
            blacklist: Blacklist::new(),
            offers: Vec::new(),
            busy: HashSet::new(),
            engaging: 0,
            refreshing: false,
            workers: settings.resources.workers,
            max_attempts: settings.max_attempts,
            timeouts: settings.timeouts,
            offer_poll: settings.market.offer_poll(),
        }
    }

    /// Returns `true` if the global timeout ended the loop.
    async fn drive(&mut self) -> bool {
        let mut in_flight: InFlight<'a, M::Activity> = FuturesUnordered::new();
        let deadline = tokio::time::sleep(self.timeouts.global());
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(self.offer_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.engage_idle(&mut in_flight);
            if !self.queue.has_pending() && in_flight.is_empty() {
                return false;
            }

            tokio::select! {
                biased;
                _ = &mut deadline => {
                    tracing::warn!(
                        outstanding = self.queue.outstanding_len(),
                        in_flight = in_flight.len(),
                        "Global timeout reached, abandoning in-flight work"
                    );
                    return true;
                }
                _ = poll.tick() => self.refresh_offers(&mut in_flight),
                Some(step) = in_flight.next() => self.on_step(step, &mut in_flight),
            }
        }
    }

    fn refresh_offers(&mut self, in_flight: &mut InFlight<'a, M::Activity>) {
        if self.refreshing || !self.queue.has_pending() {
            return;
        }
        self.refreshing = true;
        let market = self.market;
        in_flight.push(async move { Step::Offers(market.offers().await) }.boxed_local());
    }

    /// Starts engagements while there is room under `workers` and pending
    /// frames not already claimed by an engagement in progress.
    fn engage_idle(&mut self, in_flight: &mut InFlight<'a, M::Activity>) {
        while self.busy.len() < self.workers && self.engaging < self.queue.pending_len() {
            let Some(offer) = self
                .policy
                .select(&self.offers, &self.blacklist, &self.busy)
                .cloned()
            else {
                break;
            };
            tracing::debug!(provider = %offer.provider_id, name = %offer.provider_name, "Engaging provider");
            self.busy.insert(offer.provider_id.clone());
            self.engaging += 1;

            let market = self.market;
            in_flight.push(
                async move {
                    let result = market.engage(&offer).await;
                    Step::Engaged { offer, result }
                }
                .boxed_local(),
            );
        }
    }

    fn on_step(&mut self, step: Step<M::Activity>, in_flight: &mut InFlight<'a, M::Activity>) {
        match step {
            Step::Offers(result) => {
                self.refreshing = false;
                match result {
                    Ok(offers) => {
                        tracing::debug!(count = offers.len(), "Offers refreshed");
                        self.offers = offers;
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to fetch offers"),
                }
            }
            Step::Engaged { offer, result } => {
                self.engaging -= 1;
                match result {
                    Ok(activity) => {
                        self.emit(LifecycleEvent::AgreementConfirmed {
                            provider: offer.provider_id,
                        });
                        match self.queue.take() {
                            Some(frame) => self.start_pipeline(
                                activity,
                                frame,
                                StageMachine::fresh(),
                                self.timeouts.first_assignment(),
                                in_flight,
                            ),
                            None => self.release(activity, in_flight),
                        }
                    }
                    Err(e) => {
                        self.busy.remove(&offer.provider_id);
                        self.emit(LifecycleEvent::ActivityCreateFailed {
                            provider: offer.provider_id,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Step::Finished { activity, report } => self.on_finished(activity, report, in_flight),
            Step::Released { provider, result } => {
                self.busy.remove(&provider);
                if let Err(e) = result {
                    tracing::warn!(%provider, error = %e, "Failed to release activity");
                }
            }
        }
    }

    fn on_finished(
        &mut self,
        activity: M::Activity,
        report: PipelineReport,
        in_flight: &mut InFlight<'a, M::Activity>,
    ) {
        let frame = report.frame;
        let provider = report.provider.clone();
        tracing::debug!(
            frame,
            %provider,
            stage = %report.stage,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Pipeline finished"
        );

        match report.stage {
            Stage::Accepted => {
                self.emit(LifecycleEvent::TaskAccepted { frame, provider });
                // The activity already holds the unpacked project.
                match self.queue.take() {
                    Some(next) => self.start_pipeline(
                        activity,
                        next,
                        StageMachine::reused(),
                        self.timeouts.render(),
                        in_flight,
                    ),
                    None => self.release(activity, in_flight),
                }
            }
            Stage::Rejected => {
                self.emit(LifecycleEvent::TaskRejected { frame, provider });
                self.retry(frame);
                self.release(activity, in_flight);
            }
            _ => {
                let reason = report.error.unwrap_or_else(|| report.stage.to_string());
                self.emit(LifecycleEvent::WorkerFinished { provider, reason });
                self.retry(frame);
                self.release(activity, in_flight);
            }
        }
    }

    fn start_pipeline(
        &self,
        activity: M::Activity,
        frame: u32,
        machine: StageMachine,
        limit: Duration,
        in_flight: &mut InFlight<'a, M::Activity>,
    ) {
        tracing::info!(frame, provider = %activity.provider_id(), start = %machine.stage(), "Frame assigned");
        let plan = self.plan;
        in_flight.push(
            async move {
                let report = PipelineExecutor::new(&activity, plan)
                    .run(frame, machine, limit)
                    .await;
                Step::Finished { activity, report }
            }
            .boxed_local(),
        );
    }

    fn release(&self, activity: M::Activity, in_flight: &mut InFlight<'a, M::Activity>) {
        let market = self.market;
        in_flight.push(
            async move {
                let provider = activity.provider_id().clone();
                let result = market.release(activity).await;
                Step::Released { provider, result }
            }
            .boxed_local(),
        );
    }

    fn retry(&mut self, frame: u32) {
        let attempts = self.queue.task(frame).map_or(0, |task| task.attempts);
        match self.max_attempts {
            Some(max) if attempts >= max => {
                tracing::warn!(frame, attempts, "Attempt limit reached, frame abandoned");
                self.queue.abandon(frame);
            }
            _ => {
                tracing::info!(frame, attempts, "Frame requeued");
                self.queue.requeue(frame);
            }
        }
    }

    fn emit(&mut self, event: LifecycleEvent) {
        self.monitor
            .handle(event, &mut self.blacklist, &mut self.queue);
    }

    fn into_report(self, job_id: String, started_at: DateTime<Utc>, timed_out: bool) -> JobReport {
        let finished_at = Utc::now();
        JobReport {
            job_id,
            finished: self.queue.finished(),
            outstanding: self.queue.outstanding(),
            blacklisted: self.blacklist.providers(),
            timed_out,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        }
    }
}
