//! Stage orchestrator implementation.
//!
//! Processes one team at a time:
//! 1. Recover records a crashed run left in progress long enough ago
//! 2. Create only the identities still needed, within the team's free seats
//! 3. Bulk-invite new identities and earlier invite failures
//! 4. Drive each identity through register, authorize and downstream
//!    registration, persisting every transition before moving on

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::driver::RegistrationDriver;
use crate::email::EmailProvider;
use crate::identity::AuthTokens;
use crate::invite::TeamInviter;
use crate::metrics;
use crate::registrar::{Registrar, RegistrarError};
use crate::retry::RetryPolicy;
use crate::team::Team;
use crate::tracker::{
    AccountTracker, AttemptRecord, AttemptStatus, ErrorKind, Stage, TrackerError,
};

use super::context::RunContext;
use super::pacing::Pacer;
use super::types::{Disposition, IdentityOutcome, OrchestratorError, TeamReport};

/// External services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub email: Arc<dyn EmailProvider>,
    pub inviter: Arc<dyn TeamInviter>,
    pub driver: Arc<dyn RegistrationDriver>,
    pub registrar: Arc<dyn Registrar>,
}

/// An identity selected for processing, with the attempt id it runs under.
struct Work {
    record: AttemptRecord,
    attempt_id: String,
}

impl Work {
    fn resume(record: AttemptRecord) -> Self {
        Self {
            record,
            attempt_id: Uuid::new_v4().to_string(),
        }
    }
}

/// What a successful stage produced.
enum StageOutput {
    Done,
    Tokens(AuthTokens),
    Reference(String),
}

struct StageFailure {
    kind: ErrorKind,
    detail: String,
}

/// Drives a team's identities through the provisioning stages.
pub struct StageOrchestrator {
    tracker: Arc<dyn AccountTracker>,
    collaborators: Collaborators,
    retry: RetryPolicy,
    pacer: Pacer,
    stale_after: Duration,
}

/// How long an in-progress record must sit untouched before it is recovered.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(900);

impl StageOrchestrator {
    /// Create a new orchestrator with default retry policy and pacing.
    pub fn new(tracker: Arc<dyn AccountTracker>, collaborators: Collaborators) -> Self {
        Self {
            tracker,
            collaborators,
            retry: RetryPolicy::default(),
            pacer: Pacer::default(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn tracker(&self) -> &Arc<dyn AccountTracker> {
        &self.tracker
    }

    /// Bring `team` to `target` provisioned identities.
    ///
    /// Per-identity failures are recorded and reported; only tracker
    /// failures abort the team. The team owner's record, if any, is left to
    /// `provision_owner`.
    pub async fn provision_team(
        &self,
        ctx: &RunContext,
        team: &Team,
        target: usize,
    ) -> Result<TeamReport, OrchestratorError> {
        let mut report = TeamReport::new(&team.id, target);
        if ctx.is_cancelled() {
            warn!("Team {}: cancelled before it started", team.id);
            report.cancelled = true;
            return Ok(report);
        }

        let recovered = self
            .tracker
            .recover_interrupted(&team.id, self.stale_after)?;
        if !recovered.is_empty() {
            warn!(
                "Team {}: {} identity(ies) were interrupted by an earlier run",
                team.id,
                recovered.len()
            );
        }

        let records: Vec<AttemptRecord> = self
            .tracker
            .list(&team.id)?
            .into_iter()
            .filter(|r| !team.is_owner(&r.email))
            .collect();
        report.already_completed = records.iter().filter(|r| r.is_completed()).count();

        let mut held = 0;
        let mut to_invite = Vec::new();
        let mut ready = Vec::new();
        for record in records.into_iter().filter(|r| r.is_resumable()) {
            if record.status == AttemptStatus::InProgress {
                warn!(
                    "Team {}: {} is held by live attempt {}, skipping",
                    team.id, record.email, record.attempt_id
                );
                held += 1;
                report.record(IdentityOutcome::from_record(&record, Disposition::Skipped));
            } else if record.next_stage() == Some(Stage::Invited) {
                to_invite.push(Work::resume(record));
            } else {
                ready.push(Work::resume(record));
            }
        }
        report.resumed = to_invite.len() + ready.len();

        let mut needed = target.saturating_sub(report.already_completed + report.resumed + held);
        if needed > 0 {
            needed = self.cap_by_seats(team, needed, &mut report).await;
        }
        info!(
            "Team {}: {} provisioned, {} resumable, {} held, {} new needed (target {})",
            team.id, report.already_completed, report.resumed, held, needed, target
        );

        if needed > 0 {
            let created = self.create_identities(team, needed, &mut report).await?;
            to_invite.extend(created);
        }

        if ctx.is_cancelled() {
            report.cancelled = true;
            report.not_started = to_invite.len() + ready.len();
            warn!(
                "Team {}: cancelled before inviting, {} identity(ies) not started",
                team.id, report.not_started
            );
            return Ok(report);
        }

        let invited = self.invite_batch(team, to_invite, &mut report).await?;
        ready.extend(invited);

        let total = ready.len();
        for (index, work) in ready.into_iter().enumerate() {
            if index > 0 {
                self.pacer.between_identities(&ctx.cancellation).await;
            }
            if ctx.is_cancelled() {
                report.cancelled = true;
                report.not_started = total - index;
                warn!(
                    "Team {}: cancelled with {} identity(ies) not started",
                    team.id, report.not_started
                );
                break;
            }

            debug!("Team {}: identity {}/{}", team.id, index + 1, total);
            let outcome = self.process_identity(team, work).await?;
            report.record(outcome);
        }

        info!(
            "Team {}: finished with {}/{} provisioned",
            team.id,
            report.total_completed(),
            target
        );
        Ok(report)
    }

    /// Authorize the team's owner account and register it downstream.
    ///
    /// The owner is already a member of its team, so a new record starts at
    /// `Registered`. Returns `None` when the team names no owner or the
    /// owner is already settled.
    pub async fn provision_owner(
        &self,
        team: &Team,
        password: &str,
    ) -> Result<Option<IdentityOutcome>, OrchestratorError> {
        let Some(email) = team.owner_email() else {
            debug!("Team {}: no owner account listed", team.id);
            return Ok(None);
        };

        let work = match self.tracker.get(&team.id, email)? {
            Some(record) if record.is_terminal() => {
                debug!("Team {}: owner {} already settled", team.id, email);
                return Ok(None);
            }
            Some(record) => Work::resume(record),
            None => {
                let attempt_id = Uuid::new_v4().to_string();
                let record = AttemptRecord::new(&team.id, email, password, &attempt_id)
                    .succeeded(Stage::Registered);
                self.tracker.put(&record)?;
                info!("Team {}: tracking owner {}", team.id, email);
                Work { record, attempt_id }
            }
        };

        let outcome = self.process_identity(team, work).await?;
        Ok(Some(outcome))
    }

    /// Limit `needed` to the seats the team still has free.
    ///
    /// A failed seat query creates nothing, since invites would likely fail.
    async fn cap_by_seats(&self, team: &Team, needed: usize, report: &mut TeamReport) -> usize {
        match self.collaborators.inviter.available_seats(team).await {
            Ok(None) => needed,
            Ok(Some(seats)) => {
                report.seats_available = Some(seats);
                if seats < needed {
                    warn!(
                        "Team {}: only {} free seat(s) for {} new identity(ies)",
                        team.id, seats, needed
                    );
                }
                needed.min(seats)
            }
            Err(e) => {
                warn!(
                    "Team {}: seat check failed, creating no new identities: {}",
                    team.id, e
                );
                0
            }
        }
    }

    /// Create `count` mailboxes and record each result.
    async fn create_identities(
        &self,
        team: &Team,
        count: usize,
        report: &mut TeamReport,
    ) -> Result<Vec<Work>, OrchestratorError> {
        info!("Team {}: creating {} identity(ies)", team.id, count);
        let results = self.collaborators.email.create(count).await;

        let mut created = Vec::new();
        for result in results {
            let attempt_id = Uuid::new_v4().to_string();
            let (record, ok) = match result {
                Ok(credentials) => {
                    let record = AttemptRecord::new(
                        &team.id,
                        &credentials.email,
                        &credentials.password,
                        &attempt_id,
                    )
                    .succeeded(Stage::EmailCreated);
                    (record, true)
                }
                Err(failure) => {
                    let record = AttemptRecord::new(&team.id, &failure.email, "", &attempt_id)
                        .failed(Stage::EmailCreated, ErrorKind::Transient, failure.detail);
                    (record, false)
                }
            };

            match self.tracker.put(&record) {
                Ok(()) => {}
                Err(e) if e.is_rejection() => {
                    warn!(
                        "Team {}: generated address {} collides with an existing record: {}",
                        team.id, record.email, e
                    );
                    report.creation_failed += 1;
                    metrics::IDENTITIES_CREATED
                        .with_label_values(&["failed"])
                        .inc();
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            if ok {
                info!("Team {}: {} -> {}", team.id, record.email, Stage::EmailCreated);
                report.created += 1;
                metrics::IDENTITIES_CREATED
                    .with_label_values(&["created"])
                    .inc();
                created.push(Work { record, attempt_id });
            } else {
                warn!(
                    "Team {}: mailbox {} not created: {}",
                    team.id,
                    record.email,
                    record.error_detail.as_deref().unwrap_or("-")
                );
                report.creation_failed += 1;
                metrics::IDENTITIES_CREATED
                    .with_label_values(&["failed"])
                    .inc();
                report.record(IdentityOutcome::from_record(&record, Disposition::Failed));
            }
        }

        Ok(created)
    }

    /// Invite every pending identity in one call and record each result.
    ///
    /// Returns the identities now ready for registration.
    async fn invite_batch(
        &self,
        team: &Team,
        batch: Vec<Work>,
        report: &mut TeamReport,
    ) -> Result<Vec<Work>, OrchestratorError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut claimed = Vec::with_capacity(batch.len());
        for work in batch {
            let marked = work.record.in_progress(Stage::Invited, &work.attempt_id, 1);
            match self.tracker.put(&marked) {
                Ok(()) => claimed.push(Work {
                    record: marked,
                    attempt_id: work.attempt_id,
                }),
                Err(TrackerError::AttemptConflict { holder, .. }) => {
                    warn!(
                        "Team {}: {} is held by attempt {}, skipping",
                        team.id, work.record.email, holder
                    );
                    report.record(IdentityOutcome::from_record(&work.record, Disposition::Skipped));
                }
                Err(e) => return Err(e.into()),
            }
        }
        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        let emails: Vec<String> = claimed.iter().map(|w| w.record.email.clone()).collect();
        info!("Team {}: inviting {} identity(ies)", team.id, emails.len());

        let outcome = match self.collaborators.inviter.invite(team, &emails).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Team {}: bulk invite failed: {}", team.id, e);
                let (kind, detail) = (e.kind(), e.to_string());
                for work in claimed {
                    let failed = work.record.failed(Stage::Invited, kind, detail.clone());
                    self.tracker.put(&failed)?;
                    report.invite_failed += 1;
                    metrics::INVITES.with_label_values(&["bulk_failed"]).inc();
                    report.record(IdentityOutcome::from_record(&failed, Disposition::Failed));
                }
                return Ok(Vec::new());
            }
        };

        let mut ready = Vec::new();
        for work in claimed {
            let email = work.record.email.clone();
            if outcome.is_invited(&email) {
                let invited = work.record.succeeded(Stage::Invited);
                self.tracker.put(&invited)?;
                info!("Team {}: {} -> {}", team.id, email, Stage::Invited);
                report.invited += 1;
                metrics::INVITES.with_label_values(&["invited"]).inc();
                ready.push(Work {
                    record: invited,
                    attempt_id: work.attempt_id,
                });
            } else {
                let reason = outcome
                    .rejection(&email)
                    .map(|r| r.reason.clone())
                    .unwrap_or_else(|| "not confirmed by the team".to_string());
                let failed = work
                    .record
                    .failed(Stage::Invited, ErrorKind::Transient, reason);
                self.tracker.put(&failed)?;
                warn!("Team {}: invite for {} failed", team.id, email);
                report.invite_failed += 1;
                metrics::INVITES.with_label_values(&["rejected"]).inc();
                report.record(IdentityOutcome::from_record(&failed, Disposition::Failed));
            }
        }

        Ok(ready)
    }

    /// Run the remaining per-identity stages.
    ///
    /// Each stage is marked in progress, executed, then recorded as succeeded
    /// or failed before anything else happens. The in-memory record only
    /// advances after the write is durable.
    async fn process_identity(
        &self,
        team: &Team,
        work: Work,
    ) -> Result<IdentityOutcome, OrchestratorError> {
        let started = Instant::now();
        let Work {
            record: mut current,
            attempt_id,
        } = work;

        while let Some(stage) = current.next_stage() {
            if stage < Stage::Registered {
                warn!(
                    "Team {}: {} has not been invited, leaving it for the next run",
                    team.id, current.email
                );
                break;
            }

            let mut attempt = 0;
            loop {
                attempt += 1;
                let marked = current.in_progress(stage, &attempt_id, attempt);
                match self.tracker.put(&marked) {
                    Ok(()) => current = marked,
                    Err(TrackerError::AttemptConflict { holder, .. }) => {
                        warn!(
                            "Team {}: {} is held by attempt {}, skipping",
                            team.id, current.email, holder
                        );
                        let outcome = IdentityOutcome::from_record(&current, Disposition::Skipped);
                        self.observe(&outcome, started);
                        return Ok(outcome);
                    }
                    Err(e) => return Err(e.into()),
                }

                debug!(
                    "Team {}: {} attempting {} (try {})",
                    team.id, current.email, stage, attempt
                );

                match self.execute(stage, &current).await {
                    Ok(output) => {
                        let mut next = current.succeeded(stage);
                        match output {
                            StageOutput::Done => {}
                            StageOutput::Tokens(tokens) => next = next.with_tokens(tokens),
                            StageOutput::Reference(reference) => {
                                next = next.with_external_reference(reference)
                            }
                        }
                        self.tracker.put(&next)?;
                        current = next;
                        metrics::STAGE_ATTEMPTS
                            .with_label_values(&[stage.as_str(), "succeeded"])
                            .inc();
                        info!("Team {}: {} -> {}", team.id, current.email, stage);
                        break;
                    }
                    Err(failure) => {
                        metrics::STAGE_ATTEMPTS
                            .with_label_values(&[stage.as_str(), "failed"])
                            .inc();

                        if self.retry.should_retry(failure.kind, attempt) {
                            let failed = current.failed(stage, failure.kind, &failure.detail);
                            self.tracker.put(&failed)?;
                            current = failed;

                            let delay = self.retry.next_delay(attempt);
                            warn!(
                                "Team {}: {} failed {} (try {}, {}): {}; retrying in {}ms",
                                team.id,
                                current.email,
                                stage,
                                attempt,
                                failure.kind,
                                failure.detail,
                                delay.as_millis()
                            );
                            metrics::STAGE_RETRIES
                                .with_label_values(&[stage.as_str(), failure.kind.as_str()])
                                .inc();
                            tokio::time::sleep(delay).await;
                            continue;
                        }

                        let (settled, disposition) = if failure.kind == ErrorKind::IdentityPoisoned
                        {
                            error!(
                                "Team {}: {} abandoned at {}: {}",
                                team.id, current.email, stage, failure.detail
                            );
                            (
                                current.abandoned(stage, failure.kind, failure.detail),
                                Disposition::Abandoned,
                            )
                        } else {
                            warn!(
                                "Team {}: {} failed at {} after {} attempt(s): {}",
                                team.id, current.email, stage, attempt, failure.detail
                            );
                            (
                                current.failed(stage, failure.kind, failure.detail),
                                Disposition::Failed,
                            )
                        };
                        self.tracker.put(&settled)?;
                        let outcome = IdentityOutcome::from_record(&settled, disposition);
                        self.observe(&outcome, started);
                        return Ok(outcome);
                    }
                }
            }
        }

        let outcome = IdentityOutcome::settled(&current);
        self.observe(&outcome, started);
        Ok(outcome)
    }

    async fn execute(
        &self,
        stage: Stage,
        record: &AttemptRecord,
    ) -> Result<StageOutput, StageFailure> {
        let identity = record.identity();
        match stage {
            Stage::Registered => self
                .collaborators
                .driver
                .register(&identity)
                .await
                .map(|()| StageOutput::Done)
                .map_err(|e| StageFailure {
                    kind: self.retry.classify(&e),
                    detail: e.detail,
                }),
            Stage::Authorized => self
                .collaborators
                .driver
                .authorize(&identity)
                .await
                .map(StageOutput::Tokens)
                .map_err(|e| StageFailure {
                    kind: self.retry.classify(&e),
                    detail: e.detail,
                }),
            Stage::DownstreamRegistered => {
                let tokens = match &record.tokens {
                    Some(tokens) => tokens.clone(),
                    None => {
                        debug!("No stored tokens for {}, authorizing again", record.email);
                        self.collaborators
                            .driver
                            .authorize(&identity)
                            .await
                            .map_err(|e| StageFailure {
                                kind: self.retry.classify(&e),
                                detail: e.detail,
                            })?
                    }
                };

                match self.collaborators.registrar.add(&identity, &tokens).await {
                    Ok(reference) => Ok(StageOutput::Reference(reference)),
                    Err(RegistrarError::Duplicate(_)) => {
                        info!(
                            "{} already registered downstream, treating as success",
                            record.email
                        );
                        metrics::STAGE_ATTEMPTS
                            .with_label_values(&[stage.as_str(), "duplicate"])
                            .inc();
                        Ok(StageOutput::Reference(format!("existing:{}", record.email)))
                    }
                    Err(e) => Err(StageFailure {
                        kind: e.kind(),
                        detail: e.to_string(),
                    }),
                }
            }
            Stage::EmailCreated | Stage::Invited => Err(StageFailure {
                kind: ErrorKind::Transient,
                detail: format!("{} is a batch stage", stage),
            }),
        }
    }

    fn observe(&self, outcome: &IdentityOutcome, started: Instant) {
        let label = outcome.disposition.as_str();
        metrics::IDENTITIES_FINISHED.with_label_values(&[label]).inc();
        metrics::IDENTITY_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
    }
}
