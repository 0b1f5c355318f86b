//! Top-level loop over teams.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::metrics;
use crate::team::{Team, TeamRegistry};

use super::config::RunConfig;
use super::context::RunContext;
use super::pacing::Pacer;
use super::runner::StageOrchestrator;
use super::types::{OrchestratorError, OwnerResult, RunSummary, TeamRunResult};

/// Runs the orchestrator over every configured team.
pub struct RunController {
    orchestrator: Arc<StageOrchestrator>,
    registry: TeamRegistry,
    config: RunConfig,
    pacer: Pacer,
    owner_password: Option<String>,
}

impl RunController {
    pub fn new(
        orchestrator: Arc<StageOrchestrator>,
        registry: TeamRegistry,
        config: RunConfig,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            config,
            pacer: Pacer::default(),
            owner_password: None,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Password the owner pass logs team owners in with.
    pub fn with_owner_password(mut self, password: impl Into<String>) -> Self {
        self.owner_password = Some(password.into());
        self
    }

    /// Teams this run will process, in order.
    pub fn selected_teams(&self) -> Result<Vec<Team>, OrchestratorError> {
        match &self.config.team {
            Some(id) => self
                .registry
                .get(id)
                .cloned()
                .map(|team| vec![team])
                .ok_or_else(|| OrchestratorError::UnknownTeam(id.clone())),
            None => Ok(self.registry.teams().to_vec()),
        }
    }

    /// Process every selected team.
    ///
    /// A team that fails as a whole is logged and recorded; the remaining
    /// teams still run. Cancellation is honoured between teams and between
    /// identities, including while a pacing delay is running. When enabled,
    /// the owner pass runs after every member phase has finished.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary, OrchestratorError> {
        let teams = self.selected_teams()?;
        let target = self.config.accounts_per_team;
        let mut summary = RunSummary::new(&ctx.run_id);

        info!(
            "Run {}: {} team(s), {} account(s) per team",
            ctx.run_id,
            teams.len(),
            target
        );

        let mut finished = Vec::new();
        for (index, team) in teams.into_iter().enumerate() {
            if index > 0 {
                self.pacer.between_teams(&ctx.cancellation).await;
            }
            if ctx.is_cancelled() {
                warn!("Run {}: cancelled before team {}", ctx.run_id, team.id);
                summary.cancelled = true;
                break;
            }

            info!("Run {}: processing team {}", ctx.run_id, team.id);

            let orchestrator = Arc::clone(&self.orchestrator);
            let task_ctx = ctx.clone();
            let task_team = team.clone();
            let handle = tokio::spawn(async move {
                orchestrator
                    .provision_team(&task_ctx, &task_team, target)
                    .await
            });

            let result = match handle.await {
                Ok(Ok(report)) => {
                    let label = if report.cancelled { "cancelled" } else { "ok" };
                    metrics::TEAMS_PROCESSED.with_label_values(&[label]).inc();
                    if report.cancelled {
                        summary.cancelled = true;
                    } else {
                        finished.push(team.clone());
                    }
                    TeamRunResult::completed(report)
                }
                Ok(Err(e)) => {
                    error!("Team {} failed: {}", team.id, e);
                    metrics::TEAMS_PROCESSED.with_label_values(&["failed"]).inc();
                    TeamRunResult::failed(&team.id, e.to_string())
                }
                Err(e) => {
                    error!("Team {} task aborted: {}", team.id, e);
                    metrics::TEAMS_PROCESSED.with_label_values(&["failed"]).inc();
                    TeamRunResult::failed(&team.id, format!("task aborted: {}", e))
                }
            };
            summary.teams.push(result);

            if summary.cancelled {
                break;
            }
        }

        if self.config.owners && !summary.cancelled {
            self.run_owner_pass(ctx, &finished, &mut summary).await;
        }

        Ok(summary)
    }

    /// Authorize and register the owner of every team whose member phase
    /// finished, one at a time.
    async fn run_owner_pass(&self, ctx: &RunContext, teams: &[Team], summary: &mut RunSummary) {
        let Some(password) = self.owner_password.as_deref() else {
            warn!("Run {}: owner pass enabled without a password, skipping", ctx.run_id);
            return;
        };

        let owned: Vec<&Team> = teams.iter().filter(|t| t.owner_email().is_some()).collect();
        info!("Run {}: owner pass over {} team(s)", ctx.run_id, owned.len());

        for (index, team) in owned.into_iter().enumerate() {
            if index > 0 {
                self.pacer.between_identities(&ctx.cancellation).await;
            }
            if ctx.is_cancelled() {
                warn!("Run {}: cancelled during the owner pass", ctx.run_id);
                summary.cancelled = true;
                break;
            }

            match self.orchestrator.provision_owner(team, password).await {
                Ok(Some(outcome)) => summary.owners.push(OwnerResult {
                    team_id: team.id.clone(),
                    outcome: Some(outcome),
                    error: None,
                }),
                Ok(None) => {}
                Err(e) => {
                    error!("Team {}: owner pass failed: {}", team.id, e);
                    summary.owners.push(OwnerResult {
                        team_id: team.id.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
    }
}
