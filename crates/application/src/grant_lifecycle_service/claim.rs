use super::*;

impl GrantLifecycleService {
    /// Claims a role for the requesting member.
    ///
    /// The grant is stored first and the role granted second. When the
    /// platform refuses the grant, the stored claim is deactivated again.
    pub async fn claim(&self, request: ClaimRequest) -> AppResult<ClaimOutcome> {
        let subject_id = request.subject_id.clone();
        self.work_queue
            .run(subject_id.as_str(), self.claim_serialized(request))
            .await
    }

    async fn claim_serialized(&self, request: ClaimRequest) -> AppResult<ClaimOutcome> {
        let subject_id = request.subject_id.as_str();
        let active = self.repository.find_active_by_subject(subject_id).await?;
        let latest = match active {
            Some(_) => None,
            None => self.repository.find_latest_by_subject(subject_id).await?,
        };

        let decision =
            self.engine
                .claim(&request, active.as_ref(), latest.as_ref(), self.clock.now())?;

        let grant = match self.execute_write(&decision.write).await {
            Ok(WriteResult::Stored(grant)) => grant,
            Ok(WriteResult::Applied | WriteResult::Skipped) | Err(AppError::Conflict(_)) => {
                return Err(self.concurrent_claim_error(subject_id).await);
            }
            Err(error) => return Err(error),
        };

        let report = self.run_effects(decision.effects.as_slice()).await;
        if let Some(failure) = report.failures.first() {
            self.abort_claim(&grant, failure).await;
            return Err(AppError::Internal(format!(
                "failed to grant role '{}': {}",
                grant.role_name, failure.error
            )));
        }

        info!(
            grant_id = %grant.id,
            subject_id = %grant.subject_id,
            role_name = %grant.role_name,
            expires_at = %grant.expires_at,
            "role claimed"
        );
        self.record_audit(grant.id, subject_id, decision.audit, None)
            .await;
        self.notify_changed().await;

        Ok(ClaimOutcome { grant })
    }

    async fn abort_claim(&self, grant: &Grant, failure: &EffectFailure) {
        let decision = self.engine.abort_claim(grant.id);
        match self.execute_write(&decision.write).await {
            Ok(_) => {
                warn!(
                    grant_id = %grant.id,
                    subject_id = %grant.subject_id,
                    effect = ?failure.effect,
                    error = %failure.error,
                    "claim aborted because the role could not be granted"
                );
                self.record_audit(
                    grant.id,
                    grant.subject_id.as_str(),
                    decision.audit,
                    Some(failure.error.to_string()),
                )
                .await;
            }
            Err(error) => {
                error!(
                    grant_id = %grant.id,
                    subject_id = %grant.subject_id,
                    error = %error,
                    "failed to compensate claim after role grant failure"
                );
            }
        }
    }

    async fn concurrent_claim_error(&self, subject_id: &str) -> AppError {
        match self.repository.find_active_by_subject(subject_id).await {
            Ok(Some(active)) => AppError::Rejected(Rejection::AlreadyActive {
                role_name: active.role_name,
            }),
            Ok(None) => AppError::Conflict(format!(
                "grant for subject '{subject_id}' changed during the claim"
            )),
            Err(error) => error,
        }
    }
}
