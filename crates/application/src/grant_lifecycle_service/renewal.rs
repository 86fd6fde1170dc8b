use super::*;

impl GrantLifecycleService {
    /// Applies a member's answer to a renewal prompt.
    pub async fn respond_to_renewal(
        &self,
        grant_id: GrantId,
        acting_subject_id: &str,
        answer: RenewalAnswer,
    ) -> AppResult<RenewalOutcome> {
        let owner = self
            .repository
            .find_by_id(grant_id)
            .await?
            .ok_or(Rejection::StaleRequest)?
            .subject_id;

        self.work_queue
            .run(
                owner.as_str(),
                self.respond_serialized(grant_id, acting_subject_id, answer),
            )
            .await
    }

    async fn respond_serialized(
        &self,
        grant_id: GrantId,
        acting_subject_id: &str,
        answer: RenewalAnswer,
    ) -> AppResult<RenewalOutcome> {
        let grant = self
            .repository
            .find_by_id(grant_id)
            .await?
            .ok_or(Rejection::StaleRequest)?;

        match answer {
            RenewalAnswer::Confirm => self.confirm(grant, acting_subject_id).await,
            RenewalAnswer::Decline => self.decline(grant, acting_subject_id).await,
        }
    }

    async fn confirm(&self, grant: Grant, acting_subject_id: &str) -> AppResult<RenewalOutcome> {
        let decision = self.engine.confirm_renewal(&grant, acting_subject_id)?;
        let GrantWrite::ExtendAndReactivate { expires_at, .. } = decision.write else {
            return Err(AppError::Internal(
                "renewal confirmation produced an unexpected write".to_owned(),
            ));
        };

        if matches!(
            self.execute_write(&decision.write).await?,
            WriteResult::Skipped
        ) {
            return Err(Rejection::StaleRequest.into());
        }

        // Re-grant failures are logged, not returned.
        let report = self.run_effects(decision.effects.as_slice()).await;

        info!(
            grant_id = %grant.id,
            subject_id = %grant.subject_id,
            expires_at = %expires_at,
            "role renewed"
        );
        self.record_audit(
            grant.id,
            grant.subject_id.as_str(),
            decision.audit,
            Some(format!(
                "{} until {expires_at}",
                RenewalState::Confirmed.as_str()
            )),
        )
        .await;
        if !report.failures.is_empty() {
            warn!(
                grant_id = %grant.id,
                failures = report.failures.len(),
                "renewal side effects failed"
            );
        }
        self.notify_changed().await;

        Ok(RenewalOutcome::Renewed {
            grant_id: grant.id,
            role_name: grant.role_name,
            expires_at,
        })
    }

    async fn decline(&self, grant: Grant, acting_subject_id: &str) -> AppResult<RenewalOutcome> {
        let decision = self.engine.decline_renewal(&grant, acting_subject_id)?;
        let Some(side_effect_errors) = self.execute_revocation(&grant, &decision).await? else {
            return Err(Rejection::StaleRequest.into());
        };

        info!(
            grant_id = %grant.id,
            subject_id = %grant.subject_id,
            "renewal declined"
        );

        Ok(RenewalOutcome::Declined {
            grant_id: grant.id,
            role_name: grant.role_name,
            side_effect_errors,
        })
    }

    /// Claims an expired pending grant and posts its renewal prompt.
    ///
    /// When the prompt cannot be posted the grant returns to `pending`, so
    /// the next scan retries it.
    pub async fn expire(&self, grant: &Grant) -> AppResult<ExpireOutcome> {
        self.work_queue
            .run(grant.subject_id.as_str(), self.expire_serialized(grant.id))
            .await
    }

    async fn expire_serialized(&self, grant_id: GrantId) -> AppResult<ExpireOutcome> {
        let Some(grant) = self.repository.find_by_id(grant_id).await? else {
            return Ok(ExpireOutcome::Skipped);
        };
        let Some(decision) = self.engine.expire(&grant, self.clock.now()) else {
            return Ok(ExpireOutcome::Skipped);
        };

        if matches!(
            self.execute_write(&decision.write).await?,
            WriteResult::Skipped
        ) {
            return Ok(ExpireOutcome::Skipped);
        }

        let report = self.run_effects(decision.effects.as_slice()).await;
        let prompt_id = match (report.posted_prompt, report.failures.first()) {
            (Some(prompt_id), None) => prompt_id,
            (_, failure) => {
                let error = failure.map_or_else(
                    || "renewal prompt was not posted".to_owned(),
                    |failure| failure.error.to_string(),
                );
                self.revert_to_pending(&grant).await;
                return Ok(ExpireOutcome::PromptFailed { grant_id, error });
            }
        };

        info!(
            grant_id = %grant.id,
            subject_id = %grant.subject_id,
            prompt_id = %prompt_id,
            "renewal prompt posted"
        );
        self.record_audit(
            grant.id,
            grant.subject_id.as_str(),
            decision.audit,
            None,
        )
        .await;
        self.arm_renewal_timer();
        self.notify_changed().await;

        Ok(ExpireOutcome::Prompted {
            grant_id,
            prompt_id,
        })
    }

    /// Returns an awaiting grant whose prompt was never recorded to `pending`.
    ///
    /// Returns `true` when the grant was reverted, so the next expiry pass
    /// prompts it with a fresh renewal window.
    pub async fn recover_unprompted(&self, grant: &Grant) -> AppResult<bool> {
        self.work_queue
            .run(grant.subject_id.as_str(), self.recover_serialized(grant.id))
            .await
    }

    async fn recover_serialized(&self, grant_id: GrantId) -> AppResult<bool> {
        let Some(grant) = self.repository.find_by_id(grant_id).await? else {
            return Ok(false);
        };
        if !grant.is_prompt_missing() {
            return Ok(false);
        }

        let reverted = self
            .repository
            .update_renewal_state(
                grant.id,
                RenewalState::AwaitingResponse,
                RenewalState::Pending,
            )
            .await?;
        if reverted {
            warn!(
                grant_id = %grant.id,
                subject_id = %grant.subject_id,
                "awaiting grant had no recorded prompt, returned to pending"
            );
        }

        Ok(reverted)
    }

    async fn revert_to_pending(&self, grant: &Grant) {
        match self
            .repository
            .update_renewal_state(
                grant.id,
                RenewalState::AwaitingResponse,
                RenewalState::Pending,
            )
            .await
        {
            Ok(true) => warn!(
                grant_id = %grant.id,
                subject_id = %grant.subject_id,
                "renewal prompt failed, grant returned to pending"
            ),
            Ok(false) => warn!(
                grant_id = %grant.id,
                "renewal prompt failed and grant already left awaiting_response"
            ),
            Err(error) => error!(
                grant_id = %grant.id,
                error = %error,
                "failed to return grant to pending after prompt failure"
            ),
        }
    }

    /// Revokes an awaiting grant whose renewal window elapsed.
    pub async fn renewal_timeout(&self, grant: &Grant) -> AppResult<TimeoutOutcome> {
        self.work_queue
            .run(grant.subject_id.as_str(), self.timeout_serialized(grant.id))
            .await
    }

    async fn timeout_serialized(&self, grant_id: GrantId) -> AppResult<TimeoutOutcome> {
        let Some(grant) = self.repository.find_by_id(grant_id).await? else {
            return Ok(TimeoutOutcome::Skipped);
        };
        let Some(decision) = self.engine.renewal_timeout(&grant, self.clock.now()) else {
            return Ok(TimeoutOutcome::Skipped);
        };

        let Some(side_effect_errors) = self.execute_revocation(&grant, &decision).await? else {
            return Ok(TimeoutOutcome::Skipped);
        };

        info!(
            grant_id = %grant.id,
            subject_id = %grant.subject_id,
            role_name = %grant.role_name,
            "renewal window elapsed, role revoked"
        );

        Ok(TimeoutOutcome::Revoked {
            grant_id,
            side_effect_errors,
        })
    }
}
