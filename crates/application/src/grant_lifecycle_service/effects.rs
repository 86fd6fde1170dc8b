use super::*;

impl GrantLifecycleService {
    /// Applies the store write of a decision.
    pub(super) async fn execute_write(&self, write: &GrantWrite) -> AppResult<WriteResult> {
        let applied = match write {
            GrantWrite::Insert(new_grant) => {
                return self
                    .repository
                    .insert_grant(new_grant.clone())
                    .await
                    .map(WriteResult::Stored);
            }
            GrantWrite::Reclaim(reclaim) => {
                return Ok(match self.repository.reclaim(reclaim.clone()).await? {
                    Some(grant) => WriteResult::Stored(grant),
                    None => WriteResult::Skipped,
                });
            }
            GrantWrite::MarkAwaitingResponse {
                grant_id,
                observed_at,
                renewal_due_at,
            } => {
                self.repository
                    .mark_awaiting_response(*grant_id, *observed_at, *renewal_due_at)
                    .await?
            }
            GrantWrite::ExtendAndReactivate {
                grant_id,
                expires_at,
            } => {
                self.repository
                    .extend_and_reactivate(*grant_id, *expires_at)
                    .await?
            }
            GrantWrite::Deactivate(request) => self.repository.deactivate(*request).await?,
        };

        Ok(if applied {
            WriteResult::Applied
        } else {
            WriteResult::Skipped
        })
    }

    /// Runs every side effect, collecting failures instead of stopping early.
    pub(super) async fn run_effects(&self, effects: &[SideEffect]) -> EffectReport {
        let mut report = EffectReport::default();
        for effect in effects {
            match self.run_effect(effect).await {
                Ok(posted_prompt) => {
                    if posted_prompt.is_some() {
                        report.posted_prompt = posted_prompt;
                    }
                }
                Err(error) => {
                    warn!(effect = ?effect, error = %error, "grant side effect failed");
                    report.failures.push(EffectFailure {
                        effect: effect.clone(),
                        error,
                    });
                }
            }
        }

        report
    }

    async fn run_effect(&self, effect: &SideEffect) -> AppResult<Option<String>> {
        match effect {
            SideEffect::GrantRole {
                subject_id,
                role_id,
            } => {
                self.platform
                    .grant_role(subject_id.as_str(), role_id.as_str())
                    .await?;
            }
            SideEffect::RevokeRole {
                subject_id,
                role_id,
            } => {
                self.platform
                    .revoke_role(subject_id.as_str(), role_id.as_str())
                    .await?;
            }
            SideEffect::PostRenewalPrompt {
                grant_id,
                subject_id,
                role_name,
            } => {
                return self
                    .post_renewal_prompt(*grant_id, subject_id.as_str(), role_name.as_str())
                    .await
                    .map(Some);
            }
            SideEffect::DeleteRenewalPrompt { prompt_id } => {
                self.platform
                    .delete_message(self.notification_channel_id.as_str(), prompt_id.as_str())
                    .await?;
            }
        }

        Ok(None)
    }

    /// Posts the renewal prompt and records its id on the grant.
    ///
    /// A posted prompt that cannot be recorded is deleted again so the next
    /// attempt does not leave a second live prompt behind.
    async fn post_renewal_prompt(
        &self,
        grant_id: GrantId,
        subject_id: &str,
        role_name: &str,
    ) -> AppResult<String> {
        let window_minutes = self.engine.policy().renewal_window().num_minutes();
        let message = OutgoingMessage::text(format!(
            "<@{subject_id}>, are you still **{role_name}**? Answer within {window_minutes} minutes."
        ))
        .with_action(MessageAction::new(
            InboundCommand::RespondToRenewal {
                grant_id,
                answer: RenewalAnswer::Confirm,
            }
            .custom_id(),
            "Yes, renew",
            ActionStyle::Success,
        ))
        .with_action(MessageAction::new(
            InboundCommand::RespondToRenewal {
                grant_id,
                answer: RenewalAnswer::Decline,
            }
            .custom_id(),
            "No, remove",
            ActionStyle::Danger,
        ));

        let prompt_id = self
            .platform
            .post_message(self.notification_channel_id.as_str(), message)
            .await?;

        let recorded = match self
            .repository
            .set_renewal_prompt(grant_id, prompt_id.as_str())
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::Conflict(format!(
                "grant '{grant_id}' left awaiting_response before its prompt was recorded"
            ))),
            Err(error) => Err(error),
        };

        if let Err(error) = recorded {
            if let Err(delete_error) = self
                .platform
                .delete_message(self.notification_channel_id.as_str(), prompt_id.as_str())
                .await
            {
                warn!(
                    grant_id = %grant_id,
                    prompt_id = %prompt_id,
                    error = %delete_error,
                    "failed to delete unrecorded renewal prompt"
                );
            }
            return Err(error);
        }

        Ok(prompt_id)
    }

    /// Appends one audit event. Failures are logged, never returned.
    pub(super) async fn record_audit(
        &self,
        grant_id: GrantId,
        subject_id: &str,
        action: GrantAuditAction,
        detail: Option<String>,
    ) {
        if let Err(error) = self
            .audit_repository
            .append_event(GrantAuditEvent {
                grant_id,
                subject_id: subject_id.to_owned(),
                action,
                detail,
            })
            .await
        {
            warn!(
                grant_id = %grant_id,
                action = action.as_str(),
                error = %error,
                "failed to append grant audit event"
            );
        }
    }

    /// Tells the status projector that grants changed.
    pub(super) async fn notify_changed(&self) {
        if let Some(status_projector) = &self.status_projector {
            status_projector.signal().await;
        }
    }

    /// Wakes the renewal timer so it picks up a new deadline.
    pub(super) fn arm_renewal_timer(&self) {
        if let Some(renewal_wakeup) = &self.renewal_wakeup {
            renewal_wakeup.arm();
        }
    }

    /// Deactivates a grant and releases its role.
    ///
    /// A write that no longer matches its guard skips every side effect. A
    /// write that fails still releases the role, and both failures are
    /// reported together.
    pub(super) async fn execute_revocation(
        &self,
        grant: &Grant,
        decision: &Decision,
    ) -> AppResult<Option<Vec<String>>> {
        let write = self.execute_write(&decision.write).await;
        if matches!(write, Ok(WriteResult::Skipped)) {
            return Ok(None);
        }

        let report = self.run_effects(decision.effects.as_slice()).await;
        let side_effect_errors = report.error_messages();

        if let Err(write_error) = write {
            error!(
                grant_id = %grant.id,
                subject_id = %grant.subject_id,
                error = %write_error,
                "grant deactivation failed after releasing the role"
            );
            self.notify_changed().await;
            if side_effect_errors.is_empty() {
                return Err(write_error);
            }
            return Err(AppError::Internal(format!(
                "{write_error}; side effects failed: {}",
                side_effect_errors.join("; ")
            )));
        }

        self.record_audit(
            grant.id,
            grant.subject_id.as_str(),
            decision.audit,
            (!side_effect_errors.is_empty()).then(|| side_effect_errors.join("; ")),
        )
        .await;
        self.notify_changed().await;

        Ok(Some(side_effect_errors))
    }
}
