use super::*;

impl GrantLifecycleService {
    /// Removes the member's active role.
    pub async fn remove(&self, subject_id: &str) -> AppResult<RemovalOutcome> {
        self.work_queue
            .run(subject_id, self.remove_serialized(subject_id))
            .await
    }

    async fn remove_serialized(&self, subject_id: &str) -> AppResult<RemovalOutcome> {
        let active = self.repository.find_active_by_subject(subject_id).await?;
        let decision = self.engine.remove(active.as_ref())?;
        let Some(grant) = active else {
            return Err(Rejection::NoActiveGrant.into());
        };

        let Some(side_effect_errors) = self.execute_revocation(&grant, &decision).await? else {
            return Err(Rejection::NoActiveGrant.into());
        };

        info!(
            grant_id = %grant.id,
            subject_id = %grant.subject_id,
            role_name = %grant.role_name,
            "role removed"
        );

        Ok(RemovalOutcome {
            grant_id: grant.id,
            role_name: grant.role_name,
            side_effect_errors,
        })
    }
}
