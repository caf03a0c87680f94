#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use platform_models::module::{MODULE_READY_CONDITION, ModuleCondition};
    use platform_models::{
        Availability, ComponentState, ConditionStatus, ConditionType, Module,
        ModuleStatus, Platform, PlatformState, PlatformStatus,
    };

    use super::super::ControllerContext;
    use super::super::component_status::initialize_component_status;
    use super::super::reconcile::reconcile_platform;
    use super::super::uninstall::{FINALIZER, has_finalizer};
    use crate::health::HealthChecker;
    use crate::k8s::fake::FakeClient;
    use crate::result::{ReconcileResult, Requeue};
    use crate::testutil::{
        INSTALL_NS, deployment, platform, test_context, test_registry,
    };

    fn stored(fake: &FakeClient) -> Platform {
        fake.get_typed(Some("default"), "platform").unwrap()
    }

    fn state(fake: &FakeClient) -> Option<PlatformState> {
        stored(fake).status.and_then(|s| s.state)
    }

    fn last_condition(fake: &FakeClient) -> Option<ConditionType> {
        stored(fake)
            .status
            .and_then(|s| s.conditions.last().map(|c| c.type_))
    }

    /// Runs one pass on the stored copy and waits for its status writes.
    async fn pass(
        ctx: &ControllerContext,
        fake: &FakeClient,
    ) -> ReconcileResult {
        let p = stored(fake);
        let result = reconcile_platform(ctx, &p).await;
        ctx.updater.shutdown().await;
        result
    }

    /// Passes until init has nothing left to write.
    async fn settle(
        ctx: &ControllerContext,
        fake: &FakeClient,
    ) -> ReconcileResult {
        for _ in 0..4 {
            let result = pass(ctx, fake).await;
            if result.requeue() != Requeue::Now {
                return result;
            }
        }
        panic!("init never settled");
    }

    /// A Platform that went through init once, at `spec_version` with
    /// `status_version` installed.
    async fn installed(
        fake: &Arc<FakeClient>,
        ctx: &ControllerContext,
        spec_version: &str,
        status_version: &str,
    ) -> Platform {
        let mut p = platform("platform");
        p.spec.version = spec_version.into();
        p.metadata.finalizers = Some(vec![FINALIZER.into()]);
        p.status = Some(PlatformStatus {
            state: Some(PlatformState::Ready),
            version: Some(status_version.into()),
            ..Default::default()
        });
        fake.seed(&p);
        for _ in 0..2 {
            let p = stored(fake);
            let registry = &ctx.registry;
            initialize_component_status(fake.as_ref(), registry, &p, &p.spec)
                .await
                .unwrap();
        }
        stored(fake)
    }

    fn mark_converged(fake: &FakeClient, name: &str) {
        let mut m: Module = fake.get_typed(Some(INSTALL_NS), name).unwrap();
        m.status = Some(ModuleStatus {
            conditions: vec![ModuleCondition {
                type_: MODULE_READY_CONDITION.into(),
                status: ConditionStatus::True,
                reason: None,
                message: None,
                last_transition_time: None,
            }],
            last_successful_generation: m.metadata.generation,
            last_successful_version: Some(m.spec.version.clone()),
        });
        fake.seed(&m);
    }

    fn converge_all(fake: &FakeClient) {
        for name in ["alpha", "beta", "gamma"] {
            mark_converged(fake, name);
        }
    }

    #[test_log::test(tokio::test)]
    async fn fresh_install_runs_to_ready() {
        let fake = Arc::new(FakeClient::new());
        let ctx = test_context(fake.clone(), test_registry(), "1.0.0");
        fake.seed(&platform("platform"));

        let first = pass(&ctx, &fake).await;
        assert_eq!(first.requeue(), Requeue::Now);
        assert!(!first.is_error());
        let p = stored(&fake);
        assert!(has_finalizer(&p));
        let status = p.status.unwrap();
        assert_eq!(status.state, Some(PlatformState::Ready));
        assert_eq!(status.components.len(), 3);
        assert!(
            status
                .components
                .values()
                .all(|c| c.state == ComponentState::Disabled)
        );

        let installing = settle(&ctx, &fake).await;
        assert!(
            installing.should_requeue() && !installing.is_error(),
            "{installing:?}"
        );
        assert_eq!(fake.list_typed::<Module>().len(), 3);
        assert_eq!(state(&fake), Some(PlatformState::Installing));
        assert_eq!(last_condition(&fake), Some(ConditionType::InstallStarted));

        converge_all(&fake);
        let done = pass(&ctx, &fake).await;
        assert!(done.is_complete(), "{done:?}");
        let status = stored(&fake).status.unwrap();
        assert_eq!(status.state, Some(PlatformState::Ready));
        assert_eq!(status.version.as_deref(), Some("1.0.0"));
        assert_eq!(
            status.conditions.last().map(|c| c.type_),
            Some(ConditionType::InstallComplete)
        );
        assert!(
            status
                .components
                .values()
                .all(|c| c.state == ComponentState::Ready)
        );

        // nothing left to do
        let writes = fake.writes();
        assert!(pass(&ctx, &fake).await.is_complete());
        assert_eq!(fake.writes(), writes);
    }

    fn alpha_availability(fake: &FakeClient) -> Option<Availability> {
        stored(fake)
            .status
            .and_then(|s| s.components.get("alpha").and_then(|c| c.available))
    }

    #[test_log::test(tokio::test)]
    async fn reconcile_keeps_published_availability() {
        let fake = Arc::new(FakeClient::new());
        let ctx = test_context(fake.clone(), test_registry(), "1.0.0");
        fake.seed(&platform("platform"));
        settle(&ctx, &fake).await;
        converge_all(&fake);
        assert!(pass(&ctx, &fake).await.is_complete());
        for name in ["alpha", "beta", "gamma"] {
            fake.seed(&deployment(&format!("{name}-ns"), name, 1, 1));
        }
        let checker = HealthChecker::new(
            fake.clone(),
            ctx.registry.clone(),
            ctx.updater.clone(),
            Duration::from_secs(3600),
        );

        // a copy read before the health checker published
        let stale = stored(&fake);
        assert!(checker.tick().await.unwrap());
        ctx.updater.shutdown().await;
        assert_eq!(alpha_availability(&fake), Some(Availability::Available));
        assert_eq!(
            stored(&fake).status.and_then(|s| s.available).as_deref(),
            Some("3/3")
        );

        let result = reconcile_platform(&ctx, &stale).await;
        ctx.updater.shutdown().await;
        assert!(result.is_complete(), "{result:?}");
        assert_eq!(alpha_availability(&fake), Some(Availability::Available));
        assert!(!checker.tick().await.unwrap());
    }

    #[test_log::test(tokio::test)]
    async fn blocked_upgrade_names_both_versions() {
        let fake = Arc::new(FakeClient::new());
        let ctx = test_context(fake.clone(), test_registry(), "1.1.0");
        installed(&fake, &ctx, "1.0.0", "1.0.0").await;

        let result = pass(&ctx, &fake).await;
        let msg = result.error().map(ToString::to_string).unwrap_or_default();
        assert!(msg.contains("1.0.0") && msg.contains("1.1.0"), "{msg}");
        assert!(!result.should_requeue());
        assert_eq!(state(&fake), Some(PlatformState::Ready));
        assert!(fake.list_typed::<Module>().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn rollback_is_rejected() {
        let fake = Arc::new(FakeClient::new());
        let ctx = test_context(fake.clone(), test_registry(), "1.0.0");
        installed(&fake, &ctx, "1.0.0", "1.1.0").await;

        let result = pass(&ctx, &fake).await;
        let msg = result.error().map(ToString::to_string).unwrap_or_default();
        assert!(msg.contains("rollback is not supported"), "{msg}");
        assert_eq!(state(&fake), Some(PlatformState::Ready));
    }

    #[test_log::test(tokio::test)]
    async fn lagging_install_without_version_pauses() {
        let fake = Arc::new(FakeClient::new());
        let ctx = test_context(fake.clone(), test_registry(), "1.1.0");
        installed(&fake, &ctx, "", "1.0.0").await;

        let result = pass(&ctx, &fake).await;
        assert!(result.is_complete(), "{result:?}");
        assert_eq!(state(&fake), Some(PlatformState::Paused));
        assert_eq!(last_condition(&fake), Some(ConditionType::UpgradePaused));
        assert!(fake.list_typed::<Module>().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn upgrade_runs_to_new_version() {
        let fake = Arc::new(FakeClient::new());
        let ctx = test_context(fake.clone(), test_registry(), "1.1.0");
        installed(&fake, &ctx, "1.1.0", "1.0.0").await;

        let result = pass(&ctx, &fake).await;
        assert!(result.should_requeue() && !result.is_error(), "{result:?}");
        assert_eq!(state(&fake), Some(PlatformState::Upgrading));
        assert_eq!(last_condition(&fake), Some(ConditionType::UpgradeStarted));

        converge_all(&fake);
        let result = pass(&ctx, &fake).await;
        assert!(result.is_complete(), "{result:?}");
        let status = stored(&fake).status.unwrap();
        assert_eq!(status.state, Some(PlatformState::Ready));
        assert_eq!(status.version.as_deref(), Some("1.1.0"));
        assert_eq!(
            status.conditions.last().map(|c| c.type_),
            Some(ConditionType::UpgradeComplete)
        );
        assert!(
            status
                .conditions
                .iter()
                .any(|c| c.type_ == ConditionType::UpgradeStarted)
        );
    }

    #[test_log::test(tokio::test)]
    async fn deletion_drains_and_releases() {
        let fake = Arc::new(FakeClient::new());
        let ctx = test_context(fake.clone(), test_registry(), "1.0.0");
        fake.seed(&platform("platform"));
        settle(&ctx, &fake).await;
        assert_eq!(fake.list_typed::<Module>().len(), 3);

        let mut p = stored(&fake);
        let at = serde_json::json!("2026-01-01T00:00:00Z");
        p.metadata.deletion_timestamp =
            Some(serde_json::from_value(at).unwrap());
        fake.seed(&p);

        let result = pass(&ctx, &fake).await;
        assert!(result.is_complete(), "{result:?}");
        assert!(fake.list_typed::<Module>().is_empty());
        assert!(!has_finalizer(&stored(&fake)));
        assert_eq!(
            last_condition(&fake),
            Some(ConditionType::UninstallComplete)
        );

        // a finalizer-less pass is a no-op
        assert!(pass(&ctx, &fake).await.is_complete());
    }
}
