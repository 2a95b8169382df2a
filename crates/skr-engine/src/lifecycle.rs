//! Module install / uninstall for a scope.

use std::collections::BTreeSet;

use skr_schemas::{Direction, Scope};
use tracing::{info, warn};

use crate::{Engine, EngineError, InstallReport, UninstallReport};

fn dedupe(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.trim().to_string()).collect()
}

impl Engine {
    /// Install modules, attaching missing dependencies automatically, then
    /// import the cloud state of everything newly installed.
    ///
    /// If the import fails the install is rolled back.
    pub async fn install(&self, names: &[&str], scope: &Scope) -> Result<InstallReport, EngineError> {
        let requested = dedupe(names);
        let unknown = self.registry.unknown(requested.iter().map(|s| s.as_str()));
        if !unknown.is_empty() {
            return Err(EngineError::UnknownModules(unknown));
        }

        let _guard = self.locks.acquire(scope).await;
        let installed = self.installed(scope).await?;

        let skipped: Vec<String> = requested.intersection(&installed).cloned().collect();
        if !skipped.is_empty() {
            info!(scope = %scope, modules = ?skipped, "already installed");
        }
        let fresh: BTreeSet<String> = requested.difference(&installed).cloned().collect();
        if fresh.is_empty() {
            return Ok(InstallReport {
                installed: Vec::new(),
                auto_attached: Vec::new(),
                skipped,
                import: None,
            });
        }

        let to_install: BTreeSet<String> = self
            .registry
            .closure(&fresh)
            .difference(&installed)
            .cloned()
            .collect();
        let auto_attached: Vec<String> = self
            .registry
            .sorted(&to_install.difference(&fresh).cloned().collect());
        if !auto_attached.is_empty() {
            warn!(scope = %scope, modules = ?auto_attached, "attaching missing dependencies");
        }

        let ordered = self.registry.sorted(&to_install);
        self.modules
            .mark_installed(scope, &ordered)
            .await
            .map_err(EngineError::Store)?;
        info!(scope = %scope, modules = ?ordered, "installed, importing cloud state");

        match self.run_locked(scope, Direction::Sync, Some(&to_install)).await {
            Ok(report) => Ok(InstallReport {
                installed: ordered,
                auto_attached,
                skipped,
                import: Some(report),
            }),
            Err(e) => {
                warn!(scope = %scope, error = %e, "import failed, rolling back install");
                self.purge_modules(scope, &to_install).await?;
                self.modules
                    .mark_uninstalled(scope, &ordered)
                    .await
                    .map_err(EngineError::Store)?;
                Err(e)
            }
        }
    }

    /// Uninstall modules and drop their records. Refused while another
    /// installed module depends on one of them. Cloud resources are left
    /// untouched.
    pub async fn uninstall(&self, names: &[&str], scope: &Scope) -> Result<UninstallReport, EngineError> {
        let requested = dedupe(names);
        let unknown = self.registry.unknown(requested.iter().map(|s| s.as_str()));
        if !unknown.is_empty() {
            return Err(EngineError::UnknownModules(unknown));
        }

        let _guard = self.locks.acquire(scope).await;
        let installed = self.installed(scope).await?;

        let skipped: Vec<String> = requested.difference(&installed).cloned().collect();
        let targets: BTreeSet<String> = requested.intersection(&installed).cloned().collect();
        if targets.is_empty() {
            return Ok(UninstallReport {
                uninstalled: Vec::new(),
                skipped,
                records_removed: 0,
            });
        }

        let dependents = self.registry.dependents(&targets, &installed);
        if !dependents.is_empty() {
            return Err(EngineError::DependentsInstalled {
                modules: self.registry.sorted(&targets),
                dependents,
            });
        }

        let records_removed = self.purge_modules(scope, &targets).await?;
        let mut ordered = self.registry.sorted(&targets);
        ordered.reverse();
        self.modules
            .mark_uninstalled(scope, &ordered)
            .await
            .map_err(EngineError::Store)?;
        info!(scope = %scope, modules = ?ordered, records_removed, "uninstalled");

        Ok(UninstallReport {
            uninstalled: ordered,
            skipped,
            records_removed,
        })
    }

    /// Delete stored records of `modules`, consumers first.
    async fn purge_modules(&self, scope: &Scope, modules: &BTreeSet<String>) -> Result<usize, EngineError> {
        let ctx = self.context(scope, Direction::Sync);
        let mut removed = 0;
        for m in self.registry.mappers(modules).iter().rev() {
            removed += m.purge(&ctx).await.map_err(EngineError::Store)?;
        }
        Ok(removed)
    }
}
