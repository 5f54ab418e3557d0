//! Export job: numbers the delivery folders, delivers every requested
//! version in turn and writes one manifest per delivery folder.
//!
//! A failed version is reported on the version and the batch moves on.
//! Only configuration errors, folder creation failures and cancellation
//! end the job early.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use delivery_core::entity::Entity;
use delivery_core::events::{report_error, DeliveryEvent, DeliveryObserver};
use delivery_core::planning::{base_template_fields, plan_version, VersionPlan};
use delivery_core::settings::Settings;
use delivery_core::types::EntityId;
use delivery_core::user_settings::UserSettings;
use delivery_core::version::{Deliverables, Version};
use delivery_shotgrid::ShotGridCache;

use crate::deliver::{deliver_version, DeliveryContext};
use crate::error::{DeliveryError, ExportError};
use crate::loader::ProjectInfo;
use crate::manifest::{delivered_files, write_bucket_manifest, ManifestEntry};
use crate::numbering::{bucket_key, claim_buckets, episode_folders, Bucket};

/// What to export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub entities: Vec<Entity>,
    /// Deliverables per version id. Versions absent here, or with nothing
    /// requested, are not delivered.
    pub deliverables: HashMap<EntityId, Deliverables>,
    pub user: UserSettings,
}

/// Outcome of an export. `entities` carry the final message, error and
/// progress of every version.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub entities: Vec<Entity>,
    pub manifests: Vec<PathBuf>,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Exporter {
    settings: Arc<Settings>,
    cache: Arc<ShotGridCache>,
    observer: Arc<dyn DeliveryObserver>,
    http: reqwest::Client,
}

impl Exporter {
    pub fn new(settings: Arc<Settings>, cache: Arc<ShotGridCache>, observer: Arc<dyn DeliveryObserver>) -> Self {
        Self {
            settings,
            cache,
            observer,
            http: reqwest::Client::new(),
        }
    }

    /// Run the export on its own task.
    pub fn spawn(
        self: Arc<Self>,
        request: ExportRequest,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<ExportReport, ExportError>> {
        tokio::spawn(async move { self.run(request, cancel).await })
    }

    /// Run the export to completion. Versions are delivered one after the
    /// other; the token is checked between versions, between jobs and
    /// between frames.
    pub async fn run(&self, request: ExportRequest, cancel: CancellationToken) -> Result<ExportReport, ExportError> {
        let ExportRequest {
            mut entities,
            deliverables,
            user,
        } = request;
        let settings = self.settings.as_ref();

        let project = ProjectInfo::from_records(self.cache.as_ref(), settings);
        let base = base_template_fields(&project.code, &project.vendor);

        let wanted = |version: &Version| deliverables.get(&version.id).copied().filter(Deliverables::any);

        let split = episode_folders(settings)?;
        let touched: BTreeSet<Option<String>> = entities
            .iter()
            .filter(|entity| entity.versions().iter().any(|v| wanted(v).is_some()))
            .map(|entity| bucket_key(entity, split))
            .collect();
        tracing::info!(buckets = touched.len(), "Starting export");

        let buckets = claim_buckets(settings, &user, &base, &touched, Local::now().date_naive()).await?;

        let ctx = DeliveryContext {
            settings,
            user: &user,
            cache: self.cache.as_ref(),
            project: &project,
            base: &base,
            observer: self.observer.as_ref(),
            http: &self.http,
            cancel: &cancel,
        };

        let mut plans: HashMap<EntityId, VersionPlan> = HashMap::new();
        let mut delivered = 0;
        let mut failed = 0;

        for entity_index in 0..entities.len() {
            let Some(bucket) = buckets.get(&bucket_key(&entities[entity_index], split)) else {
                continue;
            };

            for version_index in 0..entities[entity_index].versions().len() {
                let mut version = entities[entity_index].versions()[version_index].clone();
                let Some(requested) = wanted(&version) else {
                    continue;
                };
                if cancel.is_cancelled() {
                    tracing::warn!("Export cancelled");
                    return Err(ExportError::Cancelled);
                }

                let entity = &entities[entity_index];
                let result = match plan_version(
                    settings,
                    &user,
                    self.cache.as_ref(),
                    entity,
                    &version,
                    requested,
                    &base,
                    bucket.delivery_version,
                ) {
                    Ok(plan) => {
                        let result = deliver_version(ctx, entity, &mut version, requested, &plan).await;
                        plans.insert(version.id, plan);
                        result
                    }
                    Err(e) => Err(DeliveryError::from(e)),
                };

                let cancelled = result.as_ref().is_err_and(DeliveryError::is_cancelled);
                match result {
                    Ok(()) => delivered += 1,
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        failed += 1;
                        contain_failure(self.observer.as_ref(), entity, &mut version, &e);
                    }
                }
                entities[entity_index].versions_mut()[version_index] = version;

                if cancelled {
                    tracing::warn!("Export cancelled");
                    return Err(ExportError::Cancelled);
                }
            }
        }

        let manifests = self.write_manifests(&user, &buckets, split, &entities, &plans);

        tracing::info!(delivered, failed, manifests = manifests.len(), "Export finished");
        self.observer.notify(DeliveryEvent::ExportFinished);

        Ok(ExportReport {
            entities,
            manifests,
            delivered,
            failed,
        })
    }

    /// One manifest per claimed bucket. A manifest that cannot be written
    /// is logged and skipped.
    fn write_manifests(
        &self,
        user: &UserSettings,
        buckets: &BTreeMap<Option<String>, Bucket>,
        split: bool,
        entities: &[Entity],
        plans: &HashMap<EntityId, VersionPlan>,
    ) -> Vec<PathBuf> {
        let settings = self.settings.as_ref();
        let mut written = Vec::new();

        for (key, bucket) in buckets {
            let entries: Vec<ManifestEntry<'_>> = entities
                .iter()
                .filter(|entity| bucket_key(entity, split) == *key)
                .flat_map(move |entity| {
                    entity.versions().iter().filter_map(move |version| {
                        plans.get(&version.id).map(|plan| ManifestEntry {
                            entity,
                            version,
                            files: delivered_files(settings, version, plan),
                        })
                    })
                })
                .collect();

            match write_bucket_manifest(settings, user, self.cache.as_ref(), bucket, &entries) {
                Ok(path) => written.push(path),
                Err(e) => tracing::error!(
                    episode = key.as_deref().unwrap_or("-"),
                    error = %e,
                    "Failed to write delivery manifest",
                ),
            }
        }

        written
    }
}

/// Report a failed version delivery without ending the batch.
fn contain_failure(observer: &dyn DeliveryObserver, entity: &Entity, version: &mut Version, error: &DeliveryError) {
    match error {
        DeliveryError::FileExists(path) => {
            tracing::warn!(version = %version.code, path = %path.display(), "Delivery files already exist");
        }
        DeliveryError::Render(delivery_nuke::RenderError::License(message)) => {
            tracing::error!(version = %version.code, %message, "Renderer license error");
        }
        _ => {
            tracing::error!(
                entity = %entity.code,
                version = %version.code,
                error = ?error,
                "Error while delivering version",
            );
        }
    }
    report_error(observer, version, error.user_message());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use delivery_core::error::CoreError;

    use crate::error::{FILE_EXISTS_MESSAGE, GENERIC_MESSAGE};
    use crate::events::RecordingObserver;

    use super::*;

    #[test]
    fn contained_failures_report_user_messages() {
        let observer = RecordingObserver::default();
        let shot = Entity::new_shot(1, "sh010", "SQ010", None, "prj");
        let mut version = Version::new(5, "sh010_comp_v001");

        contain_failure(
            &observer,
            &shot,
            &mut version,
            &DeliveryError::FileExists("/out/sh010.1001.exr".into()),
        );
        assert_eq!(version.validation_error, FILE_EXISTS_MESSAGE);

        contain_failure(
            &observer,
            &shot,
            &mut version,
            &DeliveryError::Core(CoreError::Validation("no frame range".into())),
        );
        assert_eq!(observer.errors_for(5), vec![FILE_EXISTS_MESSAGE, GENERIC_MESSAGE]);
    }
}
