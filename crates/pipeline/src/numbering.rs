//! Delivery version claims per episode bucket.
//!
//! Shots of one episode share a delivery folder, a delivery version and a
//! manifest. Assets and shots without an episode share the `None` bucket.
//! When the folder template has no `{Episode}` key every entity lands in
//! the `None` bucket.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::NaiveDate;

use delivery_core::entity::Entity;
use delivery_core::error::CoreError;
use delivery_core::path_template::{FieldValue, TemplateFields};
use delivery_core::planning::{delivery_root, next_delivery_version};
use delivery_core::settings::{Settings, DELIVERY_FOLDER};
use delivery_core::user_settings::UserSettings;

use crate::error::ExportError;

/// One delivery folder and the version number claimed for it.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub episode: Option<String>,
    pub delivery_version: i64,
    /// Base fields plus `Episode` and `delivery_version`.
    pub fields: TemplateFields,
    pub template_root: PathBuf,
    pub delivery_root: PathBuf,
}

/// Whether deliveries are split into one folder per episode.
pub fn episode_folders(settings: &Settings) -> Result<bool, CoreError> {
    Ok(settings.templates.require(DELIVERY_FOLDER)?.has_key("Episode"))
}

/// Bucket an entity is delivered in.
pub fn bucket_key(entity: &Entity, episode_folders: bool) -> Option<String> {
    if episode_folders {
        entity.episode_bucket().map(str::to_string)
    } else {
        None
    }
}

/// Number every bucket and create its delivery folder.
///
/// An explicit delivery version is used as-is for every bucket, otherwise
/// each bucket gets the next free version among its sibling folders.
pub async fn claim_buckets(
    settings: &Settings,
    user: &UserSettings,
    base: &TemplateFields,
    episodes: &BTreeSet<Option<String>>,
    today: NaiveDate,
) -> Result<BTreeMap<Option<String>, Bucket>, ExportError> {
    let folder_template = settings.templates.require(DELIVERY_FOLDER)?;
    let location = user.delivery_location.as_deref();
    let mut buckets = BTreeMap::new();

    for episode in episodes {
        let mut fields = base.clone();
        if let Some(episode) = episode {
            fields.insert("Episode".into(), episode.as_str().into());
        }

        let delivery_version = match user.delivery_version {
            Some(version) => version,
            None => next_delivery_version(
                folder_template,
                &fields,
                location,
                settings.continuous_versioning,
                today,
            )?,
        };
        fields.insert("delivery_version".into(), FieldValue::Int(delivery_version));

        let template_root = PathBuf::from(folder_template.apply_fields(&fields).map_err(CoreError::from)?);
        let delivery_root = delivery_root(&template_root, location);

        tokio::fs::create_dir_all(&delivery_root)
            .await
            .map_err(|source| ExportError::CreateFolder {
                path: delivery_root.clone(),
                source,
            })?;
        tracing::info!(
            episode = episode.as_deref().unwrap_or("-"),
            delivery_version,
            folder = %delivery_root.display(),
            "Claimed delivery folder",
        );

        buckets.insert(
            episode.clone(),
            Bucket {
                episode: episode.clone(),
                delivery_version,
                fields,
                template_root,
                delivery_root,
            },
        );
    }

    Ok(buckets)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
