//! Delivery of one version: preview renders, the frame sequence, the
//! attachment, the shot LUT and the status updates.

use std::path::Path;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use delivery_core::context::{Context, FileContext};
use delivery_core::entity::Entity;
use delivery_core::error::CoreError;
use delivery_core::events::{report_error, report_message, report_progress, DeliveryObserver};
use delivery_core::exr::{read_exr_header, ExrHeader};
use delivery_core::frames::format_frame;
use delivery_core::outputs::{find_sequence_output, SequenceOutput};
use delivery_core::path_template::TemplateFields;
use delivery_core::planning::{version_template_fields, with_input_resolution, PreviewTarget, VersionPlan};
use delivery_core::rerender;
use delivery_core::settings::Settings;
use delivery_core::slate::SlateData;
use delivery_core::types::Record;
use delivery_core::user_settings::UserSettings;
use delivery_core::version::{Attachment, AttachmentLinkType, Deliverables, Version};
use delivery_nuke::{NukeProcess, PreviewArgs, RenderObserver, SequenceArgs, SequenceSlate};
use delivery_shotgrid::ShotGridCache;

use crate::error::DeliveryError;
use crate::loader::ProjectInfo;
use crate::transfer::transfer_frames;

/// Reported once a version is fully delivered.
pub const EXPORT_FINISHED_MESSAGE: &str = "Export finished!";

/// Everything one version delivery reads from the export run.
#[derive(Clone, Copy)]
pub struct DeliveryContext<'a> {
    pub settings: &'a Settings,
    pub user: &'a UserSettings,
    pub cache: &'a ShotGridCache,
    pub project: &'a ProjectInfo,
    /// `prj`, `vnd` and `delivery_version` defaults.
    pub base: &'a TemplateFields,
    pub observer: &'a dyn DeliveryObserver,
    pub http: &'a reqwest::Client,
    pub cancel: &'a CancellationToken,
}

// ---------------------------------------------------------------------------
// Job progress
// ---------------------------------------------------------------------------

/// Folds the progress of one job into the progress of the version:
/// `(job_progress + completed_jobs) / total_jobs`.
pub struct JobProgress<'a> {
    version: &'a mut Version,
    observer: &'a dyn DeliveryObserver,
    completed: usize,
    total: usize,
}

impl<'a> JobProgress<'a> {
    pub fn new(version: &'a mut Version, observer: &'a dyn DeliveryObserver, total: usize) -> Self {
        Self {
            version,
            observer,
            completed: 0,
            total: total.max(1),
        }
    }

    /// Start job number `completed` (zero-based).
    pub fn start_job(&mut self, completed: usize) {
        self.completed = completed;
    }

    pub fn version(&self) -> &Version {
        self.version
    }

    pub fn version_mut(&mut self) -> &mut Version {
        self.version
    }
}

impl RenderObserver for JobProgress<'_> {
    fn message(&mut self, message: &str) {
        report_message(self.observer, self.version, message);
    }

    fn error(&mut self, message: &str) {
        report_error(self.observer, self.version, message);
    }

    fn progress(&mut self, progress: f64) {
        let overall = (progress + self.completed as f64) / self.total as f64;
        report_progress(self.observer, self.version, overall);
    }
}

// ---------------------------------------------------------------------------
// Version delivery
// ---------------------------------------------------------------------------

/// Deliver `version` of `entity` to the destinations of `plan`.
pub async fn deliver_version(
    ctx: DeliveryContext<'_>,
    entity: &Entity,
    version: &mut Version,
    deliverables: Deliverables,
    plan: &VersionPlan,
) -> Result<(), DeliveryError> {
    tracing::info!(
        entity = %entity.code,
        version = %version.code,
        preview = deliverables.deliver_preview,
        sequence = deliverables.deliver_sequence,
        "Delivering preview and sequence for version",
    );

    let mut jobs = JobProgress::new(version, ctx.observer, plan.total_jobs());

    for (index, target) in plan.previews.iter().enumerate() {
        jobs.start_job(index);
        render_preview(ctx, entity, plan, target, &mut jobs).await?;
    }

    if let Some(destination) = &plan.sequence {
        jobs.start_job(plan.previews.len());
        deliver_sequence(ctx, entity, plan, destination, &mut jobs).await?;
    }

    let version = jobs.version;

    if let Some(attachment) = &version.attachment {
        if ctx.user.attachment_referenced(ctx.settings.attachment_field.as_deref()) {
            deliver_attachment(ctx.http, attachment, &plan.delivery_root).await?;
        }
    }

    if let Some(lut) = &plan.lut {
        if tokio::fs::try_exists(&lut.source).await.unwrap_or(false) {
            if let Some(parent) = lut.destination.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(DeliveryError::io("create", parent))?;
            }
            tokio::fs::copy(&lut.source, &lut.destination)
                .await
                .map_err(DeliveryError::io("copy", &lut.destination))?;
            tracing::info!(lut = %lut.destination.display(), "Delivered LUT");
        } else {
            tracing::debug!(lut = %lut.source.display(), "No LUT to deliver");
        }
    }

    update_statuses(ctx, entity, version, deliverables).await?;

    report_message(ctx.observer, version, EXPORT_FINISHED_MESSAGE);
    report_progress(ctx.observer, version, 1.0);
    Ok(())
}

async fn update_statuses(
    ctx: DeliveryContext<'_>,
    entity: &Entity,
    version: &Version,
    deliverables: Deliverables,
) -> Result<(), DeliveryError> {
    let settings = ctx.settings;
    let status = if deliverables.deliver_sequence {
        &settings.version_delivered_status
    } else {
        &settings.version_preview_delivered_status
    };

    let mut data = Record::new();
    data.insert(settings.version_status_field.clone(), Value::String(status.clone()));
    ctx.cache.update("Version", version.id, data).await?;

    if deliverables.deliver_sequence && entity.is_shot() {
        let mut data = Record::new();
        data.insert(
            settings.shot_status_field.clone(),
            Value::String(settings.shot_delivered_status.clone()),
        );
        ctx.cache.update("Shot", entity.id, data).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Slate data
// ---------------------------------------------------------------------------

/// Slate payload for a render of `version`. Sequence slates use the
/// input resolution.
pub fn slate_data(
    ctx: DeliveryContext<'_>,
    entity: &Entity,
    version: &Version,
    file: &FileContext,
    sequence: bool,
) -> String {
    let mut fields = version_template_fields(entity, version, ctx.base, None);
    if sequence {
        fields = with_input_resolution(&fields);
    }

    let context = Context::new(ctx.cache, ctx.settings.resolve_settings())
        .with_shot(entity)
        .with_version(version)
        .with_file(file);
    let optional_fields = ctx.settings.slate_extra_fields(&fields, &context);

    SlateData::new(
        entity,
        version,
        ctx.project.show.as_str(),
        ctx.project.vendor.as_str(),
        optional_fields,
    )
    .to_json()
}

// ---------------------------------------------------------------------------
// Previews
// ---------------------------------------------------------------------------

async fn render_preview(
    ctx: DeliveryContext<'_>,
    entity: &Entity,
    plan: &VersionPlan,
    target: &PreviewTarget,
    jobs: &mut JobProgress<'_>,
) -> Result<(), DeliveryError> {
    let output = &target.output;
    let version = jobs.version();

    let file = FileContext {
        codec: output.name.clone(),
        bit_depth: output.bit_depth_hint().unwrap_or_else(|| "8-bit".to_string()),
        has_slate: true,
        ..FileContext::new(&target.path)
    };
    let slate = slate_data(ctx, entity, version, &file, false);

    let movie = version.path_to_movie.clone().unwrap_or_default();
    let (first, last) = version
        .frame_range()
        .ok_or_else(|| CoreError::Validation(format!("Version {} has no frame range", version.code)))?;
    let letterbox = if output.use_letterbox { ctx.user.letterbox } else { None };

    let args = PreviewArgs {
        renderer: &ctx.settings.renderer,
        first_frame: first,
        last_frame: last,
        fps: version.fps.unwrap_or_default(),
        movie: Path::new(&movie),
        output: &target.path,
        idt: &ctx.settings.preview_colorspace_idt,
        odt: &ctx.settings.preview_colorspace_odt,
        write_settings: output.to_cli_string(),
        slate_data: slate,
        timecode_ref: plan.timecode_ref.as_deref().map(Path::new),
        letterbox,
        new_submission_note: ctx.settings.override_preview_submission_note,
    }
    .build();

    if let Some(parent) = target.path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(DeliveryError::io("create", parent))?;
    }

    let name = format!("{} - {}", output.extension.to_uppercase(), output.name);
    tracing::info!(render = %name, output = %target.path.display(), "Rendering preview");
    NukeProcess::new(&ctx.settings.renderer.nuke_path, Some(name))
        .run(args, jobs, ctx.cancel)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// Codec and bit depth of a delivered sequence: the requested output
/// values, falling back to the EXR header of `frame`. Values neither
/// source knows are empty.
pub fn sequence_file_info(
    output: Option<&SequenceOutput>,
    source: &str,
    frame: i64,
) -> (String, String) {
    let requested_codec = output.map(SequenceOutput::compression).unwrap_or_default();
    let requested_depth = output.map(SequenceOutput::bit_depth).unwrap_or_default();
    if !requested_codec.is_empty() && !requested_depth.is_empty() {
        return (requested_codec.to_string(), requested_depth.to_string());
    }

    let header = read_frame_header(source, frame);
    let codec = if requested_codec.is_empty() {
        header
            .as_ref()
            .and_then(ExrHeader::compression_name)
            .unwrap_or_default()
            .to_string()
    } else {
        requested_codec.to_string()
    };
    let bit_depth = if requested_depth.is_empty() {
        header
            .as_ref()
            .and_then(ExrHeader::bit_depth_label)
            .unwrap_or_default()
            .to_string()
    } else {
        requested_depth.to_string()
    };
    (codec, bit_depth)
}

/// Header of one frame of `source`. Unreadable headers are logged.
fn read_frame_header(source: &str, frame: i64) -> Option<ExrHeader> {
    let path = format_frame(source, frame)?;
    match read_exr_header(Path::new(&path)) {
        Ok(header) => Some(header),
        Err(e) => {
            tracing::warn!(frame = %path, error = %e, "Could not read frame header");
            None
        }
    }
}

async fn deliver_sequence(
    ctx: DeliveryContext<'_>,
    entity: &Entity,
    plan: &VersionPlan,
    destination: &Path,
    jobs: &mut JobProgress<'_>,
) -> Result<(), DeliveryError> {
    let settings = ctx.settings;
    let version = jobs.version();

    let source = version
        .sequence_path
        .clone()
        .ok_or_else(|| CoreError::Validation(format!("Version {} has no sequence path", version.code)))?;
    let (first, last) = version
        .frame_range()
        .ok_or_else(|| CoreError::Validation(format!("Version {} has no frame range", version.code)))?;
    let first = first + i64::from(version.frames_have_slate);

    let output = find_sequence_output(&settings.delivery_sequence_outputs, &version.sequence_output_status);
    let header = read_frame_header(&source, first);
    let decision = rerender::decide(
        output,
        header.as_ref(),
        settings.remove_alpha_from_sequence,
        settings.add_slate_to_sequence,
    );
    tracing::info!(version = %version.code, action = ?decision.action(), "Sequence delivery");

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(DeliveryError::io("create", parent))?;
    }

    if decision.needs_render() {
        let render_name = match output {
            Some(output) => format!("{} - {}", output.status, output.name),
            None => "main".to_string(),
        };
        if output.is_some() {
            jobs.message(&format!("Rerendering frames for {render_name}..."));
        }

        let slate = if decision.add_slate {
            let (codec, bit_depth) = sequence_file_info(output, &source, first);
            let file = FileContext {
                codec,
                bit_depth,
                has_slate: true,
                ..FileContext::new(destination)
            };
            Some(SequenceSlate {
                colorspace: &settings.sequence_colorspace,
                slate_data: slate_data(ctx, entity, jobs.version(), &file, true),
                slate_only: !decision.rerender,
            })
        } else {
            None
        };

        let args = SequenceArgs {
            renderer: &settings.renderer,
            first_frame: first,
            last_frame: last,
            source: &source,
            destination,
            write_settings: output.map(SequenceOutput::to_cli_string),
            slate,
        }
        .build();

        NukeProcess::new(&settings.renderer.nuke_path, Some(render_name))
            .run(args, jobs, ctx.cancel)
            .await?;
    }

    if !decision.rerender {
        jobs.message("Delivering frames...");
        transfer_frames(&source, destination, first, last, jobs, ctx.cancel).await?;
    }

    tracing::debug!(plan_root = %plan.delivery_root.display(), "Sequence delivered");
    Ok(())
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Download or copy an attachment into the delivery folder. Web links are
/// not files and are skipped.
pub async fn deliver_attachment(
    http: &reqwest::Client,
    attachment: &Attachment,
    delivery_root: &Path,
) -> Result<(), DeliveryError> {
    let destination = delivery_root.join(&attachment.name);

    match attachment.link_type {
        AttachmentLinkType::Upload => {
            let Some(url) = &attachment.url else {
                tracing::warn!(name = %attachment.name, "Uploaded attachment has no url");
                return Ok(());
            };
            let download = |source| DeliveryError::Download {
                url: url.clone(),
                source,
            };
            let bytes = http
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(download)?
                .bytes()
                .await
                .map_err(download)?;
            tokio::fs::write(&destination, &bytes)
                .await
                .map_err(DeliveryError::io("write", &destination))?;
        }
        AttachmentLinkType::Local => {
            let Some(path) = &attachment.local_path else {
                tracing::warn!(name = %attachment.name, "Local attachment has no path for this platform");
                return Ok(());
            };
            tokio::fs::copy(path, &destination)
                .await
                .map_err(DeliveryError::io("copy", &destination))?;
        }
        AttachmentLinkType::Web => {
            tracing::debug!(name = %attachment.name, "Web attachment is not a file, skipping");
            return Ok(());
        }
    }

    tracing::info!(attachment = %destination.display(), "Delivered attachment");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
