//! Batch orchestration
//!
//! One run lists the remote store, resyncs the datastore from it, then
//! processes every pending record in rank order, strictly one after
//! another, and finally commits the output URLs of the processed records.

use crate::{
    error::{PipelineError, Result},
    inference::{BackgroundRemoval, ImageRestorer},
    services::ImageCodec,
    store::{processed_ids, remote_path, FetchOutcome, ImageSource, PlayerStore, RemoteStore},
    types::{ItemOutcome, PlayerRecord, RemovalOutcome, RunSummary, SkipReason},
};
use image::DynamicImage;
use std::collections::HashSet;
use tracing::{debug, error, info, instrument, warn};

/// The batch job with all of its collaborators injected
pub struct Pipeline {
    players: Box<dyn PlayerStore>,
    remote: Box<dyn RemoteStore>,
    source: Box<dyn ImageSource>,
    restorer: Box<dyn ImageRestorer>,
    remover: Box<dyn BackgroundRemoval>,
    remote_dir: String,
    suffix: String,
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Run the whole batch.
    ///
    /// The remote store is disconnected and the datastore closed before
    /// returning, whether the run succeeded or not. A pipeline runs once.
    ///
    /// # Errors
    /// Any failure outside the per-item handling: datastore errors, remote
    /// listing errors, HTTP transport errors, undecodable images and
    /// restoration failures.
    #[instrument(skip(self), fields(remote_dir = %self.remote_dir))]
    pub async fn run(&mut self) -> Result<RunSummary> {
        let result = self.run_phases().await;
        let disconnected = self.remote.disconnect().await;
        let closed = self.players.close().await;
        if let Err(e) = &closed {
            warn!(error = %e, "Failed to close the datastore");
        }
        let released = disconnected.and(closed);

        match (result, released) {
            (Ok(summary), Ok(())) => {
                info!(
                    resynced = summary.resynced,
                    processed = summary.processed.len(),
                    gone = summary.gone.len(),
                    skipped = summary.skipped.len(),
                    "🎉 Batch complete"
                );
                Ok(summary)
            },
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(disconnect_error)) => {
                warn!(error = %disconnect_error, "Teardown after failed run also failed");
                Err(e)
            },
            (Err(e), Ok(())) => Err(e),
        }
    }

    async fn run_phases(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let processed = self.list_remote().await?;
        summary.resynced = self.resync_from_remote(&processed).await?;

        let pending = self.load_pending(&processed).await?;
        let total = pending.len();
        for (index, record) in pending.iter().enumerate() {
            info!(player = %record.id, item = index + 1, total, "Processing player");
            let outcome = self.process_item(record).await?;
            debug!(player = %record.id, ?outcome, "Item finished");
            summary.record(&record.id, &outcome);
        }

        self.commit_batch_results(&summary.processed).await?;
        Ok(summary)
    }

    /// Identifiers that already have an output file on the remote store
    #[instrument(skip(self))]
    pub async fn list_remote(&self) -> Result<HashSet<String>> {
        let names = self.remote.list_dir(&self.remote_dir).await?;
        let ids = processed_ids(&names, &self.suffix);
        info!(files = names.len(), processed = ids.len(), "Remote listing taken");
        Ok(ids)
    }

    /// Rewrite the output URL of every identifier found on the remote store
    #[instrument(skip(self, processed), fields(count = processed.len()))]
    pub async fn resync_from_remote(&self, processed: &HashSet<String>) -> Result<usize> {
        let mut ids: Vec<String> = processed.iter().cloned().collect();
        ids.sort();
        self.players.set_output_urls(&ids, &self.suffix).await?;
        Ok(ids.len())
    }

    /// Pending records in rank order, minus those already on the remote store
    #[instrument(skip(self, processed))]
    pub async fn load_pending(&self, processed: &HashSet<String>) -> Result<Vec<PlayerRecord>> {
        let records = self.players.pending_players().await?;
        let before = records.len();
        let pending: Vec<PlayerRecord> = records
            .into_iter()
            .filter(|record| !processed.contains(&record.id))
            .collect();
        info!(
            pending = pending.len(),
            already_remote = before - pending.len(),
            "Pending players loaded"
        );
        Ok(pending)
    }

    /// Fetch, restore, cut out and upload one record
    #[instrument(skip(self, record), fields(player = %record.id))]
    pub async fn process_item(&mut self, record: &PlayerRecord) -> Result<ItemOutcome> {
        let bytes = match self.source.fetch(&record.source_url).await? {
            FetchOutcome::Fetched(bytes) => bytes,
            FetchOutcome::Gone { status } => {
                warn!(status, url = %record.source_url, "Source image is gone, clearing it");
                self.players.clear_source_url(&record.id).await?;
                return Ok(ItemOutcome::SourceGone { status });
            },
        };

        let raw = ImageCodec::decode_rgb(&bytes).map_err(|e| {
            error!(error = %e, "Source image could not be decoded");
            PipelineError::processing(format!("Failed to decode image of '{}': {}", record.id, e))
        })?;

        let restored = self.restorer.restore(&raw)?;

        let cutout = match self.remover.remove_background(&restored)? {
            RemovalOutcome::Removed(cutout) => cutout,
            RemovalOutcome::Skipped(reason) => {
                warn!(%reason, "Skipping item");
                return Ok(ItemOutcome::Skipped { reason });
            },
        };

        let png = ImageCodec::encode_png_with_alpha(&DynamicImage::ImageRgba8(cutout))?;
        let path = remote_path(&self.remote_dir, &record.output_name(&self.suffix));
        if let Err(e) = self.remote.upload(png, &path).await {
            warn!(error = %e, path = %path, "Upload failed, skipping item");
            return Ok(ItemOutcome::Skipped {
                reason: SkipReason::Upload(e.to_string()),
            });
        }

        debug!(path = %path, "Uploaded");
        Ok(ItemOutcome::Processed)
    }

    /// Set the output URL of every record processed in this run
    #[instrument(skip(self, processed), fields(count = processed.len()))]
    pub async fn commit_batch_results(&self, processed: &[String]) -> Result<()> {
        self.players.set_output_urls(processed, &self.suffix).await?;
        Ok(())
    }
}

/// Builder for `Pipeline`
#[derive(Default)]
pub struct PipelineBuilder {
    players: Option<Box<dyn PlayerStore>>,
    remote: Option<Box<dyn RemoteStore>>,
    source: Option<Box<dyn ImageSource>>,
    restorer: Option<Box<dyn ImageRestorer>>,
    remover: Option<Box<dyn BackgroundRemoval>>,
    remote_dir: Option<String>,
    suffix: Option<String>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn player_store(mut self, store: Box<dyn PlayerStore>) -> Self {
        self.players = Some(store);
        self
    }

    #[must_use]
    pub fn remote_store(mut self, store: Box<dyn RemoteStore>) -> Self {
        self.remote = Some(store);
        self
    }

    #[must_use]
    pub fn image_source(mut self, source: Box<dyn ImageSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn restorer(mut self, restorer: Box<dyn ImageRestorer>) -> Self {
        self.restorer = Some(restorer);
        self
    }

    #[must_use]
    pub fn remover(mut self, remover: Box<dyn BackgroundRemoval>) -> Self {
        self.remover = Some(remover);
        self
    }

    #[must_use]
    pub fn remote_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.remote_dir = Some(dir.into());
        self
    }

    /// Output suffix, `_nobg.png` unless set
    #[must_use]
    pub fn suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// # Errors
    /// - A collaborator or the remote directory is missing
    pub fn build(self) -> Result<Pipeline> {
        let missing = |name: &str| PipelineError::invalid_config(format!("Pipeline {} is required", name));
        Ok(Pipeline {
            players: self.players.ok_or_else(|| missing("player store"))?,
            remote: self.remote.ok_or_else(|| missing("remote store"))?,
            source: self.source.ok_or_else(|| missing("image source"))?,
            restorer: self.restorer.ok_or_else(|| missing("restorer"))?,
            remover: self.remover.ok_or_else(|| missing("background remover"))?,
            remote_dir: self.remote_dir.ok_or_else(|| missing("remote directory"))?,
            suffix: self
                .suffix
                .unwrap_or_else(|| crate::config::OUTPUT_SUFFIX.to_string()),
        })
    }
}

#[cfg(feature = "onnx")]
impl Pipeline {
    /// Load the ONNX models and connect to the datastore and the remote
    /// store described by `config`
    ///
    /// # Errors
    /// - Model download or loading failures
    /// - Datastore or remote store connection failures
    #[instrument(skip(config))]
    pub async fn connect(config: &crate::config::PipelineConfig) -> Result<Self> {
        use crate::{
            backends::onnx::{
                GfpganEnhancer, ModelLoader, RealEsrganUpsampler, RetinaFaceDetector,
                U2NetSegmenter,
            },
            removal::BackgroundRemover,
            restoration::FaceRestorer,
            store::{HttpImageSource, MySqlPlayerStore, SftpStore},
        };
        use std::time::Duration;

        config.validate()?;

        let loader = ModelLoader::new(&config.models)?;
        let restorer = FaceRestorer::new(
            Box::new(RetinaFaceDetector::new(loader.session(&config.models.detector).await?)),
            Box::new(GfpganEnhancer::new(
                loader.session(&config.models.restoration).await?,
                config.restoration.face_size,
            )),
            Box::new(RealEsrganUpsampler::new(
                loader.session(&config.models.upsampler).await?,
            )),
            config.restoration,
        )?;
        let remover = BackgroundRemover::new(
            Box::new(U2NetSegmenter::new(
                loader.session(&config.models.segmentation).await?,
            )),
            config.removal,
        )?;

        let source = HttpImageSource::new(Duration::from_secs(config.http_timeout_secs))?;
        let players = MySqlPlayerStore::connect(&config.database).await?;
        let remote = match SftpStore::connect(&config.sftp).await {
            Ok(remote) => remote,
            Err(e) => {
                players.close().await?;
                return Err(e);
            },
        };

        Self::builder()
            .player_store(Box::new(players))
            .remote_store(Box::new(remote))
            .image_source(Box::new(source))
            .restorer(Box::new(restorer))
            .remover(Box::new(remover))
            .remote_dir(config.sftp.remote_dir.clone())
            .suffix(config.output_suffix.clone())
            .build()
    }
}
