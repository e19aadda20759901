//! In-memory collaborators and model doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use profile_restore::{
    BackgroundRemover, BackgroundUpsampler, FaceDetection, FaceDetector, FaceEnhancer,
    FaceRestorer, FetchOutcome, ImageSource, Pipeline, PipelineError, PlayerRecord, PlayerStore,
    RemoteStore, RemovalSettings, RestorationSettings, Result, Segmenter,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const REMOTE_DIR: &str = "/srv/players";

/// One row of the players table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRow {
    pub id: String,
    pub source_url: Option<String>,
    pub output_url: Option<String>,
}

impl PlayerRow {
    pub fn pending(id: &str, source_url: &str) -> Self {
        Self {
            id: id.to_string(),
            source_url: Some(source_url.to_string()),
            output_url: None,
        }
    }
}

/// Player datastore over a vector of rows kept in rank order
#[derive(Clone, Default)]
pub struct MemoryPlayerStore {
    pub rows: Arc<Mutex<Vec<PlayerRow>>>,
    /// Identifier lists passed to `set_output_urls`, in call order
    pub output_calls: Arc<Mutex<Vec<Vec<String>>>>,
    pub closes: Arc<AtomicUsize>,
}

impl MemoryPlayerStore {
    pub fn with_rows(rows: Vec<PlayerRow>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            ..Self::default()
        }
    }

    pub fn row(&self, id: &str) -> PlayerRow {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .unwrap()
    }

    pub fn output_calls(&self) -> Vec<Vec<String>> {
        self.output_calls.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerStore for MemoryPlayerStore {
    async fn pending_players(&self) -> Result<Vec<PlayerRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.output_url.is_none())
            .filter_map(|row| {
                row.source_url
                    .as_ref()
                    .map(|url| PlayerRecord::new(row.id.clone(), url.clone()))
            })
            .collect())
    }

    async fn set_output_urls(&self, ids: &[String], suffix: &str) -> Result<u64> {
        self.output_calls.lock().unwrap().push(ids.to_vec());
        let mut updated = 0;
        for row in self.rows.lock().unwrap().iter_mut() {
            if ids.contains(&row.id) {
                row.output_url = Some(format!("{}{}", row.id, suffix));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn clear_source_url(&self, id: &str) -> Result<()> {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.id == id {
                row.source_url = None;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Remote store holding files in a map keyed by full path
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    pub files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    /// Paths whose upload fails
    pub rejected: Arc<Mutex<HashSet<String>>>,
    pub disconnects: Arc<AtomicUsize>,
}

impl MemoryRemoteStore {
    pub fn with_files(names: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut files = store.files.lock().unwrap();
            for name in names {
                files.insert(format!("{}/{}", REMOTE_DIR, name), b"existing".to_vec());
            }
        }
        store
    }

    pub fn reject(&self, path: &str) {
        self.rejected.lock().unwrap().insert(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn upload(&self, bytes: Vec<u8>, path: &str) -> Result<()> {
        if self.rejected.lock().unwrap().contains(path) {
            return Err(PipelineError::transport(format!("permission denied: {}", path)));
        }
        self.files.lock().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What the fake HTTP source answers for a URL
#[derive(Clone)]
pub enum Response {
    Ok(Vec<u8>),
    Status(u16),
    TransportError,
}

/// Image source answering from a fixed table; unknown URLs are 404
#[derive(Clone, Default)]
pub struct MapImageSource {
    pub responses: Arc<Mutex<HashMap<String, Response>>>,
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl MapImageSource {
    pub fn respond(&self, url: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageSource for MapImageSource {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        self.fetched.lock().unwrap().push(url.to_string());
        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(Response::Ok(bytes)) => Ok(FetchOutcome::Fetched(bytes)),
            Some(Response::Status(status)) => Ok(FetchOutcome::Gone { status }),
            Some(Response::TransportError) => {
                Err(PipelineError::network_error(format!("GET {}", url), "connection reset"))
            },
            None => Ok(FetchOutcome::Gone { status: 404 }),
        }
    }
}

/// Detector returning the same faces for every image
pub struct FixedDetector(pub Vec<FaceDetection>);

impl FaceDetector for FixedDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<FaceDetection>> {
        Ok(self.0.clone())
    }
}

/// Enhancer returning the crop unchanged, counting its calls
#[derive(Clone, Default)]
pub struct IdentityEnhancer {
    pub calls: Arc<AtomicUsize>,
}

impl FaceEnhancer for IdentityEnhancer {
    fn enhance(&mut self, face: &RgbImage) -> Result<RgbImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(face.clone())
    }
}

/// Enhancer painting the whole crop one colour
pub struct PaintEnhancer(pub Rgb<u8>);

impl FaceEnhancer for PaintEnhancer {
    fn enhance(&mut self, face: &RgbImage) -> Result<RgbImage> {
        Ok(RgbImage::from_pixel(face.width(), face.height(), self.0))
    }
}

pub struct FailingEnhancer;

impl FaceEnhancer for FailingEnhancer {
    fn enhance(&mut self, _face: &RgbImage) -> Result<RgbImage> {
        Err(PipelineError::inference("CUDA out of memory"))
    }
}

/// x4 nearest-neighbour upsampler
pub struct NearestUpsampler;

impl BackgroundUpsampler for NearestUpsampler {
    fn scale(&self) -> u32 {
        4
    }

    fn upsample(&mut self, image: &RgbImage) -> Result<RgbImage> {
        Ok(image::imageops::resize(
            image,
            image.width() * 4,
            image.height() * 4,
            FilterType::Nearest,
        ))
    }
}

/// Segmenter marking the left half of the image as foreground
pub struct LeftHalfSegmenter;

impl Segmenter for LeftHalfSegmenter {
    fn segment(&mut self, image: &RgbImage) -> Result<GrayImage> {
        let half = image.width() / 2;
        Ok(GrayImage::from_fn(image.width(), image.height(), |x, _| {
            Luma([if x < half { 255 } else { 0 }])
        }))
    }
}

/// Segmenter failing with an I/O-class error
pub struct BrokenPipeSegmenter;

impl Segmenter for BrokenPipeSegmenter {
    fn segment(&mut self, _image: &RgbImage) -> Result<GrayImage> {
        Err(PipelineError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "model server went away",
        )))
    }
}

/// Face with eyes `eye_gap` apart, centred at `(cx, cy)`
pub fn face_at(cx: f32, cy: f32, eye_gap: f32) -> FaceDetection {
    let half = eye_gap / 2.0;
    FaceDetection {
        bbox: [cx - eye_gap, cy - eye_gap, cx + eye_gap, cy + eye_gap],
        score: 0.99,
        landmarks: [
            [cx - half, cy - half / 2.0],
            [cx + half, cy - half / 2.0],
            [cx, cy],
            [cx - half * 0.8, cy + half],
            [cx + half * 0.8, cy + half],
        ],
    }
}

pub fn restorer(
    faces: Vec<FaceDetection>,
    enhancer: Box<dyn FaceEnhancer>,
    settings: RestorationSettings,
) -> FaceRestorer {
    FaceRestorer::new(
        Box::new(FixedDetector(faces)),
        enhancer,
        Box::new(NearestUpsampler),
        settings,
    )
    .unwrap()
}

pub fn remover(segmenter: Box<dyn Segmenter>) -> BackgroundRemover {
    let settings = RemovalSettings {
        alpha_matting: false,
        ..RemovalSettings::default()
    };
    BackgroundRemover::new(segmenter, settings).unwrap()
}

/// A uniformly coloured photo encoded as PNG
pub fn photo_bytes(width: u32, height: u32, colour: Rgb<u8>) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, colour));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Collaborators of one pipeline, kept for inspection after the run
pub struct Harness {
    pub players: MemoryPlayerStore,
    pub remote: MemoryRemoteStore,
    pub source: MapImageSource,
}

impl Harness {
    pub fn new(rows: Vec<PlayerRow>, remote_files: &[&str]) -> Self {
        Self {
            players: MemoryPlayerStore::with_rows(rows),
            remote: MemoryRemoteStore::with_files(remote_files),
            source: MapImageSource::default(),
        }
    }

    pub fn pipeline_with(&self, segmenter: Box<dyn Segmenter>) -> Pipeline {
        Pipeline::builder()
            .player_store(Box::new(self.players.clone()))
            .remote_store(Box::new(self.remote.clone()))
            .image_source(Box::new(self.source.clone()))
            .restorer(Box::new(restorer(
                Vec::new(),
                Box::new(IdentityEnhancer::default()),
                RestorationSettings::default(),
            )))
            .remover(Box::new(remover(segmenter)))
            .remote_dir(REMOTE_DIR)
            .build()
            .unwrap()
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with(Box::new(LeftHalfSegmenter))
    }
}
