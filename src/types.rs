//! Data types passed between the pipeline stages

use image::RgbaImage;
use std::fmt;

/// One pending row of the player datastore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Unique player identifier
    pub id: String,
    /// URL of the raw profile photo
    pub source_url: String,
}

impl PlayerRecord {
    #[must_use]
    pub fn new<S: Into<String>>(id: S, source_url: S) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
        }
    }

    /// File name of the processed image for this player
    #[must_use]
    pub fn output_name(&self, suffix: &str) -> String {
        format!("{}{}", self.id, suffix)
    }
}

/// A detected face with its five facial landmarks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceDetection {
    /// Bounding box as `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    /// Detection confidence
    pub score: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner
    pub landmarks: [[f32; 2]; 5],
}

impl FaceDetection {
    /// Euclidean distance between the two eye landmarks
    #[must_use]
    pub fn eye_distance(&self) -> f32 {
        let [lx, ly] = self.landmarks[0];
        let [rx, ry] = self.landmarks[1];
        ((lx - rx).powi(2) + (ly - ry).powi(2)).sqrt()
    }

    /// Centre of the bounding box
    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

/// Why an item was left unprocessed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Background removal hit an I/O-class failure
    BackgroundRemoval(String),
    /// The remote store rejected the upload
    Upload(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackgroundRemoval(msg) => write!(f, "background removal failed: {}", msg),
            Self::Upload(msg) => write!(f, "upload failed: {}", msg),
        }
    }
}

/// Result of the background removal stage
#[derive(Debug, Clone)]
pub enum RemovalOutcome {
    Removed(RgbaImage),
    Skipped(SkipReason),
}

/// Terminal state of one pending record after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Uploaded, committed at the end of the batch
    Processed,
    /// Source answered with a non-success status; its URL was cleared
    SourceGone { status: u16 },
    /// Left pending for the next run
    Skipped { reason: SkipReason },
}

/// What one run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Identifiers whose output URL was reset from the remote listing
    pub resynced: usize,
    pub processed: Vec<String>,
    pub gone: Vec<String>,
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub(crate) fn record(&mut self, id: &str, outcome: &ItemOutcome) {
        let id = id.to_string();
        match outcome {
            ItemOutcome::Processed => self.processed.push(id),
            ItemOutcome::SourceGone { .. } => self.gone.push(id),
            ItemOutcome::Skipped { .. } => self.skipped.push(id),
        }
    }

    /// Number of records visited in the processing phase
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.processed.len() + self.gone.len() + self.skipped.len()
    }
}
