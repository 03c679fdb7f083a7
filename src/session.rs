//! Upload session: the pipeline from an uploaded file to a stored overlay.
//!
//! decode → anchor check → quantize → chunk → overlay → save.  Nothing is
//! mutated, in memory or in the store, until every step has succeeded.

use image::RgbaImage;
use thiserror::Error;

use crate::config::DEFAULT_OPACITY;
use crate::io::{self, ImageIoError};
use crate::ops::{self, ChunkError, ChunkMap};
use crate::palette::{SelectedColorSet, Tier};
use crate::project::{Overlay, ProjectError, ProjectRecord, clamp_opacity};
use crate::store::{self, Store, StoreError};
use crate::tiles::GlobalCoordinate;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Recoverable: the user has to pick a position first.
    #[error("no anchor coordinate is set; capture a position on the canvas (or set one manually) before uploading")]
    MissingAnchor,
    #[error("image error: {0}")]
    Image(#[from] ImageIoError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Project(#[from] ProjectError),
}

impl From<ChunkError> for SessionError {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::MissingAnchor => SessionError::MissingAnchor,
        }
    }
}

pub struct UploadSession<S> {
    store: S,
    project: ProjectRecord,
    original: Option<RgbaImage>,
    processed: Option<RgbaImage>,
    default_opacity: f32,
}

impl<S: Store> UploadSession<S> {
    /// Bind to project `project_id`, restoring its selection and images.
    /// An unknown id starts a new, unsaved project.
    pub fn open(store: S, project_id: &str) -> Result<Self, SessionError> {
        let key = ProjectRecord::store_key(project_id);
        let project = match store::load_typed::<ProjectRecord>(&store, &key)? {
            Some(project) => {
                log_info!("Opened project {} ({})", project.id, project.name);
                project
            }
            None => {
                log_info!("Starting new project {}", project_id);
                ProjectRecord::new(project_id)
            }
        };

        let original = project.original_image.as_deref().and_then(restore_image);
        let processed = original
            .as_ref()
            .map(|img| ops::quantize(img, &project.selection));

        Ok(Self {
            store,
            project,
            original,
            processed,
            default_opacity: DEFAULT_OPACITY,
        })
    }

    pub fn with_default_opacity(mut self, opacity: f32) -> Self {
        self.default_opacity = clamp_opacity(Some(opacity));
        self
    }

    pub fn project(&self) -> &ProjectRecord {
        &self.project
    }

    pub fn selection(&self) -> &SelectedColorSet {
        &self.project.selection
    }

    pub fn original(&self) -> Option<&RgbaImage> {
        self.original.as_ref()
    }

    pub fn processed(&self) -> Option<&RgbaImage> {
        self.processed.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the whole pipeline for one uploaded file.
    ///
    /// Without an anchor this fails with [`SessionError::MissingAnchor`] and
    /// leaves the session and the store exactly as they were.
    pub fn upload(
        &mut self,
        name: &str,
        bytes: &[u8],
        anchor: Option<GlobalCoordinate>,
    ) -> Result<ChunkMap, SessionError> {
        let original = io::decode_image(bytes)?;
        let Some(anchor) = anchor else {
            log_warn!("Upload of {} refused: no anchor coordinate", name);
            return Err(SessionError::MissingAnchor);
        };

        let processed = ops::quantize(&original, &self.project.selection);
        let chunks = ops::chunk(&processed, Some(anchor))?;
        let tiles = chunks.encode()?;
        let original_url = io::to_png_data_url(&original)?;

        let mut project = self.project.clone();
        project.original_image = Some(original_url.clone());
        project.processed_image = Some(io::to_png_data_url(&processed)?);
        project.center_point = Some(anchor);
        project.replace_overlay(Overlay::new(name, original_url, anchor, tiles, self.default_opacity));
        store::save_typed(&self.store, &project.key(), &project)?;

        log_info!(
            "Uploaded {} ({}x{}) at {} into {} tile(s)",
            name,
            original.width(),
            original.height(),
            anchor,
            chunks.len()
        );
        self.project = project;
        self.original = Some(original);
        self.processed = Some(processed);
        Ok(chunks)
    }

    pub fn set_selection(&mut self, selection: SelectedColorSet) -> Result<(), SessionError> {
        let mut project = self.project.clone();
        project.selection = selection;
        self.commit_selection(project)
    }

    /// Returns whether `key` is selected afterwards.
    pub fn toggle_color(&mut self, tier: Tier, key: &str) -> Result<bool, SessionError> {
        let mut project = self.project.clone();
        let selected = project.selection.toggle(tier, key);
        self.commit_selection(project)?;
        Ok(selected)
    }

    pub fn toggle_all(&mut self, tier: Tier) -> Result<(), SessionError> {
        let mut project = self.project.clone();
        project.selection.toggle_all(tier);
        self.commit_selection(project)
    }

    pub fn set_center_point(&mut self, anchor: GlobalCoordinate) -> Result<(), SessionError> {
        let mut project = self.project.clone();
        project.center_point = Some(anchor);
        project.touch();
        store::save_typed(&self.store, &project.key(), &project)?;
        self.project = project;
        Ok(())
    }

    // Re-quantize the preview for the new selection.  The stored overlay
    // keeps the chunks it was uploaded with.
    fn commit_selection(&mut self, mut project: ProjectRecord) -> Result<(), SessionError> {
        let processed = self
            .original
            .as_ref()
            .map(|img| ops::quantize(img, &project.selection));
        project.processed_image = processed.as_ref().map(io::to_png_data_url).transpose()?;
        project.touch();
        store::save_typed(&self.store, &project.key(), &project)?;

        let (free, free_total) = project.selection.count(Tier::Free);
        let (paid, paid_total) = project.selection.count(Tier::Paid);
        log_info!(
            "Selection for {}: {}/{} free, {}/{} paid",
            project.id,
            free,
            free_total,
            paid,
            paid_total
        );
        self.project = project;
        self.processed = processed;
        Ok(())
    }

    /// Replace this project with a shared export, keeping the current id.
    pub fn import(&mut self, text: &str) -> Result<(), SessionError> {
        let project = ProjectRecord::import_json_replacing(text, &self.project.id)?;
        store::save_typed(&self.store, &project.key(), &project)?;
        self.original = project.original_image.as_deref().and_then(restore_image);
        self.processed = self
            .original
            .as_ref()
            .map(|img| ops::quantize(img, &project.selection));
        self.project = project;
        Ok(())
    }
}

fn restore_image(url: &str) -> Option<RgbaImage> {
    match io::decode_data_url(url) {
        Ok(img) => Some(img),
        Err(e) => {
            log_warn!("Ignoring unreadable stored image: {}", e);
            None
        }
    }
}
