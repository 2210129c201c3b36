//! Scene imagery: deciding when to regenerate, building the image request,
//! and preloading the result before it is shown.

use crate::state::SceneData;
use crate::step::StoryStep;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Url;
use thiserror::Error;

const IMAGE_ENDPOINT: &str = "https://image.pollinations.ai/prompt";
const IMAGE_MODEL: &str = "flux";
const IMAGE_WIDTH: u32 = 1280;
const IMAGE_HEIGHT: u32 = 720;
const SEED_RANGE: u32 = 1_000_000;

const STYLE_PREFIX: &str = "Summertime Saga style, western visual novel art, 2d cartoon, high quality, american cartoon style, vibrant colors, clean lines, detailed background";
const BACKGROUND_SUFFIX: &str = "no characters, scenery only, wide shot, empty room";
const SCENE_SUFFIX: &str =
    "with characters in the scene, character focus, interaction, detailed character design";

/// Errors from image URL building and preloading.
#[derive(Debug, Error)]
pub enum VisualError {
    #[error("Invalid image endpoint: {0}")]
    InvalidUrl(String),

    #[error("Image download failed: {0}")]
    Network(String),

    #[error("Image server returned status {0}")]
    Status(u16),
}

/// Whether the scene image needs regenerating after `step`.
///
/// True when the location changes, the speaker changes (including someone
/// appearing or leaving), or the narrator describes the speaker.
pub fn needs_refresh(previous: &SceneData, step: &StoryStep) -> bool {
    let location_changed = step.location != previous.location;
    let speaker_changed = step.speaker != previous.speaker;
    location_changed || speaker_changed || speaker_visual(step).is_some()
}

fn speaker_visual(step: &StoryStep) -> Option<&str> {
    step.speaker_visual
        .as_deref()
        .filter(|visual| !visual.is_empty())
}

/// What the image shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Scenery only, characters excluded.
    Background,
    /// Scenery with the speaker in it.
    Scene,
}

/// A request for a new scene image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub kind: ImageKind,
}

impl ImageRequest {
    pub fn new(background: &str, speaker_visual: Option<&str>) -> Self {
        match speaker_visual.filter(|v| !v.is_empty()) {
            Some(visual) => Self {
                prompt: format!("{background}. A character is present in the scene: {visual}"),
                kind: ImageKind::Scene,
            },
            None => Self {
                prompt: background.to_string(),
                kind: ImageKind::Background,
            },
        }
    }

    /// The image to request after `step`.
    pub fn for_step(step: &StoryStep) -> Self {
        Self::new(&step.visual_description, speaker_visual(step))
    }

    /// The full prompt including the fixed style keywords.
    pub fn styled_prompt(&self) -> String {
        let suffix = match self.kind {
            ImageKind::Background => BACKGROUND_SUFFIX,
            ImageKind::Scene => SCENE_SUFFIX,
        };
        format!("{STYLE_PREFIX}, {}, {suffix}", self.prompt)
    }
}

/// Builds directly fetchable image URLs. The image service renders on
/// first fetch, so there is nothing to poll.
#[derive(Debug, Clone)]
pub struct ImageUrlBuilder {
    endpoint: String,
    model: String,
    width: u32,
    height: u32,
}

impl Default for ImageUrlBuilder {
    fn default() -> Self {
        Self {
            endpoint: IMAGE_ENDPOINT.to_string(),
            model: IMAGE_MODEL.to_string(),
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
        }
    }
}

impl ImageUrlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// URL for `request` with an explicit seed.
    pub fn url(&self, request: &ImageRequest, seed: u32) -> Result<String, VisualError> {
        let mut url =
            Url::parse(&self.endpoint).map_err(|e| VisualError::InvalidUrl(e.to_string()))?;

        url.path_segments_mut()
            .map_err(|_| VisualError::InvalidUrl(self.endpoint.clone()))?
            .pop_if_empty()
            .push(&request.styled_prompt());

        url.query_pairs_mut()
            .append_pair("width", &self.width.to_string())
            .append_pair("height", &self.height.to_string())
            .append_pair("seed", &seed.to_string())
            .append_pair("nologo", "true")
            .append_pair("model", &self.model);

        Ok(url.into())
    }

    /// URL for `request` with a random seed.
    pub fn random_url(&self, request: &ImageRequest) -> Result<String, VisualError> {
        let seed = rand::thread_rng().gen_range(0..SEED_RANGE);
        self.url(request, seed)
    }
}

/// Fetches an image completely before it is committed to the screen.
#[async_trait]
pub trait ImagePreloader: Send + Sync {
    async fn preload(&self, url: &str) -> Result<(), VisualError>;
}

/// Preloads images over HTTP.
#[derive(Clone)]
pub struct HttpPreloader {
    client: reqwest::Client,
}

impl HttpPreloader {
    pub fn new() -> Self {
        // Image generation can take a while on first fetch.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpPreloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImagePreloader for HttpPreloader {
    async fn preload(&self, url: &str) -> Result<(), VisualError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VisualError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VisualError::Status(response.status().as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VisualError::Network(e.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "preloaded scene image");
        Ok(())
    }
}
