use crate::core::error::Result;
use crate::core::state::{GenerationSettings, ImageSize, Scene};
use crate::services::credential::CredentialGate;
use crate::services::prompt::image_prompt;
use crate::services::provider::ProviderClient;
use crate::utils::lock;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};

pub const ANALYSIS_FAILED_NOTICE: &str = "Failed to analyze script. Please try again.";
pub const GENERATION_FAILED_MESSAGE: &str = "Generation failed. Try again.";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateAllReport {
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct StoryboardState {
    scenes: Vec<Scene>,
    is_analyzing: bool,
    is_generating_any: bool,
    notice: Option<String>,
    settings: GenerationSettings,
}

fn analyzing_flag(state: &mut StoryboardState) -> &mut bool {
    &mut state.is_analyzing
}

fn generating_any_flag(state: &mut StoryboardState) -> &mut bool {
    &mut state.is_generating_any
}

/// Clears a busy flag when dropped, whatever path the operation took.
struct FlagReset<'a> {
    state: &'a Mutex<StoryboardState>,
    flag: fn(&mut StoryboardState) -> &mut bool,
}

impl<'a> FlagReset<'a> {
    /// Raises the flag and runs `prepare` under the same lock. `None` when the
    /// flag is already up.
    fn try_raise(
        state: &'a Mutex<StoryboardState>,
        flag: fn(&mut StoryboardState) -> &mut bool,
        prepare: impl FnOnce(&mut StoryboardState),
    ) -> Option<Self> {
        let mut guard = lock(state);
        let raised = flag(&mut *guard);
        if *raised {
            return None;
        }
        *raised = true;
        prepare(&mut *guard);
        Some(Self { state, flag })
    }
}

impl Drop for FlagReset<'_> {
    fn drop(&mut self) {
        *(self.flag)(&mut lock(self.state)) = false;
    }
}

/// Owns the scene list. Every mutation happens under one lock acquisition that
/// is released before any provider call.
pub struct StoryboardManager {
    provider: Arc<dyn ProviderClient>,
    gate: Arc<CredentialGate>,
    state: Mutex<StoryboardState>,
}

impl StoryboardManager {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        gate: Arc<CredentialGate>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            gate,
            state: Mutex::new(StoryboardState {
                settings,
                ..Default::default()
            }),
        }
    }

    pub fn scenes(&self) -> Vec<Scene> {
        lock(&self.state).scenes.clone()
    }

    pub fn scene(&self, scene_id: &str) -> Option<Scene> {
        lock(&self.state)
            .scenes
            .iter()
            .find(|s| s.id() == scene_id)
            .cloned()
    }

    pub fn is_analyzing(&self) -> bool {
        lock(&self.state).is_analyzing
    }

    pub fn is_generating_any(&self) -> bool {
        lock(&self.state).is_generating_any
    }

    /// User-facing message left by the last failed analysis.
    pub fn notice(&self) -> Option<String> {
        lock(&self.state).notice.clone()
    }

    pub fn dismiss_notice(&self) {
        lock(&self.state).notice = None;
    }

    pub fn image_size(&self) -> ImageSize {
        lock(&self.state).settings.image_size
    }

    /// Applies to requests started from now on.
    pub fn set_image_size(&self, size: ImageSize) {
        lock(&self.state).settings.image_size = size;
    }

    /// True while any image request is outstanding; the size selector is
    /// disabled meanwhile.
    pub fn settings_locked(&self) -> bool {
        let state = lock(&self.state);
        state.is_generating_any || state.scenes.iter().any(|s| s.is_generating())
    }

    /// Replaces the storyboard with a fresh analysis of `script`.
    ///
    /// Blank scripts are ignored. Analysis failures leave an empty list and a
    /// notice; only a missing credential is returned as an error.
    pub async fn run_analysis(&self, script: &str) -> Result<()> {
        if script.trim().is_empty() {
            return Ok(());
        }
        self.gate.ensure_ready()?;

        let Some(_analyzing) = FlagReset::try_raise(&self.state, analyzing_flag, |state| {
            state.scenes.clear();
            state.notice = None;
        }) else {
            debug!("Analysis already running, ignoring request");
            return Ok(());
        };

        info!("Analyzing script ({} chars)...", script.chars().count());
        let result = self.provider.analyze_script(script).await;

        let mut state = lock(&self.state);
        match result {
            Ok(drafts) => {
                state.scenes = drafts
                    .into_iter()
                    .enumerate()
                    .map(|(i, draft)| Scene::from_draft(draft, i + 1))
                    .collect();
                info!("Analysis produced {} scenes", state.scenes.len());
            }
            Err(e) => {
                error!("Analysis failed: {}", e);
                state.scenes.clear();
                state.notice = Some(ANALYSIS_FAILED_NOTICE.to_string());
                if e.is_credential() {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Generates (or regenerates) the image of one scene. Unknown ids and
    /// scenes already generating are left alone.
    pub async fn generate_one(&self, scene_id: &str) -> Result<()> {
        self.generate_scene(scene_id).await.map(|_| ())
    }

    pub async fn generate_all(&self) -> Result<GenerateAllReport> {
        self.generate_all_with(|_| {}).await
    }

    /// Walks the scenes in order and generates every one still lacking an
    /// image, one request at a time. `on_scene` sees each scene after its
    /// request resolves.
    pub async fn generate_all_with(
        &self,
        mut on_scene: impl FnMut(&Scene) + Send,
    ) -> Result<GenerateAllReport> {
        self.gate.ensure_ready()?;
        let Some(_busy) = FlagReset::try_raise(&self.state, generating_any_flag, |_| {}) else {
            debug!("Generation already running, ignoring request");
            return Ok(GenerateAllReport::default());
        };

        let ids: Vec<String> = lock(&self.state)
            .scenes
            .iter()
            .map(|s| s.id().to_string())
            .collect();

        let mut report = GenerateAllReport::default();
        for id in ids {
            let lacks_image = lock(&self.state)
                .scenes
                .iter()
                .find(|s| s.id() == id)
                .map(|s| s.image_url().is_none());

            match lacks_image {
                None => continue,
                Some(false) => {
                    report.skipped += 1;
                    continue;
                }
                Some(true) => {}
            }

            match self.generate_scene(&id).await? {
                Some(true) => report.generated += 1,
                Some(false) => report.failed += 1,
                None => report.skipped += 1,
            }

            if let Some(scene) = self.scene(&id) {
                on_scene(&scene);
            }
        }

        info!(
            "Generation finished: {} generated, {} failed, {} skipped",
            report.generated, report.failed, report.skipped
        );
        Ok(report)
    }

    /// `None` when nothing was requested, otherwise whether the image arrived.
    async fn generate_scene(&self, scene_id: &str) -> Result<Option<bool>> {
        self.gate.ensure_ready()?;

        let (prompt, size) = {
            let mut state = lock(&self.state);
            let size = state.settings.image_size;
            let Some(scene) = state.scenes.iter_mut().find(|s| s.id() == scene_id) else {
                debug!("No scene with id {}", scene_id);
                return Ok(None);
            };
            if scene.is_generating() {
                debug!("Scene {} is already generating", scene.scene_number());
                return Ok(None);
            }
            scene.begin_generation();
            (image_prompt(scene.visual_description(), scene.shot_type()), size)
        };

        let result = self.provider.generate_image(&prompt, size).await;

        let mut state = lock(&self.state);
        let Some(scene) = state.scenes.iter_mut().find(|s| s.id() == scene_id) else {
            warn!("Scene {} was replaced before its image arrived", scene_id);
            return Ok(None);
        };
        match result {
            Ok(image_url) => {
                scene.complete_generation(image_url);
                Ok(Some(true))
            }
            Err(e) => {
                error!(
                    "Failed to generate image for scene {}: {}",
                    scene.scene_number(),
                    e
                );
                scene.fail_generation(GENERATION_FAILED_MESSAGE);
                if e.is_credential() {
                    return Err(e);
                }
                Ok(Some(false))
            }
        }
    }
}
