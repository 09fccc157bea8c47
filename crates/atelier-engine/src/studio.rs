//! Interactive session state and the generation flow that drives it.
//!
//! `Studio` owns the per-process [`AppState`] plus handles on the persisted
//! client state (key, usage, history) and wires them through the
//! [`GenerationGateway`].

use anyhow::Result;
use atelier_contracts::credentials::KeyStore;
use atelier_contracts::events::{EventLog, SessionEvent};
use atelier_contracts::history::{GeneratedImage, HistoryStore};
use atelier_contracts::store::KvStore;
use atelier_contracts::usage::{UsageCounter, DAILY_LIMIT};
use atelier_contracts::wire::AspectRatio;
use chrono::Utc;
use tracing::warn;

use crate::composer::{clamp_count, GenerationRequest, ReferenceImages, MIN_IMAGE_COUNT};
use crate::error::GenerationError;
use crate::gateway::{GenerationGateway, GenerationMode};
use crate::prompt::{ScenePreset, DEFAULT_PROMPT};

pub const MAX_SESSION_RESULTS: usize = 12;

/// UI-lifetime state. Nothing here is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    images: ReferenceImages,
    prompt: String,
    aspect_ratio: AspectRatio,
    image_count: u32,
    results: Vec<GeneratedImage>,
    generating: bool,
    error: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            images: ReferenceImages::default(),
            prompt: DEFAULT_PROMPT.to_string(),
            aspect_ratio: AspectRatio::default(),
            image_count: MIN_IMAGE_COUNT,
            results: Vec::new(),
            generating: false,
            error: None,
        }
    }
}

impl AppState {
    pub fn images(&self) -> &ReferenceImages {
        &self.images
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Current-session results, newest first.
    pub fn results(&self) -> &[GeneratedImage] {
        &self.results
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_character(&mut self, image: Option<String>) {
        self.images.character = image;
    }

    pub fn set_outfit(&mut self, image: Option<String>) {
        self.images.outfit = image;
    }

    pub fn set_context(&mut self, image: Option<String>) {
        self.images.context = image;
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn apply_preset(&mut self, preset: ScenePreset) {
        self.prompt = preset.prompt().to_string();
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) {
        self.aspect_ratio = aspect_ratio;
    }

    pub fn set_image_count(&mut self, count: u32) {
        self.image_count = clamp_count(count);
    }

    fn prepend_results(&mut self, fresh: Vec<GeneratedImage>) {
        let mut merged = fresh;
        merged.append(&mut self.results);
        merged.truncate(MAX_SESSION_RESULTS);
        self.results = merged;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOutcome {
    pub mode: GenerationMode,
    pub images: Vec<GeneratedImage>,
    /// Near-limit reminder, proxy mode only.
    pub notice: Option<String>,
}

pub struct Studio<S: KvStore, H: KvStore> {
    state: AppState,
    gateway: GenerationGateway,
    keys: KeyStore<S>,
    usage: UsageCounter<S>,
    history: HistoryStore<H>,
    events: Option<EventLog>,
}

impl<S: KvStore + Clone, H: KvStore> Studio<S, H> {
    /// Starts a session: rolls the usage counter over if the day changed and
    /// records `session_started`.
    pub fn new(
        gateway: GenerationGateway,
        local: S,
        history: H,
        events: Option<EventLog>,
    ) -> Result<Self> {
        let mut usage = UsageCounter::new(local.clone());
        let reset = usage.check_and_reset_daily()?;
        let keys = KeyStore::new(local);
        let studio = Self {
            state: AppState::default(),
            gateway,
            keys,
            usage,
            history: HistoryStore::new(history),
            events,
        };
        studio.log_event(SessionEvent::SessionStarted {
            mode: studio.mode().as_str().to_string(),
            usage_count: studio.usage.count(),
            usage_reset: reset,
        })?;
        Ok(studio)
    }
}

impl<S: KvStore, H: KvStore> Studio<S, H> {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    pub fn mode(&self) -> GenerationMode {
        GenerationMode::for_credential(self.keys.get().as_deref())
    }

    pub fn usage(&self) -> &UsageCounter<S> {
        &self.usage
    }

    pub fn history(&self) -> &HistoryStore<H> {
        &self.history
    }

    /// Runs one generation from the current state. On failure the state
    /// keeps its previous results and records the error message.
    pub fn generate(&mut self) -> Result<GenerateOutcome, GenerationError> {
        if self.state.generating {
            return Err(GenerationError::Validation(
                "A generation is already in progress.".to_string(),
            ));
        }
        self.state.generating = true;
        self.state.error = None;
        let result = self.run_generation();
        self.state.generating = false;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.state.error = Some(err.to_string());
                let logged = self.log_event(SessionEvent::GenerationFailed {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
                if let Err(log_err) = logged {
                    warn!(error = %format!("{log_err:#}"), "could not record generation_failed");
                }
                Err(err)
            }
        }
    }

    fn run_generation(&mut self) -> Result<GenerateOutcome, GenerationError> {
        let request = GenerationRequest::compose(
            self.state.images.clone(),
            &self.state.prompt,
            self.state.aspect_ratio,
            self.state.image_count,
        )?;
        let credential = self.keys.get();
        let mode = GenerationMode::for_credential(credential.as_deref());
        if mode == GenerationMode::Proxy && self.usage.is_exhausted() {
            return Err(GenerationError::QuotaExceeded(format!(
                "You have used all {DAILY_LIMIT} free generations for today. Add your own API key for unlimited use."
            )));
        }
        self.log_event(SessionEvent::GenerationStarted {
            mode: mode.as_str().to_string(),
            count: request.count,
            aspect_ratio: request.aspect_ratio,
            has_context: request.images.context.is_some(),
        })
        .map_err(|err| GenerationError::storage(&err))?;

        let urls = self
            .gateway
            .generate(&request, credential.as_deref(), &mut self.usage)?;
        let images = GeneratedImage::from_batch(urls, Utc::now().timestamp_millis());
        for image in &images {
            self.history
                .save_image(image.clone())
                .map_err(|err| GenerationError::storage(&err))?;
        }
        self.state.prepend_results(images.clone());

        let notice = (mode == GenerationMode::Proxy && self.usage.is_near_limit()).then(|| {
            format!(
                "You have {} free generations left today.",
                self.usage.remaining()
            )
        });
        self.log_event(SessionEvent::GenerationCompleted {
            mode: mode.as_str().to_string(),
            image_ids: images.iter().map(|image| image.id.clone()).collect(),
            usage_count: self.usage.count(),
        })
        .map_err(|err| GenerationError::storage(&err))?;

        Ok(GenerateOutcome {
            mode,
            images,
            notice,
        })
    }

    /// Removes an image from history and from the session results.
    pub fn delete_history(&mut self, id: &str) -> Result<bool> {
        let removed = self.history.delete_image(id)?;
        self.state.results.retain(|image| image.id != id);
        if removed {
            self.log_event(SessionEvent::HistoryDeleted {
                image_id: id.to_string(),
            })?;
        }
        Ok(removed)
    }

    fn log_event(&self, event: SessionEvent) -> Result<()> {
        match &self.events {
            Some(events) => events.emit(event).map(|_| ()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use atelier_contracts::credentials::USER_KEY;
    use atelier_contracts::events::{EventLog, EventRecord, SessionEvent};
    use atelier_contracts::history::{GeneratedImage, HistoryStore};
    use atelier_contracts::store::{KvStore, MemoryKvStore};
    use atelier_contracts::usage::{UsageCounter, USAGE_COUNT_KEY};
    use atelier_contracts::wire::gemini::InlineData;
    use atelier_contracts::wire::proxy::ProxyResponse;
    use atelier_contracts::wire::AspectRatio;
    use serde_json::json;

    use super::{AppState, Studio, MAX_SESSION_RESULTS};
    use crate::error::GenerationError;
    use crate::gateway::test_support::{ScriptedProxy, ScriptedTransport};
    use crate::gateway::{GenerationGateway, GenerationMode};
    use crate::prompt::{ScenePreset, DEFAULT_PROMPT};

    struct Fixture {
        local: MemoryKvStore,
        history: MemoryKvStore,
        direct: ScriptedTransport,
        proxy: ScriptedProxy,
    }

    impl Fixture {
        fn new(direct: ScriptedTransport, proxy: ScriptedProxy) -> Self {
            Self {
                local: MemoryKvStore::new(),
                history: MemoryKvStore::new(),
                direct,
                proxy,
            }
        }

        fn studio(&self, events: Option<EventLog>) -> anyhow::Result<Studio<MemoryKvStore, MemoryKvStore>> {
            let gateway = GenerationGateway::new(
                Box::new(self.direct.clone()),
                Box::new(self.proxy.clone()),
            );
            let mut studio = Studio::new(gateway, self.local.clone(), self.history.clone(), events)?;
            let state = studio.state_mut();
            state.set_character(Some("data:image/png;base64,Q0g=".to_string()));
            state.set_outfit(Some("data:image/png;base64,T1U=".to_string()));
            Ok(studio)
        }
    }

    fn proxy_images(count: usize) -> ProxyResponse {
        ProxyResponse::images(
            (0..count)
                .map(|idx| format!("data:image/png;base64,IMG{idx}"))
                .collect(),
        )
    }

    #[test]
    fn app_state_defaults_and_setters() {
        let mut state = AppState::default();
        assert_eq!(state.prompt(), DEFAULT_PROMPT);
        assert_eq!(state.aspect_ratio(), AspectRatio::Portrait);
        assert_eq!(state.image_count(), 1);

        state.set_image_count(7);
        assert_eq!(state.image_count(), 4);
        state.set_image_count(0);
        assert_eq!(state.image_count(), 1);

        state.apply_preset(ScenePreset::Studio);
        assert_eq!(state.prompt(), ScenePreset::Studio.prompt());
    }

    #[test]
    fn missing_outfit_fails_before_any_call() -> anyhow::Result<()> {
        let fixture = Fixture::new(ScriptedTransport::default(), ScriptedProxy::default());
        let mut studio = fixture.studio(None)?;
        studio.state_mut().set_outfit(None);

        let result = studio.generate();

        assert!(matches!(result, Err(GenerationError::MissingInput(_))));
        assert_eq!(fixture.proxy.call_count(), 0);
        assert_eq!(fixture.direct.call_count(), 0);
        assert!(studio.state().error().is_some());
        assert!(!studio.state().is_generating());
        Ok(())
    }

    #[test]
    fn proxy_generation_saves_history_and_counts_once() -> anyhow::Result<()> {
        let fixture = Fixture::new(
            ScriptedTransport::default(),
            ScriptedProxy::with(vec![Ok(proxy_images(3))]),
        );
        let mut studio = fixture.studio(None)?;
        studio.state_mut().set_image_count(3);

        let outcome = studio.generate()?;

        assert_eq!(outcome.mode, GenerationMode::Proxy);
        assert_eq!(outcome.images.len(), 3);
        assert!(outcome.images[0].id.ends_with("-0"));
        assert_eq!(outcome.notice, None);
        assert_eq!(studio.usage().count(), 1);
        assert_eq!(studio.history().len(), 3);
        assert_eq!(studio.state().results(), outcome.images.as_slice());
        Ok(())
    }

    #[test]
    fn direct_generation_uses_stored_key_and_leaves_usage() -> anyhow::Result<()> {
        let fixture = Fixture::new(
            ScriptedTransport::with(vec![
                Ok(vec![InlineData::png("A")]),
                Ok(vec![InlineData::png("B")]),
            ]),
            ScriptedProxy::default(),
        );
        let mut local = fixture.local.clone();
        local.set(USER_KEY, json!("AIza-user"))?;
        let mut studio = fixture.studio(None)?;
        studio.state_mut().set_image_count(2);

        let outcome = studio.generate()?;

        assert_eq!(outcome.mode, GenerationMode::Direct);
        let urls: Vec<&str> = outcome.images.iter().map(|image| image.url.as_str()).collect();
        assert_eq!(urls, vec!["data:image/png;base64,A", "data:image/png;base64,B"]);
        assert_eq!(fixture.direct.call_count(), 2);
        assert_eq!(fixture.proxy.call_count(), 0);
        assert_eq!(studio.usage().count(), 0);
        Ok(())
    }

    #[test]
    fn exhausted_quota_blocks_proxy_mode() -> anyhow::Result<()> {
        let fixture = Fixture::new(ScriptedTransport::default(), ScriptedProxy::default());
        let mut studio = fixture.studio(None)?;
        let mut local = fixture.local.clone();
        local.set(USAGE_COUNT_KEY, json!(10))?;

        let result = studio.generate();

        assert!(matches!(result, Err(GenerationError::QuotaExceeded(_))));
        assert_eq!(fixture.proxy.call_count(), 0);
        Ok(())
    }

    #[test]
    fn near_limit_notice_reports_remaining() -> anyhow::Result<()> {
        let fixture = Fixture::new(
            ScriptedTransport::default(),
            ScriptedProxy::with(vec![Ok(proxy_images(1))]),
        );
        let mut studio = fixture.studio(None)?;
        let mut usage = UsageCounter::new(fixture.local.clone());
        for _ in 0..7 {
            usage.increment()?;
        }

        let outcome = studio.generate()?;

        assert_eq!(
            outcome.notice.as_deref(),
            Some("You have 2 free generations left today.")
        );
        Ok(())
    }

    #[test]
    fn failed_generation_keeps_previous_results() -> anyhow::Result<()> {
        let fixture = Fixture::new(
            ScriptedTransport::default(),
            ScriptedProxy::with(vec![
                Ok(proxy_images(2)),
                Ok(ProxyResponse::error("Gemini returned no image (finish reason: IMAGE_SAFETY)")),
            ]),
        );
        let mut studio = fixture.studio(None)?;
        let first = studio.generate()?;

        let second = studio.generate();

        assert!(matches!(second, Err(GenerationError::UpstreamRejection(_))));
        assert_eq!(studio.state().results(), first.images.as_slice());
        assert_eq!(
            studio.state().error(),
            Some("Gemini returned no image (finish reason: IMAGE_SAFETY)")
        );
        assert_eq!(studio.usage().count(), 1);
        Ok(())
    }

    #[test]
    fn session_results_keep_twelve_newest() -> anyhow::Result<()> {
        let fixture = Fixture::new(
            ScriptedTransport::default(),
            ScriptedProxy::with((0..4).map(|_| Ok(proxy_images(4))).collect()),
        );
        let mut studio = fixture.studio(None)?;
        let mut last = Vec::new();
        for _ in 0..4 {
            last = studio.generate()?.images;
        }

        let results = studio.state().results();
        assert_eq!(results.len(), MAX_SESSION_RESULTS);
        assert_eq!(&results[..4], last.as_slice());
        Ok(())
    }

    #[test]
    fn generating_flag_rejects_overlap() -> anyhow::Result<()> {
        let fixture = Fixture::new(ScriptedTransport::default(), ScriptedProxy::default());
        let mut studio = fixture.studio(None)?;
        studio.state.generating = true;

        assert!(matches!(studio.generate(), Err(GenerationError::Validation(_))));
        assert_eq!(fixture.proxy.call_count(), 0);
        Ok(())
    }

    #[test]
    fn delete_history_removes_from_store_and_session() -> anyhow::Result<()> {
        let fixture = Fixture::new(
            ScriptedTransport::default(),
            ScriptedProxy::with(vec![Ok(proxy_images(2))]),
        );
        let mut studio = fixture.studio(None)?;
        let outcome = studio.generate()?;
        let target = outcome.images[0].id.clone();

        assert!(studio.delete_history(&target)?);
        assert!(!studio.delete_history(&target)?);
        assert_eq!(studio.history().len(), 1);
        assert!(studio.state().results().iter().all(|image| image.id != target));

        let reloaded = HistoryStore::new(fixture.history.clone());
        assert_eq!(reloaded.get_image(&target), None::<GeneratedImage>);
        Ok(())
    }

    #[test]
    fn session_events_are_written() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let fixture = Fixture::new(
            ScriptedTransport::default(),
            ScriptedProxy::with(vec![
                Ok(proxy_images(1)),
                Ok(ProxyResponse::error("blocked")),
            ]),
        );
        let mut studio = fixture.studio(Some(EventLog::new(&events_path, "session-1")))?;
        let outcome = studio.generate()?;
        let _ = studio.generate();

        let records: Vec<EventRecord> = std::fs::read_to_string(&events_path)?
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|record| record.session_id == "session-1"));
        assert!(matches!(records[0].event, SessionEvent::SessionStarted { .. }));
        assert!(matches!(records[1].event, SessionEvent::GenerationStarted { count: 1, .. }));
        assert_eq!(
            records[2].event,
            SessionEvent::GenerationCompleted {
                mode: "proxy".to_string(),
                image_ids: vec![outcome.images[0].id.clone()],
                usage_count: 1,
            }
        );
        assert!(matches!(records[3].event, SessionEvent::GenerationStarted { .. }));
        assert_eq!(
            records[4].event,
            SessionEvent::GenerationFailed {
                kind: "upstream_rejection".to_string(),
                message: "blocked".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn unwritable_event_log_keeps_the_generation_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let fixture = Fixture::new(ScriptedTransport::default(), ScriptedProxy::default());
        let mut studio = fixture.studio(Some(EventLog::new(&events_path, "session-1")))?;
        std::fs::remove_file(&events_path)?;
        std::fs::create_dir(&events_path)?;
        studio.state_mut().set_outfit(None);

        let result = studio.generate();

        assert!(matches!(result, Err(GenerationError::MissingInput(_))));
        assert!(studio.state().error().is_some());
        Ok(())
    }
}
