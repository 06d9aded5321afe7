use parking_lot::RwLock;
use tracing::info;

use crate::controller::{GenerateError, GenerationController, Outcome};
use crate::history::HistoryStore;
use crate::models::{GenerateRequest, Generation, Style};
use crate::preprocess::{ImageFile, PreprocessError, Preprocessor};

/// The editable inputs of the current session: the uploaded (preprocessed)
/// image, the prompt, and the chosen style.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub image_data_url: Option<String>,
    pub prompt: String,
    pub style: Style,
}

/// Ties the pieces together the way the page does: uploads flow through the
/// preprocessor into the session, a successful generation is recorded into
/// history and becomes the new session content, and restoring a history
/// entry repopulates the session without touching history.
pub struct Studio {
    preprocessor: Preprocessor,
    controller: GenerationController,
    history: HistoryStore,
    session: RwLock<SessionState>,
}

impl Studio {
    pub fn new(preprocessor: Preprocessor, controller: GenerationController, history: HistoryStore) -> Self {
        Self {
            preprocessor,
            controller,
            history,
            session: RwLock::new(SessionState::default()),
        }
    }

    /// Preprocess an upload and make it the session image.
    pub async fn upload(&self, file: ImageFile) -> Result<String, PreprocessError> {
        let data_url = self.preprocessor.process(file).await?;
        self.session.write().image_data_url = Some(data_url.clone());
        Ok(data_url)
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        self.session.write().prompt = prompt.into();
    }

    pub fn set_style(&self, style: Style) {
        self.session.write().style = style;
    }

    pub fn session(&self) -> SessionState {
        self.session.read().clone()
    }

    pub fn history(&self) -> Vec<Generation> {
        self.history.current()
    }

    pub fn controller(&self) -> &GenerationController {
        &self.controller
    }

    pub fn abort(&self) {
        self.controller.abort();
    }

    /// Submit the current session. On completion the result is prepended
    /// to history and the session shows the generated image, prompt and
    /// style. An aborted run leaves both untouched.
    pub async fn generate(&self) -> Result<Outcome, GenerateError> {
        let request = {
            let session = self.session.read();
            GenerateRequest::new(
                session.image_data_url.clone().unwrap_or_default(),
                &session.prompt,
                session.style,
            )
        };
        let outcome = self.controller.generate(request).await?;
        if let Outcome::Completed(generation) = &outcome {
            self.history.record(generation.clone());
            let mut session = self.session.write();
            session.image_data_url = Some(generation.image_url.clone());
            session.prompt = generation.prompt.clone();
            session.style = generation.style;
        }
        Ok(outcome)
    }

    /// Bring a past generation back into the session. History is unchanged.
    pub fn restore(&self, id: &str) -> Option<Generation> {
        let generation = self.history.restore(id)?;
        {
            let mut session = self.session.write();
            session.image_data_url = Some(generation.image_url.clone());
            session.prompt = generation.prompt.clone();
            session.style = generation.style;
        }
        info!("⏪ Restored generation {}", generation.id);
        Some(generation)
    }
}
