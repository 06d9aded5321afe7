//! Request-lifecycle core for an image-generation studio UI: bounded image
//! preprocessing, an abortable generate/retry state machine, and a capped
//! persisted history, plus the mock HTTP backend the contract documents.

pub mod backend;
pub mod controller;
pub mod history;
pub mod models;
pub mod preprocess;
pub mod server;
pub mod studio;

pub use controller::{ControllerState, GenerationController, Outcome, Phase};
pub use history::HistoryStore;
pub use models::{GenerateRequest, Generation, Style};
pub use preprocess::{ImageFile, Preprocessor};
pub use studio::Studio;
