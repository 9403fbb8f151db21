//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like database pools and service clients.

use crate::config::Config;
use dealcoach_core::{
    evaluation::EvaluationAggregator, generator::TextGenerator, state_machine::EndIntentLexicon,
    technique::TechniqueCatalog,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<crate::db::Db>,
    pub generator: Arc<dyn TextGenerator>,
    pub aggregator: Arc<EvaluationAggregator>,
    pub catalog: Arc<TechniqueCatalog>,
    pub lexicon: Arc<EndIntentLexicon>,
    pub config: Arc<Config>,
}
