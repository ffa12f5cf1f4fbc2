pub mod analytics;
pub mod batcher;
pub mod document_parser;
pub mod errors;
pub mod field_extractor;
pub mod fingerprint;
pub mod lexicon;
pub mod logging;
pub mod matching;
pub mod models;
pub mod normalizer;
pub mod pdf;
pub mod record_builder;
pub mod report_store;
pub mod screening;
pub mod service;
pub mod settings_store;
pub mod similarity;
pub mod store;
pub mod weights;
