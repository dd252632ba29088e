pub mod chord_classifier;
pub mod chord_table;
pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod note_tracker;
pub mod pattern_store;
pub mod player;
pub mod preferences;
pub mod selector;
pub mod simulator;
pub mod sink;
pub mod soloist;
pub mod types;

#[cfg(feature = "hardware")]
pub mod midi_input;
