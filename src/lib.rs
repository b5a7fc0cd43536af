pub mod batch;
pub mod batch_lock;
pub mod calibration;
pub mod competition;
pub mod config;
pub mod context;
pub mod engine;
pub mod features;
pub mod fusion;
pub mod ingest;
pub mod joint;
pub mod league_baseline;
pub mod logging;
pub mod match_data;
pub mod micro_form;
pub mod micro_model;
pub mod micro_stats;
pub mod prefetch;
pub mod prior;
pub mod prob;
pub mod store;
pub mod sweeper;
pub mod team_profile;
pub mod team_strength;
