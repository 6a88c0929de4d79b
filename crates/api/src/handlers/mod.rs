pub mod tasks;
pub mod ws_stats;
