pub mod cron;
pub mod models;
pub mod normalizer;
pub mod schedule_diff;
pub mod window;
