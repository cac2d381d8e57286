use rand::distr::{Alphanumeric, SampleString};

pub mod item;

pub mod job;

pub mod step;

pub mod parameters;

pub mod listener;

pub mod repository;

pub mod launcher;

pub mod scheduler;

pub mod health;

/// Generates a random name consisting of alphanumeric characters.
///
/// Used for jobs and steps built without an explicit name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
