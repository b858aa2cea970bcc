//! Fetch provenance
//!
//! While a merx runs, every configuration value it fetches is reported to a
//! [`FetchObserver`]. The [`FetchRecorder`] keeps those reports so they can be
//! stored on the tome's epitome; it has no say in control flow.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::Result;

/// Where one fetched value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
    pub var_name: String,
    pub location: String,
    pub value: String,
}

impl FetchRecord {
    pub fn new(var_name: impl Display, location: impl Display, value: impl Display) -> Self {
        Self {
            var_name: var_name.to_string(),
            location: location.to_string(),
            value: value.to_string(),
        }
    }
}

/// Sink for fetch events.
pub trait FetchObserver {
    fn observe(&mut self, var_name: &str, location: &str, value: &dyn Display);
}

/// Accumulates fetch events for the current tome.
#[derive(Debug, Default)]
pub struct FetchRecorder {
    records: Vec<FetchRecord>,
}

impl FetchRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[FetchRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take a copy of the recorded events for persistence.
    pub fn snapshot(&self) -> Vec<FetchRecord> {
        self.records.clone()
    }

    /// Recorded events as a JSON array.
    pub fn export(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.records)?)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl FetchObserver for FetchRecorder {
    fn observe(&mut self, var_name: &str, location: &str, value: &dyn Display) {
        self.records.push(FetchRecord::new(var_name, location, value));
    }
}

/// Clears the wrapped recorder when created and again when dropped.
///
/// Keeps provenance from one tome leaking into the next even if the merx for
/// that tome bails out early.
pub struct RecorderScope<'a> {
    recorder: &'a mut FetchRecorder,
}

impl<'a> RecorderScope<'a> {
    pub fn new(recorder: &'a mut FetchRecorder) -> Self {
        recorder.clear();
        Self { recorder }
    }
}

impl std::ops::Deref for RecorderScope<'_> {
    type Target = FetchRecorder;

    fn deref(&self) -> &Self::Target {
        self.recorder
    }
}

impl std::ops::DerefMut for RecorderScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.recorder
    }
}

impl Drop for RecorderScope<'_> {
    fn drop(&mut self) {
        self.recorder.clear();
    }
}
