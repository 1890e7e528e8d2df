//! Shared fixtures for the integration suites
#![allow(dead_code)]

use ship_sim_core::simulation::{parse_time_message, ProgressSink};
use ship_sim_core::{RunConfig, SurfaceGrid, WaveComponent};
use std::sync::{Arc, Mutex};

/// 4x4 grid with 10 m spacing, centred on the origin
pub fn reference_mesh() -> SurfaceGrid {
    SurfaceGrid::regular(4, 4, 30.0, 30.0).unwrap()
}

/// Single head wave: A = 1 m, T = 8 s
pub fn reference_waves() -> Vec<WaveComponent> {
    vec![WaveComponent::new(1.0, 8.0, 0.0, 0.0)]
}

/// Host run of the reference scenario ending at `end_time`
pub fn host_config(end_time: f64) -> RunConfig {
    RunConfig::host(end_time)
}

/// Progress sink that records every message
#[derive(Clone, Default)]
pub struct Recorder {
    messages: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        let messages = Arc::clone(&self.messages);
        Arc::new(move |message: &str| messages.lock().unwrap().push(message.to_string()))
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn times(&self) -> Vec<f64> {
        self.messages()
            .iter()
            .filter_map(|m| parse_time_message(m))
            .collect()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
