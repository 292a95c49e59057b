//! Mock construction helpers

use uartlog_rs::backend::{MockUart, MockUartHandle};
use uartlog_rs::config::PipelineSettings;
use uartlog_rs::pipeline::LinePipeline;

/// Pipeline settings small enough to exercise buffer exhaustion quickly
pub fn small_settings() -> PipelineSettings {
    PipelineSettings {
        ring_capacity: 256,
        rx_buffer_size: 1024,
        event_queue_len: 64,
        pattern_queue_len: 20,
        acquire_timeout_ms: 20,
        read_timeout_ms: 50,
        ..PipelineSettings::default()
    }
}

/// Idle pipeline on port `index` over a fresh mock driver
pub fn mock_pipeline(index: usize, settings: PipelineSettings) -> (LinePipeline, MockUartHandle) {
    let driver = MockUart::new();
    let handle = driver.handle();
    let pipeline = LinePipeline::new(index, format!("uart{}", index), Box::new(driver), settings);
    (pipeline, handle)
}
