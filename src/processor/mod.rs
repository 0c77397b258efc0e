pub mod telemetry_processor;

pub use telemetry_processor::TelemetryProcessor;
