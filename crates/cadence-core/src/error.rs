use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("vision error: {0}")]
    Vision(#[from] VisionError),

    #[error("action sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Failures raised while inspecting a frame region.
///
/// These never leave the readiness gate: every variant is folded into
/// "not ready" (or "effect absent") at the point of detection.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("region {x},{y} {width}x{height} is outside the {frame_width}x{frame_height} frame")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("region has zero area")]
    EmptyRegion,

    #[error("template {template_width}x{template_height} is larger than the {crop_width}x{crop_height} crop")]
    TemplateTooLarge {
        template_width: u32,
        template_height: u32,
        crop_width: u32,
        crop_height: u32,
    },

    #[error("failed to load template '{path}': {reason}")]
    TemplateLoad { path: String, reason: String },
}

/// An action sink could not carry out an attempt.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
