use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskEdge {
    Smooth,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskShape {
    Square,
    Rounded,
    Stadium,
    Circle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformTarget {
    Cli,
    Tauri,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusPolicy {
    pub max_radius: u32,
    pub max_input_bytes: u64,
}

impl Default for RadiusPolicy {
    fn default() -> Self {
        Self {
            max_radius: 200,
            max_input_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub requested_radius: u32,
    pub edge: MaskEdge,
    pub emit_mask_png: bool,
    pub input_path: Option<PathBuf>,
    pub input_bytes: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderResult {
    pub effective_radius: f32,
    pub shape: MaskShape,
    pub cutout_png: Vec<u8>,
    pub mask_png: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEventType {
    RenderStart,
    RenderSuccess,
    RenderError,
    DecodeError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub requested_radius: u32,
    pub platform: PlatformTarget,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

pub trait RenderBackend: Send + Sync {
    fn render(&self, request: &RenderRequest, radius: u32) -> Result<RenderResult, CoreError>;
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("input could not be decoded as an image: {0}")]
    Decode(String),
    #[error("missing input bytes and input path")]
    MissingInput,
    #[error("image dimensions must be non-zero")]
    EmptyImage,
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    DecodeError,
    MissingInput,
    EmptyImage,
    BackendError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn as_error_info(&self) -> ErrorInfo {
        match self {
            Self::Decode(message) => ErrorInfo {
                code: ErrorCode::DecodeError,
                message: message.clone(),
            },
            Self::MissingInput => ErrorInfo {
                code: ErrorCode::MissingInput,
                message: self.to_string(),
            },
            Self::EmptyImage => ErrorInfo {
                code: ErrorCode::EmptyImage,
                message: self.to_string(),
            },
            Self::Backend(message) => ErrorInfo {
                code: ErrorCode::BackendError,
                message: message.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub edge: String,
    pub max_radius: u32,
    pub emit_mask: bool,
    pub output_dir: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            edge: "smooth".to_string(),
            max_radius: 200,
            emit_mask: false,
            output_dir: None,
        }
    }
}

pub fn resolve_runtime_config(overrides: RuntimeConfig) -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();
    if !overrides.edge.trim().is_empty() {
        cfg.edge = overrides.edge;
    }
    if overrides.max_radius > 0 {
        cfg.max_radius = overrides.max_radius;
    }
    cfg.emit_mask = overrides.emit_mask;
    cfg.output_dir = overrides.output_dir;
    cfg
}

pub mod v1 {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RoundCornersRequest {
        pub image_bytes: Vec<u8>,
        pub width: u32,
        pub height: u32,
        pub radius: u32,
        pub edge: Option<String>,
        pub emit_mask: Option<bool>,
        pub max_radius: Option<u32>,
        pub file_name: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RoundCornersResponse {
        pub width: u32,
        pub height: u32,
        pub effective_radius: f32,
        pub shape: String,
        pub cutout_png: Vec<u8>,
        pub mask_png: Option<Vec<u8>>,
        pub from_cache: bool,
        pub download_name: String,
    }
}

pub fn resolve_radius(request: &RenderRequest, policy: &RadiusPolicy) -> u32 {
    request.requested_radius.min(policy.max_radius)
}

pub fn classify_mask_shape(width: u32, height: u32, effective_radius: f32) -> MaskShape {
    if effective_radius <= 0.0 {
        return MaskShape::Square;
    }
    let half_min = width.min(height) as f32 / 2.0;
    if effective_radius < half_min {
        MaskShape::Rounded
    } else if width == height {
        MaskShape::Circle
    } else {
        MaskShape::Stadium
    }
}

/// Request-sequence guard for the shared output surface. Each render begins
/// with a freshly issued sequence number; a result may only be committed
/// while its number is still the latest issued, so a superseded render that
/// finishes late cannot overwrite the surface owned by a newer request.
#[derive(Debug, Default)]
pub struct RenderSequencer {
    issued: AtomicU64,
    committed: AtomicU64,
}

impl RenderSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, seq: u64) -> bool {
        self.issued.load(Ordering::SeqCst) == seq
    }

    pub fn commit(&self, seq: u64) -> bool {
        if !self.is_current(seq) {
            return false;
        }
        let mut last = self.committed.load(Ordering::SeqCst);
        loop {
            if seq <= last {
                return false;
            }
            match self
                .committed
                .compare_exchange(last, seq, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }
}

pub fn run_render(
    backend: &dyn RenderBackend,
    request: &RenderRequest,
    policy: &RadiusPolicy,
) -> Result<RenderResult, CoreError> {
    run_render_with_telemetry(backend, request, policy, PlatformTarget::Cli, None)
}

pub fn run_render_with_telemetry(
    backend: &dyn RenderBackend,
    request: &RenderRequest,
    policy: &RadiusPolicy,
    platform: PlatformTarget,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<RenderResult, CoreError> {
    if request.input_bytes.is_none() && request.input_path.is_none() {
        return Err(CoreError::MissingInput);
    }
    if request.width == 0 || request.height == 0 {
        return Err(CoreError::EmptyImage);
    }
    let start = Instant::now();
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type: TelemetryEventType::RenderStart,
            requested_radius: request.requested_radius,
            platform,
            duration_ms: None,
            detail: None,
        });
    }
    let radius = resolve_radius(request, policy);
    match backend.render(request, radius) {
        Ok(result) => {
            if let Some(sink) = telemetry {
                sink.emit(TelemetryEvent {
                    event_type: TelemetryEventType::RenderSuccess,
                    requested_radius: request.requested_radius,
                    platform,
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    detail: Some(format!(
                        "effectiveRadius={},shape={:?},fromCache={}",
                        result.effective_radius, result.shape, result.from_cache
                    )),
                });
            }
            Ok(result)
        }
        Err(err) => {
            if let Some(sink) = telemetry {
                let event_type = match err {
                    CoreError::Decode(_) => TelemetryEventType::DecodeError,
                    _ => TelemetryEventType::RenderError,
                };
                sink.emit(TelemetryEvent {
                    event_type,
                    requested_radius: request.requested_radius,
                    platform,
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    detail: Some(err.to_string()),
                });
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend;

    impl RenderBackend for StubBackend {
        fn render(&self, request: &RenderRequest, radius: u32) -> Result<RenderResult, CoreError> {
            let effective = (radius as f32)
                .min(request.width as f32 / 2.0)
                .min(request.height as f32 / 2.0);
            Ok(RenderResult {
                effective_radius: effective,
                shape: classify_mask_shape(request.width, request.height, effective),
                cutout_png: vec![0, 1, 2],
                mask_png: None,
                width: request.width,
                height: request.height,
                from_cache: false,
            })
        }
    }

    fn sample_request(radius: u32, width: u32, height: u32) -> RenderRequest {
        RenderRequest {
            requested_radius: radius,
            edge: MaskEdge::Smooth,
            emit_mask_png: false,
            input_path: Some(PathBuf::from("input.png")),
            input_bytes: None,
            width,
            height,
        }
    }

    #[test]
    fn radius_is_clamped_to_the_policy_bound() {
        let request = sample_request(500, 1000, 1000);
        let policy = RadiusPolicy::default();
        assert_eq!(resolve_radius(&request, &policy), 200);
        assert_eq!(resolve_radius(&sample_request(50, 1000, 1000), &policy), 50);
    }

    #[test]
    fn render_reports_the_clamped_effective_radius() {
        let result = run_render(&StubBackend, &sample_request(500, 100, 50), &RadiusPolicy::default())
            .expect("render should succeed");
        assert_eq!(result.effective_radius, 25.0);
        assert_eq!(result.shape, MaskShape::Stadium);
    }

    #[test]
    fn render_without_input_fails() {
        let mut request = sample_request(20, 100, 100);
        request.input_path = None;
        let err = run_render(&StubBackend, &request, &RadiusPolicy::default())
            .expect_err("should fail without input");
        assert!(matches!(err, CoreError::MissingInput));
    }

    #[test]
    fn render_with_zero_dimensions_fails() {
        let err = run_render(&StubBackend, &sample_request(20, 0, 100), &RadiusPolicy::default())
            .expect_err("should fail for zero width");
        assert!(matches!(err, CoreError::EmptyImage));
    }

    #[test]
    fn shape_classification_covers_the_degenerate_cases() {
        assert_eq!(classify_mask_shape(100, 100, 0.0), MaskShape::Square);
        assert_eq!(classify_mask_shape(100, 100, 20.0), MaskShape::Rounded);
        assert_eq!(classify_mask_shape(100, 100, 50.0), MaskShape::Circle);
        assert_eq!(classify_mask_shape(100, 50, 25.0), MaskShape::Stadium);
    }

    #[test]
    fn decode_error_maps_to_its_error_code() {
        let info = CoreError::Decode("bad header".to_string()).as_error_info();
        assert_eq!(info.code, ErrorCode::DecodeError);
        assert_eq!(info.message, "bad header");
    }

    #[test]
    fn superseded_render_is_discarded() {
        let sequencer = RenderSequencer::new();
        let first = sequencer.begin();
        let second = sequencer.begin();
        // The older request finishes after the newer one started.
        assert!(!sequencer.commit(first));
        assert!(sequencer.commit(second));
    }

    #[test]
    fn late_finish_of_the_newest_request_still_wins() {
        let sequencer = RenderSequencer::new();
        let first = sequencer.begin();
        let second = sequencer.begin();
        assert!(sequencer.commit(second));
        assert!(!sequencer.commit(first));
        assert!(!sequencer.commit(second));
    }

    #[test]
    fn resolved_config_fills_blank_fields() {
        let cfg = resolve_runtime_config(RuntimeConfig {
            edge: "".to_string(),
            max_radius: 0,
            emit_mask: true,
            output_dir: Some("out".to_string()),
        });
        assert_eq!(cfg.edge, "smooth");
        assert_eq!(cfg.max_radius, 200);
        assert!(cfg.emit_mask);
        assert_eq!(cfg.output_dir.as_deref(), Some("out"));
    }
}
