use anyhow::{anyhow, Result};
use rondo_core::{
    run_render_with_telemetry, v1, CoreError, MaskEdge, MaskShape, PlatformTarget, RadiusPolicy,
    RenderRequest, RenderSequencer, RuntimeConfig,
};
use rondo_image::{estimate_rgba_bytes, ImageSize};
use rondo_raster::CpuRasterBackend;
use rondo_telemetry::sink_from_env;
use serde::{Deserialize, Serialize};

// Decoded-RGBA budget for a single widget composite.
const MAX_COMPOSITE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriRoundRequest {
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub radius: u32,
    pub max_radius: u32,
    pub edge: Option<MaskEdge>,
    pub emit_mask: Option<bool>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriRoundResponse {
    pub effective_radius: f32,
    pub shape: MaskShape,
    pub cutout_png: Vec<u8>,
    pub mask_png: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub from_cache: bool,
    pub download_name: String,
}

/// One session per preview surface. The sequencer makes sure a render that
/// was superseded while in flight cannot overwrite the surface owned by the
/// most recently issued request.
#[derive(Debug, Default)]
pub struct WidgetSession {
    sequencer: RenderSequencer,
}

impl WidgetSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round_corners(&self, request: TauriRoundRequest) -> Result<TauriRoundResponse> {
        let runtime_cfg = rondo_core::resolve_runtime_config(RuntimeConfig {
            edge: request
                .edge
                .map(|e| edge_label(e).to_string())
                .unwrap_or_else(|| "smooth".to_string()),
            max_radius: request.max_radius,
            emit_mask: request.emit_mask.unwrap_or(false),
            output_dir: None,
        });
        let policy = RadiusPolicy {
            max_radius: runtime_cfg.max_radius,
            ..RadiusPolicy::default()
        };
        if request.image_bytes.len() as u64 > policy.max_input_bytes {
            return Err(anyhow!(
                "selected file is {} bytes, above the {} byte upload guidance",
                request.image_bytes.len(),
                policy.max_input_bytes
            ));
        }
        let estimated_bytes = estimate_rgba_bytes(ImageSize {
            width: request.width,
            height: request.height,
        });
        if estimated_bytes > MAX_COMPOSITE_BYTES {
            return Err(anyhow!(
                "decoded image would need {} bytes, above the composite budget",
                estimated_bytes
            ));
        }

        let download_name = download_file_name(request.file_name.as_deref());
        let backend = CpuRasterBackend::default();
        let telemetry = sink_from_env();
        let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());

        let seq = self.sequencer.begin();
        let render = run_render_with_telemetry(
            &backend,
            &RenderRequest {
                requested_radius: request.radius,
                edge: parse_edge_opt(Some(&runtime_cfg.edge))
                    .map_err(anyhow::Error::msg)?
                    .unwrap_or(MaskEdge::Smooth),
                emit_mask_png: runtime_cfg.emit_mask,
                input_path: None,
                input_bytes: Some(request.image_bytes),
                width: request.width,
                height: request.height,
            },
            &policy,
            PlatformTarget::Tauri,
            telemetry_ref,
        )?;
        if !self.sequencer.commit(seq) {
            return Err(anyhow!("render superseded by a newer request"));
        }
        Ok(TauriRoundResponse {
            effective_radius: render.effective_radius,
            shape: render.shape,
            cutout_png: render.cutout_png,
            mask_png: render.mask_png,
            width: render.width,
            height: render.height,
            from_cache: render.from_cache,
            download_name,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriCommandRequest {
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub radius: u32,
    pub max_radius: Option<u32>,
    pub edge: Option<String>,
    pub emit_mask: Option<bool>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriCommandResponse {
    pub effective_radius: f32,
    pub shape: String,
    pub cutout_png: Vec<u8>,
    pub mask_png: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub from_cache: bool,
    pub download_name: String,
}

pub fn round_corners_command(
    session: &WidgetSession,
    request: TauriCommandRequest,
) -> std::result::Result<TauriCommandResponse, String> {
    let v1_result = round_corners_v1(
        session,
        v1::RoundCornersRequest {
            image_bytes: request.image_bytes,
            width: request.width,
            height: request.height,
            radius: request.radius,
            edge: request.edge,
            emit_mask: request.emit_mask,
            max_radius: request.max_radius.or(Some(200)),
            file_name: request.file_name,
        },
    )?;
    Ok(TauriCommandResponse {
        effective_radius: v1_result.effective_radius,
        shape: v1_result.shape,
        cutout_png: v1_result.cutout_png,
        mask_png: v1_result.mask_png,
        width: v1_result.width,
        height: v1_result.height,
        from_cache: v1_result.from_cache,
        download_name: v1_result.download_name,
    })
}

pub fn round_corners_v1(
    session: &WidgetSession,
    request: v1::RoundCornersRequest,
) -> std::result::Result<v1::RoundCornersResponse, String> {
    let response = session
        .round_corners(TauriRoundRequest {
            image_bytes: request.image_bytes,
            width: request.width,
            height: request.height,
            radius: request.radius,
            max_radius: request.max_radius.unwrap_or(200),
            edge: parse_edge_opt(request.edge.as_deref())?,
            emit_mask: request.emit_mask,
            file_name: request.file_name,
        })
        .map_err(|err| {
            // Core failures cross the command boundary as a structured envelope.
            if let Some(core_err) = err.downcast_ref::<CoreError>() {
                serde_json::to_string(&core_err.as_error_info()).unwrap_or_else(|_| err.to_string())
            } else {
                err.to_string()
            }
        })?;
    Ok(v1::RoundCornersResponse {
        width: response.width,
        height: response.height,
        effective_radius: response.effective_radius,
        shape: shape_label(response.shape).to_string(),
        cutout_png: response.cutout_png,
        mask_png: response.mask_png,
        from_cache: response.from_cache,
        download_name: response.download_name,
    })
}

#[cfg(feature = "tauri-plugin")]
fn shared_session() -> &'static WidgetSession {
    static SESSION: std::sync::OnceLock<WidgetSession> = std::sync::OnceLock::new();
    SESSION.get_or_init(WidgetSession::new)
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_round_corners_command(request: TauriCommandRequest) -> std::result::Result<TauriCommandResponse, String> {
    round_corners_command(shared_session(), request)
}

#[cfg(feature = "tauri-plugin")]
pub fn init<R: tauri::Runtime>() -> tauri::plugin::TauriPlugin<R> {
    tauri::plugin::Builder::new("rondo")
        .invoke_handler(tauri::generate_handler![tauri_round_corners_command])
        .build()
}

/// Download name shown by the host page: the original base name with a
/// `-rounded.png` suffix, matching what the widget offers for saving.
pub fn download_file_name(original: Option<&str>) -> String {
    let original = original.filter(|name| !name.trim().is_empty()).unwrap_or("image.png");
    let base = match original.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => original,
    };
    format!("{}-rounded.png", base)
}

fn parse_edge_opt(raw: Option<&str>) -> std::result::Result<Option<MaskEdge>, String> {
    match raw.map(|value| value.to_ascii_lowercase()) {
        None => Ok(None),
        Some(value) => match value.as_str() {
            "smooth" | "aa" => Ok(Some(MaskEdge::Smooth)),
            "hard" | "binary" => Ok(Some(MaskEdge::Hard)),
            other => Err(format!(
                "unknown edge mode '{}'; expected one of: smooth (aa), hard (binary)",
                other
            )),
        },
    }
}

fn edge_label(edge: MaskEdge) -> &'static str {
    match edge {
        MaskEdge::Smooth => "smooth",
        MaskEdge::Hard => "hard",
    }
}

fn shape_label(shape: MaskShape) -> &'static str {
    match shape {
        MaskShape::Square => "square",
        MaskShape::Rounded => "rounded",
        MaskShape::Stadium => "stadium",
        MaskShape::Circle => "circle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
            .expect("sample png");
        out
    }

    #[test]
    fn command_rounds_the_reference_square() {
        let session = WidgetSession::new();
        let response = round_corners_command(
            &session,
            TauriCommandRequest {
                image_bytes: sample_png(100, 100),
                width: 100,
                height: 100,
                radius: 20,
                max_radius: None,
                edge: Some("aa".to_string()),
                emit_mask: None,
                file_name: Some("avatar.jpg".to_string()),
            },
        )
        .expect("command should succeed");

        assert_eq!(response.effective_radius, 20.0);
        assert_eq!(response.shape, "rounded");
        assert_eq!(response.download_name, "avatar-rounded.png");
        let cutout = image::load_from_memory(&response.cutout_png)
            .expect("cutout should decode")
            .to_rgba8();
        assert_eq!(cutout.get_pixel(0, 0)[3], 0);
        assert_eq!(*cutout.get_pixel(50, 50), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn command_rejects_invalid_edge_mode() {
        let session = WidgetSession::new();
        let error = round_corners_command(
            &session,
            TauriCommandRequest {
                image_bytes: vec![1, 2, 3],
                width: 1,
                height: 1,
                radius: 10,
                max_radius: None,
                edge: Some("fuzzy".to_string()),
                emit_mask: None,
                file_name: None,
            },
        )
        .expect_err("should fail for invalid edge mode");

        assert!(error.contains("unknown edge mode"));
    }

    #[test]
    fn oversize_upload_is_rejected_at_the_boundary() {
        let session = WidgetSession::new();
        let error = session
            .round_corners(TauriRoundRequest {
                image_bytes: vec![0; 11 * 1024 * 1024],
                width: 10,
                height: 10,
                radius: 2,
                max_radius: 200,
                edge: None,
                emit_mask: None,
                file_name: None,
            })
            .expect_err("should fail above the upload guidance");

        assert!(error.to_string().contains("upload guidance"));
    }

    #[test]
    fn decode_failures_carry_a_structured_error_code() {
        let session = WidgetSession::new();
        let error = round_corners_v1(
            &session,
            v1::RoundCornersRequest {
                image_bytes: vec![1, 2, 3],
                width: 8,
                height: 8,
                radius: 4,
                edge: None,
                emit_mask: None,
                max_radius: None,
                file_name: None,
            },
        )
        .expect_err("garbage bytes must not render");

        assert!(error.contains("decode-error"));
    }

    #[test]
    fn download_name_falls_back_for_missing_file_names() {
        assert_eq!(download_file_name(None), "image-rounded.png");
        assert_eq!(download_file_name(Some("photo.final.png")), "photo.final-rounded.png");
        assert_eq!(download_file_name(Some("noext")), "noext-rounded.png");
    }

    #[test]
    fn sequential_widget_renders_each_commit() {
        let session = WidgetSession::new();
        let bytes = sample_png(40, 40);
        let first = session
            .round_corners(TauriRoundRequest {
                image_bytes: bytes.clone(),
                width: 40,
                height: 40,
                radius: 8,
                max_radius: 200,
                edge: None,
                emit_mask: None,
                file_name: None,
            })
            .expect("first render");
        let second = session
            .round_corners(TauriRoundRequest {
                image_bytes: bytes,
                width: 40,
                height: 40,
                radius: 8,
                max_radius: 200,
                edge: None,
                emit_mask: None,
                file_name: None,
            })
            .expect("second render");

        assert_eq!(first.cutout_png, second.cutout_png);
        assert!(second.from_cache);
    }
}
