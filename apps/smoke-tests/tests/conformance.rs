use anyhow::Result;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use rondo_core::{run_render, v1, MaskEdge, MaskShape, RadiusPolicy, RenderRequest, RenderResult};
use rondo_raster::CpuRasterBackend;

fn build_sample_png(width: u32, height: u32) -> Result<Vec<u8>> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([10, 10, 10, 255])
        }
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img).write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

fn direct_render(bytes: Vec<u8>, width: u32, height: u32, radius: u32) -> Result<RenderResult> {
    let request = RenderRequest {
        requested_radius: radius,
        edge: MaskEdge::Smooth,
        emit_mask_png: false,
        input_path: None,
        input_bytes: Some(bytes),
        width,
        height,
    };
    Ok(run_render(&CpuRasterBackend::default(), &request, &RadiusPolicy::default())?)
}

#[test]
fn adapters_produce_identical_cutouts() -> Result<()> {
    let sample = build_sample_png(100, 100)?;

    let direct = direct_render(sample.clone(), 100, 100, 20)?;
    let session = tauri_plugin_rondo::WidgetSession::new();
    let widget = session.round_corners(tauri_plugin_rondo::TauriRoundRequest {
        image_bytes: sample,
        width: 100,
        height: 100,
        radius: 20,
        max_radius: 200,
        edge: None,
        emit_mask: None,
        file_name: Some("board.png".to_string()),
    })?;

    assert_eq!(direct.effective_radius, widget.effective_radius);
    assert_eq!(direct.shape, widget.shape);
    assert_eq!(direct.cutout_png, widget.cutout_png);
    assert_eq!(widget.download_name, "board-rounded.png");
    Ok(())
}

#[test]
fn oversized_radius_conforms_to_the_stadium_scenario() -> Result<()> {
    let sample = build_sample_png(100, 50)?;

    let direct = direct_render(sample.clone(), 100, 50, 200)?;
    assert_eq!(direct.effective_radius, 25.0);
    assert_eq!(direct.shape, MaskShape::Stadium);

    let session = tauri_plugin_rondo::WidgetSession::new();
    let v1_response = tauri_plugin_rondo::round_corners_v1(
        &session,
        v1::RoundCornersRequest {
            image_bytes: sample,
            width: 100,
            height: 50,
            radius: 200,
            edge: Some("smooth".to_string()),
            emit_mask: None,
            max_radius: Some(200),
            file_name: None,
        },
    )
    .map_err(anyhow::Error::msg)?;

    assert_eq!(v1_response.effective_radius, 25.0);
    assert_eq!(v1_response.shape, "stadium");
    assert_eq!(v1_response.cutout_png, direct.cutout_png);
    Ok(())
}

#[test]
fn png_round_trip_preserves_the_transparency_pattern() -> Result<()> {
    let sample = build_sample_png(64, 64)?;
    let result = direct_render(sample, 64, 64, 16)?;

    let first_pass = image::load_from_memory(&result.cutout_png)?.to_rgba8();
    assert_eq!(first_pass.dimensions(), (64, 64));

    let mut re_encoded = Vec::new();
    DynamicImage::ImageRgba8(first_pass.clone())
        .write_to(&mut std::io::Cursor::new(&mut re_encoded), ImageFormat::Png)?;
    let second_pass = image::load_from_memory(&re_encoded)?.to_rgba8();

    assert_eq!(second_pass.dimensions(), (64, 64));
    for (x, y) in [(0u32, 0u32), (63, 0), (0, 63), (63, 63)] {
        assert_eq!(first_pass.get_pixel(x, y)[3], 0, "corner ({}, {})", x, y);
        assert_eq!(
            first_pass.get_pixel(x, y)[3],
            second_pass.get_pixel(x, y)[3],
            "corner ({}, {})",
            x,
            y
        );
    }
    assert_eq!(second_pass.get_pixel(32, 32)[3], 255);
    Ok(())
}
