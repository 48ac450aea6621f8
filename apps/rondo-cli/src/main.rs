use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use regex::Regex;
use rondo_bench::{default_cases, describe};
use rondo_core::{
    run_render, run_render_with_telemetry, MaskEdge, MaskShape, PlatformTarget, RadiusPolicy, RenderRequest,
    RuntimeConfig,
};
use rondo_raster::CpuRasterBackend;
use rondo_telemetry::sink_from_env;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "rondo", version, about = "Rounded-corner image masking")]
struct Cli {
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    #[command(name = "exec")]
    Exec(ExecArgs),
    Bench(BenchArgs),
}

#[derive(Args, Debug)]
struct ExecArgs {
    #[arg(long, short = 'i')]
    input: String,
    /// Root directory for regex input matching (defaults to current directory).
    #[arg(long)]
    input_root: Option<PathBuf>,
    /// Recurse when scanning directories / regex matches.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    recursive: bool,
    /// If set, abort the whole run on the first input error.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    strict: bool,
    #[arg(long, short = 'r', default_value_t = 50)]
    radius: u32,
    #[arg(long)]
    max_radius: Option<u32>,
    #[arg(long, short = 'e')]
    edge: Option<String>,
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'm')]
    output_mask: Option<PathBuf>,
    /// Output directory used when processing multiple inputs.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Render without writing any output files.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    render_only: bool,
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    profile: bool,
    #[arg(long, default_value_t = 1)]
    repeat: u32,
}

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(long, short = 'e', default_value = "smooth")]
    edge: String,
    #[arg(long, default_value_t = 1)]
    repeat: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        TopLevelCommand::Exec(args) => run_exec(args),
        TopLevelCommand::Bench(args) => run_bench(args),
    }
}

fn run_exec(args: ExecArgs) -> Result<()> {
    let total_start = Instant::now();
    let inputs = resolve_exec_inputs(&args)?;
    if inputs.is_empty() {
        return Err(anyhow!("no input images matched"));
    }

    let user_cfg = load_user_config()?;
    let runtime_cfg = rondo_core::resolve_runtime_config(RuntimeConfig {
        edge: args.edge.clone().unwrap_or(user_cfg.edge),
        max_radius: args.max_radius.unwrap_or(user_cfg.max_radius),
        emit_mask: user_cfg.emit_mask || args.output_mask.is_some(),
        output_dir: args
            .output_dir
            .as_ref()
            .map(|path| path.display().to_string())
            .or(user_cfg.output_dir),
    });
    let edge = parse_edge(&runtime_cfg.edge)?;
    let policy = RadiusPolicy {
        max_radius: runtime_cfg.max_radius,
        ..RadiusPolicy::default()
    };
    let output_dir = runtime_cfg.output_dir.as_ref().map(PathBuf::from);
    let backend = CpuRasterBackend::default();
    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());

    let bulk_mode = inputs.len() > 1;
    let mut results = Vec::with_capacity(inputs.len());
    let mut total_render_ms: u128 = 0;
    let mut total_write_ms: u128 = 0;

    for input_path in inputs {
        let read_start = Instant::now();
        let source = match std::fs::read(&input_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                if bulk_mode && !args.strict {
                    results.push(serde_json::json!({
                        "input": input_path,
                        "error": format!("failed to read input: {}", err),
                    }));
                    continue;
                }
                return Err(anyhow!("failed to read input {}: {}", input_path.display(), err));
            }
        };
        if source.len() as u64 > policy.max_input_bytes {
            eprintln!(
                "warning: {} is {} bytes, above the {} byte size guidance",
                input_path.display(),
                source.len(),
                policy.max_input_bytes
            );
        }
        let read_done = Instant::now();
        let decoded = match image::load_from_memory(&source) {
            Ok(img) => img,
            Err(err) => {
                if bulk_mode && !args.strict {
                    results.push(serde_json::json!({
                        "input": input_path,
                        "error": format!("failed to decode input: {}", err),
                    }));
                    continue;
                }
                return Err(anyhow!("failed to decode input {}: {}", input_path.display(), err));
            }
        };
        let decode_done = Instant::now();
        let (width, height) = decoded.dimensions();

        let (output_cutout, output_mask) =
            resolve_outputs_for_input(&args, output_dir.as_deref(), runtime_cfg.emit_mask, &input_path)?;
        let request = RenderRequest {
            requested_radius: args.radius,
            edge,
            emit_mask_png: output_mask.is_some(),
            input_path: Some(input_path.clone()),
            input_bytes: Some(source),
            width,
            height,
        };

        let mut last_result = None;
        let render_start = Instant::now();
        for _ in 0..args.repeat.max(1) {
            let result = run_render_with_telemetry(&backend, &request, &policy, PlatformTarget::Cli, telemetry_ref)?;
            last_result = Some(result);
        }
        let render_done = Instant::now();
        let result = last_result.ok_or_else(|| anyhow!("render did not produce a result"))?;
        total_render_ms += render_done.duration_since(render_start).as_millis();

        let write_start = Instant::now();
        if let Some(ref cutout_path) = output_cutout {
            write_output(cutout_path, &result.cutout_png)?;
        }
        if let Some(ref mask_path) = output_mask {
            let mask_png = result
                .mask_png
                .as_ref()
                .ok_or_else(|| anyhow!("backend did not emit the requested mask"))?;
            write_output(mask_path, mask_png)?;
        }
        let write_done = Instant::now();
        total_write_ms += write_done.duration_since(write_start).as_millis();

        let mut per = serde_json::Map::new();
        if args.profile {
            per.insert(
                "readInput".to_string(),
                serde_json::json!(read_done.duration_since(read_start).as_millis()),
            );
            per.insert(
                "decodeInput".to_string(),
                serde_json::json!(decode_done.duration_since(read_done).as_millis()),
            );
            per.insert(
                "render".to_string(),
                serde_json::json!(render_done.duration_since(render_start).as_millis()),
            );
            per.insert(
                "writeOutputs".to_string(),
                serde_json::json!(write_done.duration_since(write_start).as_millis()),
            );
        }

        results.push(serde_json::json!({
            "input": input_path,
            "requestedRadius": args.radius,
            "effectiveRadius": result.effective_radius,
            "shape": shape_label(result.shape),
            "fromCache": result.from_cache,
            "width": result.width,
            "height": result.height,
            "outputCutout": output_cutout,
            "outputMask": output_mask,
            "timingsMs": if args.profile { Some(serde_json::Value::Object(per)) } else { None }
        }));
    }

    let done = Instant::now();
    let mut timings = serde_json::Map::new();
    if args.profile {
        timings.insert("repeat".to_string(), serde_json::json!(args.repeat.max(1)));
        timings.insert("files".to_string(), serde_json::json!(results.len()));
        timings.insert("render".to_string(), serde_json::json!(total_render_ms));
        timings.insert("writeOutputs".to_string(), serde_json::json!(total_write_ms));
        timings.insert(
            "total".to_string(),
            serde_json::json!(done.duration_since(total_start).as_millis()),
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "results": results,
            "timingsMs": if args.profile { Some(serde_json::Value::Object(timings)) } else { None }
        }))?
    );
    Ok(())
}

fn run_bench(args: BenchArgs) -> Result<()> {
    let edge = parse_edge(&args.edge)?;
    let backend = CpuRasterBackend::default();
    let cases = default_cases();
    eprintln!("benchmarking {}", describe(&cases));

    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        let policy = RadiusPolicy {
            max_radius: case.radius.max(RadiusPolicy::default().max_radius),
            ..RadiusPolicy::default()
        };
        let repeat = args.repeat.max(1);
        let start = Instant::now();
        let mut last_result = None;
        for round in 0..repeat {
            // A fresh checkerboard per round keeps the derived-output cache out
            // of the measurement.
            let request = RenderRequest {
                requested_radius: case.radius,
                edge,
                emit_mask_png: false,
                input_path: None,
                input_bytes: Some(checkerboard_png(case.width, case.height, round)?),
                width: case.width,
                height: case.height,
            };
            last_result = Some(run_render(&backend, &request, &policy)?);
        }
        let elapsed_ms = start.elapsed().as_millis();
        let result = last_result.ok_or_else(|| anyhow!("benchmark did not produce a result"))?;
        results.push(serde_json::json!({
            "case": case.name,
            "width": case.width,
            "height": case.height,
            "requestedRadius": case.radius,
            "effectiveRadius": result.effective_radius,
            "shape": shape_label(result.shape),
            "repeat": repeat,
            "totalMs": elapsed_ms,
        }));
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "results": results }))?
    );
    Ok(())
}

fn checkerboard_png(width: u32, height: u32, seed: u32) -> Result<Vec<u8>> {
    let tint = (seed % 200) as u8;
    let img = RgbaImage::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([10 + tint, 10, 10, 255])
        }
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img).write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}

fn resolve_exec_inputs(args: &ExecArgs) -> Result<Vec<PathBuf>> {
    let candidate = PathBuf::from(&args.input);
    if candidate.exists() {
        if candidate.is_dir() {
            return collect_images_in_dir(&candidate, args.recursive);
        }
        return Ok(vec![candidate]);
    }
    // Treat as regex matching file name under input_root.
    let root = args
        .input_root
        .clone()
        .unwrap_or(std::env::current_dir().map_err(|e| anyhow!(e.to_string()))?);
    let re = Regex::new(&args.input).map_err(|e| anyhow!("invalid regex: {}", e))?;
    collect_images_by_regex(&root, args.recursive, &re)
}

fn collect_images_in_dir(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let walker = if recursive {
        WalkDir::new(dir)
    } else {
        WalkDir::new(dir).max_depth(1)
    };
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.into_path();
        if is_supported_image(&p) {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

fn collect_images_by_regex(root: &Path, recursive: bool, re: &Regex) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let walker = if recursive {
        WalkDir::new(root)
    } else {
        WalkDir::new(root).max_depth(1)
    };
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let p = entry.into_path();
        if !is_supported_image(&p) {
            continue;
        }
        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if re.is_match(name) {
            out.push(p);
        }
    }
    out.sort();
    Ok(out)
}

fn is_supported_image(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif")
}

fn resolve_outputs_for_input(
    args: &ExecArgs,
    output_dir: Option<&Path>,
    emit_mask: bool,
    input_path: &Path,
) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
    if args.render_only {
        return Ok((None, None));
    }

    let multi_input = {
        let as_path = PathBuf::from(&args.input);
        (as_path.exists() && as_path.is_dir()) || !as_path.exists()
    };

    // When multi-input, prefer explicit --output-dir, otherwise interpret -o/-m as directories.
    let cutout = if let Some(spec) = args.output.clone() {
        if multi_input {
            let dir = output_dir.map(Path::to_path_buf).unwrap_or(spec);
            Some(dir.join(rounded_file_name(input_path)?))
        } else {
            validate_png_extension(&spec)?;
            Some(spec)
        }
    } else if let Some(dir) = output_dir {
        Some(dir.join(rounded_file_name(input_path)?))
    } else {
        Some(default_rounded_path(input_path)?)
    };

    let mask = if let Some(spec) = args.output_mask.clone() {
        if multi_input {
            let dir = output_dir.map(Path::to_path_buf).unwrap_or(spec);
            Some(dir.join(mask_file_name(input_path)?))
        } else {
            Some(spec)
        }
    } else if emit_mask {
        if let Some(dir) = output_dir {
            Some(dir.join(mask_file_name(input_path)?))
        } else {
            Some(default_mask_path(input_path)?)
        }
    } else {
        None
    };

    Ok((cutout, mask))
}

fn file_stem(input: &Path) -> Result<String> {
    Ok(input
        .file_stem()
        .ok_or_else(|| anyhow!("input file must include a valid file name"))?
        .to_string_lossy()
        .into_owned())
}

fn rounded_file_name(input: &Path) -> Result<String> {
    Ok(format!("{}-rounded.png", file_stem(input)?))
}

fn mask_file_name(input: &Path) -> Result<String> {
    Ok(format!("{}-mask.png", file_stem(input)?))
}

fn default_rounded_path(input: &Path) -> Result<PathBuf> {
    let filename = rounded_file_name(input)?;
    Ok(match input.parent() {
        Some(parent) => parent.join(filename),
        None => PathBuf::from(filename),
    })
}

fn default_mask_path(input: &Path) -> Result<PathBuf> {
    let filename = mask_file_name(input)?;
    Ok(match input.parent() {
        Some(parent) => parent.join(filename),
        None => PathBuf::from(filename),
    })
}

fn validate_png_extension(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if ext != "png" {
        return Err(anyhow!(
            "output must be a .png file (received: '{}')",
            path.display()
        ));
    }
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(".rondo").join("config.json"))
}

fn load_user_config() -> Result<RuntimeConfig> {
    let Some(path) = default_config_path() else {
        return Ok(RuntimeConfig::default());
    };
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(_) => return Ok(RuntimeConfig::default()),
    };
    serde_json::from_slice(&data).map_err(|e| anyhow!("invalid config {}: {}", path.display(), e))
}

fn parse_edge(value: &str) -> Result<MaskEdge> {
    match value.to_ascii_lowercase().as_str() {
        "smooth" | "aa" => Ok(MaskEdge::Smooth),
        "hard" | "binary" => Ok(MaskEdge::Hard),
        other => Err(anyhow!(
            "unknown edge mode '{}'; expected one of: smooth (aa), hard (binary)",
            other
        )),
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
