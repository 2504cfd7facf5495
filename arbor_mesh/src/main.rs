// Arbor mesh generator: CLI entry point.
//
// Grows one or more skeletons from a tree preset and meshes them, printing
// per-tree statistics. The pipeline: config load → skeleton growth → mesh
// pass(es) → report.
//
// Usage:
//   cargo run -p arbor_mesh --bin arbor_generate -- [config.json] [--seed N]
//     [--preset NAME] [--quality preview|final] [--hard] [--forest N]
//     [--verbose]
//
// Presets: oak, conifer, sapling

use arbor_mesh::config::MeshConfig;
use arbor_mesh::{NormalMode, Quality, TreeMesh, TreeProfile, build_forest, grow_skeleton};
use arbor_prng::ArborRng;
use std::time::Instant;
use tracing::Level;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let config_path = args
        .get(1)
        .filter(|s| !s.starts_with("--"))
        .map(|s| s.as_str());
    let seed: u64 = parse_flag(&args, "--seed").unwrap_or(1);
    let preset: String = parse_flag(&args, "--preset").unwrap_or_else(|| "oak".to_string());
    let quality: Option<String> = parse_flag(&args, "--quality");
    let forest: usize = parse_flag(&args, "--forest").unwrap_or(1).max(1);
    let hard = args.iter().any(|a| a == "--hard");
    let verbose = args.iter().any(|a| a == "--verbose");

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match config_path {
        Some(path) => match MeshConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => MeshConfig::default(),
    };
    if let Some(q) = quality {
        config.quality = match q.as_str() {
            "preview" => Quality::Preview,
            "final" => Quality::Final,
            other => {
                eprintln!("Unknown quality '{}', expected preview or final", other);
                std::process::exit(1);
            }
        };
    }
    if hard {
        config.normal_mode = NormalMode::Hard;
    }
    if let Err(e) = config.validate() {
        // The mesher clamps, so this is only advisory.
        eprintln!("Warning: {}", e);
    }

    let Some(profile) = TreeProfile::by_name(&preset) else {
        eprintln!("Unknown preset '{}', expected oak, conifer or sapling", preset);
        std::process::exit(1);
    };

    println!("=== Arbor Mesh Generator ===");
    println!("Preset: {}", preset);
    println!("Seed: {}", seed);
    println!("Quality: {:?}, normals: {:?}", config.quality, config.normal_mode);
    println!("Sides: {:?}", config.side_bounds());
    if forest > 1 {
        println!("Trees: {}", forest);
    }
    println!();

    println!("[1/2] Growing skeletons...");
    let start = Instant::now();
    let skeletons: Vec<_> = (0..forest as u64)
        .map(|i| grow_skeleton(&profile, &mut ArborRng::new(seed.wrapping_add(i))))
        .collect();
    for (i, s) in skeletons.iter().enumerate() {
        println!(
            "  Tree {}: {} branches, {} levels",
            i,
            s.len(),
            s.max_level() + 1
        );
    }
    println!("  Took {:.1?}", start.elapsed());

    println!("[2/2] Meshing...");
    let start = Instant::now();
    let meshes = build_forest(&skeletons, &config);
    println!("  Took {:.1?}", start.elapsed());
    println!();

    for (i, mesh) in meshes.iter().enumerate() {
        match mesh {
            Some(mesh) => print_stats(i, mesh, verbose),
            None => println!("Tree {}: empty skeleton, no mesh", i),
        }
    }
}

fn print_stats(index: usize, mesh: &TreeMesh, verbose: bool) {
    println!("=== Tree {} ===", index);
    println!("Skins: {}", mesh.skins.len());
    println!("Vertices: {}", mesh.vertex_count());
    println!("Triangles: {}", mesh.triangle_count());
    let (lo, hi) = mesh.positions.iter().fold(
        (glam::Vec3::splat(f32::INFINITY), glam::Vec3::splat(f32::NEG_INFINITY)),
        |(lo, hi), p| (lo.min(*p), hi.max(*p)),
    );
    println!("Bounds: {:.2} .. {:.2}", lo, hi);
    let max_wind = mesh.uv2.iter().map(|w| w.x).fold(0.0f32, f32::max);
    println!("Max primary wind weight: {:.3}", max_wind);
    if verbose {
        for span in &mesh.skins {
            println!(
                "  skin {} (level {}): {} vertices, {} triangles",
                span.root,
                span.level,
                span.vertex_count,
                span.index_count / 3
            );
        }
    }
    println!();
}

/// Parse a `--flag value` pair from the argument list.
fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
