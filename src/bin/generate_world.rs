//! World pre-generation tool: fully generates a square region of cubes to disk.
//!
//! Usage: cargo run --release --bin generate_world -- [OPTIONS]
//!
//! Options:
//!   --radius <COLUMNS>  Region half-width in columns (default: 4)
//!   --height <CUBES>    Cubes generated above and below y = 0 (default: 4)
//!   --seed <SEED>       Terrain seed (default: from config, else 12345)
//!   --out <DIR>         Output directory (default: from config, else "world")
//!   --config <FILE>     World config JSON to start from
//!
//! Output structure:
//!   <out>/
//!     world.json                     # Config the world was generated with
//!     columns/column_{x}_{z}.rkc
//!     cubes/y_{y}/cube_{x}_{y}_{z}.rkc

use std::path::PathBuf;
use std::time::Instant;

use cubeworld::core::types::Result;
use cubeworld::server::{CubeWorld, WorldConfig};
use cubeworld::streaming::Requirement;
use cubeworld::world::CubeCoord;

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        eprintln!("generate_world failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let mut config = match parse_str_arg(args, "--config") {
        Some(path) => WorldConfig::load_sync(&PathBuf::from(path))?,
        None => WorldConfig::default(),
    };
    if let Some(seed) = parse_u32_arg(args, "--seed") {
        config.seed = seed;
    }
    if let Some(out) = parse_str_arg(args, "--out") {
        config.storage_dir = PathBuf::from(out);
    }
    let radius = parse_i32_arg(args, "--radius").unwrap_or(4).max(0);
    let height = parse_i32_arg(args, "--height").unwrap_or(4).max(1);

    let side = radius * 2 + 1;
    let total = (side * side * height * 2) as usize;

    println!("=== Cube World Generator ===");
    println!("Seed:    {}", config.seed);
    println!("Region:  {} x {} columns, cubes y = {}..{}", side, side, -height, height - 1);
    println!("Cubes:   {}", total);
    println!("Budget:  {} ms/tick, backlog cap {}", config.pipeline.tick_budget_ms, config.pipeline.backlog_cap);
    println!("Output:  {}", config.storage_dir.display());
    println!();

    config.save_sync(&config.storage_dir.join("world.json"))?;
    let mut world = CubeWorld::open(&config)?;

    let start = Instant::now();
    let mut done = 0usize;
    for x in -radius..=radius {
        for z in -radius..=radius {
            for y in -height..height {
                if world.get_cube(CubeCoord::new(x, y, z), Requirement::Light).is_none() {
                    log::warn!("Cube ({}, {}, {}) could not be generated", x, y, z);
                }
                done += 1;
                if done % 500 == 0 || done == total {
                    let rate = done as f64 / start.elapsed().as_secs_f64();
                    eprintln!("  [{}/{}] {:.0} cubes/sec", done, total, rate);
                }
            }
        }
    }
    let forced = start.elapsed();

    let advanced = world.generate_all();
    let finished = start.elapsed();

    println!();
    println!(
        "Forced {} cubes in {:.1}s, pipeline advanced {} stages in {:.1}s",
        done,
        forced.as_secs_f64(),
        advanced,
        (finished - forced).as_secs_f64()
    );
    println!("{}", world.cache());

    world.shutdown();

    println!();
    println!("=== Generation Complete ===");
    println!("Output: {}", config.storage_dir.display());
    Ok(())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_i32_arg(args: &[String], flag: &str) -> Option<i32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
