use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::Path;

use crate::domain::Route;
use crate::error::Result;
use crate::geometry;

#[derive(Parser)]
#[command(name = "fieldrun")]
#[command(author = "Fieldrun Team")]
#[command(version = "0.1.0")]
#[command(about = "Field agent route coordinator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus <FIELDRUN_ENV>.toml)
    #[arg(short, long, default_value = "config", env = "FIELDRUN_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator (REST + WebSocket server)
    Coordinator {
        /// Override the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one field agent against a coordinator
    Agent {
        /// Agent identifier
        #[arg(long)]
        id: String,
        /// Override the configured coordinator URL (ws://host:port)
        #[arg(long)]
        coordinator_url: Option<String>,
    },
    /// Print segment lengths and total distance of a JSON route file
    Route {
        /// Path to a JSON array of {lat, lon} points
        path: String,
    },
    /// Validate the configuration and exit
    Check,
}

/// Distance breakdown of a route
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub points: usize,
    pub segments: Vec<f64>,
    pub total_m: f64,
    /// Ticks to traverse at `steps_per_segment`
    pub ticks: u64,
}

impl RouteSummary {
    pub fn new(route: &Route, steps_per_segment: u32) -> Self {
        let segments = geometry::segment_lengths(route.points());
        Self {
            points: route.len(),
            total_m: segments.iter().sum(),
            ticks: route.segment_count() as u64 * steps_per_segment as u64,
            segments,
        }
    }
}

/// Load a route from a JSON file
pub fn load_route(path: impl AsRef<Path>) -> Result<Route> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

pub fn print_route_summary(summary: &RouteSummary) {
    println!("Points:   {}", summary.points);
    for (i, len) in summary.segments.iter().enumerate() {
        println!("  segment {:>3}: {:>10.1} m", i, len);
    }
    println!("Total:    {:.1} m", summary.total_m);
    println!("Ticks:    {}", summary.ticks);
}
