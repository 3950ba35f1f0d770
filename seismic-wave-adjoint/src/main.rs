mod config;

use anyhow::{anyhow, Result};
use ndarray::Array2;
use tracing_subscriber::EnvFilter;

use config::Config;
use seismic_wave_adjoint::survey::{misfit_gradient, rms, synthesize, Gradient};
use seismic_wave_adjoint::Grid;

/// Interior cell holding the largest |value|.
fn peak(values: &Array2<f64>) -> ((usize, usize), f64) {
    values
        .indexed_iter()
        .fold(((0, 0), 0.0), |best, (index, &v)| {
            if v.abs() > best.1 {
                (index, v.abs())
            } else {
                best
            }
        })
}

fn report(grid: &Grid, gradient: &Gradient) {
    println!("Misfit: {:.6e}", gradient.misfit);
    for (name, values) in [("vp", &gradient.vp), ("vs", &gradient.vs), ("rho", &gradient.rho)] {
        let ((z, x), magnitude) = peak(values);
        println!(
            "  d/d{:<3}: peak |g| = {:.4e} at x={} m, z={} m",
            name,
            magnitude,
            grid.x_coord(x),
            grid.z_coord(z)
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::from_file(&path)?;
    config.print_summary();

    let grid = config.grid.grid();
    let propagator = config.propagator();
    let shots = config.shots();
    let truth = config.materials.true_model(&grid)?;
    let start = config.materials.starting_model(&grid)?;

    if !propagator.check_cfl(truth.max_vp().max(start.max_vp())) {
        return Err(anyhow!(
            "dt={} s is unstable for this model; lower it or cfl_safety",
            propagator.dt
        ));
    }

    let (lambda, mu) = start.lame();
    println!(
        "Starting model Lamé parameters: λ={:.4e} Pa, μ={:.4e} Pa",
        lambda[[0, 0]],
        mu[[0, 0]]
    );

    println!("Synthesizing {} shot(s) in the true model...", shots.len());
    let observed = synthesize(&propagator, &truth, &shots)?;
    for (i, traces) in observed.iter().enumerate() {
        println!("  Shot {}: rms amplitude {:.4e}", i, rms(traces));
    }

    println!("Computing misfit gradient for the starting model...");
    let gradient = misfit_gradient(&propagator, &start, &shots, &observed)?;
    report(&grid, &gradient);
    Ok(())
}
