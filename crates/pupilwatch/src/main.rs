//! `pupilwatch` - CLI for pupil dilation tests
//!
//! Runs dilation tests on recorded eye video and manages the stored results.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;

use clap::Parser;
use tracing::{info, warn};

use pupilwatch::cli::{Cli, Command, ConfigCommand, PlotCommand, RunCommand, SessionsCommand};
use pupilwatch::frames::source_digest;
use pupilwatch::plot::{render_chart, PlotOptions};
use pupilwatch::{
    init_logging, open_source, Annotator, Config, DilationTest, Error, HaarCascade, SessionReport,
    StopHandle, Storage,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Run(run_cmd) => handle_run(&config, run_cmd).await,
        Command::Sessions(sessions_cmd) => handle_sessions(&config, sessions_cmd),
        Command::Plot(plot_cmd) => handle_plot(&config, &plot_cmd),
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

async fn handle_run(config: &Config, cmd: RunCommand) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = config.clone();
    if let Some(max_frames) = cmd.max_frames {
        config.input.max_frames = max_frames;
    }
    let video = cmd.video.unwrap_or_else(|| config.input.video_path.clone());
    let cascade_path = cmd
        .cascade
        .unwrap_or_else(|| config.input.cascade_path.clone());
    let plot_path = cmd.plot.unwrap_or_else(|| config.plot.output_path.clone());

    let cascade = HaarCascade::from_file(&cascade_path)?;
    let mut test = DilationTest::new(cascade, &config);
    if let Some(dir) = &cmd.annotate_dir {
        test = test.with_annotator(Annotator::new(dir)?);
    }

    // Ctrl-C ends the test after the current frame
    let stop = StopHandle::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current frame");
            signal_stop.stop();
        }
    });

    let worker_video = video.clone();
    let mut report = tokio::task::spawn_blocking(move || -> pupilwatch::Result<SessionReport> {
        let mut source = open_source(&worker_video)?;
        let mut report = test.run(source.as_mut(), &stop);
        report.source_digest = match source_digest(&worker_video) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!("Could not digest {}: {e}", worker_video.display());
                None
            }
        };
        Ok(report)
    })
    .await??;

    if report.stopped_early {
        warn!("The test was interrupted; results are incomplete");
    }

    if !cmd.no_save {
        let storage = Storage::open(config.database_path())?;
        report.id = Some(storage.save_session(&report)?);
        if config.storage.max_sessions > 0 {
            storage.prune_keep_recent(config.storage.max_sessions)?;
        }
    }

    let options = PlotOptions::from(&config.plot);
    let chart = match render_chart(&report.radii_mm(), &options, &plot_path) {
        Ok(()) => Some(plot_path),
        Err(Error::EmptySeries) => {
            warn!("No pupil measurements were accepted; skipping the chart");
            None
        }
        Err(e) => return Err(e.into()),
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, chart.as_deref());
    }
    Ok(())
}

fn print_report(report: &SessionReport, chart: Option<&Path>) {
    println!("Pupil dilation test");
    println!("-------------------");
    println!("Source:            {}", report.source);
    println!("Frames processed:  {}", report.frames_processed);
    println!("Frames w/o eyes:   {}", report.frames_without_eyes);
    println!("Eye lost events:   {}", report.eye_lost_events);
    println!("Measurements:      {}", report.measurements.len());
    if let (Some(mean), Some(min), Some(max)) = (
        report.mean_radius_mm(),
        report.min_radius_mm(),
        report.max_radius_mm(),
    ) {
        println!("Mean radius:       {mean:.3} mm");
        println!("Radius range:      {min:.3} to {max:.3} mm");
    }
    if report.stopped_early {
        println!("Stopped early:     yes");
    }
    if let Some(error) = &report.error {
        println!("Source error:      {error}");
    }
    match report.id {
        Some(id) => println!("Session:           {id}"),
        None => println!("Session:           not saved"),
    }
    match chart {
        Some(path) => println!("Chart:             {}", path.display()),
        None => println!("Chart:             none"),
    }
}

fn handle_sessions(
    config: &Config,
    cmd: SessionsCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::open(config.database_path())?;
    match cmd {
        SessionsCommand::List { limit, json } => {
            let sessions = storage.list_sessions(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No sessions recorded.");
            } else {
                println!(
                    "{:>5}  {:<20}  {:>7}  {:>6}  {:>9}  source",
                    "id", "started", "frames", "pupils", "mean mm"
                );
                for s in sessions {
                    let mean = s
                        .mean_radius_mm
                        .map_or_else(|| "-".to_string(), |m| format!("{m:.3}"));
                    println!(
                        "{:>5}  {:<20}  {:>7}  {:>6}  {:>9}  {}{}",
                        s.id,
                        s.started_at.format("%Y-%m-%d %H:%M:%S"),
                        s.frames_processed,
                        s.measurement_count,
                        mean,
                        s.source,
                        if s.stopped_early { " (interrupted)" } else { "" }
                    );
                }
            }
        }
        SessionsCommand::Show { id, json } => {
            let report = storage
                .get_session(id)?
                .ok_or(Error::SessionNotFound { id })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Started:           {}", report.started_at.to_rfc3339());
                println!("Finished:          {}", report.finished_at.to_rfc3339());
                if let Some(digest) = &report.source_digest {
                    println!("Source digest:     {digest}");
                }
                print_report(&report, None);
                println!();
                println!("{:>7}  {:>4}  {:>9}  {:>9}", "frame", "eye", "radius px", "radius mm");
                for m in &report.measurements {
                    println!(
                        "{:>7}  {:>4}  {:>9}  {:>9.3}",
                        m.frame_index, m.eye_index, m.radius_px, m.radius_mm
                    );
                }
            }
        }
        SessionsCommand::Delete { id } => {
            if storage.delete_session(id)? {
                println!("Deleted session {id}.");
            } else {
                return Err(Error::SessionNotFound { id }.into());
            }
        }
        SessionsCommand::Prune { keep } => {
            let deleted = storage.prune_keep_recent(keep)?;
            println!("Deleted {deleted} sessions.");
        }
    }
    Ok(())
}

fn handle_plot(config: &Config, cmd: &PlotCommand) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::open(config.database_path())?;
    let report = storage
        .get_session(cmd.id)?
        .ok_or(Error::SessionNotFound { id: cmd.id })?;
    let path = cmd
        .out
        .clone()
        .unwrap_or_else(|| config.plot.output_path.clone());

    render_chart(&report.radii_mm(), &PlotOptions::from(&config.plot), &path)?;
    info!("Plotted session {}", cmd.id);
    println!("{}", path.display());
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = config.database_path();
    let stats = if db_path.exists() {
        Some(Storage::open(&db_path)?.stats()?)
    } else {
        None
    };

    if json {
        let status = serde_json::json!({
            "database_path": db_path,
            "database_exists": stats.is_some(),
            "stats": stats,
            "video_feature": cfg!(feature = "video"),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("pupilwatch status");
        println!("-----------------");
        println!("Database:      {}", db_path.display());
        println!(
            "Video input:   {}",
            if cfg!(feature = "video") {
                "enabled"
            } else {
                "disabled (GIF and image directories only)"
            }
        );
        match stats {
            Some(stats) => {
                println!("Sessions:      {}", stats.total_sessions);
                println!("Measurements:  {}", stats.total_measurements);
                if let Some(newest) = stats.newest_session {
                    println!("Latest run:    {}", newest.format("%Y-%m-%d %H:%M:%S"));
                }
                println!("Size:          {} bytes", stats.db_size_bytes);
            }
            None => println!("Sessions:      none recorded yet"),
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Input]");
                println!("  Video:              {}", config.input.video_path.display());
                println!("  Cascade:            {}", config.input.cascade_path.display());
                println!("  Max frames:         {}", config.input.max_frames);
                println!();
                println!("[Eyes]");
                println!("  Scale factor:       {}", config.eyes.scale_factor);
                println!("  Min neighbors:      {}", config.eyes.min_neighbors);
                println!();
                println!("[Pupil]");
                println!("  Hough dp:           {}", config.pupil.hough_dp);
                println!(
                    "  Radius range:       {}..{}",
                    config.pupil.min_radius, config.pupil.max_radius
                );
                println!("  Min pupil radius:   {} px", config.pupil.min_pupil_radius_px);
                println!("  mm per pixel:       {}", config.pupil.mm_per_pixel);
                println!();
                println!("[Plot]");
                println!("  Output:             {}", config.plot.output_path.display());
                println!("  Downsample step:    {}", config.plot.downsample_step);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Max sessions:       {}", config.storage.max_sessions);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}
