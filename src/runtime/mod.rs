use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use platter::{Rig, Track};

mod logging;
mod settings;

/// Import one file through the configured importer and report what was
/// loaded.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (settings, problem) = settings::load_settings();
    logging::init(&settings.log);
    if let Some(msg) = problem {
        warn!("{msg}");
    }

    let Some(path) = env::args_os().nth(1).map(PathBuf::from) else {
        return Err("usage: platter <file>".into());
    };

    let mut rig = Rig::new()?;
    let track = Arc::new(Track::new(&settings.track, rig.waker()));
    rig.add_track(track.clone());
    let rig = rig.spawn()?;

    info!(path = %path.display(), importer = %track.importer().display(), "importing");
    track.import(&path)?;

    while !track.wait_idle(Duration::from_secs(1)) {
        debug!(samples = track.status().length, "loading");
    }
    rig.quit();

    report(&track, settings.track.overview_res);
    Ok(())
}

fn report(track: &Track, overview_res: usize) {
    let status = track.status();
    let seconds = status.length as f64 / status.rate as f64;
    let peak = (0..status.length)
        .step_by(overview_res.max(1))
        .filter_map(|i| track.overview(i))
        .max()
        .unwrap_or(0);

    info!(
        samples = status.length,
        seconds,
        blocks = status.blocks,
        conclusion = ?status.conclusion,
        exit_ok = ?status.exit_ok,
        peak_overview = peak,
        "track loaded"
    );
}
