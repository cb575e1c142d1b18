use std::time::Duration;

use anyhow::{bail, Context};
use log::info;
use url::Url;

use crate::app_context::AppContext;
use crate::engine::{RemoteEngine, RigOnlyEngine, SimulationEngine};
use crate::face_tracking::FaceCaptor;
use crate::rig::{Rig, PARAMS_PER_HANDLE};
use crate::session::InteractiveSession;
use crate::settings::{ControlMode, Settings};
use crate::subspace_cache::SubspaceCache;

mod app_context;
mod clock;
mod engine;
mod face_tracking;
mod one_euro_filter;
mod osc_server;
mod rig;
mod session;
mod settings;
mod signal;
mod subspace_cache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = Settings::load_or_default().context("could not read settings.json")?;
    if settings.handle_index >= settings.num_handles {
        bail!(
            "handle_index {} is out of range for {} handles",
            settings.handle_index,
            settings.num_handles
        );
    }
    info!("Starting in {:?} mode", settings.mode);

    let results_dir = settings.results_dir();
    let cache = SubspaceCache::open(&results_dir)?;
    info!("Subspace cache in {}", cache.cache_dir().display());

    let mut engine: Box<dyn SimulationEngine> = match &settings.engine_url {
        Some(url) => {
            let url = Url::parse(url).with_context(|| format!("invalid engine url {}", url))?;
            let timeout = Duration::from_millis(settings.engine_timeout_ms.max(1));
            Box::new(RemoteEngine::connect(
                &url,
                settings.num_modes * PARAMS_PER_HANDLE,
                timeout,
            )?)
        }
        None => {
            info!("No engine configured, the mesh will follow the rig only");
            Box::new(RigOnlyEngine::new(settings.num_modes))
        }
    };

    let subspace = cache.prepare_engine(&mut engine, &settings.subspace_request(), settings.read_cache)?;
    info!(
        "Subspace ready: {} reduced coordinates, {} clusters",
        subspace.reduced_dimension(),
        subspace.num_clusters()
    );

    let p0 = Rig::identity(settings.num_handles).to_parameters();
    let mut session = InteractiveSession::new(engine, p0, settings.filter.clone())?;
    session.set_filter_enabled(settings.filter_enabled)?;

    let face_captor = match settings.mode {
        ControlMode::FaceTracking => Some(FaceCaptor::new(
            settings.osc_port,
            &settings.osc_pattern,
            settings.angle_units,
        )),
        ControlMode::AffineHandle => None,
    };

    let window_size = [720.0, 480.0];
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(window_size)
            .with_min_inner_size([480.0, 320.0]),
        ..Default::default()
    };

    let context = AppContext::new(settings, session, face_captor);

    eframe::run_native(
        "Fast CD",
        options,
        Box::new(|_ctx| {
            Ok(Box::new(context))
        })
    ).map_err(|e| anyhow::anyhow!("{:?}", e))?;

    Ok(())
}
