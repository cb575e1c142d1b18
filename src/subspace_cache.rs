use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::engine::{SimulationEngine, Subspace, SubspaceRequest};

/// `./results/<app>/<mesh>/`, the default place for results and the cache.
pub fn default_results_dir(app: &str, mesh_name: &str) -> PathBuf {
    Path::new(".").join("results").join(app).join(mesh_name)
}

/// On-disk cache of precomputed skinning subspaces, one JSON file per
/// request under `<results>/cache/`.
pub struct SubspaceCache {
    cache_dir: PathBuf,
}

impl SubspaceCache {
    pub fn open(results_dir: &Path) -> Result<Self> {
        let cache_dir = results_dir.join("cache");
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("could not create cache dir {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn path_for(&self, request: &SubspaceRequest) -> PathBuf {
        self.cache_dir.join(format!(
            "subspace_m{}_c{}_{}.json",
            request.num_modes,
            request.num_clusters,
            request.constraint_enforcement.as_str()
        ))
    }

    pub fn load(&self, request: &SubspaceRequest) -> Result<Option<Subspace>> {
        let path = self.path_for(request);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)?;
        let subspace = serde_json::from_str(&contents)
            .with_context(|| format!("malformed cache file {}", path.display()))?;
        Ok(Some(subspace))
    }

    pub fn store(&self, request: &SubspaceRequest, subspace: &Subspace) -> Result<()> {
        let path = self.path_for(request);
        let contents = serde_json::to_string(subspace)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("could not write cache file {}", path.display()))?;
        Ok(())
    }

    /// Returns the cached subspace when `read_cache` is set and one exists,
    /// otherwise computes it and refreshes the cache.
    pub fn load_or_compute<F>(
        &self,
        request: &SubspaceRequest,
        read_cache: bool,
        compute: F,
    ) -> Result<Subspace>
    where
        F: FnOnce(&SubspaceRequest) -> Result<Subspace>,
    {
        if read_cache {
            match self.load(request) {
                Ok(Some(subspace)) => {
                    info!("Loaded subspace from {}", self.path_for(request).display());
                    return Ok(subspace);
                }
                Ok(None) => info!("No cached subspace, computing"),
                Err(error) => warn!("Ignoring cached subspace: {:#}", error),
            }
        }

        let subspace = compute(request)?;
        self.store(request, &subspace)?;
        Ok(subspace)
    }

    /// Gets the subspace for `request` (through the cache when the engine
    /// allows it) and loads it into the engine.
    pub fn prepare_engine<E: SimulationEngine + ?Sized>(
        &self,
        engine: &mut E,
        request: &SubspaceRequest,
        read_cache: bool,
    ) -> Result<Subspace> {
        let subspace = if engine.caches_subspace() {
            self.load_or_compute(request, read_cache, |request| engine.compute_subspace(request))?
        } else {
            engine.compute_subspace(request)?
        };
        engine.prepare(&subspace)?;
        Ok(subspace)
    }
}
