use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use url::Url;

use super::{SimulationEngine, SimulationState, Subspace, SubspaceRequest};
use crate::signal::Signal;

const OP_STEP: u8 = 1;
const OP_SUBSPACE: u8 = 2;
const OP_PREPARE: u8 = 3;
const STATUS_OK: u8 = 0;

/// Engine running in another process, reached over TCP.
///
/// Vectors travel as a `u32` little-endian count followed by that many `f32`
/// little-endian values. A step sends `p` then the current `z` and receives
/// the new `z`. A subspace request sends JSON and receives JSON, both
/// length-prefixed. Preparing sends the subspace as JSON and waits for a
/// one-byte status.
///
/// Steps must be answered within the step timeout. Subspace work may take as
/// long as the engine needs. Once a step times out the late reply would be
/// read as the next one, so the engine refuses further steps.
pub struct RemoteEngine {
    stream: TcpStream,
    reduced_dimension: usize,
    step_timeout: Duration,
    desynchronized: bool,
}

impl RemoteEngine {
    pub fn connect(url: &Url, reduced_dimension: usize, step_timeout: Duration) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("engine url {} has no host", url))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("engine url {} has no port", url))?;

        let stream = TcpStream::connect((host, port))
            .with_context(|| format!("could not connect to engine at {}:{}", host, port))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(step_timeout))?;
        info!("Connected to simulation engine at {}:{}", host, port);

        Ok(Self {
            stream,
            reduced_dimension,
            step_timeout,
            desynchronized: false,
        })
    }

    /// Runs a request that may take arbitrarily long, then restores the
    /// step timeout.
    fn without_timeout<T>(&mut self, request: impl FnOnce(&mut TcpStream) -> Result<T>) -> Result<T> {
        self.stream.set_read_timeout(None)?;
        let result = request(&mut self.stream);
        self.stream.set_read_timeout(Some(self.step_timeout))?;
        result
    }
}

impl SimulationEngine for RemoteEngine {
    fn compute_subspace(&mut self, request: &SubspaceRequest) -> Result<Subspace> {
        let request = serde_json::to_vec(request)?;
        let reply = self.without_timeout(|stream| {
            stream.write_all(&[OP_SUBSPACE])?;
            write_bytes(stream, &request)?;
            read_bytes(stream)
        })?;
        serde_json::from_slice(&reply).context("engine sent a malformed subspace")
    }

    fn prepare(&mut self, subspace: &Subspace) -> Result<()> {
        let payload = serde_json::to_vec(subspace)?;
        let status = self.without_timeout(|stream| {
            stream.write_all(&[OP_PREPARE])?;
            write_bytes(stream, &payload)?;
            let mut status = [0u8; 1];
            stream.read_exact(&mut status)?;
            Ok(status)
        })?;
        if status[0] != STATUS_OK {
            bail!("engine rejected the subspace (status {})", status[0]);
        }

        self.reduced_dimension = subspace.reduced_dimension();
        Ok(())
    }

    fn step(&mut self, p: &Signal, state: &SimulationState) -> Result<Signal> {
        if self.desynchronized {
            bail!("engine connection lost after a timed out step");
        }

        self.stream.write_all(&[OP_STEP])?;
        write_values(&mut self.stream, p.as_slice())?;
        write_values(&mut self.stream, state.z().as_slice())?;

        let z = match read_values(&mut self.stream) {
            Ok(z) => z,
            Err(error) => {
                self.desynchronized = true;
                return Err(error.context(format!(
                    "engine did not answer a step within {:?}",
                    self.step_timeout
                )));
            }
        };
        if z.len() != self.reduced_dimension {
            bail!(
                "engine returned {} reduced coordinates, expected {}",
                z.len(),
                self.reduced_dimension
            );
        }
        Ok(Signal::column(z))
    }

    fn reduced_dimension(&self) -> usize {
        self.reduced_dimension
    }
}

fn write_bytes(writer: &mut impl Write, bytes: &[u8]) -> Result<()> {
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_bytes(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn write_values(writer: &mut impl Write, values: &[f64]) -> Result<()> {
    let mut buffer = Vec::with_capacity(4 + 4 * values.len());
    buffer.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        buffer.extend_from_slice(&(*value as f32).to_le_bytes());
    }
    writer.write_all(&buffer)?;
    Ok(())
}

fn read_values(reader: &mut impl Read) -> Result<Vec<f64>> {
    let bytes = {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let mut bytes = vec![0u8; 4 * u32::from_le_bytes(len) as usize];
        reader.read_exact(&mut bytes)?;
        bytes
    };

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
        .collect())
}
