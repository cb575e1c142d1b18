use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{channel as tokio_channel, Receiver as TokioReceiver, Sender as TokioSender};
use wildmatch::WildMatch;

/// Listens for OSC control messages (e.g. head pose from a face tracker) on
/// a background task and hands matching samples to the frame loop.
pub struct OscServer {
    data_rx: Receiver<OscSample>,
    pattern_tx: TokioSender<WildMatch>,
    found_addresses: Arc<Mutex<HashSet<String>>>,
}

impl OscServer {
    pub fn new(port: u16, pattern: &str) -> Self {
        let (data_tx, data_rx) = channel::<OscSample>();
        let (pattern_tx, pattern_rx) = tokio_channel::<WildMatch>(1);

        let found_addresses = Arc::new(Mutex::new(HashSet::new()));

        let found_addresses_clone = found_addresses.clone();
        let pattern = WildMatch::new(pattern);
        tokio::spawn(async move {
            if let Err(error) =
                OscServer::osc_task(data_tx, pattern_rx, pattern, found_addresses_clone, port).await
            {
                warn!("OSC listener on port {} stopped: {:#}", port, error);
            }
        });

        Self {
            data_rx,
            pattern_tx,
            found_addresses,
        }
    }

    async fn osc_task(
        tx: Sender<OscSample>,
        mut pattern_rx: TokioReceiver<WildMatch>,
        mut pattern: WildMatch,
        found_addresses: Arc<Mutex<HashSet<String>>>,
        port: u16,
    ) -> anyhow::Result<()> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        info!("Listening for OSC on port {}", port);

        let mut buffer = [0; rosc::decoder::MTU];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buffer) => {
                    let (size, _) = received?;
                    let packet = match rosc::decoder::decode_udp(&buffer[..size]) {
                        Ok((_, packet)) => packet,
                        Err(error) => {
                            debug!("Dropping malformed OSC packet: {:?}", error);
                            continue;
                        }
                    };

                    let mut found = found_addresses.lock().expect("Could not lock");
                    for sample in extract_samples(packet, &pattern, &mut found) {
                        // The frame loop is gone once the receiver is dropped.
                        if tx.send(sample).is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(rx_pattern) = pattern_rx.recv() => {
                    pattern = rx_pattern;
                }
            }
        }
    }

    /// Latest sample received since the previous call, older ones are skipped.
    pub fn try_read_latest(&self) -> Option<OscSample> {
        self.data_rx.try_iter().last()
    }

    pub fn set_pattern(&self, pattern: &str) {
        let pattern_tx = self.pattern_tx.clone();
        let pattern = WildMatch::new(pattern);
        tokio::spawn(async move {
            if pattern_tx.send(pattern).await.is_err() {
                warn!("OSC listener is not running, pattern change dropped");
            }
        });
    }

    pub fn get_found_addresses(&self) -> HashSet<String> {
        let found_addresses = self.found_addresses.lock().expect("Could not lock");
        found_addresses.clone()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct OscSample {
    pub address: String,
    pub values: Vec<f32>,
}

/// Flattens a packet into numeric samples, recording every numeric address
/// seen and keeping only those matching `pattern`.
fn extract_samples(
    packet: OscPacket,
    pattern: &WildMatch,
    found_addresses: &mut HashSet<String>,
) -> Vec<OscSample> {
    let mut samples = Vec::new();
    let mut pending = vec![packet];

    while let Some(packet) = pending.pop() {
        match packet {
            OscPacket::Message(OscMessage { addr, args }) => {
                let values: Vec<f32> = args.iter().filter_map(numeric_value).collect();
                if values.is_empty() {
                    continue;
                }

                found_addresses.insert(addr.clone());
                if pattern.matches(&addr) {
                    samples.push(OscSample {
                        address: addr,
                        values,
                    });
                }
            }
            OscPacket::Bundle(bundle) => {
                pending.extend(bundle.content.into_iter().rev());
            }
        }
    }

    samples
}

fn numeric_value(arg: &OscType) -> Option<f32> {
    match arg {
        OscType::Float(value) => Some(*value),
        OscType::Double(value) => Some(*value as f32),
        OscType::Int(value) => Some(*value as f32),
        OscType::Long(value) => Some(*value as f32),
        _ => None,
    }
}
