//! MQTT transport for the message bridge.
//!
//! Production jigs talk to the device network through an MQTT broker. Topic
//! layout:
//!
//! - `solar/bridge/tx|rx`: bridge management (gateway enumeration)
//! - `solar/device/<uid>/tx|rx|result`: low-level commands through a gateway
//! - `solar/mlpe/<id>/rx|adc`: per-device responses and raw ADC samples
//! - `solar/feature/<uid>/tx|status`: high-level features (ADC dump)
//!
//! The transport never bounds waiting time itself; the protocol client and
//! the selector own all timeouts.

use super::{
    AdcSample, BridgeError, CommandFrame, InfoFrame, MeshConfigFrame, MessageBridge,
    MpptStatusFrame, ResponseFrame,
};
use crate::device::{BeaconObservation, DeviceId, GatewayId, GatewayInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const SUBSCRIPTIONS: &[&str] = &[
    "solar/bridge/rx",
    "solar/device/+/rx",
    "solar/device/+/result",
    "solar/mlpe/+/rx",
    "solar/mlpe/+/adc",
    "solar/feature/+/status",
];

#[derive(Default)]
struct Inner {
    /// Pending LIST_STICKS reply.
    gateways: Mutex<Option<oneshot::Sender<Vec<GatewayInfo>>>>,
    /// Pending data responses keyed by response wire name.
    responses: Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>,
    /// Pending acknowledgements keyed by command wire name.
    acks: Mutex<HashMap<String, oneshot::Sender<String>>>,
    /// Raw ADC sample buffers keyed by canonical target id.
    adc: Mutex<HashMap<String, Vec<AdcSample>>>,
}

/// [`MessageBridge`] over an MQTT broker.
pub struct MqttBridge {
    client: AsyncClient,
    inner: Arc<Inner>,
}

impl MqttBridge {
    /// Connects to the broker and starts the reader task.
    pub async fn connect(
        host: &str,
        port: u16,
        client_id: &str,
    ) -> Result<Self, BridgeError> {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        let (client, eventloop) = AsyncClient::new(options, 64);

        let inner = Arc::new(Inner::default());
        tokio::spawn(reader_task(eventloop, inner.clone()));

        for topic in SUBSCRIPTIONS {
            client
                .subscribe(*topic, QoS::AtMostOnce)
                .await
                .map_err(|e| BridgeError::Transport(e.to_string()))?;
        }

        Ok(Self { client, inner })
    }

    async fn publish_json(
        &self,
        topic: String,
        payload: serde_json::Value,
    ) -> Result<(), BridgeError> {
        let body =
            serde_json::to_vec(&payload).map_err(|e| BridgeError::Payload(e.to_string()))?;
        self.client
            .publish(topic, QoS::AtMostOnce, false, body)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    /// Registers interest in a data response and returns the receiver.
    fn expect_response(&self, key: &str) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.inner.responses.lock().insert(key.to_string(), tx);
        rx
    }

    fn expect_ack(&self, command: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.inner.acks.lock().insert(command.to_string(), tx);
        rx
    }

    async fn run_device_command(
        &self,
        gateway: &GatewayId,
        target: &str,
        command: &str,
        mut args: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), BridgeError> {
        args.insert("target_id".to_string(), serde_json::json!(target));
        if !args.contains_key("route") {
            let route = if target == "0" { 1 } else { 2 };
            args.insert("route".to_string(), serde_json::json!(route));
        }
        self.publish_json(
            format!("solar/device/{gateway}/tx"),
            serde_json::json!({ "command": command, "args": args }),
        )
        .await
    }
}

#[async_trait]
impl MessageBridge for MqttBridge {
    async fn list_gateways(&self) -> Result<Vec<GatewayInfo>, BridgeError> {
        let (tx, rx) = oneshot::channel();
        *self.inner.gateways.lock() = Some(tx);
        self.publish_json(
            "solar/bridge/tx".to_string(),
            serde_json::json!({ "type": "LIST_STICKS" }),
        )
        .await?;
        rx.await.map_err(|_| BridgeError::Transport("bridge reader stopped".to_string()))
    }

    async fn clear_neighbors(&self, gateway: &GatewayId) -> Result<(), BridgeError> {
        let ack = self.expect_ack("REQ_CLEAR_NEIGHBORS");
        self.run_device_command(gateway, "0", "REQ_CLEAR_NEIGHBORS", serde_json::Map::new())
            .await?;
        let status =
            ack.await.map_err(|_| BridgeError::Transport("bridge reader stopped".to_string()))?;
        if status == "SUCCESS" {
            Ok(())
        } else {
            Err(BridgeError::Rejected { command: "REQ_CLEAR_NEIGHBORS".to_string(), status })
        }
    }

    async fn neighbors(&self, gateway: &GatewayId) -> Result<Vec<BeaconObservation>, BridgeError> {
        let rx = self.expect_response("RESP_GET_NEIGHBORS");
        self.run_device_command(gateway, "0", "REQ_GET_NEIGHBORS", serde_json::Map::new())
            .await?;
        let payload =
            rx.await.map_err(|_| BridgeError::Transport("bridge reader stopped".to_string()))?;
        parse_neighbors(&payload)
    }

    async fn exchange(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        command: CommandFrame,
    ) -> Result<ResponseFrame, BridgeError> {
        let name = command.name();
        let args = command_args(&command);
        match &command {
            CommandFrame::ReqGetInfo
            | CommandFrame::ReqGetMpptStatus
            | CommandFrame::ReqSetMeshConfig { .. } => {
                let resp_name = name.replacen("REQ_", "RESP_", 1);
                let rx = self.expect_response(&resp_name);
                self.run_device_command(gateway, target.as_str(), name, args).await?;
                let payload = rx
                    .await
                    .map_err(|_| BridgeError::Transport("bridge reader stopped".to_string()))?;
                parse_data_response(name, &payload)
            }
            CommandFrame::ReqShutdown { .. }
            | CommandFrame::ReqSetMpptConfig { .. }
            | CommandFrame::ReqEnableMppt { .. } => {
                let ack = self.expect_ack(name);
                self.run_device_command(gateway, target.as_str(), name, args).await?;
                let status = ack
                    .await
                    .map_err(|_| BridgeError::Transport("bridge reader stopped".to_string()))?;
                if status == "SUCCESS" {
                    Ok(ResponseFrame::Ack { command: name.to_string() })
                } else {
                    Err(BridgeError::Rejected { command: name.to_string(), status })
                }
            }
            CommandFrame::ReqDumpRawAdc { .. } => Err(BridgeError::Payload(
                "DUMP_RAW_ADC goes through collect_adc".to_string(),
            )),
        }
    }

    async fn collect_adc(
        &self,
        gateway: &GatewayId,
        target: &DeviceId,
        window: Duration,
    ) -> Result<Vec<AdcSample>, BridgeError> {
        self.inner.adc.lock().insert(target.as_str().to_string(), Vec::new());

        self.publish_json(
            format!("solar/feature/{gateway}/tx"),
            serde_json::json!({
                "command": "DUMP_RAW_ADC",
                "args": {
                    "target_id": target.as_str(),
                    "duration": window.as_secs_f64(),
                },
            }),
        )
        .await?;

        // Let the device stream for the window, then a short drain for
        // frames still in flight.
        tokio::time::sleep(window).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let samples =
            self.inner.adc.lock().remove(target.as_str()).unwrap_or_default();
        debug!(target = %target, samples = samples.len(), "adc collection window closed");
        Ok(samples)
    }
}

fn command_args(command: &CommandFrame) -> serde_json::Map<String, serde_json::Value> {
    let mut args = serde_json::Map::new();
    match command {
        CommandFrame::ReqShutdown { rsd1, rsd2 } => {
            args.insert("rsd1".to_string(), serde_json::json!(rsd1));
            args.insert("rsd2".to_string(), serde_json::json!(rsd2));
            // Broadcast group, fixed by the wire contract.
            args.insert("group_num1".to_string(), serde_json::json!(0xFFFF_FFFF_u32));
        }
        CommandFrame::ReqSetMeshConfig { asp_interval_ms, tx_power_dbm } => {
            args.insert("asp_interval".to_string(), serde_json::json!(asp_interval_ms));
            args.insert("tx_pwr".to_string(), serde_json::json!(tx_power_dbm));
        }
        CommandFrame::ReqSetMpptConfig { min_limit, max_limit, bypass } => {
            args.insert("min_limit".to_string(), serde_json::json!(min_limit));
            args.insert("max_limit".to_string(), serde_json::json!(max_limit));
            args.insert("bypass_condition".to_string(), serde_json::json!(bypass));
        }
        CommandFrame::ReqEnableMppt { enable } => {
            args.insert("enable".to_string(), serde_json::json!(enable));
        }
        CommandFrame::ReqGetInfo
        | CommandFrame::ReqGetMpptStatus
        | CommandFrame::ReqDumpRawAdc { .. } => {}
    }
    args
}

fn parse_data_response(
    command: &str,
    payload: &serde_json::Value,
) -> Result<ResponseFrame, BridgeError> {
    let bad = |e: serde_json::Error| BridgeError::Payload(e.to_string());
    match command {
        "REQ_GET_INFO" => {
            let frame: InfoFrame = serde_json::from_value(payload.clone()).map_err(bad)?;
            Ok(ResponseFrame::Info(frame))
        }
        "REQ_GET_MPPT_STATUS" => {
            let frame: MpptStatusFrame = serde_json::from_value(payload.clone()).map_err(bad)?;
            Ok(ResponseFrame::MpptStatus(frame))
        }
        "REQ_SET_MESH_CONFIG" => {
            // Echo arrives split across protocol layers: tx power on l1,
            // ASP interval on l2.
            let tx_power_dbm = payload
                .pointer("/l1/tx_pwr")
                .and_then(serde_json::Value::as_i64)
                .and_then(|v| i8::try_from(v).ok());
            let asp_interval_ms = payload
                .pointer("/l2/asp_interval")
                .and_then(serde_json::Value::as_u64)
                .and_then(|v| u32::try_from(v).ok());
            Ok(ResponseFrame::Mesh(MeshConfigFrame { tx_power_dbm, asp_interval_ms }))
        }
        other => Err(BridgeError::Payload(format!("unexpected data response for {other}"))),
    }
}

fn parse_neighbors(payload: &serde_json::Value) -> Result<Vec<BeaconObservation>, BridgeError> {
    let list = payload
        .get("neighbors")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| BridgeError::Payload("neighbors payload missing list".to_string()))?;
    let mut observations = Vec::with_capacity(list.len());
    for entry in list {
        let id = entry
            .get("id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| BridgeError::Payload("neighbor missing id".to_string()))?;
        let rssi = entry
            .get("rssi")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(-100);
        observations.push(BeaconObservation {
            id: DeviceId::new(id),
            rssi: rssi as i32,
            vendor: entry
                .get("vid")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            product: entry
                .get("pid")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            version: entry
                .get("version")
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string),
        });
    }
    Ok(observations)
}

async fn reader_task(mut eventloop: EventLoop, inner: Arc<Inner>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&publish.payload)
                {
                    dispatch(&inner, &publish.topic, &payload);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt event loop error; reconnecting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn dispatch(inner: &Inner, topic: &str, payload: &serde_json::Value) {
    if topic == "solar/bridge/rx" {
        let gateways = payload
            .get("sticks")
            .and_then(serde_json::Value::as_array)
            .map(|sticks| {
                sticks
                    .iter()
                    .filter_map(|s| {
                        let uid = s.get("uid").and_then(serde_json::Value::as_str)?;
                        Some(GatewayInfo {
                            uid: GatewayId(uid.to_string()),
                            version: s
                                .get("version")
                                .and_then(serde_json::Value::as_str)
                                .map(ToString::to_string),
                        })
                    })
                    .collect::<Vec<_>>()
            });
        if let Some(gateways) = gateways {
            if let Some(tx) = inner.gateways.lock().take() {
                let _ = tx.send(gateways);
            }
        }
    } else if topic.ends_with("/result") || topic.ends_with("/status") {
        let command = payload
            .get("command")
            .or_else(|| payload.get("feature"))
            .and_then(serde_json::Value::as_str);
        let status = payload.get("status").and_then(serde_json::Value::as_str);
        if let (Some(command), Some(status)) = (command, status) {
            if let Some(tx) = inner.acks.lock().remove(command) {
                let _ = tx.send(status.to_string());
            }
        }
    } else if topic.ends_with("/adc") {
        // Topic: solar/mlpe/<id>/adc. Frames carry metadata fields next to
        // the numeric channels; only the numbers are sample data.
        if let (Some(id), Some(fields)) = (topic.split('/').nth(2), payload.as_object()) {
            let sample = AdcSample(
                fields
                    .iter()
                    .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
                    .collect(),
            );
            let key = DeviceId::new(id).as_str().to_string();
            if let Some(buffer) = inner.adc.lock().get_mut(&key) {
                buffer.push(sample);
            }
        }
    } else if topic.ends_with("/rx") {
        let cmd_name = payload
            .pointer("/parsed_data/cmd_name")
            .and_then(serde_json::Value::as_str);
        let body = payload.pointer("/parsed_data/payload");
        if let (Some(cmd_name), Some(body)) = (cmd_name, body) {
            if let Some(tx) = inner.responses.lock().remove(cmd_name) {
                let _ = tx.send(body.clone());
            }
        }
    }
}
