use crate::color::ColorChannel;
use crate::message::ColorMessage;
use crate::reading::Reading;
use crate::AppState;
use crate::ConfigEnv;
use log::{debug, error, info};
use rumqttc::{Event, MqttOptions, Packet, Publish, QoS};
use std::process;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

pub fn init_mqtt(
    app_state: &Arc<Mutex<AppState>>,
    config_env: &ConfigEnv,
    mqtt_host: &str,
) -> Result<rumqttc::Client, String> {
    let mut create_opts = MqttOptions::new(
        config_env.mqtt_client_id.clone(),
        mqtt_host,
        config_env.mqtt_port,
    );
    create_opts.set_keep_alive(Duration::from_secs(30));
    let (client, mut connection) = rumqttc::Client::new(create_opts, 100);

    let topic_pattern = config_env.topic_prefix.clone() + "#";
    client
        .subscribe(topic_pattern.clone(), QoS::AtMostOnce)
        .map_err(|err| format!("failed to subscribe to {}: {}", topic_pattern, err))?;

    let thread_app_state = app_state.clone();
    thread::Builder::new()
        .name("mqtt".to_string())
        .spawn(move || mqtt_poll(&thread_app_state, &mut connection))
        .map_err(|err| format!("failed to spawn mqtt thread: {}", err))?;

    info!(
        "mqtt bridge connecting to {}:{}",
        mqtt_host, config_env.mqtt_port
    );
    return Result::Ok(client);
}

fn mqtt_poll(app_state: &Arc<Mutex<AppState>>, connection: &mut rumqttc::Connection) {
    for notification in connection.iter() {
        match notification {
            Result::Err(err) => {
                error!("mqtt connection error {}", err);
                thread::sleep(Duration::from_millis(2500));
            }
            Result::Ok(event) => match event {
                Event::Incoming(Packet::Publish(publish_packet)) => {
                    debug!("publish packet: {:?}", publish_packet);
                    handle_mqtt_message(app_state, &publish_packet)
                        .unwrap_or_else(|err| error!("handle mqtt message error: {}", err));
                }
                Event::Incoming(Packet::ConnAck(_)) => {
                    info!("mqtt connected");
                }
                Event::Incoming(incoming_event) => {
                    debug!("incoming event: {:?}", incoming_event);
                }
                Event::Outgoing(outgoing_event) => {
                    debug!("outgoing event: {:?}", outgoing_event);
                }
            },
        }
    }
}

fn handle_mqtt_message(
    app_state: &Arc<Mutex<AppState>>,
    publish_packet: &Publish,
) -> Result<(), String> {
    let topic = &publish_packet.topic;
    let payload = String::from_utf8_lossy(&publish_packet.payload);

    let prefix = lock_app_state(app_state).topic_prefix.clone();
    let topic_part = topic
        .strip_prefix(&prefix)
        .ok_or_else(|| format!("topic must start with: {}", prefix))?;
    return match topic_part {
        "color" => handle_mqtt_message_color(app_state, &payload),
        "activate" => handle_mqtt_message_activate(app_state, &payload),
        "port" => handle_mqtt_message_port(app_state, &payload),
        "request-status" => send_status_message(app_state),
        // our own publications
        "reading" | "status" => Result::Ok(()),
        _ => Result::Err(format!("unhandled topic for incoming message: {}", topic)),
    };
}

fn handle_mqtt_message_color(app_state: &Arc<Mutex<AppState>>, payload: &str) -> Result<(), String> {
    let message: ColorMessage = serde_json::from_str(payload)
        .map_err(|err| format!("invalid color message: {}", err))?;
    debug!("handling color request {:?}", message);
    let mut app_state = lock_app_state(app_state);
    app_state.set_color_channel(ColorChannel::Red, message.red);
    app_state.set_color_channel(ColorChannel::Green, message.green);
    app_state.set_color_channel(ColorChannel::Blue, message.blue);
    return app_state.send_color();
}

fn handle_mqtt_message_activate(
    app_state: &Arc<Mutex<AppState>>,
    payload: &str,
) -> Result<(), String> {
    let name = payload.trim();
    debug!("handling activate request {}", name);
    return lock_app_state(app_state).activate(name);
}

fn handle_mqtt_message_port(app_state: &Arc<Mutex<AppState>>, payload: &str) -> Result<(), String> {
    let port = payload.trim();
    debug!("handling port change request {}", port);
    let mut app_state = lock_app_state(app_state);
    app_state.change_port(port)?;
    return send_status_message_locked(&app_state);
}

pub fn send_status_message(app_state: &Arc<Mutex<AppState>>) -> Result<(), String> {
    return send_status_message_locked(&lock_app_state(app_state));
}

fn send_status_message_locked(app_state: &AppState) -> Result<(), String> {
    let client = match &app_state.mqtt_client {
        Some(client) => client,
        None => return Result::Ok(()),
    };
    let status = app_state.status()?;
    let status_string: String = serde_json::to_string(&status)
        .map_err(|err| format!("could not convert status to json: {}", err))?;
    let status_topic = app_state.topic_prefix.clone() + "status";
    debug!("sending status");
    // this also runs on the mqtt thread, which is the one draining the queue
    client
        .try_publish(status_topic, QoS::AtLeastOnce, false, status_string)
        .map_err(|err| format!("failed to publish mqtt message: {}", err))?;
    return Result::Ok(());
}

/// Queues a reading without blocking the poll loop; a full queue drops it.
pub fn publish_reading(client: &rumqttc::Client, topic: &str, reading: &Reading) -> Result<(), String> {
    let payload = serde_json::to_string(reading)
        .map_err(|err| format!("could not convert reading to json: {}", err))?;
    return client
        .try_publish(topic, QoS::AtMostOnce, false, payload)
        .map_err(|err| format!("failed to publish mqtt message: {}", err));
}

fn lock_app_state(app_state: &Arc<Mutex<AppState>>) -> MutexGuard<'_, AppState> {
    match app_state.lock() {
        Result::Err(err) => {
            // need to exit here since there is no recovering from a broken lock
            error!("failed to lock {}", err);
            process::exit(1);
        }
        Result::Ok(app_state) => app_state,
    }
}
