mod common;

use std::time::Duration;

use common::*;
use mppsolar_bridge::channels::Channels;
use mppsolar_bridge::coordinator::{ChannelData, Coordinator};

async fn start_coordinator(
    transport: &ScriptedTransport,
) -> (
    Channels,
    tokio::sync::broadcast::Receiver<mppsolar_bridge::mqtt::ChannelData>,
    tokio::task::JoinHandle<()>,
) {
    start_coordinator_with(transport, test_config()).await
}

async fn start_coordinator_with(
    transport: &ScriptedTransport,
    config: mppsolar_bridge::config::ConfigWrapper,
) -> (
    Channels,
    tokio::sync::broadcast::Receiver<mppsolar_bridge::mqtt::ChannelData>,
    tokio::task::JoinHandle<()>,
) {
    let channels = Channels::new();
    let bus_rx = channels.to_mqtt.subscribe();

    let mut coordinator = Coordinator::new(config, channels.clone(), Box::new(transport.clone()));
    let handle = tokio::spawn(async move {
        coordinator.start().await.unwrap();
    });

    // let the event loop come up before poking it
    tokio::time::sleep(Duration::from_millis(50)).await;

    (channels, bus_rx, handle)
}

#[tokio::test]
async fn management_tree_is_published_at_startup() {
    let transport = ScriptedTransport::new(happy_replies());
    let (channels, mut bus_rx, handle) = start_coordinator(&transport).await;

    let batch = next_batch(&mut bus_rx).await;

    assert_eq!(
        payload(&batch, "test/ttyUSB0/inverter/Mgmt/ProcessName"),
        "\"mppsolar-bridge\""
    );
    assert_eq!(payload(&batch, "test/ttyUSB0/inverter/Connected"), "1");
    assert_eq!(payload(&batch, "test/ttyUSB0/charger/Connected"), "1");
    // identity probe ran first
    assert_eq!(transport.sent()[..2], ["ID".to_string(), "VFW".to_string()]);

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn poll_cycle_publishes_one_merged_batch() {
    let transport = ScriptedTransport::new(happy_replies());
    let (channels, mut bus_rx, handle) = start_coordinator(&transport).await;

    let _management = next_batch(&mut bus_rx).await;

    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let batch = next_batch(&mut bus_rx).await;

    // Battery mode maps to Inverting
    assert_eq!(payload(&batch, "test/ttyUSB0/inverter/State"), "9");

    // battery voltage lands on both device groups
    assert_eq!(
        payload_f64(&batch, "test/ttyUSB0/inverter/Dc/0/Voltage"),
        52.1
    );
    assert_eq!(
        payload_f64(&batch, "test/ttyUSB0/charger/Dc/0/Voltage"),
        52.1
    );

    // output current is derived from power and voltage
    assert_eq!(payload_f64(&batch, "test/ttyUSB0/inverter/Ac/Out/L1/V"), 230.0);
    assert_eq!(payload_f64(&batch, "test/ttyUSB0/inverter/Ac/Out/L1/P"), 500.0);
    let current = payload_f64(&batch, "test/ttyUSB0/inverter/Ac/Out/L1/I");
    assert!((current - 500.0 / 230.0).abs() < 1e-9);

    // PV power present, so the charger is charging and tracking
    assert_eq!(payload(&batch, "test/ttyUSB0/charger/State"), "3");
    assert_eq!(payload(&batch, "test/ttyUSB0/charger/MppOperationMode"), "2");
    assert_eq!(payload_f64(&batch, "test/ttyUSB0/charger/Pv/V"), 60.0);
    assert_eq!(payload_f64(&batch, "test/ttyUSB0/charger/Yield/Power"), 120.0);

    // energy counter arrives in kWh
    assert_eq!(payload_f64(&batch, "test/ttyUSB0/charger/Yield/User"), 15.0);
    assert_eq!(payload_f64(&batch, "test/ttyUSB0/charger/Yield/System"), 15.0);

    assert_eq!(payload_f64(&batch, "test/ttyUSB0/inverter/Temperature"), 45.0);
    assert_eq!(
        payload_f64(&batch, "test/ttyUSB0/charger/DC/0/Temperature"),
        39.0
    );

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn fault_mode_is_reported_as_fault() {
    let transport = ScriptedTransport::new(happy_replies());
    transport.set_reply("MOD", MOD_FAULT_REPLY);
    let (channels, mut bus_rx, handle) = start_coordinator(&transport).await;

    let _management = next_batch(&mut bus_rx).await;
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let batch = next_batch(&mut bus_rx).await;

    assert_eq!(payload(&batch, "test/ttyUSB0/inverter/State"), "2");

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn standby_mode_shows_bypass_with_the_workaround_on() {
    let transport = ScriptedTransport::new(happy_replies());
    transport.set_reply("MOD", MOD_STANDBY_REPLY);
    let (channels, mut bus_rx, handle) = start_coordinator(&transport).await;

    let _management = next_batch(&mut bus_rx).await;
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let batch = next_batch(&mut bus_rx).await;

    assert_eq!(payload(&batch, "test/ttyUSB0/inverter/State"), "8");

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn standby_mode_shows_off_with_the_workaround_disabled() {
    let transport = ScriptedTransport::new(happy_replies());
    transport.set_reply("MOD", MOD_STANDBY_REPLY);

    let config = test_config();
    let plain = mppsolar_bridge::config::Config {
        inverter: config.inverter(),
        mqtt: config.mqtt(),
        workarounds: mppsolar_bridge::config::Workarounds {
            inverter_off_assume_bypass: false,
        },
        products: Default::default(),
        loglevel: "info".to_string(),
    };
    let (channels, mut bus_rx, handle) = start_coordinator_with(
        &transport,
        mppsolar_bridge::config::ConfigWrapper::from_config(plain),
    )
    .await;

    let _management = next_batch(&mut bus_rx).await;
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let batch = next_batch(&mut bus_rx).await;

    assert_eq!(payload(&batch, "test/ttyUSB0/inverter/State"), "0");

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn failed_cycle_keeps_the_previous_state() {
    let transport = ScriptedTransport::new(happy_replies());
    let (channels, mut bus_rx, handle) = start_coordinator(&transport).await;

    let _management = next_batch(&mut bus_rx).await;

    // first cycle succeeds
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let good = next_batch(&mut bus_rx).await;
    assert_eq!(payload(&good, "test/ttyUSB0/inverter/State"), "9");

    // then the device stops answering GS; no batch may go out
    transport.remove_reply("GS");
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let nothing =
        tokio::time::timeout(Duration::from_millis(200), bus_rx.recv()).await;
    assert!(nothing.is_err(), "a failed cycle must not publish");

    // recovery on the next tick republishes the full tree unchanged
    transport.set_reply("GS", GS_REPLY);
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let recovered = next_batch(&mut bus_rx).await;
    assert_eq!(good, recovered);

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn missing_rated_info_fails_the_whole_cycle() {
    let transport = ScriptedTransport::new(happy_replies());
    transport.remove_reply("PIRI");
    let (channels, mut bus_rx, handle) = start_coordinator(&transport).await;

    let _management = next_batch(&mut bus_rx).await;
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();

    let nothing = tokio::time::timeout(Duration::from_millis(200), bus_rx.recv()).await;
    assert!(nothing.is_err(), "a cycle without rated info must not publish");

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn partial_identity_still_publishes_and_counts_per_command() {
    let transport = ScriptedTransport::new(happy_replies());
    transport.remove_reply("VFW");

    let channels = Channels::new();
    let mut bus_rx = channels.to_mqtt.subscribe();
    let mut coordinator =
        Coordinator::new(test_config(), channels.clone(), Box::new(transport.clone()));
    let stats = coordinator.shared_stats.clone();
    let handle = tokio::spawn(async move {
        coordinator.start().await.unwrap();
    });

    let batch = next_batch(&mut bus_rx).await;

    // the answered query still fills its field, the unanswered one is null
    assert_eq!(
        payload(&batch, "test/ttyUSB0/inverter/Serial"),
        "\"96332309100452000000\""
    );
    assert_eq!(
        payload(&batch, "test/ttyUSB0/inverter/FirmwareVersion"),
        "null"
    );

    // only the completed round trip is counted
    assert_eq!(stats.lock().unwrap().commands_sent(), 1);

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn queries_are_issued_in_a_fixed_order() {
    let transport = ScriptedTransport::new(happy_replies());
    let (channels, mut bus_rx, handle) = start_coordinator(&transport).await;

    let _management = next_batch(&mut bus_rx).await;
    channels.to_coordinator.send(ChannelData::PollTick).unwrap();
    let _batch = next_batch(&mut bus_rx).await;

    assert_eq!(
        transport.sent(),
        vec!["ID", "VFW", "ET", "GS", "MOD", "PIRI"]
    );

    channels.to_coordinator.send(ChannelData::Shutdown).unwrap();
    handle.await.unwrap();
}
