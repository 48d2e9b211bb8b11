use mqtt_publisher::{
    serialize_record, LogPublisher, MqttConfig, MqttPublisher, PublishError, PublishTransport,
    QoS, TOPIC,
};
use types::MeasurementRecord;

#[test]
fn record_payload_is_flat_json_in_fixed_key_order() {
    let record = MeasurementRecord {
        solar_input: Some(300.0),
        inverter_power: Some(1.0),
        peak_power: Some(0.5),
        active_power: Some(400.0),
        l1_voltage: Some(232.0),
        l1_current: Some(5.0),
        temperature: Some(42.0),
        e_today: Some(3.333),
        e_total: Some(12.345),
    };

    let payload = serialize_record(&record).expect("serialize");
    let text = String::from_utf8(payload).expect("utf8");
    assert_eq!(
        text,
        r#"{"Solar_Input":300.0,"Inverter_Power":1.0,"Peak_Power":0.5,"Active_Power":400.0,"L1_Voltage":232.0,"L1_Current":5.0,"Temperature":42.0,"E_Today":3.333,"E_Total":12.345}"#
    );
}

#[test]
fn empty_record_publishes_nulls() {
    let payload = serialize_record(&MeasurementRecord::default()).expect("serialize");
    let value: serde_json::Value = serde_json::from_slice(&payload).expect("json");
    let object = value.as_object().expect("object");
    assert_eq!(object.len(), 9);
    assert!(object.values().all(serde_json::Value::is_null));
}

#[tokio::test]
async fn log_publisher_accepts_payloads() {
    let mut publisher = LogPublisher;
    assert!(publisher.is_connected());
    publisher.reconnect().await.expect("reconnect");
    publisher
        .publish(TOPIC, b"{}".to_vec(), QoS::AtMostOnce)
        .await
        .expect("publish");
}

#[tokio::test]
async fn unreachable_broker_reports_disconnected() {
    let config = MqttConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        connect_timeout_ms: 200,
        ..MqttConfig::default()
    };

    let mut publisher = MqttPublisher::connect(config).await;
    assert!(!publisher.is_connected());
    assert!(matches!(
        publisher.reconnect().await,
        Err(PublishError::NotConnected { timeout_ms: 200 })
    ));
}
