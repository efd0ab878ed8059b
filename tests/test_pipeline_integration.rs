//! Integration tests for the update bus
//!
//! Drive the full pipeline (queues, scheduler, outbound fan-out, caches)
//! with a scripted executor and a mock clock. Ordering across the two
//! inbound queues is not fixed, so tests wait for each republished
//! measurement before sending the next dependent update.

mod common;

use common::*;
use forecastflow::cache::{AverageKind, UpdateListener};
use forecastflow::models::{Production, Weather};
use forecastflow::{SubmitError, UpdateBus};
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn weather(h: i64) -> Weather {
    Weather {
        cloud_cover: 0.1 * h as f64,
        temperature: 12.0 + h as f64,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_train_then_predict_end_to_end() {
    // Test: three measured hours train the model once, a weather-only hour gets a prediction
    let executor = Arc::new(FakeExecutor::new(0.5));
    let (listener, mut rx) = ChannelListener::new();
    let listeners: Vec<Arc<dyn UpdateListener>> = vec![listener as Arc<dyn UpdateListener>];
    let bus = UpdateBus::start(&config(3, 1, 16), executor.clone(), Arc::new(clock()), listeners);

    for h in 0..3 {
        bus.record_production(hour(h), Production::new(250.0 * (h + 1) as f64), None)
            .await
            .unwrap();
        let measured = next_update(&mut rx).await;
        assert!(measured.is_authoritative());
        assert_eq!(measured.time, hour(h));
        assert_eq!(measured.payload.power, 250.0 * (h + 1) as f64);

        bus.record_weather(hour(h), weather(h), None).await.unwrap();
    }

    bus.record_weather(hour(3), weather(3), None).await.unwrap();
    let predicted = next_update(&mut rx).await;
    assert!(predicted.derived);
    assert_eq!(predicted.time, hour(3));
    assert_eq!(predicted.payload.power, 500.0);
    // ids: p0=1 w0=2 p1=3 w1=4 p2=5 w2=6 w3=7
    assert_eq!(predicted.id(), 7);

    let query = bus.query();
    assert_eq!(query.power(hour(3)), Some(500.0));
    assert_eq!(query.power(hour(1)), Some(500.0));
    assert_eq!(query.seasonal(0, 3, AverageKind::Derived), Some(500.0));
    assert_eq!(query.seasonal(0, 2, AverageKind::Authoritative), Some(750.0));

    let model = bus.shutdown().await;
    assert_eq!(model.map(|m| m.id), Some(6));
    assert_eq!(executor.training_calls(), 1);
    assert_eq!(executor.inference_calls(), 1);
}

#[tokio::test]
async fn test_measurement_replaces_prediction_and_scores_it() {
    // Test: prediction for 02:00 made two hours ahead, then the measurement arrives
    let executor = Arc::new(FakeExecutor::new(0.5));
    let (listener, mut rx) = ChannelListener::new();
    let listeners: Vec<Arc<dyn UpdateListener>> = vec![listener as Arc<dyn UpdateListener>];
    let bus = UpdateBus::start(&config(0, 1, 16), executor.clone(), Arc::new(clock()), listeners);

    bus.record_weather(hour(2), weather(2), None).await.unwrap();
    let predicted = next_update(&mut rx).await;
    assert!(predicted.derived);

    bus.record_production(hour(2), Production::new(750.0), None)
        .await
        .unwrap();
    let measured = next_update(&mut rx).await;
    assert!(measured.is_authoritative());

    let query = bus.query();
    assert_eq!(query.power(hour(2)), Some(750.0));
    assert_eq!(query.mae(chrono::Duration::hours(2)), Some(250.0));
    assert!(query.mae(chrono::Duration::hours(1)).is_none());

    bus.shutdown().await;
    assert_eq!(executor.inference_calls(), 1);
}

#[tokio::test]
async fn test_duplicate_weather_is_silent() {
    // Test: same weather payload twice produces one prediction and no second notification
    let executor = Arc::new(FakeExecutor::new(0.2));
    let (listener, mut rx) = ChannelListener::new();
    let listeners: Vec<Arc<dyn UpdateListener>> = vec![listener as Arc<dyn UpdateListener>];
    let bus = UpdateBus::start(&config(0, 1, 16), executor.clone(), Arc::new(clock()), listeners);

    bus.record_weather(hour(1), weather(1), None).await.unwrap();
    next_update(&mut rx).await;
    bus.record_weather(hour(1), weather(1), None).await.unwrap();

    bus.shutdown().await;
    assert!(rx.recv().await.is_none());
    assert_eq!(executor.inference_calls(), 1);
}

#[tokio::test]
async fn test_full_queue_reports_overload() {
    // Test: a stalled executor backs up the bounded queue, submit times out with Overloaded
    let (executor, gate, mut entered) = FakeExecutor::gated(0.5);
    let executor = Arc::new(executor);
    let bus = UpdateBus::start(&config(0, 1, 1), executor.clone(), Arc::new(clock()), Vec::new());

    bus.record_weather(hour(0), weather(0), None).await.unwrap();
    tokio::time::timeout(StdDuration::from_secs(1), entered.recv())
        .await
        .unwrap()
        .unwrap();

    // consumer is stuck in inference; one update fits in the queue
    let timeout = Some(StdDuration::from_millis(50));
    bus.record_weather(hour(1), weather(1), timeout).await.unwrap();
    let err = bus.record_weather(hour(2), weather(2), timeout).await.unwrap_err();
    assert_eq!(err, SubmitError::Overloaded);
    assert!(err.is_retryable());

    gate.add_permits(16);
    bus.record_weather(hour(2), weather(2), Some(StdDuration::from_secs(1)))
        .await
        .unwrap();

    bus.shutdown().await;
    assert_eq!(executor.inference_calls(), 3);
}

#[tokio::test]
async fn test_range_query_with_gap_reports_no_data() {
    // Test: integrating across a slot without a value fails instead of averaging
    let executor = Arc::new(FakeExecutor::new(0.5));
    let (listener, mut rx) = ChannelListener::new();
    let listeners: Vec<Arc<dyn UpdateListener>> = vec![listener as Arc<dyn UpdateListener>];
    let bus = UpdateBus::start(&config(0, 1, 16), executor, Arc::new(clock()), listeners);

    for h in [1, 3] {
        bus.record_production(hour(h), Production::new(1000.0), None)
            .await
            .unwrap();
        next_update(&mut rx).await;
    }

    let query = bus.query();
    let kwh = query.integrate(hour(1), hour(1) + chrono::Duration::minutes(55)).unwrap();
    assert!((kwh - 55.0 / 60.0).abs() < 1e-9);
    assert_eq!(
        query.integrate(hour(1), hour(3)),
        Err(forecastflow::QueryError::NoData)
    );
    assert_eq!(
        query.integrate(hour(3), hour(1)),
        Err(forecastflow::QueryError::IllegalRange)
    );

    bus.shutdown().await;
}

#[tokio::test]
async fn test_average_day_republishes_submitted_power() {
    // Test: back-to-back measurements for the same hour keep their values while the baseline moves
    let (listener, mut rx) = ChannelListener::new();
    let listeners: Vec<Arc<dyn UpdateListener>> = vec![listener as Arc<dyn UpdateListener>];
    let config = config_with(0, 1, 16, &[("FORECAST_NORMALIZATION", "averageday")]);
    let bus = UpdateBus::start(&config, Arc::new(FakeExecutor::new(0.5)), Arc::new(clock()), listeners);

    let yesterday = hour(8) - chrono::Duration::days(1);
    bus.record_production(hour(8), Production::new(100.0), None).await.unwrap();
    bus.record_production(yesterday, Production::new(300.0), None).await.unwrap();

    let first = next_update(&mut rx).await;
    let second = next_update(&mut rx).await;
    assert_eq!((first.time, first.payload.power), (hour(8), 100.0));
    assert_eq!((second.time, second.payload.power), (yesterday, 300.0));

    let query = bus.query();
    assert_eq!(query.power(hour(8)), Some(100.0));
    assert_eq!(query.power(yesterday), Some(300.0));
    let w = 0.5f64.powf(1.0 / 720.0);
    let baseline = query.seasonal(0, 8, AverageKind::Authoritative).unwrap();
    assert!((baseline - (100.0 * w + 300.0) / (w + 1.0)).abs() < 1e-9);

    bus.shutdown().await;
}
