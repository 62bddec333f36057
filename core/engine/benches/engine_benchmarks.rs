use criterion::{black_box, criterion_group, criterion_main, Criterion};
use engine::classifier;
use engine::event_bus::EventBus;
use engine::planner;
use shared_types::{Alert, AlertKind, ContextBundle, Event, EventLevel, Severity};

fn sample_alert(description: &str) -> Alert {
    Alert {
        id: "bench-incident".to_string(),
        severity: Severity::High,
        service: "api".to_string(),
        description: description.to_string(),
        timestamp: chrono::Utc::now(),
        metadata: Default::default(),
    }
}

fn classifier_benchmarks(c: &mut Criterion) {
    let descriptions = [
        "Pod api-x is in CrashLoopBackOff",
        "OOMKilled: container exceeded memory limit",
        "ImagePullBackOff for web-7f9",
        "high cpu usage on node pool default",
        "endpoint has zero healthy backends",
        "an entirely unrelated free-text description",
    ];

    let mut group = c.benchmark_group("classifier");
    group.bench_function("classify_mixed_descriptions", |b| {
        b.iter(|| {
            for description in descriptions {
                black_box(classifier::classify(black_box(description)));
            }
        })
    });
    group.finish();
}

fn planner_benchmarks(c: &mut Criterion) {
    let alert = sample_alert("Pod api-x is in CrashLoopBackOff");
    let context = ContextBundle::new();

    let mut group = c.benchmark_group("planner");
    group.bench_function("plan_pod_crash", |b| {
        b.iter(|| black_box(planner::plan(black_box(&alert), AlertKind::PodCrash, black_box(&context))))
    });
    group.finish();
}

fn event_bus_benchmarks(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("event_bus");
    group.sample_size(50);

    group.bench_function("fan_out_to_ten_subscribers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let bus = EventBus::new();
                let mut subscriptions = Vec::new();
                for _ in 0..10 {
                    subscriptions.push(bus.subscribe(None));
                }

                for i in 0..100 {
                    bus.publish(Event {
                        timestamp: chrono::Utc::now(),
                        level: EventLevel::Info,
                        message: format!("event {i}"),
                        incident_id: None,
                        stage: None,
                        integration: None,
                        action: None,
                        progress: None,
                        attributes: Default::default(),
                    });
                }

                for subscription in &mut subscriptions {
                    for _ in 0..100 {
                        let _ = subscription.recv().await;
                    }
                }
            })
        })
    });
    group.finish();
}

criterion_group!(benches, classifier_benchmarks, planner_benchmarks, event_bus_benchmarks);
criterion_main!(benches);
