// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use logferry::buffer::{BufferConfig, BufferKind};
use logferry::cache::ConfigCache;
use logferry::codec;
use logferry::config::{Config, ModuleConfig};
use logferry::constants::{RETRY_INTERVAL, SOURCE_MODULE_NAME};
use logferry::drivers::{
    BufferProcessor, BufferStats, CaptureHandle, CaptureOutput, DriverConfig, FileInputConfig,
    FileOutputConfig, Generator, GeneratorConfig,
};
use logferry::route::RouteSpec;
use logferry::{Scheduler, Status};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

const WARN_MESSAGE: &str = "above the warn limit";

fn disk_buffer(dir: &Path, max_size: u64, warn_limit: Option<u64>) -> BufferConfig {
    BufferConfig {
        kind: BufferKind::Disk,
        max_size,
        warn_limit,
        directory: Some(dir.to_path_buf()),
        chunk_records: 50,
    }
}

fn generator(count: u64, message: &str) -> Box<Generator> {
    Box::new(Generator::new(GeneratorConfig {
        count,
        message: message.to_string(),
        ..GeneratorConfig::default()
    }))
}

/// Builds `gen -> spill -> out` and starts it.
fn spill_pipeline(
    source: Box<Generator>,
    buffer: BufferConfig,
    out_queue: usize,
    queue_dir: Option<&Path>,
) -> (Scheduler, CaptureHandle, Arc<BufferStats>) {
    let capture = CaptureOutput::new();
    let out = capture.handle();
    let spill = BufferProcessor::new("spill", buffer).expect("buffer");
    let stats = spill.stats();
    let mut builder = Scheduler::builder()
        .module("gen", None, source)
        .module("spill", Some(10), Box::new(spill))
        .module("out", Some(out_queue), Box::new(capture))
        .route(RouteSpec::new("main", &["gen", "spill", "out"]));
    if let Some(queue_dir) = queue_dir {
        builder = builder.persist_queues(queue_dir);
    }
    let mut scheduler = builder.build().expect("build");
    scheduler.init_all();
    scheduler.start_all();
    (scheduler, out, stats)
}

async fn drain(scheduler: &mut Scheduler, out: &CaptureHandle, expected: usize) {
    for _ in 0..200 {
        scheduler.run_until_idle();
        if out.len() >= expected {
            return;
        }
        tokio::time::advance(RETRY_INTERVAL).await;
    }
    panic!("only {} of {expected} records arrived", out.len());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_stalled_output_fills_disk_buffer_then_drains_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut scheduler, out, stats) = spill_pipeline(
        generator(1000, "generated record"),
        disk_buffer(dir.path(), 10, Some(5)),
        10,
        None,
    );
    out.stall();
    scheduler.run_until_idle();

    let gen = scheduler.module_id("gen").expect("gen");
    let spill = scheduler.module_id("spill").expect("spill");
    assert!(scheduler.is_blocked(gen), "generator keeps producing");
    assert!(stats.bytes() >= 10 * 1024);
    let filled = stats.bytes();
    let sent = scheduler.counters(gen).snapshot().forwarded;
    assert!(sent < 1000);

    // nothing moves while the output is stalled
    for _ in 0..5 {
        tokio::time::advance(RETRY_INTERVAL).await;
        scheduler.run_until_idle();
    }
    assert_eq!(stats.bytes(), filled);
    assert_eq!(scheduler.counters(gen).snapshot().forwarded, sent);
    assert_eq!(scheduler.counters(spill).snapshot().dropped, 0);
    logs_assert(|lines: &[&str]| {
        match lines.iter().filter(|line| line.contains(WARN_MESSAGE)).count() {
            1 => Ok(()),
            n => Err(format!("expected one warning, got {n}")),
        }
    });

    out.unstall();
    drain(&mut scheduler, &out, 1000).await;
    let expected: Vec<String> = (0..1000).map(|i| format!("generated record {i}")).collect();
    assert_eq!(out.raw_events(), expected);
    assert_eq!(stats.bytes(), 0);
    assert_eq!(stats.records(), 0);
    assert!(stats.peak_bytes() >= 10 * 1024);
    assert_eq!(scheduler.status(gen), Status::Running);
    assert!(logs_contain("back below half of its warn limit"));
    logs_assert(|lines: &[&str]| {
        match lines.iter().filter(|line| line.contains(WARN_MESSAGE)).count() {
            1 => Ok(()),
            n => Err(format!("expected one warning, got {n}")),
        }
    });
}

#[tokio::test(start_paused = true)]
async fn test_spilled_records_survive_a_crash() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let (mut scheduler, out, stats) = spill_pipeline(
            generator(20, "old"),
            disk_buffer(dir.path(), 1024, None),
            5,
            None,
        );
        out.stall();
        scheduler.run_until_idle();
        assert_eq!(stats.records(), 15);
        // dropped without stop or shutdown
    }

    let mut chunk = File::open(dir.path().join("spill.1.q")).expect("open chunk");
    let mut spilled = Vec::new();
    while let Some(frame) = codec::read_frame(&mut chunk).expect("read frame") {
        spilled.push(frame);
    }
    assert_eq!(spilled.len(), 15);

    let (mut scheduler, out, stats) = spill_pipeline(
        generator(5, "new"),
        disk_buffer(dir.path(), 1024, None),
        5,
        None,
    );
    drain(&mut scheduler, &out, 20).await;

    let expected: Vec<String> = (5..20)
        .map(|i| format!("old {i}"))
        .chain((0..5).map(|i| format!("new {i}")))
        .collect();
    assert_eq!(out.raw_events(), expected);
    for record in out.records() {
        assert_eq!(
            record.get(SOURCE_MODULE_NAME).and_then(|value| value.as_str()),
            Some("gen")
        );
    }
    let replayed: Vec<Vec<u8>> = out.records()[..15]
        .iter()
        .map(|record| codec::serialize(record).expect("serialize"))
        .collect();
    assert_eq!(replayed, spilled);
    assert_eq!(stats.records(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clean_restart_keeps_queued_and_spilled_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let queues = dir.path().join("queues");
    fs::create_dir_all(&queues).expect("mkdir");
    {
        let (mut scheduler, out, stats) = spill_pipeline(
            generator(20, "old"),
            disk_buffer(dir.path(), 1024, None),
            5,
            Some(&queues),
        );
        out.stall();
        scheduler.run_until_idle();
        assert_eq!(stats.records(), 15);
        scheduler.shutdown_all();
        assert!(queues.join("out.logqueue").is_file());
    }

    let (mut scheduler, out, _) = spill_pipeline(
        generator(5, "new"),
        disk_buffer(dir.path(), 1024, None),
        5,
        Some(&queues),
    );
    assert!(!queues.join("out.logqueue").exists());
    drain(&mut scheduler, &out, 25).await;

    let expected: Vec<String> = (0..20)
        .map(|i| format!("old {i}"))
        .chain((0..5).map(|i| format!("new {i}")))
        .collect();
    assert_eq!(out.raw_events(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_file_input_resumes_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("app.log");
    let output = dir.path().join("archive.log");
    let config = Config {
        cache_dir: Some(dir.path().join("cache")),
        persist_queues: true,
        modules: vec![
            ModuleConfig {
                name: "app".to_string(),
                queue_size: None,
                driver: DriverConfig::FileInput(FileInputConfig {
                    path: input.clone(),
                    poll_interval_ms: 100,
                    save_position: true,
                }),
            },
            ModuleConfig {
                name: "archive".to_string(),
                queue_size: Some(10),
                driver: DriverConfig::FileOutput(FileOutputConfig {
                    path: output.clone(),
                }),
            },
        ],
        routes: vec![RouteSpec::new("main", &["app", "archive"])],
        ..Config::default()
    };
    config.validate().expect("valid");

    let first: Vec<String> = (0..100).map(|i| format!("first {i}")).collect();
    fs::write(&input, first.join("\n") + "\n").expect("write");
    let mut scheduler = config.build_scheduler().expect("scheduler");
    scheduler.init_all();
    scheduler.start_all();
    scheduler.run_until_idle();
    scheduler.shutdown_all();
    drop(scheduler);

    let cache = ConfigCache::load(&dir.path().join("cache")).expect("cache");
    assert_eq!(
        cache.get::<u64>("app.position"),
        Some(fs::metadata(&input).expect("stat").len())
    );

    let second: Vec<String> = (0..50).map(|i| format!("second {i}")).collect();
    let mut contents = fs::read_to_string(&input).expect("read");
    contents.push_str(&(second.join("\n") + "\n"));
    fs::write(&input, contents).expect("append");

    let mut scheduler = config.build_scheduler().expect("scheduler");
    scheduler.init_all();
    scheduler.start_all();
    scheduler.run_until_idle();
    scheduler.shutdown_all();

    let written = fs::read_to_string(&output).expect("read output");
    let expected: Vec<&str> = first.iter().chain(&second).map(String::as_str).collect();
    assert_eq!(written.lines().collect::<Vec<_>>(), expected);
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() {
    let capture = CaptureOutput::new();
    let out = capture.handle();
    let mut scheduler = Scheduler::builder()
        .module("gen", None, generator(500, "looped"))
        .module("out", Some(20), Box::new(capture))
        .route(RouteSpec::new("main", &["gen", "out"]))
        .build()
        .expect("build");
    scheduler.init_all();
    scheduler.start_all();

    let cancel_token = CancellationToken::new();
    let task = tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            scheduler.run(cancel_token).await;
            scheduler
        }
    });

    for _ in 0..500 {
        if out.len() == 500 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel_token.cancel();
    let scheduler = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run loop did not stop")
        .expect("join");

    assert_eq!(out.len(), 500);
    for id in ["gen", "out"] {
        let id = scheduler.module_id(id).expect("id");
        assert_eq!(scheduler.status(id), Status::Shutdown);
    }
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown_command() {
    let mut scheduler = Scheduler::builder()
        .module("gen", None, generator(0, "forever"))
        .module("out", None, Box::new(CaptureOutput::new()))
        .route(RouteSpec::new("main", &["gen", "out"]))
        .build()
        .expect("build");
    scheduler.init_all();
    scheduler.start_all();
    let handle = scheduler.handle();
    let task = tokio::spawn(async move {
        scheduler.run(CancellationToken::new()).await;
        scheduler
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.shutdown().expect("send");
    let scheduler = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run loop did not stop")
        .expect("join");
    let gen = scheduler.module_id("gen").expect("id");
    assert_eq!(scheduler.status(gen), Status::Shutdown);
}
