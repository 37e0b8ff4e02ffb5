// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use dex_agent::{config::AgentConfig, round::RoundDriver};
use dex_metrics_collector::{engine::SamplingEngine, source::CounterSource};
use insightfinder::{flusher::Flusher, store::MetricStore};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("IF_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on dex agent startup: {e}");
            process::exit(1);
        }
    };

    let flusher = match Flusher::new(config.flusher_config()) {
        Ok(f) => f,
        Err(e) => {
            error!("Error creating InsightFinder client: {e}");
            process::exit(1);
        }
    };

    let engine = SamplingEngine::new(counter_source(), config.sampling_window, config.per_cpu);
    let driver = RoundDriver::new(engine, MetricStore::default(), flusher, config.round_interval);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                shutdown.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {e}"),
        }
    });

    info!(
        "Starting dex agent for project {} as instance {}, collecting every {}s",
        config.project_name,
        config.instance_name,
        config.round_interval.as_secs()
    );
    driver.run(cancel).await;
}

#[cfg(target_os = "linux")]
fn counter_source() -> Box<dyn CounterSource> {
    Box::new(dex_metrics_collector::linux::ProcfsCounterSource::new())
}

#[cfg(not(target_os = "linux"))]
fn counter_source() -> Box<dyn CounterSource> {
    Box::new(dex_metrics_collector::portable::SysinfoCounterSource::new())
}
