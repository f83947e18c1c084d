use zwave2mqtt::{mqtt::{publish_uptime, MqttManager}, MeterManager};
use tokio::task::JoinHandle;
use std::time::Duration;
use log::info;


#[tokio::main]
async fn main() {
    // Initialize logging
    let default_filter = std::env::var("ZW2M_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    // we need a channel for the subparts to send metering data to the handler
    let (mut mqtt, tx) = MqttManager::new();

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    threads.push(tokio::spawn(async move {
        mqtt.start_thread().await;
    }));

    // Start the Z-Wave meter manager
    let mut meters = MeterManager::new(tx.clone());
    threads.push(tokio::spawn(async move {
        meters.start_thread().await;
    }));

    /* Periodic uptime publishing */
    let uptime_sender = tx.clone();
    threads.push(tokio::spawn(async move {
        // Publish immediately on startup
        publish_uptime(&uptime_sender).await;

        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.tick().await; // Skip first immediate tick since we already published

        loop {
            interval.tick().await;
            publish_uptime(&uptime_sender).await;
        }
    }));

    /* The managers own their clones now */
    drop(tx);

    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let kill_all_tasks = threads.iter().any(|task| task.is_finished());

        if kill_all_tasks {
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }
}
