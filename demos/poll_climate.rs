/**
 * Climate Polling Example
 *
 * Binds to one appliance, polls it on a fixed interval and prints every
 * published state. Configure with GREE_HOST, GREE_MAC and optionally
 * GREE_KEY / GREE_SCHEME (1 or 2). Set RUST_LOG=debug to see the exchanges.
 */
use futures_util::StreamExt;
use greelink::{DeviceBuilder, KeyScheme};
use std::env;
use tokio::time::{Duration, interval};

const POLL_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- greelink - Climate Polling ---");

    // 1. Initialize Device
    let host = env::var("GREE_HOST").unwrap_or_else(|_| "192.168.1.40".to_string());
    let mac = env::var("GREE_MAC").unwrap_or_else(|_| "c8f742a1b2c3".to_string());
    let scheme = match env::var("GREE_SCHEME").as_deref() {
        Ok("2") => KeyScheme::Authenticated,
        _ => KeyScheme::Legacy,
    };

    let mut builder = DeviceBuilder::new(host, &mac).scheme(scheme);
    if let Ok(key) = env::var("GREE_KEY") {
        builder = builder.encryption_key(key);
    }
    let device = match builder.build() {
        Ok(device) => device,
        Err(e) => {
            eprintln!("[ERROR] Invalid configuration: {}", e);
            return;
        }
    };

    // 2. Print published states as they arrive
    let stream = device.stream();
    tokio::spawn(async move {
        tokio::pin!(stream);
        while let Some(state) = stream.next().await {
            match serde_json::to_string(&state) {
                Ok(json) => println!("[STATE] {}", json),
                Err(e) => eprintln!("[ERROR] Cannot render state: {}", e),
            }
        }
    });

    // 3. Poll until interrupted
    println!("[INFO] Polling {} every {:?} (Press Ctrl+C to stop)...", mac, POLL_INTERVAL);
    let mut ticker = interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = device.refresh().await {
                    eprintln!("[ERROR] Poll failed: {} (online: {})", e, device.is_online());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[INFO] Stopping.");
                device.stop();
                break;
            }
        }
    }
}
