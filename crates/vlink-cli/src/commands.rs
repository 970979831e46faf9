//! Subcommand implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dialoguer::{Input, Password};
use tokio_util::sync::CancellationToken;
use tracing::info;

use vlink_core::{
    Authorization, AuthClient, Coordinator, FileSessionStore, HeaderCache, SessionRecord,
    SharedStore, Snapshot, VehicleApi,
};

pub async fn login(vin: String) -> Result<()> {
    let http = http_client()?;
    let headers = Arc::new(HeaderCache::new(http.clone()));
    let auth = AuthClient::new(http, headers);

    let username: String = Input::new()
        .with_prompt("Username")
        .interact_text()
        .context("failed to read username")?;
    let password = Password::new()
        .with_prompt("Password")
        .interact()
        .context("failed to read password")?;

    let result = auth.authenticate(&username, &password).await?;
    let token = match result {
        Authorization::Completed { token } => token,
        Authorization::OtpRequired { next_url } => {
            let otp: String = Input::new()
                .with_prompt("One-time passcode")
                .interact_text()
                .context("failed to read passcode")?;
            match auth.submit_otp(&next_url, &otp).await? {
                Authorization::Completed { token } => token,
                _ => bail!("login flow ended in an unexpected state"),
            }
        }
        _ => bail!("login flow ended in an unexpected state"),
    };

    let store = SharedStore::new(Box::new(FileSessionStore::for_vin(&vin)?));
    store
        .save(&SessionRecord::new(token.access_token, token.refresh_token))
        .await?;

    println!("Login successful; session stored for {vin}.");
    Ok(())
}

pub async fn run(vin: String, api_key: String) -> Result<()> {
    let http = http_client()?;
    let headers = Arc::new(HeaderCache::new(http.clone()));
    let auth = AuthClient::new(http.clone(), headers);
    let store = Arc::new(SharedStore::new(Box::new(FileSessionStore::for_vin(&vin)?)));

    let record = store
        .load()
        .await?
        .context("no stored session; run `vlink login` first")?;

    // Rotate the token pair before first use; the stored access token may
    // have expired since the last run.
    let Authorization::Completed { token } = auth.refresh_token(&record.refresh_token).await?
    else {
        bail!("token refresh ended in an unexpected state");
    };
    store
        .save_tokens(&token.access_token, &token.refresh_token)
        .await?;

    let api = Arc::new(VehicleApi::new(http, vin, api_key, token.access_token));
    let coordinator = Coordinator::start(api, auth, store).await?;

    let vehicle = coordinator.vehicle();
    info!(
        "polling {} {} ({}) every {:?}",
        vehicle.description.model,
        vehicle.model_year,
        vehicle.fuel_type,
        coordinator.poll_interval()
    );

    let mut updates = coordinator.subscribe();
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(coordinator.clone().run(cancel.clone()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_summary(&snapshot);
            }
        }
    }

    worker.await??;
    Ok(())
}

pub async fn logout(vin: String) -> Result<()> {
    let store = SharedStore::new(Box::new(FileSessionStore::for_vin(&vin)?));
    store.remove().await?;
    println!("Session removed for {vin}.");
    Ok(())
}

pub async fn command(vin: String, api_key: String, name: String) -> Result<()> {
    let http = http_client()?;
    let store = SharedStore::new(Box::new(FileSessionStore::for_vin(&vin)?));

    let record = store
        .load()
        .await?
        .context("no stored session; run `vlink login` first")?;

    let api = VehicleApi::new(http, vin, api_key, record.access_token);
    let body = (name == "engine-start")
        .then(|| serde_json::json!({ "runtimeMinutes": record.engine_run_time_minutes }));

    let result = api.execute_command(&name, body).await?;
    println!("{name}: {} {}", result.invoke_status, result.message);
    Ok(())
}

fn print_summary(snapshot: &Snapshot) {
    let mut keys: Vec<&String> = snapshot.keys().collect();
    keys.sort();

    println!("--- snapshot ({} fields) ---", snapshot.len());
    for key in keys {
        let node = &snapshot[key.as_str()];
        match node.value() {
            Some(value) => match node.unit() {
                Some(unit) => println!("{key}: {value} {unit}"),
                None => println!("{key}: {value}"),
            },
            None => println!("{key}: <structured>"),
        }
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to create HTTP client")
}
