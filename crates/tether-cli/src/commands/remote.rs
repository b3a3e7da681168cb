//! Commands talking to a running server.

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tether_core::snapshot::ObjectReference;
use tether_rpc::rpc::Client;
use tether_rpc::SessionType;

use crate::config::RemoteConfig;

/// Which object a command addresses.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// Document id; empty selects the first document.
    pub document: String,
    /// Uuid of the object; takes precedence over `child`.
    pub object: Option<String>,
    /// Child field of the document root whose first object is addressed.
    pub child: Option<String>,
}

fn block_on<F: Future<Output = Result<()>>>(task: F) -> Result<()> {
    tokio::runtime::Runtime::new()?.block_on(task)
}

async fn connect(remote: &RemoteConfig) -> Result<Client> {
    let addr = remote.socket_addr()?;
    Client::connect_with_retry(addr, remote.client_config())
        .await
        .with_context(|| format!("Failed to connect to {}", addr))
}

async fn open_session(remote: &RemoteConfig) -> Result<Client> {
    let client = connect(remote).await?;
    let tier = if remote.observing {
        SessionType::Observing
    } else {
        SessionType::Regular
    };
    client.create_session(tier).await?;
    Ok(client)
}

async fn resolve(client: &Client, target: &Target) -> Result<ObjectReference> {
    if let Some(uuid) = &target.object {
        return Ok(ObjectReference::new("", uuid.clone()));
    }
    let root = client.document(&target.document).await?;
    match &target.child {
        None => Ok(ObjectReference::from(&root)),
        Some(name) => root
            .children
            .get(name)
            .and_then(|children| children.first())
            .map(ObjectReference::from)
            .ok_or_else(|| anyhow!("Document root has no object in {}", name)),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn info(remote: &RemoteConfig) -> Result<()> {
    block_on(async {
        let client = connect(remote).await?;
        let info = client.app_info().await?;
        println!("{} {}", "name".cyan(), info.name);
        println!("{} {}", "type".cyan(), info.app_type);
        println!("{} {}", "version".cyan(), info.version());
        Ok(())
    })
}

pub fn ping(remote: &RemoteConfig) -> Result<()> {
    block_on(async {
        let client = connect(remote).await?;
        let started = std::time::Instant::now();
        client.ping().await?;
        println!(
            "{} {} in {:?}",
            "pong".green().bold(),
            client.addr(),
            started.elapsed()
        );
        Ok(())
    })
}

pub fn documents(remote: &RemoteConfig) -> Result<()> {
    block_on(async {
        let client = open_session(remote).await?;
        for id in client.list_documents().await? {
            println!("  {}", id.cyan());
        }
        client.destroy_session().await?;
        Ok(())
    })
}

pub fn get(
    remote: &RemoteConfig,
    target: &Target,
    field: &str,
    index: Option<u64>,
    stream: bool,
) -> Result<()> {
    block_on(async {
        let client = open_session(remote).await?;
        let owner = resolve(&client, target).await?;
        let value = match (index, stream) {
            (Some(index), _) => client.get_element(&owner, field, index).await?,
            (None, true) => {
                let spinner = ProgressBar::new_spinner();
                spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
                spinner.set_message(format!("Downloading {}", field));
                spinner.enable_steady_tick(Duration::from_millis(100));
                let values = client.get_array_values(&owner, field).await?;
                spinner.finish_with_message(format!("{} elements", values.len()));
                values.into_field_value().to_json()
            }
            (None, false) => client.get_value(&owner, field).await?,
        };
        print_json(&value)?;
        client.destroy_session().await?;
        Ok(())
    })
}

pub fn set(
    remote: &RemoteConfig,
    target: &Target,
    field: &str,
    value: &str,
    index: Option<u64>,
) -> Result<()> {
    let value: Value =
        serde_json::from_str(value).with_context(|| format!("Invalid JSON value: {}", value))?;
    block_on(async {
        let client = open_session(remote).await?;
        let owner = resolve(&client, target).await?;
        match index {
            Some(index) => client.set_element(&owner, field, index, &value).await?,
            None => client.set_value(&owner, field, &value).await?,
        }
        println!("{} {} updated", "✓".green(), field);
        client.destroy_session().await?;
        Ok(())
    })
}

pub fn call(
    remote: &RemoteConfig,
    target: &Target,
    method: &str,
    params: Option<&str>,
) -> Result<()> {
    let params: Value = match params {
        Some(text) => serde_json::from_str(text)
            .with_context(|| format!("Invalid JSON parameters: {}", text))?,
        None => Value::Null,
    };
    block_on(async {
        let client = open_session(remote).await?;
        let owner = resolve(&client, target).await?;
        let result = client.execute_method(&owner, method, &params).await?;
        print_json(&result)?;
        client.destroy_session().await?;
        Ok(())
    })
}

pub fn methods(remote: &RemoteConfig, target: &Target) -> Result<()> {
    block_on(async {
        let client = open_session(remote).await?;
        let owner = resolve(&client, target).await?;
        for method in client.list_methods(&owner).await? {
            let access = if method.access.is_mutating() {
                "read-write".yellow()
            } else {
                "read-only".green()
            };
            println!("  {} ({}) params {}", method.keyword.cyan(), access, method.params);
        }
        client.destroy_session().await?;
        Ok(())
    })
}

pub fn quit(remote: &RemoteConfig) -> Result<()> {
    block_on(async {
        let client = connect(remote).await?;
        client.quit().await?;
        println!("{} Server at {} is shutting down", "✓".green(), client.addr());
        Ok(())
    })
}
