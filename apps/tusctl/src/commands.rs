//! Subcommand implementations.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::mpsc;
use tuskit_client::{
    ByteSource, CancellationToken, ChecksumAlgorithm, FileSource, Metadata, TusClient, TusError,
    UploadEvent, UploadLength, UploadOptions, checksum_bytes,
};
use tuskit_transfer::ThroughputMeter;

use crate::Command;
use crate::config::Config;

pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let client = TusClient::with_http(&config.http())?;
    match command {
        Command::Info => info(&client, endpoint(&config)?).await,
        Command::Create { length, meta } => {
            let length = length.map_or(UploadLength::Deferred, UploadLength::Known);
            let location = client
                .create(endpoint(&config)?, length, &meta.into_iter().collect())
                .await?;
            println!("{location}");
            Ok(())
        }
        Command::Upload {
            file,
            location,
            partials,
            meta,
        } => {
            let resume = match (location, partials) {
                (Some(location), _) => Resume::Location(location),
                (None, partials) if !partials.is_empty() => Resume::Partials(partials),
                _ => Resume::Fresh,
            };
            upload(&client, &config, &file, resume, meta.into_iter().collect()).await
        }
        Command::Status { location } => status(&client, &location).await,
        Command::Download { location, dest } => download(&client, &location, &dest).await,
        Command::Delete { location } => {
            client.remove(&location).await?;
            println!("deleted {location}");
            Ok(())
        }
    }
}

fn endpoint(config: &Config) -> anyhow::Result<&str> {
    match config.endpoint.as_deref() {
        Some(e) => Ok(e),
        None => bail!("no endpoint: pass --endpoint or set `endpoint` in the config file"),
    }
}

async fn info(client: &TusClient, endpoint: &str) -> anyhow::Result<()> {
    let caps = client.discover(endpoint).await?;
    println!("version:     {}", caps.version);
    println!("supported:   {}", caps.supported_versions.join(", "));
    let extensions: Vec<String> = caps.extensions.iter().map(ToString::to_string).collect();
    println!("extensions:  {}", extensions.join(", "));
    match caps.max_size {
        Some(max) => println!("max size:    {max}"),
        None => println!("max size:    unlimited"),
    }
    if !caps.checksum_algorithms.is_empty() {
        println!("checksums:   {}", caps.checksum_algorithms.join(", "));
    }
    Ok(())
}

/// What `upload` starts from.
enum Resume {
    Fresh,
    Location(String),
    Partials(Vec<String>),
}

async fn upload(
    client: &TusClient,
    config: &Config,
    file: &Path,
    resume: Resume,
    mut metadata: Metadata,
) -> anyhow::Result<()> {
    let source: Arc<dyn ByteSource> = Arc::new(
        FileSource::open(file).with_context(|| format!("opening {}", file.display()))?,
    );
    if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
        metadata
            .entry("filename".to_string())
            .or_insert_with(|| name.to_string());
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, stopping after the current chunk");
            interrupt.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let reporter = tokio::spawn(report_progress(rx));

    let result = match resume {
        Resume::Location(location) => {
            let mut options = config.upload_options().with_cancel(cancel).with_events(tx);
            if config.checksum {
                options = negotiate(client, config, options).await;
            }
            client
                .upload(&location, source, &options)
                .await
                .map(|offset| (location, offset))
                .map_err(TusError::from)
        }
        Resume::Partials(partials) => {
            let mut options = config.upload_options().with_cancel(cancel).with_events(tx);
            if config.checksum {
                options = negotiate(client, config, options).await;
            }
            client
                .resume_parallel(endpoint(config)?, source, &partials, &metadata, &options)
                .await
                .map(|r| (r.location, r.offset))
        }
        Resume::Fresh => {
            let mut options = config.transfer_options();
            options.upload = options.upload.with_cancel(cancel).with_events(tx);
            client
                .transfer(endpoint(config)?, source, &metadata, &options)
                .await
                .map(|r| (r.location, r.offset))
        }
    };
    // All senders are gone once the options are dropped.
    let _ = reporter.await;

    match result {
        Ok((location, offset)) => {
            println!("{location}");
            tracing::info!(%location, offset, "upload finished");
            Ok(())
        }
        Err(TusError::Upload(e)) => {
            eprintln!(
                "upload stopped at offset {}; resume with: tusctl upload {} --location {}",
                e.offset,
                file.display(),
                e.location
            );
            Err(TusError::Upload(e).into())
        }
        Err(TusError::Parallel(e)) => {
            for part in &e.parts {
                eprintln!("  {} at {} of {} bytes", part.location, part.offset, part.length);
            }
            eprintln!(
                "parallel upload stopped; resume with: tusctl --endpoint {} upload {} --partials {}",
                e.endpoint,
                file.display(),
                e.locations().join(",")
            );
            Err(TusError::Parallel(e).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Picks a checksum algorithm for resuming an existing upload. Discovery
/// needs an endpoint; without one the upload runs unverified.
async fn negotiate(client: &TusClient, config: &Config, options: UploadOptions) -> UploadOptions {
    let Some(endpoint) = config.endpoint.as_deref() else {
        return options;
    };
    match client.discover(endpoint).await {
        Ok(caps) => options.negotiated(&caps),
        Err(e) => {
            tracing::warn!(error = %e, "discovery failed, uploading without checksums");
            options
        }
    }
}

async fn report_progress(mut rx: mpsc::Receiver<UploadEvent>) {
    let mut meter = ThroughputMeter::default();
    let mut last = 0u64;
    while let Some(event) = rx.recv().await {
        match event {
            UploadEvent::Started { offset, total } => {
                last = offset;
                meter.record(0);
                if offset > 0 {
                    eprintln!("resuming at {offset} of {total} bytes");
                }
            }
            UploadEvent::ChunkAccepted { offset, total } => {
                meter.record(offset.saturating_sub(last));
                last = offset;
                let percent = if total == 0 { 100.0 } else { offset as f64 * 100.0 / total as f64 };
                let eta = meter
                    .eta(total.saturating_sub(offset))
                    .map_or_else(|| "--".to_string(), |d| format!("{}s", d.as_secs()));
                eprint!(
                    "\r{offset}/{total} bytes ({percent:.1}%), {:.1} KiB/s, eta {eta}   ",
                    meter.bytes_per_second() / 1024.0
                );
                let _ = std::io::stderr().flush();
            }
            UploadEvent::Resynced { from, to } => {
                tracing::debug!(from, to, "offset resynced");
                last = to;
            }
            UploadEvent::Retrying { attempt, delay } => {
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
            }
            UploadEvent::Completed { .. } => eprintln!(),
        }
    }
}

async fn status(client: &TusClient, location: &str) -> anyhow::Result<()> {
    let info = client.probe(location).await?;
    match info.length {
        Some(length) => println!("offset:   {} / {length}", info.offset),
        None => println!("offset:   {} (length deferred)", info.offset),
    }
    println!("complete: {}", info.is_complete());
    if let Some(expires) = &info.expires {
        println!("expires:  {expires}");
    }
    for (key, value) in &info.metadata {
        println!("meta:     {key}={value}");
    }
    Ok(())
}

async fn download(client: &TusClient, location: &str, dest: &Path) -> anyhow::Result<()> {
    let download = client.download(location).await?;
    tokio::fs::write(dest, &download.body)
        .await
        .with_context(|| format!("writing {}", dest.display()))?;
    println!(
        "{} bytes -> {} (sha256 {})",
        download.body.len(),
        dest.display(),
        checksum_bytes(ChecksumAlgorithm::Sha256, &download.body)
    );
    Ok(())
}
