//! The pull endpoint.
//!
//! A deliberately small HTTP surface: `GET /metrics` runs one full
//! collection pass and answers with the exposition text (collect-on-
//! scrape, so every sample a scraper sees is fresh). Anything else is a
//! 404. One request per connection; scrapers reconnect per scrape
//! anyway.

use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::collector::DiskCollector;
use crate::metrics::MetricSink;

pub async fn run(addr: &str, collector: DiskCollector, sink: Arc<MetricSink>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to listen on {addr}"))?;
    info!(addr, "serving metrics on /metrics");

    let collector = Arc::new(collector);
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "accepted scrape connection");
        let collector = Arc::clone(&collector);
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            if let Err(err) = handle(stream, &collector, &sink).await {
                warn!(%peer, error = %err, "scrape connection failed");
            }
        });
    }
}

async fn handle(stream: TcpStream, collector: &DiskCollector, sink: &MetricSink) -> Result<()> {
    let mut stream = BufReader::new(stream);

    let mut request_line = String::new();
    stream.read_line(&mut request_line).await?;

    // Drain the header block; nothing in it changes our answer.
    let mut header = String::new();
    while stream.read_line(&mut header).await? > 2 {
        header.clear();
    }

    let mut parts = request_line.split_whitespace();
    let (method, path) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));

    if method == "GET" && path == "/metrics" {
        let samples = collector.collect().await;
        let body = sink.render(&samples);
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{body}",
            body.len(),
        );
        stream.get_mut().write_all(response.as_bytes()).await?;
    } else {
        stream
            .get_mut()
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await?;
    }

    stream.get_mut().shutdown().await?;
    Ok(())
}
