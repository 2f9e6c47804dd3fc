use bytes::Bytes;
use msgstream::config::TransportConfig;
use msgstream::message::Message;
use msgstream::message_stream::MessageStream;
use msgstream::udp_message_stream::UdpMessageStream;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, Level};

fn init_logging() {
    tracing_subscriber::fmt()
        // .with_max_level(Level::INFO)
        .with_max_level(Level::TRACE)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let addr_a: SocketAddr = SocketAddr::from_str("127.0.0.1:9100")?;
    let addr_b: SocketAddr = SocketAddr::from_str("127.0.0.1:9101")?;

    let config = Arc::new(TransportConfig::default_for(1472));

    let a = UdpMessageStream::bind(addr_a, addr_b, config.clone()).await?;
    let b = UdpMessageStream::bind(addr_b, addr_a, config).await?;

    let reader = tokio::spawn(async move {
        loop {
            match b.try_read_message().await {
                Ok(Some(view)) => {
                    for idx in 0..view.segment_count() {
                        info!("received segment {}: {:?}", idx, view.segment(idx));
                    }
                }
                Ok(None) => break,
                Err(e) => info!("dropping message: {}", e),
            }
        }
    });

    let messages = vec![
        Message::single_segment(Bytes::from_static(&[1u8; 8]))?,
        Message::from_segments(vec![
            Bytes::from_static(&[2u8; 8]),
            Bytes::from_static(&[3u8; 16]),
        ])?,
        Message::single_segment(Bytes::from_static(&[4u8; 24]))?,
    ];
    a.write_messages(&messages).await?;
    a.end().await?;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    reader.abort();

    Ok(())
}
