use popsub_session::config::load_config;
use popsub_session::packet::{QoS, TopicFilter};
use popsub_session::utils::logging;
use popsub_session::{Event, JsonCodec, Session, SessionConfig, SessionError, persistence};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

const DEFAULT_ADDR: &str = "127.0.0.1:1883";

/// Connects to a broker speaking the JSON codec and subscribes to the topics
/// given after the address, printing every delivered message.
///
/// Usage: `popsub-session [addr] [topic...]`
#[tokio::main]
async fn main() -> Result<(), SessionError> {
    let settings = load_config()?;
    logging::init(&settings.logging.level);

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let topics: Vec<TopicFilter> = args
        .map(|name| TopicFilter::new(name, QoS::AtLeastOnce))
        .collect();

    let config = SessionConfig::try_from(&settings)?;
    let store = persistence::open(&settings.persistence)?;
    let stream = TcpStream::connect(&addr).await?;
    info!(%addr, "Connected to broker");

    let (handle, mut events) = Session::new(config, JsonCodec::new())
        .with_store(store)
        .spawn(stream);
    if !topics.is_empty() {
        handle.subscribe(topics)?;
    }

    loop {
        tokio::select! {
            event = events.events.recv() => match event {
                Some(Event::Disconnected { error: Some(e) }) => {
                    error!(error = %e, "Disconnected");
                    break;
                }
                Some(Event::Disconnected { error: None }) | None => break,
                Some(Event::PersistenceError(e)) => warn!(error = %e, "Redelivery store failed"),
                Some(event) => info!(?event, "Session event"),
            },
            Some(message) = events.inbox.recv() => {
                info!(
                    topic = %message.topic,
                    qos = %message.qos,
                    payload = %String::from_utf8_lossy(&message.payload),
                    "Message received"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                handle.disconnect()?;
            }
        }
    }

    let state = handle.join().await;
    info!(keepalive = %state, "Session finished");
    Ok(())
}
