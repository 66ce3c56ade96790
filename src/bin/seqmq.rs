//! seqmq – ordered-delivery demo driver.
//
//  $ seqmq demo --messages 20 --nack-every 5
//  $ seqmq --config seqmq.toml demo --ordering-key orders
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use seqmq::{AckReply, Broker, Config, Message, SubscriptionOptions};

#[derive(Debug, Parser)]
#[command(name = "seqmq", version, about = "seqmq ordered pub/sub demo")]
struct Cli {
    /// Path to config TOML (env SEQMQ_CONFIG is used when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish numbered messages under one ordering key and consume them.
    Demo {
        #[arg(long, env = "TOPIC", default_value = "ordered-topic")]
        topic: String,
        /// Subscription name (defaults to "<topic>-sub")
        #[arg(long)]
        subscription: Option<String>,
        #[arg(short = 'k', long, env = "ORDERING_KEY", default_value = "key1")]
        ordering_key: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        messages: u32,
        /// Nack the first delivery of every Nth message (0 disables)
        #[arg(long, default_value_t = 0)]
        nack_every: u32,
        /// Give up waiting for acks after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    seqmq::logging::init_logging();
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.cmd {
        Command::Demo {
            topic,
            subscription,
            ordering_key,
            messages,
            nack_every,
            timeout_secs,
        } => {
            let subscription = subscription.unwrap_or_else(|| format!("{topic}-sub"));
            run_demo(
                cfg,
                &topic,
                &subscription,
                &ordering_key,
                messages,
                nack_every,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    }
}

async fn run_demo(
    cfg: Config,
    topic: &str,
    subscription: &str,
    ordering_key: &str,
    messages: u32,
    nack_every: u32,
    timeout: Duration,
) -> anyhow::Result<()> {
    let broker = Broker::new(cfg);
    broker.create_topic(topic)?;

    let meta =
        broker.get_or_create_subscription(subscription, topic, SubscriptionOptions::ordered())?;
    println!("subscription : {}", meta.name);
    println!("topic        : {}", meta.topic);
    println!("ack deadline : {}s", meta.ack_deadline_seconds);
    println!("ordered      : {}", meta.enable_message_ordering);

    for seq in 1..=messages {
        let id = broker.publish(topic, format!("message-{seq}"), Some(ordering_key))?;
        info!(message_id = %id, seq, "published");
    }

    let (acked_tx, mut acked_rx) = mpsc::unbounded_channel::<u32>();
    let last_acked = Arc::new(Mutex::new(0u32));
    let handle = broker.subscribe(subscription, move |msg: Message| {
        let acked_tx = acked_tx.clone();
        let last_acked = Arc::clone(&last_acked);
        async move {
            let seq = sequence_of(&msg);
            println!(
                "received {} key={} attempt={} payload={}",
                msg.id,
                msg.ordering_key().unwrap_or("-"),
                msg.attempt,
                String::from_utf8_lossy(&msg.payload)
            );
            if nack_every > 0 && seq % nack_every == 0 && msg.attempt == 1 {
                return AckReply::Nack;
            }

            let mut last = last_acked.lock();
            if seq != *last + 1 {
                warn!(expected = *last + 1, got = seq, "out-of-order delivery");
            }
            *last = seq;
            let _ = acked_tx.send(seq);
            AckReply::Ack
        }
    })?;

    let received = tokio::time::timeout(timeout, async {
        let mut count = 0;
        while count < messages {
            if acked_rx.recv().await.is_none() {
                break;
            }
            count += 1;
        }
        count
    })
    .await;

    handle.close().await;

    match received {
        Ok(count) => println!("acked {count}/{messages} messages"),
        Err(_) => warn!(messages, "timed out waiting for acknowledgements"),
    }
    let stats = broker.subscription_stats(subscription)?;
    println!("{stats:#?}");
    Ok(())
}

fn sequence_of(msg: &Message) -> u32 {
    std::str::from_utf8(&msg.payload)
        .ok()
        .and_then(|s| s.strip_prefix("message-"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}
