use std::sync::Arc;

use anyhow::Result;
use chat_core::{ChangeEvent, ChatClient, ClientConfig, HttpConversationApi, WsTransport};
use clap::Parser;
use shared::domain::UserId;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

mod config;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    auth_token: Option<String>,
    #[arg(long)]
    user_id: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(v) = args.server_url {
        settings.server_url = v;
    }
    if let Some(v) = args.auth_token {
        settings.auth_token = v;
    }
    if let Some(v) = args.user_id {
        settings.user_id = v;
    }

    let transport = Arc::new(WsTransport::new(settings.server_url.clone()));
    let api = Arc::new(HttpConversationApi::new(
        settings.server_url.clone(),
        settings.auth_token.clone(),
    ));
    let client = ChatClient::new(
        UserId(settings.user_id),
        transport,
        api,
        ClientConfig::default(),
    );

    client.connect(&settings.auth_token).await?;
    println!(
        "Watching {} as user_id={} (ctrl-c to quit)",
        settings.server_url, settings.user_id
    );

    let mut changes = client.subscribe_changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(event) => render(&client, event).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "change feed lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

async fn render(client: &ChatClient, event: ChangeEvent) {
    match event {
        ChangeEvent::Connection(_) => {
            let status = client.status().await;
            match status.countdown_secs {
                Some(secs) => println!("[status] {} ({secs}s)", status.label),
                None => println!("[status] {}", status.label),
            }
        }
        ChangeEvent::Conversations => {
            for row in client.conversations().await {
                println!(
                    "[list] #{} {} unread={} \"{}\"",
                    row.conversation_id.0,
                    row.other_user.display_name,
                    row.unread_count,
                    row.last_message_preview
                );
            }
        }
        ChangeEvent::Transcript { conversation_id } => {
            if let Some(transcript) = client.transcript(conversation_id).await {
                println!(
                    "[conversation #{}] {} messages",
                    conversation_id.0,
                    transcript.len()
                );
            }
        }
        ChangeEvent::Presence { user_id } => {
            let status = client.presence_status(user_id).await;
            println!("[presence] user {} is {status:?}", user_id.0);
        }
        ChangeEvent::Typing {
            conversation_id,
            user_id,
        } => {
            println!(
                "[typing] user {} in conversation #{}",
                user_id.0, conversation_id.0
            );
        }
        ChangeEvent::Error(message) => warn!(%message, "client reported an error"),
    }
}
