use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use shared::domain::{ChatroomId, UserId};
use sync_core::{
    ChatroomSync, HttpMessageApi, SyncConfig, SyncUpdate, WsEventChannel,
};

/// Connects to a running server, opens one chatroom, and prints every
/// engine update until interrupted.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    #[arg(long)]
    auth_token: String,
    #[arg(long)]
    chatroom_id: String,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    username: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let api = Arc::new(HttpMessageApi::new(
        args.server_url.clone(),
        args.auth_token.clone(),
    ));
    let channel = Arc::new(WsEventChannel::new(args.server_url));
    let sync = ChatroomSync::new(
        api,
        channel,
        UserId::new(args.user_id),
        args.username,
        SyncConfig::default(),
    );

    let mut updates = sync.subscribe_updates();
    sync.enter_chatroom(ChatroomId::new(args.chatroom_id), &args.auth_token)
        .await?;

    let snapshot = sync.window().await;
    println!(
        "Loaded {} messages (has_more={}, unread={})",
        snapshot.messages.len(),
        snapshot.has_more,
        snapshot.unread_count
    );
    if let Some(boundary) = sync.unread_boundary().await {
        println!(
            "Unread boundary at message {} (display index {})",
            boundary.message_id, boundary.display_index
        );
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(SyncUpdate::WindowChanged) => {
                    let snapshot = sync.window().await;
                    println!("Window changed: {} messages", snapshot.messages.len());
                }
                Ok(update) => println!("Update: {update:?}"),
                Err(err) => {
                    println!("Update stream ended: {err}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted; leaving chatroom");
                sync.leave_chatroom().await?;
                break;
            }
        }
    }

    Ok(())
}
