//! Integration tests for the chat side-channel and its shared teardown.

mod harness;

use harness::{settle, Peer};
use paircall_signaling::{create_room, ChatMessage, FileAttachment, MemoryStore};
use parking_lot::Mutex;
use std::sync::Arc;

async fn setup() -> (Arc<MemoryStore>, paircall_signaling::RoomId) {
    let store = Arc::new(MemoryStore::new());
    let room_id = create_room(&*store).await.unwrap();
    (store, room_id)
}

fn collector() -> (Arc<Mutex<Vec<ChatMessage>>>, Arc<dyn Fn(ChatMessage) + Send + Sync>) {
    let seen: Arc<Mutex<Vec<ChatMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: Arc<dyn Fn(ChatMessage) + Send + Sync> = Arc::new(move |message| {
        sink.lock().push(message);
    });
    (seen, handler)
}

#[tokio::test]
async fn test_send_and_list_messages() {
    let (store, room_id) = setup().await;
    let peer = Peer::with_chat(store.clone(), room_id.clone());
    let chat = peer.controller.chat().expect("chat enabled");

    chat.send("hello").await.unwrap();
    chat.send_with_attachment(
        "notes from the call",
        FileAttachment {
            name: "notes.txt".to_string(),
            url: "https://files.example/notes.txt".to_string(),
        },
    )
    .await
    .unwrap();

    let messages = chat.list().await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].body, "hello");
    assert_eq!(messages[0].sender.as_deref(), Some("tester"));
    assert!(messages[0].attachment.is_none());
    assert_eq!(messages[1].attachment.as_ref().unwrap().name, "notes.txt");
}

#[tokio::test]
async fn test_subscription_delivers_existing_then_new() {
    let (store, room_id) = setup().await;
    let peer = Peer::with_chat(store.clone(), room_id.clone());
    let chat = peer.controller.chat().unwrap().clone();

    chat.send("before subscribe").await.unwrap();

    let (seen, handler) = collector();
    peer.controller.subscribe_chat(handler).await.unwrap();
    settle().await;

    chat.send("after subscribe").await.unwrap();
    settle().await;

    let bodies: Vec<String> = seen.lock().iter().map(|m| m.body.clone()).collect();
    assert_eq!(bodies, vec!["before subscribe", "after subscribe"]);
}

#[tokio::test]
async fn test_cleanup_tears_down_chat_subscription() {
    let (store, room_id) = setup().await;
    let peer = Peer::with_chat(store.clone(), room_id.clone());
    let chat = peer.controller.chat().unwrap().clone();

    let (seen, handler) = collector();
    peer.controller.subscribe_chat(handler).await.unwrap();
    settle().await;

    peer.controller.cleanup().await;

    chat.send("into the void").await.unwrap();
    settle().await;

    // The message is stored but no longer delivered to this session.
    assert!(seen.lock().is_empty());
    assert_eq!(chat.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_chat_disabled_by_default() {
    let (store, room_id) = setup().await;
    let peer = Peer::new(store.clone(), room_id.clone());

    assert!(peer.controller.chat().is_none());
    let (_, handler) = collector();
    assert!(peer.controller.subscribe_chat(handler).await.is_err());
}
