//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use video_sync::{
    ClientConfig, InMemoryService, RecordId, RecordStore, Session, SyncClient, VideoFields,
    VideoRecord, VideoStatus,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A client with its own store, as a separate device or editor would have.
pub fn client(service: &Arc<InMemoryService>, actor: &str) -> SyncClient {
    client_with(service, actor, ClientConfig::default())
}

pub fn client_with(service: &Arc<InMemoryService>, actor: &str, config: ClientConfig) -> SyncClient {
    init_tracing();
    SyncClient::new(
        service.clone(),
        Session::new(actor, format!("session-{}", actor)),
        Arc::new(RecordStore::new()),
        config,
    )
}

/// Create a record and walk it through processing to `ready`.
pub async fn ready_video(
    service: &InMemoryService,
    client: &SyncClient,
    title: &str,
) -> VideoRecord {
    let created = client
        .create(VideoFields::new().title(title).category("sports"))
        .await
        .unwrap();
    promote(service, &created.id);
    client.fetch(&created.id).await.unwrap()
}

/// Processing pipeline reports the video ready.
pub fn promote(service: &InMemoryService, id: &RecordId) {
    service
        .processor_update(id, &VideoFields::new().status(VideoStatus::Processing))
        .unwrap();
    service
        .processor_update(
            id,
            &VideoFields::new()
                .status(VideoStatus::Ready)
                .media_ref(format!("media/{}", id)),
        )
        .unwrap();
}
