//! Lifecycle paths: entry editing, soft deletion, restart reconciliation and
//! analysis-version bumps.

use reverie_core::config::ReverieConfig;
use reverie_core::types::SessionType;
use reverie_engine::Engine;

fn test_config(dir: &tempfile::TempDir) -> ReverieConfig {
    let mut config = ReverieConfig::default();
    config.database.path = dir
        .path()
        .join("reverie.db")
        .to_string_lossy()
        .into_owned();
    config.cache.shared.path = dir
        .path()
        .join("cache.redb")
        .to_string_lossy()
        .into_owned();
    config
}

#[tokio::test]
async fn editing_an_entry_recomputes_fingerprint_and_signal() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).unwrap();
    let user = engine.create_user("u1").unwrap();

    let (entry, first_signal) = engine
        .add_entry(&user.id, "Feeling sad and tired today.", None)
        .await
        .unwrap();

    let (edited, second_signal) = engine
        .edit_entry(&user.id, &entry.id, "Feeling grateful and calm today.")
        .await
        .unwrap();

    assert_ne!(edited.content_fingerprint, entry.content_fingerprint);
    assert_eq!(edited.word_count, 5);
    let before = first_signal.sentiment.unwrap().score;
    let after = second_signal.sentiment.unwrap().score;
    assert!(before < 0.0 && after > 0.0, "edit must flip the sentiment ({before} -> {after})");

    engine.shutdown().await;
}

#[tokio::test]
async fn deleted_entries_leave_retrieval_and_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).unwrap();
    let user = engine.create_user("u1").unwrap();

    let (entry, _) = engine
        .add_entry(&user.id, "Insomnia kept me up all night.", None)
        .await
        .unwrap();
    assert_eq!(engine.vector().len(&user.id), 1);

    engine.delete_entry(&user.id, &entry.id).unwrap();
    assert_eq!(engine.vector().len(&user.id), 0);
    assert!(engine
        .search_entries(&user.id, "insomnia", 10)
        .unwrap()
        .is_empty());
    assert!(engine.get_entry(&user.id, &entry.id).is_err());

    engine.shutdown().await;
}

#[tokio::test]
async fn restart_rebuilds_the_vector_index_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let user_id;
    {
        let engine = Engine::open(config.clone()).unwrap();
        let user = engine.create_user("u1").unwrap();
        user_id = user.id.clone();
        for text in ["first entry about sleep", "second entry about work"] {
            engine.add_entry(&user.id, text, None).await.unwrap();
        }
        assert_eq!(engine.vector().len(&user.id), 2);
        engine.shutdown().await;
    }

    // A fresh process: the in-memory index starts empty and the startup
    // sweep restores it from persisted signals.
    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.vector().len(&user_id), 2);

    // The on-demand sweep is equivalent to the startup one.
    engine.vector().remove_user(&user_id);
    let loaded = engine.rebuild_vector_index().unwrap();
    assert_eq!(loaded, 2);
    assert_eq!(engine.vector().len(&user_id), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn version_bump_is_logged_and_reanalysis_restamps() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    let user_id;
    let entry_id;
    {
        let engine = Engine::open(config.clone()).unwrap();
        let user = engine.create_user("u1").unwrap();
        user_id = user.id.clone();
        let (entry, _) = engine
            .add_entry(&user.id, "A quiet uneventful day.", None)
            .await
            .unwrap();
        entry_id = entry.id.clone();
        engine.shutdown().await;
    }

    config.analysis.version = "v4".to_string();
    let engine = Engine::open(config).unwrap();

    let migrations = engine.store().list_migrations().unwrap();
    assert!(migrations
        .iter()
        .any(|m| m.from_version.as_deref() == Some("v3") && m.to_version == "v4"));

    let signal = engine.analyze_entry(&user_id, &entry_id).await.unwrap();
    assert_eq!(signal.analysis_version.as_str(), "v4");
    let entry = engine.get_entry(&user_id, &entry_id).unwrap();
    assert_eq!(entry.analysis_version.as_str(), "v4");

    engine.shutdown().await;
}

#[tokio::test]
async fn session_lifecycle_closes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).unwrap();
    let user = engine.create_user("u1").unwrap();

    let session = engine
        .start_session(&user.id, SessionType::InnerVoice, None)
        .unwrap();
    engine
        .send_message(&user.id, &session.id, "We are tired tonight.")
        .await
        .unwrap();
    engine.close_session(&user.id, &session.id).unwrap();

    let err = engine
        .send_message(&user.id, &session.id, "one more thing")
        .await
        .unwrap_err();
    assert_eq!(err.kind, reverie_core::ErrorKind::InputInvalid);

    let sessions = engine.list_sessions(&user.id, 10).unwrap();
    assert_eq!(sessions.len(), 1);

    engine.shutdown().await;
}
