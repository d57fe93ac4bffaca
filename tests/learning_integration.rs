//! End-to-end pipeline tests: record, flush, distill, recall, export,
//! shutdown, restart.

use craftmind::{
    ActionContext, AgentAction, ExportOptions, LearningConfig, LearningSystem, Position,
    Reliability, TimeOfDay, TrainingRecord,
};
use tempfile::TempDir;

fn small_config(temp: &TempDir) -> LearningConfig {
    let mut config = LearningConfig::with_data_dir(temp.path());
    config.buffer.capacity = 10;
    config.session.max_records_per_file = 25;
    config
}

fn mining_context() -> ActionContext {
    ActionContext {
        position: Position {
            x: 120.5,
            y: 64.0,
            z: -33.2,
        },
        health: 20.0,
        food: 18.0,
        inventory: vec!["stone_pickaxe".to_string(), "torch".to_string()],
        nearby_blocks: vec!["oak_log".to_string(), "dirt".to_string()],
        nearby_entities: Vec::new(),
        time_of_day: TimeOfDay::Day,
        underground: false,
    }
}

fn combat_context() -> ActionContext {
    ActionContext {
        position: Position {
            x: 10.0,
            y: 40.0,
            z: 5.0,
        },
        health: 8.0,
        food: 6.0,
        inventory: vec!["iron_sword".to_string()],
        nearby_blocks: vec!["stone".to_string()],
        nearby_entities: vec!["zombie".to_string()],
        time_of_day: TimeOfDay::Night,
        underground: true,
    }
}

async fn seed_outcomes(system: &LearningSystem) {
    // A reliable mining habit (19/20) and a shakier combat one (7/10).
    for i in 0..20 {
        system
            .record_action(
                AgentAction::new("mine", "oak_log"),
                mining_context(),
                i != 9,
                300,
                Some("gathering wood for tools"),
                None,
            )
            .await;
    }
    for i in 0..10 {
        let success = i % 3 != 0 || i == 0;
        system
            .record_action(
                AgentAction::new("attack", "zombie"),
                combat_context(),
                success,
                800,
                None,
                if success { None } else { Some("took heavy damage") },
            )
            .await;
    }
}

#[tokio::test]
async fn test_full_pipeline_record_distill_recall() {
    let temp = TempDir::new().unwrap();
    let system = LearningSystem::new(small_config(&temp)).unwrap();

    seed_outcomes(&system).await;

    // Capacity 10: most records already overflowed into the session log.
    let stats = system.stats().await;
    assert_eq!(stats.records_recorded, 30);
    assert_eq!(stats.buffered_records, 10);

    let updated = system.distill_now().await;
    assert_eq!(updated, 2);

    // Recall is context-sensitive: the mining pattern wins in the mining
    // situation, the combat pattern in the combat one.
    let mining = system.relevant_patterns(&mining_context(), 1).await;
    assert_eq!(mining[0].signature(), "mine:oak_log");
    assert_eq!(mining[0].reliability, Reliability::High);

    let combat = system.relevant_patterns(&combat_context(), 1).await;
    assert_eq!(combat[0].signature(), "attack:zombie");
    assert!(combat[0].confidence < mining[0].confidence);
}

#[tokio::test]
async fn test_build_context_for_ai_reflects_state() {
    let temp = TempDir::new().unwrap();
    let system = LearningSystem::new(small_config(&temp)).unwrap();

    seed_outcomes(&system).await;
    system.distill_now().await;

    let text = system.build_context_for_ai(&mining_context()).await;
    assert!(text.contains("Recent actions:"));
    assert!(text.contains("What has worked before:"));
    assert!(text.contains("mine oak_log"));
}

#[tokio::test]
async fn test_session_dataset_export() {
    let temp = TempDir::new().unwrap();
    let system = LearningSystem::new(small_config(&temp)).unwrap();

    seed_outcomes(&system).await;
    system.distill_now().await;

    let out = temp.path().join("dataset.jsonl");
    let options = ExportOptions {
        success_only: true,
        ..ExportOptions::default()
    };
    let written = system.export_session_dataset(&out, &options).await;
    // 19 mining successes + 7 combat successes.
    assert_eq!(written, 26);

    let contents = std::fs::read_to_string(&out).unwrap();
    for line in contents.lines() {
        let record: TrainingRecord = serde_json::from_str(line).unwrap();
        assert!(record.success);
        assert_eq!(record.reward, 1.0);
        assert_eq!(record.messages.len(), 3);
        assert_eq!(record.messages[0].role, "system");
    }
}

#[tokio::test]
async fn test_shutdown_and_restart_preserve_state() {
    let temp = TempDir::new().unwrap();
    let config = small_config(&temp);

    {
        let system = LearningSystem::new(config.clone()).unwrap();
        system.start().await;
        seed_outcomes(&system).await;
        system.shutdown().await;
    }

    // A fresh process over the same data directory sees the buffered
    // records, the durable log, and the learned patterns.
    let system = LearningSystem::new(config).unwrap();
    let stats = system.stats().await;
    assert_eq!(stats.buffered_records, 10);
    assert_eq!(stats.live_patterns, 2);
    assert_eq!(stats.unflushed_records, 0);

    assert_eq!(system.consecutive_failures().await, 1);
    assert_eq!(
        system.most_recent_failing_kind().await,
        Some("attack".to_string())
    );

    let patterns = system.relevant_patterns(&mining_context(), 5).await;
    assert!(!patterns.is_empty());
}

#[tokio::test]
async fn test_background_timers_flush_and_distill() {
    let temp = TempDir::new().unwrap();
    let mut config = small_config(&temp);
    config.buffer.flush_interval_secs = 1;
    config.distiller.interval_secs = 1;

    let system = LearningSystem::new(config).unwrap();
    system.start().await;
    seed_outcomes(&system).await;

    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;

    let stats = system.stats().await;
    assert_eq!(stats.unflushed_records, 0);
    assert!(stats.last_distillation.is_some());
    assert_eq!(stats.live_patterns, 2);

    system.shutdown().await;
}
