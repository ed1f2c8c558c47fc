mod common;

use agent::curation::Curator;
use chrono::{Duration, Utc};
use common::*;
use mimic_core::error::MimicError;
use mimic_core::similarity::{edit_distance, SimilarityPolicy};
use mimic_core::types::{DraftStatus, ModificationType, UserEdit};

fn curator(h: &Harness) -> Curator {
    Curator::new(h.sqlite.clone(), SimilarityPolicy::default(), 1000)
}

#[tokio::test]
async fn unchanged_draft_is_recorded_as_sent() {
    let h = harness(HarnessOptions::default()).await;
    let run = h.service.run_draft_agent("alice", &email("m1")).await.unwrap();
    let draft_id = run.draft_id.unwrap();

    let example = h
        .service
        .record_user_edit(
            "alice",
            &UserEdit {
                draft_id,
                final_subject: "Re: Thursday Sync".into(),
                final_body: "Works for me, see you at 3pm.".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(example.comparison.similarity, 1.0);
    assert_eq!(example.comparison.modification, ModificationType::SentAsIs);
    assert!(example.is_valid_for_training);
    assert!(example.prompt.contains("Type: scheduling"));
    assert_eq!(example.completion, "Works for me, see you at 3pm.");

    let record = h.sqlite.get_draft("alice", draft_id).await.unwrap().unwrap();
    assert_eq!(record.status, DraftStatus::Sent);
    assert_eq!(record.user_final_body.as_deref(), Some("Works for me, see you at 3pm."));
}

#[tokio::test]
async fn extensive_rewrite_is_major_but_still_valid() {
    let h = harness(HarnessOptions::default()).await;
    let draft = seed_draft(&h.sqlite, "alice", 1).await;
    let rewritten = "Not yet, I'll have them Friday after finance signs off.";

    let example = curator(&h)
        .record_user_edit(
            "alice",
            &UserEdit {
                draft_id: draft.id,
                final_subject: draft.draft_subject.clone(),
                final_body: rewritten.into(),
            },
        )
        .await
        .unwrap();

    assert!(example.comparison.similarity < 0.5);
    assert_eq!(example.comparison.modification, ModificationType::MajorRewrite);
    assert_eq!(
        example.comparison.edit_distance as usize,
        edit_distance(&draft.draft_body, rewritten)
    );
    assert!(example.is_valid_for_training);

    let stored = h.sqlite.get_example("alice", example.id).await.unwrap().unwrap();
    assert_eq!(stored.comparison, example.comparison);
    let record = h.sqlite.get_draft("alice", draft.id).await.unwrap().unwrap();
    assert_eq!(record.status, DraftStatus::Modified);
}

#[tokio::test]
async fn second_edit_for_same_draft_conflicts() {
    let h = harness(HarnessOptions::default()).await;
    let draft = seed_draft(&h.sqlite, "alice", 1).await;
    let edit = UserEdit {
        draft_id: draft.id,
        final_subject: draft.draft_subject.clone(),
        final_body: "Attached.".into(),
    };

    curator(&h).record_user_edit("alice", &edit).await.unwrap();
    let err = curator(&h).record_user_edit("alice", &edit).await.unwrap_err();

    assert!(matches!(err, MimicError::Conflict(_)));
    assert_eq!(h.sqlite.count_examples("alice").await.unwrap(), 1);
}

#[tokio::test]
async fn someone_elses_draft_is_not_found() {
    let h = harness(HarnessOptions::default()).await;
    let draft = seed_draft(&h.sqlite, "alice", 1).await;

    let err = curator(&h)
        .record_user_edit(
            "mallory",
            &UserEdit {
                draft_id: draft.id,
                final_subject: String::new(),
                final_body: "hi".into(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MimicError::NotFound(_)));
}

#[tokio::test]
async fn stale_draft_is_not_used_for_training() {
    let h = harness(HarnessOptions::default()).await;
    let draft = seed_draft(&h.sqlite, "alice", 1).await;

    let err = curator(&h)
        .record_user_edit_at(
            "alice",
            &UserEdit {
                draft_id: draft.id,
                final_subject: draft.draft_subject.clone(),
                final_body: draft.draft_body.clone(),
            },
            Utc::now() + Duration::days(8),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MimicError::Validation(_)));
    assert_eq!(h.sqlite.count_examples("alice").await.unwrap(), 0);
    let record = h.sqlite.get_draft("alice", draft.id).await.unwrap().unwrap();
    assert_eq!(record.status, DraftStatus::Pending);
}

#[tokio::test]
async fn empty_final_body_is_rejected() {
    let h = harness(HarnessOptions::default()).await;
    let draft = seed_draft(&h.sqlite, "alice", 1).await;

    let err = curator(&h)
        .record_user_edit(
            "alice",
            &UserEdit {
                draft_id: draft.id,
                final_subject: String::new(),
                final_body: String::new(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MimicError::Validation(_)));
}

#[tokio::test]
async fn invalidated_examples_stop_counting_as_pending() {
    let h = harness(HarnessOptions::default()).await;
    let examples = seed_examples(&h.sqlite, "alice", 0, 3).await;

    assert!(h
        .service
        .set_example_validity("alice", examples[0].id, false)
        .await
        .unwrap());

    let status = h.service.get_fine_tuning_status("alice").await.unwrap();
    assert_eq!(status.total_examples, 3);
    assert_eq!(status.pending_examples, 2);
}
