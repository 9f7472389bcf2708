mod common;

use std::{collections::BTreeMap, time::Duration};

use common::{files_at_commit, files_at_tip, quick_options, seed_repo, TestHost, UpdateFault};
use git_publish::{
    BatchError, FileChange, HostError, HostingApi, PublishError, PublishOptions, Publisher, Stage,
};
use tempfile::TempDir;

fn expected(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}

async fn setup(dir: &TempDir, options: PublishOptions) -> (Publisher<TestHost>, git_publish::BranchTarget) {
    let host = TestHost::new(dir.path());
    let target = seed_repo(&host.inner, &[("README.md", "hello")]).await;
    (Publisher::with_options(host, options), target)
}

#[tokio::test]
async fn test_publish_creates_single_commit_on_tip() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    let c0 = host.inner.branch_tip(&target).await.unwrap();

    let outcome = publisher
        .publish_files(
            &target,
            vec![FileChange::new("src/index.ts", "export const x = 1;\n")],
            "add index",
        )
        .await
        .unwrap();

    assert_eq!(outcome.base, c0);
    assert_eq!(host.inner.branch_tip(&target).await.unwrap(), outcome.commit);

    let commit = host.inner.commit(&target.repo, &outcome.commit).await.unwrap();
    assert_eq!(commit.parents, vec![c0]);
    assert_eq!(commit.message, "add index");
    assert_eq!(commit.tree, outcome.tree);

    assert_eq!(
        files_at_tip(&host.inner, &target).await,
        expected(&[
            ("README.md", "hello"),
            ("src/index.ts", "export const x = 1;\n")
        ])
    );
}

#[tokio::test]
async fn test_new_tree_is_base_plus_batch() {
    let dir = TempDir::new().unwrap();
    let host = TestHost::new(dir.path());
    let target = seed_repo(
        &host.inner,
        &[
            ("README.md", "hello"),
            ("docs/guide.md", "# Guide\n"),
            ("src/main.ts", "main()\n"),
        ],
    )
    .await;
    let publisher = Publisher::with_options(host, quick_options());
    let host = publisher.host();
    let before = files_at_tip(&host.inner, &target).await;

    publisher
        .publish_files(
            &target,
            vec![
                FileChange::new("src/main.ts", "main(process.argv)\n"),
                FileChange::new("docs/api/index.md", "# API\n"),
            ],
            "update",
        )
        .await
        .unwrap();

    let mut wanted = before.clone();
    wanted.insert("src/main.ts".into(), "main(process.argv)\n".into());
    wanted.insert("docs/api/index.md".into(), "# API\n".into());
    assert_eq!(files_at_tip(&host.inner, &target).await, wanted);
}

#[tokio::test]
async fn test_failure_before_branch_update_leaves_branch_alone() {
    // Every stage before the branch update
    for &stage in &Stage::ALL[..5] {
        let dir = TempDir::new().unwrap();
        let (publisher, target) = setup(&dir, quick_options()).await;
        let host = publisher.host();
        let before = host.inner.branch_tip(&target).await.unwrap();
        host.fail_at(Some(stage));

        let err = publisher
            .publish_files(
                &target,
                vec![
                    FileChange::new("a.txt", "a"),
                    FileChange::new("b/c.txt", "c"),
                ],
                "never lands",
            )
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(stage), "{}", err);
        assert!(err.is_retry_safe(), "{} should be retry safe", stage);
        assert!(err.built_commit().is_none());
        assert_eq!(host.count("update_branch"), 0, "{}", stage);
        assert_eq!(host.inner.branch_tip(&target).await.unwrap(), before);
        assert_eq!(
            files_at_tip(&host.inner, &target).await,
            expected(&[("README.md", "hello")])
        );
    }
}

#[tokio::test]
async fn test_one_failed_blob_fails_the_publish() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    let before = host.inner.branch_tip(&target).await.unwrap();
    host.fail_blob_with_content("bad");

    let err = publisher
        .publish_files(
            &target,
            vec![
                FileChange::new("good.txt", "good"),
                FileChange::new("bad.txt", "bad"),
            ],
            "partial",
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PublishError::Stage {
            stage: Stage::CreateBlobs,
            source: HostError::Transport(_),
        }
    ));
    assert_eq!(host.count("tree"), 0);
    assert_eq!(host.inner.branch_tip(&target).await.unwrap(), before);
}

#[tokio::test]
async fn test_slow_call_times_out() {
    let dir = TempDir::new().unwrap();
    let options = PublishOptions {
        call_timeout: Duration::from_millis(50),
        ..quick_options()
    };
    let (publisher, target) = setup(&dir, options).await;
    let host = publisher.host();
    host.delay_blob("slow", Duration::from_secs(5));

    let err = publisher
        .publish_files(&target, vec![FileChange::new("slow.txt", "slow")], "slow")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PublishError::Stage {
            stage: Stage::CreateBlobs,
            source: HostError::Timeout(_),
        }
    ));
    assert_eq!(host.count("update_branch"), 0);
}

#[tokio::test]
async fn test_utf8_content_survives() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();

    let text = "héllo wörld 🦀\n日本語のテキスト\n\tindented – dash\n";
    let outcome = publisher
        .publish_files(&target, vec![FileChange::new("i18n/ja.txt", text)], "i18n")
        .await
        .unwrap();

    let files = files_at_commit(&host.inner, &target.repo, &outcome.commit).await;
    assert_eq!(files["i18n/ja.txt"], text);
}

#[tokio::test]
async fn test_invalid_batch_makes_no_calls() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();

    let err = publisher
        .publish_files(
            &target,
            vec![
                FileChange::new("a.txt", "one"),
                FileChange::new("b.txt", "two"),
                FileChange::new("a.txt", "three"),
            ],
            "dup",
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PublishError::InvalidInput(BatchError::DuplicatePath(ref p)) if p == "a.txt"
    ));

    let err = publisher
        .publish_files(&target, Vec::new(), "empty")
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::InvalidInput(BatchError::Empty)));

    let err = publisher
        .publish_files(&target, vec![FileChange::new("../x", "x")], "escape")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PublishError::InvalidInput(BatchError::InvalidPath { .. })
    ));

    assert!(host.calls().is_empty(), "{:?}", host.calls());
}

#[tokio::test]
async fn test_concurrent_writer_causes_conflict() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    let base = host.inner.branch_tip(&target).await.unwrap();
    host.race_next_update(&target, vec![FileChange::new("theirs.txt", "theirs")]);

    let err = publisher
        .publish_files(&target, vec![FileChange::new("ours.txt", "ours")], "ours")
        .await
        .unwrap_err();

    assert!(err.is_conflict(), "{}", err);
    assert!(!err.is_retry_safe());
    let ours = match &err {
        PublishError::Conflict {
            base: conflict_base,
            commit,
            ..
        } => {
            assert_eq!(conflict_base, &base);
            commit.clone()
        }
        other => panic!("unexpected error {}", other),
    };
    // Conflicts are never retried internally
    assert_eq!(host.count("update_branch"), 1);

    let tip = host.inner.branch_tip(&target).await.unwrap();
    assert_ne!(tip, base);
    assert_ne!(tip, ours);
    assert_eq!(
        files_at_tip(&host.inner, &target).await,
        expected(&[("README.md", "hello"), ("theirs.txt", "theirs")])
    );

    // Starting over from the new tip keeps the other writer's work
    let outcome = publisher
        .publish_files(&target, vec![FileChange::new("ours.txt", "ours")], "ours again")
        .await
        .unwrap();
    assert_eq!(outcome.base, tip);
    assert_eq!(
        files_at_tip(&host.inner, &target).await,
        expected(&[
            ("README.md", "hello"),
            ("ours.txt", "ours"),
            ("theirs.txt", "theirs")
        ])
    );
}

#[tokio::test]
async fn test_blobs_finishing_out_of_order() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    host.delay_blob("first", Duration::from_millis(200));
    host.delay_blob("second", Duration::from_millis(100));

    publisher
        .publish_files(
            &target,
            vec![
                FileChange::new("1.txt", "first"),
                FileChange::new("2.txt", "second"),
                FileChange::new("3.txt", "third"),
            ],
            "ordered",
        )
        .await
        .unwrap();

    let calls = host.calls();
    let done: Vec<_> = calls
        .iter()
        .filter_map(|c| c.strip_prefix("blob:done:"))
        .collect();
    assert_eq!(done, vec!["third", "second", "first"]);

    let tree_at = calls.iter().position(|c| c == "tree").unwrap();
    let last_blob = calls.iter().rposition(|c| c.starts_with("blob:")).unwrap();
    assert!(tree_at > last_blob);

    assert_eq!(
        files_at_tip(&host.inner, &target).await,
        expected(&[
            ("1.txt", "first"),
            ("2.txt", "second"),
            ("3.txt", "third"),
            ("README.md", "hello")
        ])
    );
}

#[tokio::test]
async fn test_blob_uploads_are_bounded() {
    let dir = TempDir::new().unwrap();
    let options = PublishOptions {
        max_concurrent_blobs: 2,
        ..quick_options()
    };
    let (publisher, target) = setup(&dir, options).await;
    let host = publisher.host();

    let files: Vec<_> = (0..6)
        .map(|i| {
            let content = format!("file {}", i);
            host.delay_blob(&content, Duration::from_millis(30));
            FileChange::new(format!("f{}.txt", i), content)
        })
        .collect();
    publisher.publish_files(&target, files, "bounded").await.unwrap();

    assert!(host.max_in_flight() <= 2, "{}", host.max_in_flight());
    assert_eq!(host.count("blob:start"), 6);
}

#[tokio::test]
async fn test_update_applied_but_reported_as_timeout() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    host.push_update_fault(UpdateFault::ApplyThenTimeout);

    let outcome = publisher
        .publish_files(&target, vec![FileChange::new("a.txt", "a")], "ambiguous")
        .await
        .unwrap();

    assert_eq!(host.inner.branch_tip(&target).await.unwrap(), outcome.commit);
    // Resumption saw the move had landed and did not repeat it
    assert_eq!(host.count("update_branch"), 1);
}

#[tokio::test]
async fn test_applied_update_found_below_a_newer_tip() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    host.push_update_fault(UpdateFault::ApplyThenBuiltOnThenTimeout);

    let outcome = publisher
        .publish_files(&target, vec![FileChange::new("ours.txt", "ours")], "ours")
        .await
        .unwrap();

    let tip = host.inner.branch_tip(&target).await.unwrap();
    assert_ne!(tip, outcome.commit);
    let follow_up = host.inner.commit(&target.repo, &tip).await.unwrap();
    assert_eq!(follow_up.parents, vec![outcome.commit.clone()]);
    assert_eq!(host.count("update_branch"), 1);
    assert_eq!(
        files_at_tip(&host.inner, &target).await,
        expected(&[
            ("README.md", "hello"),
            ("follow-up.txt", "later"),
            ("ours.txt", "ours")
        ])
    );

    // An explicit resume agrees
    publisher
        .resume(&target, &outcome.base, &outcome.commit)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_transient_update_failure_is_resumed() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    host.push_update_fault(UpdateFault::Transient);

    let outcome = publisher
        .publish_files(&target, vec![FileChange::new("a.txt", "a")], "flaky")
        .await
        .unwrap();

    assert_eq!(host.inner.branch_tip(&target).await.unwrap(), outcome.commit);
    assert_eq!(host.count("update_branch"), 2);
}

#[tokio::test]
async fn test_resume_after_retries_run_out() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    let base = host.inner.branch_tip(&target).await.unwrap();
    for _ in 0..3 {
        host.push_update_fault(UpdateFault::Transient);
    }

    let err = publisher
        .publish_files(&target, vec![FileChange::new("a.txt", "a")], "down")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PublishError::PointerUpdate {
            source: HostError::Transport(_),
            ..
        }
    ));
    assert!(!err.is_retry_safe());
    assert_eq!(host.count("update_branch"), 3);
    assert_eq!(host.inner.branch_tip(&target).await.unwrap(), base);

    let commit = err.built_commit().unwrap().clone();
    publisher.resume(&target, &base, &commit).await.unwrap();
    assert_eq!(host.inner.branch_tip(&target).await.unwrap(), commit);
    assert_eq!(
        files_at_tip(&host.inner, &target).await,
        expected(&[("README.md", "hello"), ("a.txt", "a")])
    );

    // Resuming again is a no-op
    publisher.resume(&target, &base, &commit).await.unwrap();
}

#[tokio::test]
async fn test_resume_after_branch_moved_is_conflict() {
    let dir = TempDir::new().unwrap();
    let options = PublishOptions {
        pointer_update_retries: 0,
        ..quick_options()
    };
    let (publisher, target) = setup(&dir, options).await;
    let host = publisher.host();
    let base = host.inner.branch_tip(&target).await.unwrap();
    host.push_update_fault(UpdateFault::Transient);

    let err = publisher
        .publish_files(&target, vec![FileChange::new("a.txt", "a")], "lost")
        .await
        .unwrap_err();
    let commit = err.built_commit().unwrap().clone();

    let other = Publisher::new(host.inner.clone());
    other
        .publish_files(&target, vec![FileChange::new("b.txt", "b")], "other")
        .await
        .unwrap();

    let err = publisher.resume(&target, &base, &commit).await.unwrap_err();
    assert!(err.is_conflict(), "{}", err);
}

#[tokio::test]
async fn test_permanent_update_failure_is_not_resumed() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let host = publisher.host();
    host.push_update_fault(UpdateFault::Unauthorized);

    let err = publisher
        .publish_files(&target, vec![FileChange::new("a.txt", "a")], "denied")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PublishError::PointerUpdate {
            source: HostError::Unauthorized(_),
            ..
        }
    ));
    assert_eq!(host.count("update_branch"), 1);
    assert_eq!(host.count("branch_tip"), 1);
}

#[tokio::test]
async fn test_missing_branch_is_reported_at_read() {
    let dir = TempDir::new().unwrap();
    let (publisher, target) = setup(&dir, quick_options()).await;
    let missing = git_publish::BranchTarget::new(target.repo.clone(), "nope");

    let err = publisher
        .publish_files(&missing, vec![FileChange::new("a.txt", "a")], "x")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PublishError::Stage {
            stage: Stage::ReadBranch,
            source: HostError::NotFound(_),
        }
    ));
    assert!(!err.is_retry_safe());
}
