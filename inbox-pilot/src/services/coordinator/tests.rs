use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Notify;

use super::*;
use crate::adapters::sqlite::pool::create_memory_pool;
use crate::adapters::sqlite::{users, DbPool, SqliteGateway};
use crate::services::classifier::ClassifyError;
use crate::services::mailbox::MailSession;
use crate::types::{Envelope, Outcome};

const USER: &str = "u1";
const APP_PASSWORD: &str = "abcd efgh ijkl mnop";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeMailbox {
    messages: Vec<RawMessage>,
    connect_error: Option<MailboxError>,
    connects: AtomicUsize,
    seen_username: Mutex<Option<String>>,
    /// When set, connect signals `entered` and then waits on `gate`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    /// Sessions whose fetch and logout never answer.
    stall_session: bool,
}

struct FakeSession {
    messages: Vec<RawMessage>,
    stall: bool,
}

#[async_trait]
impl MailboxClient for FakeMailbox {
    async fn connect(&self, credential: &MailCredential) -> Result<Box<dyn MailSession>, MailboxError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.seen_username.lock().unwrap() = Some(credential.username().to_string());
        if let Some((entered, gate)) = &self.gate {
            entered.notify_one();
            gate.notified().await;
        }
        if let Some(e) = &self.connect_error {
            return Err(e.clone());
        }
        assert_eq!(credential.password(), APP_PASSWORD);
        Ok(Box::new(FakeSession {
            messages: self.messages.clone(),
            stall: self.stall_session,
        }))
    }
}

#[async_trait]
impl MailSession for FakeSession {
    async fn fetch_recent(&mut self, cap: usize) -> Result<Vec<RawMessage>, MailboxError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        Ok(self.messages.iter().take(cap).cloned().collect())
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[derive(Clone)]
enum Script {
    Answer(Category, Option<&'static str>),
    AlwaysFail,
    Hang,
    /// Blocks its worker thread, then answers `newsletter`. Cannot be
    /// cancelled part way.
    Block(Duration),
}

#[derive(Default)]
struct ScriptedClassifier {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedClassifier {
    fn with(mut self, message_id: &str, script: Script) -> Self {
        self.scripts.insert(message_id.to_string(), script);
        self
    }

    fn calls(&self, message_id: &str) -> usize {
        self.calls.lock().unwrap().get(message_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, message: &RawMessage, _profile: &str) -> Result<Decision, ClassifyError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(message.message_id.clone())
            .or_default() += 1;

        match self.scripts.get(&message.message_id).cloned() {
            Some(Script::Answer(category, draft)) => Ok(Decision {
                category,
                draft_reply: draft.map(str::to_string),
            }),
            Some(Script::AlwaysFail) => Err(ClassifyError::Parse("no JSON object".into())),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(ClassifyError::Backend("woke up".into()))
            }
            Some(Script::Block(duration)) => {
                std::thread::sleep(duration);
                Ok(Decision {
                    category: Category::Newsletter,
                    draft_reply: None,
                })
            }
            None => Ok(Decision {
                category: Category::Fyi,
                draft_reply: None,
            }),
        }
    }
}

/// Reads from SQLite but refuses every commit.
struct ReadOnlyGateway(SqliteGateway);

impl PersistenceGateway for ReadOnlyGateway {
    fn load_user(&self, user_id: &str) -> Result<Option<User>, AgentError> {
        self.0.load_user(user_id)
    }

    fn commit_batch(&self, _: &Briefing, _: &[ProcessedEmail]) -> Result<(), AgentError> {
        Err(AgentError::Persistence("database is locked".into()))
    }

    fn read_latest(&self, user_id: &str) -> Result<Option<LatestBriefing>, AgentError> {
        self.0.read_latest(user_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn vault() -> Arc<CredentialVault> {
    Arc::new(CredentialVault::from_key([9u8; 32]))
}

fn setup_store(credential: Option<String>) -> DbPool {
    let pool = create_memory_pool().unwrap();
    let now = Utc::now();
    users::insert_user(
        &pool,
        &User {
            id: USER.into(),
            email: "sam@example.com".into(),
            name: "Sam".into(),
            encrypted_credential: credential,
            profile: "Runs a small bakery".into(),
            created_at: now,
            updated_at: now,
        },
    )
    .unwrap();
    pool
}

fn store() -> DbPool {
    setup_store(Some(vault().encrypt(APP_PASSWORD).unwrap()))
}

fn msg(id: &str, minutes_ago: i64) -> RawMessage {
    RawMessage {
        uid: 1000 - minutes_ago as u32,
        message_id: id.into(),
        received_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        envelope: Envelope {
            from_address: format!("sender-{}@example.com", id),
            from_name: None,
            to_addresses: vec!["sam@example.com".into()],
            subject: format!("About {}", id),
            date: None,
        },
        headers: vec![],
        body: format!("Body of {}", id),
    }
}

fn policy() -> RunPolicy {
    RunPolicy {
        call_timeout_secs: 10,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..RunPolicy::default()
    }
}

fn coordinator(
    gateway: Arc<dyn PersistenceGateway>,
    mailbox: Arc<FakeMailbox>,
    classifier: Arc<ScriptedClassifier>,
    policy: RunPolicy,
) -> RunCoordinator {
    RunCoordinator::new(gateway, mailbox, classifier, vault(), policy)
}

fn sqlite(pool: &DbPool) -> Arc<dyn PersistenceGateway> {
    Arc::new(SqliteGateway::new(pool.clone()))
}

fn steps(latest: &LatestBriefing) -> Vec<TraceStep> {
    latest.briefing.trace.iter().map(|e| e.step.clone()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_three_message_run() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("m1", 1), msg("m2", 5), msg("m3", 9)],
        ..Default::default()
    });
    let classifier = Arc::new(
        ScriptedClassifier::default()
            .with("m1", Script::Answer(Category::Fyi, None))
            .with("m2", Script::Answer(Category::ActionNeeded, Some("Sure, Thursday works.")))
            .with("m3", Script::Answer(Category::Fyi, None)),
    );
    let coord = coordinator(sqlite(&pool), mailbox.clone(), classifier, policy());

    let briefing_id = coord.start(USER).await.unwrap();
    assert_eq!(coord.status(USER), RunState::Idle);
    assert_eq!(
        mailbox.seen_username.lock().unwrap().as_deref(),
        Some("sam@example.com")
    );

    let latest = coord.latest(USER).await.unwrap().expect("briefing committed");
    assert_eq!(latest.briefing.id, briefing_id);
    assert_eq!(latest.emails.len(), 3);
    assert!(latest.emails.iter().all(|e| e.batch_id == latest.briefing.batch_id));

    let ids: Vec<_> = latest.emails.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);

    let m2 = &latest.emails[1];
    assert_eq!(m2.category, Category::ActionNeeded);
    assert_eq!(m2.draft_reply.as_deref(), Some("Sure, Thursday works."));
    assert_eq!(m2.subject, "About m2");
    assert_eq!(m2.excerpt, "Body of m2");
    assert!(latest.emails[0].draft_reply.is_none());

    let batch_id = latest.briefing.batch_id.clone();
    assert_eq!(
        steps(&latest),
        vec![
            TraceStep::Started,
            TraceStep::Fetched { count: 3 },
            TraceStep::Classified { message_id: "m1".into(), category: Category::Fyi },
            TraceStep::Classified { message_id: "m2".into(), category: Category::ActionNeeded },
            TraceStep::Classified { message_id: "m3".into(), category: Category::Fyi },
            TraceStep::Committed { batch_id },
        ]
    );
    assert!(latest.briefing.trace.iter().all(|e| e.outcome == Outcome::Ok));
}

#[tokio::test]
async fn test_failing_message_is_errored_not_fatal() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("good", 1), msg("bad", 2)],
        ..Default::default()
    });
    let classifier = Arc::new(ScriptedClassifier::default().with("bad", Script::AlwaysFail));
    let coord = coordinator(sqlite(&pool), mailbox, classifier.clone(), policy());

    coord.start(USER).await.unwrap();
    assert_eq!(classifier.calls("bad"), 2);
    assert_eq!(classifier.calls("good"), 1);

    let latest = coord.latest(USER).await.unwrap().unwrap();
    let bad = latest.emails.iter().find(|e| e.message_id == "bad").unwrap();
    assert_eq!(bad.category, Category::Errored);
    assert!(bad.draft_reply.is_none());

    let bad_events: Vec<_> = latest
        .briefing
        .trace
        .iter()
        .filter(|e| e.step.message_id() == Some("bad"))
        .collect();
    assert_eq!(bad_events.len(), 2);
    assert!(matches!(bad_events[0].step, TraceStep::Retried { attempt: 2, .. }));
    assert_eq!(bad_events[0].outcome, Outcome::Retry);
    assert!(matches!(bad_events[1].step, TraceStep::Errored { .. }));
    assert_eq!(bad_events[1].outcome, Outcome::Error);
}

#[tokio::test]
async fn test_concurrent_start_rejected() {
    let pool = store();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("m1", 1)],
        gate: Some((entered.clone(), gate.clone())),
        ..Default::default()
    });
    let coord = Arc::new(coordinator(
        sqlite(&pool),
        mailbox.clone(),
        Arc::new(ScriptedClassifier::default()),
        policy(),
    ));

    let first = {
        let coord = Arc::clone(&coord);
        tokio::spawn(async move { coord.start(USER).await })
    };

    entered.notified().await;
    assert_eq!(coord.status(USER), RunState::FetchingMail);

    let err = coord.start(USER).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_RUNNING");
    assert_eq!(mailbox.connects.load(Ordering::SeqCst), 1);

    gate.notify_one();
    let briefing_id = first.await.unwrap().unwrap();
    assert_eq!(coord.latest(USER).await.unwrap().unwrap().briefing.id, briefing_id);

    // lock released, a later run goes through (gate permit stored up front)
    gate.notify_one();
    assert!(coord.start(USER).await.is_ok());
}

#[tokio::test]
async fn test_auth_failure_keeps_previous_briefing() {
    let pool = store();
    let ok_mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("m1", 1)],
        ..Default::default()
    });
    let first = coordinator(
        sqlite(&pool),
        ok_mailbox,
        Arc::new(ScriptedClassifier::default()),
        policy(),
    )
    .start(USER)
    .await
    .unwrap();

    let rejecting = Arc::new(FakeMailbox {
        connect_error: Some(MailboxError::Auth("Invalid credentials".into())),
        ..Default::default()
    });
    let coord = coordinator(
        sqlite(&pool),
        rejecting,
        Arc::new(ScriptedClassifier::default()),
        policy(),
    );

    let err = coord.start(USER).await.unwrap_err();
    assert_eq!(err.code(), "AUTH_ERROR");
    assert_eq!(coord.status(USER), RunState::Idle);

    let latest = coord.latest(USER).await.unwrap().unwrap();
    assert_eq!(latest.briefing.id, first);
}

#[tokio::test]
async fn test_connection_failure_writes_nothing() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        connect_error: Some(MailboxError::Connection("TLS handshake failed".into())),
        ..Default::default()
    });
    let coord = coordinator(
        sqlite(&pool),
        mailbox,
        Arc::new(ScriptedClassifier::default()),
        policy(),
    );

    let err = coord.start(USER).await.unwrap_err();
    assert_eq!(err.code(), "CONNECTION_ERROR");
    assert!(coord.latest(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_commit_failure_is_fatal() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("m1", 1), msg("m2", 2)],
        ..Default::default()
    });
    let gateway = Arc::new(ReadOnlyGateway(SqliteGateway::new(pool.clone())));
    let coord = coordinator(
        gateway,
        mailbox,
        Arc::new(ScriptedClassifier::default()),
        policy(),
    );

    let err = coord.start(USER).await.unwrap_err();
    assert_eq!(err.code(), "PERSISTENCE_ERROR");
    assert_eq!(coord.status(USER), RunState::Idle);
    assert!(coord.latest(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_deadline_commits_partial_briefing() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("quick", 1), msg("slow", 2), msg("bad", 3)],
        ..Default::default()
    });
    let classifier = Arc::new(
        ScriptedClassifier::default()
            .with("quick", Script::Answer(Category::Newsletter, None))
            .with("slow", Script::Hang)
            .with("bad", Script::AlwaysFail),
    );
    let coord = coordinator(
        sqlite(&pool),
        mailbox,
        classifier,
        RunPolicy {
            run_timeout_secs: 1,
            ..policy()
        },
    );

    coord.start(USER).await.unwrap();

    let latest = coord.latest(USER).await.unwrap().unwrap();
    assert_eq!(latest.emails.len(), 3);
    let quick = latest.emails.iter().find(|e| e.message_id == "quick").unwrap();
    let slow = latest.emails.iter().find(|e| e.message_id == "slow").unwrap();
    let bad = latest.emails.iter().find(|e| e.message_id == "bad").unwrap();
    assert_eq!(quick.category, Category::Newsletter);
    assert_eq!(slow.category, Category::Errored);
    assert_eq!(bad.category, Category::Errored);

    // only the message the deadline cut off is counted, not the one that failed on its own
    let timed_out_event = latest
        .briefing
        .trace
        .iter()
        .find(|e| e.step == TraceStep::TimedOut)
        .unwrap();
    assert_eq!(timed_out_event.outcome, Outcome::Error);
    assert!(timed_out_event
        .detail
        .as_deref()
        .unwrap()
        .ends_with("1 message(s) errored"));

    let all = steps(&latest);
    assert!(all.contains(&TraceStep::Errored {
        message_id: "slow".into(),
        reason: DEADLINE_REASON.into(),
    }));
    let timed_out = all.iter().position(|s| *s == TraceStep::TimedOut).expect("TimedOut recorded");
    let committed = all
        .iter()
        .position(|s| matches!(s, TraceStep::Committed { .. }))
        .unwrap();
    assert!(timed_out < committed);

    // every message ends with an outcome event
    for id in ["quick", "slow", "bad"] {
        assert!(all.iter().any(|s| s.message_id() == Some(id)
            && matches!(s, TraceStep::Classified { .. } | TraceStep::Errored { .. })));
    }
}

#[tokio::test]
async fn test_stalled_mailbox_releases_lock_at_deadline() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("m1", 1)],
        stall_session: true,
        ..Default::default()
    });
    let coord = coordinator(
        sqlite(&pool),
        mailbox.clone(),
        Arc::new(ScriptedClassifier::default()),
        RunPolicy {
            run_timeout_secs: 1,
            ..policy()
        },
    );

    let err = tokio::time::timeout(Duration::from_secs(5), coord.start(USER))
        .await
        .expect("run ends at its deadline")
        .unwrap_err();
    assert_eq!(err.code(), "CONNECTION_ERROR");
    assert_eq!(coord.status(USER), RunState::Idle);
    assert!(coord.latest(USER).await.unwrap().is_none());

    // the next trigger gets its own attempt instead of ALREADY_RUNNING
    let again = tokio::time::timeout(Duration::from_secs(5), coord.start(USER))
        .await
        .expect("second run ends at its deadline")
        .unwrap_err();
    assert_eq!(again.code(), "CONNECTION_ERROR");
    assert_eq!(mailbox.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_result_finished_after_deadline_is_kept() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("edge", 1), msg("slow", 2)],
        ..Default::default()
    });
    // "edge" is still running when the 1s deadline fires and completes afterwards
    let classifier = Arc::new(
        ScriptedClassifier::default()
            .with("edge", Script::Block(Duration::from_millis(1500)))
            .with("slow", Script::Hang),
    );
    let coord = coordinator(
        sqlite(&pool),
        mailbox,
        classifier,
        RunPolicy {
            run_timeout_secs: 1,
            ..policy()
        },
    );

    coord.start(USER).await.unwrap();
    let latest = coord.latest(USER).await.unwrap().unwrap();

    let edge = latest.emails.iter().find(|e| e.message_id == "edge").unwrap();
    let slow = latest.emails.iter().find(|e| e.message_id == "slow").unwrap();
    assert_eq!(edge.category, Category::Newsletter);
    assert_eq!(slow.category, Category::Errored);

    let edge_steps: Vec<_> = steps(&latest)
        .into_iter()
        .filter(|s| s.message_id() == Some("edge"))
        .collect();
    assert_eq!(
        edge_steps,
        vec![TraceStep::Classified {
            message_id: "edge".into(),
            category: Category::Newsletter,
        }]
    );
    assert!(steps(&latest).contains(&TraceStep::TimedOut));
}

#[tokio::test]
async fn test_duplicate_message_ids_collapsed() {
    let pool = store();
    let mut older_copy = msg("dup", 10);
    older_copy.uid = 1;
    let mailbox = Arc::new(FakeMailbox {
        messages: vec![msg("dup", 1), msg("other", 3), older_copy],
        ..Default::default()
    });
    let coord = coordinator(
        sqlite(&pool),
        mailbox,
        Arc::new(ScriptedClassifier::default()),
        policy(),
    );

    coord.start(USER).await.unwrap();
    let latest = coord.latest(USER).await.unwrap().unwrap();
    assert_eq!(latest.emails.len(), 2);

    let fetched = latest
        .briefing
        .trace
        .iter()
        .find(|e| matches!(e.step, TraceStep::Fetched { .. }))
        .unwrap();
    assert_eq!(fetched.step, TraceStep::Fetched { count: 2 });
    assert!(fetched.detail.as_deref().unwrap().contains("1 duplicate"));
}

#[tokio::test]
async fn test_fetch_cap_applied() {
    let pool = store();
    let mailbox = Arc::new(FakeMailbox {
        messages: (0..5).map(|i| msg(&format!("m{}", i), i)).collect(),
        ..Default::default()
    });
    let coord = coordinator(
        sqlite(&pool),
        mailbox,
        Arc::new(ScriptedClassifier::default()),
        RunPolicy {
            fetch_cap: 2,
            ..policy()
        },
    );

    coord.start(USER).await.unwrap();
    let latest = coord.latest(USER).await.unwrap().unwrap();
    let ids: Vec<_> = latest.emails.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m0", "m1"]);
}

#[tokio::test]
async fn test_bad_credential_fails_before_mailbox() {
    let pool = setup_store(Some("not-a-real-ciphertext".into()));
    let mailbox = Arc::new(FakeMailbox::default());
    let coord = coordinator(
        sqlite(&pool),
        mailbox.clone(),
        Arc::new(ScriptedClassifier::default()),
        policy(),
    );

    let err = coord.start(USER).await.unwrap_err();
    assert_eq!(err.code(), "CREDENTIAL_ERROR");
    assert_eq!(mailbox.connects.load(Ordering::SeqCst), 0);
    assert!(coord.latest(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_credential_and_unknown_user() {
    let pool = setup_store(None);
    let mailbox = Arc::new(FakeMailbox::default());
    let coord = coordinator(
        sqlite(&pool),
        mailbox.clone(),
        Arc::new(ScriptedClassifier::default()),
        policy(),
    );

    assert_eq!(coord.start(USER).await.unwrap_err().code(), "CREDENTIAL_ERROR");
    assert_eq!(coord.start("nobody").await.unwrap_err().code(), "USER_NOT_FOUND");
    assert_eq!(mailbox.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_inbox_still_commits() {
    let pool = store();
    let coord = coordinator(
        sqlite(&pool),
        Arc::new(FakeMailbox::default()),
        Arc::new(ScriptedClassifier::default()),
        policy(),
    );

    coord.start(USER).await.unwrap();
    let latest = coord.latest(USER).await.unwrap().unwrap();
    assert!(latest.emails.is_empty());
    assert_eq!(steps(&latest)[1], TraceStep::Fetched { count: 0 });
}
