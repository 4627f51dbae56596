use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use time::macros::datetime;
use time::{Duration, PrimitiveDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, redis::RedisHandle, security, state::AppState};
use crate::db::models::{
    QuestionSnapshot, SectionDefinition, StudentProfile, TestDefinition, TestOptions,
};
use crate::db::payloads::{AnswerKey, BlankMatching, QuestionOption};
use crate::db::types::{NotificationKind, QuestionType, TestMode, TestStatus};
use crate::repositories::attempts::memory::MemoryAttemptRepository;
use crate::services::engine::{EnginePorts, ExamEngine};
use crate::services::ports::{Clock, MembershipDirectory, Notifier, QuestionBank, TestDefinitionStore};
use crate::services::results::GradingConfig;

pub(crate) const T0: PrimitiveDateTime = datetime!(2026-03-02 09:00);
pub(crate) const COMPANY_ID: &str = "company-1";
pub(crate) const MANAGER_EMAIL: &str = "grader@school.test";

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) struct ManualClock {
    now: StdMutex<PrimitiveDateTime>,
}

impl ManualClock {
    pub(crate) fn new(now: PrimitiveDateTime) -> Self {
        Self { now: StdMutex::new(now) }
    }

    pub(crate) fn set(&self, now: PrimitiveDateTime) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> PrimitiveDateTime {
        *self.now.lock().expect("clock lock")
    }
}

#[derive(Default)]
pub(crate) struct MemoryTestStore {
    tests: StdMutex<HashMap<String, TestDefinition>>,
}

impl MemoryTestStore {
    pub(crate) fn put(&self, test: TestDefinition) {
        self.tests.lock().expect("test store lock").insert(test.id.clone(), test);
    }
}

#[async_trait]
impl TestDefinitionStore for MemoryTestStore {
    async fn test_definition(&self, test_id: &str) -> anyhow::Result<Option<TestDefinition>> {
        Ok(self.tests.lock().expect("test store lock").get(test_id).cloned())
    }
}

#[derive(Default)]
pub(crate) struct MemoryQuestionBank {
    questions: StdMutex<HashMap<String, QuestionSnapshot>>,
    unavailable: AtomicBool,
}

impl MemoryQuestionBank {
    pub(crate) fn put(&self, question: QuestionSnapshot) {
        self.questions.lock().expect("bank lock").insert(question.id.clone(), question);
    }

    /// While set, every lookup fails.
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuestionBank for MemoryQuestionBank {
    async fn questions_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<QuestionSnapshot>> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("question bank unavailable");
        }
        let questions = self.questions.lock().expect("bank lock");
        Ok(ids.iter().filter_map(|id| questions.get(id).cloned()).collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryDirectory {
    managers: StdMutex<Vec<(String, String)>>,
    profiles: StdMutex<HashMap<String, StudentProfile>>,
}

impl MemoryDirectory {
    pub(crate) fn add_manager(&self, company_id: &str, email: &str) {
        self.managers
            .lock()
            .expect("directory lock")
            .push((company_id.to_string(), email.to_lowercase()));
    }

    pub(crate) fn add_student(&self, id: &str, full_name: &str, email: &str) {
        self.profiles.lock().expect("directory lock").insert(
            id.to_string(),
            StudentProfile {
                id: id.to_string(),
                full_name: full_name.to_string(),
                email: email.to_string(),
            },
        );
    }
}

#[async_trait]
impl MembershipDirectory for MemoryDirectory {
    async fn is_manager_of(&self, company_id: &str, email: &str) -> anyhow::Result<bool> {
        let email = email.to_lowercase();
        Ok(self
            .managers
            .lock()
            .expect("directory lock")
            .iter()
            .any(|(company, manager)| company == company_id && *manager == email))
    }

    async fn student_profiles(&self, student_ids: &[String]) -> anyhow::Result<Vec<StudentProfile>> {
        let profiles = self.profiles.lock().expect("directory lock");
        Ok(student_ids.iter().filter_map(|id| profiles.get(id).cloned()).collect())
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: StdMutex<Vec<(String, NotificationKind, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub(crate) fn sent(&self) -> Vec<(String, NotificationKind, serde_json::Value)> {
        self.sent.lock().expect("notifier lock").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        student_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.sent.lock().expect("notifier lock").push((student_id.to_string(), kind, payload));
        Ok(())
    }
}

/// Engine wired to in-memory ports with handles kept for assertions.
pub(crate) struct EngineHarness {
    pub(crate) engine: ExamEngine,
    pub(crate) attempts: Arc<MemoryAttemptRepository>,
    pub(crate) tests: Arc<MemoryTestStore>,
    pub(crate) questions: Arc<MemoryQuestionBank>,
    pub(crate) directory: Arc<MemoryDirectory>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) clock: Arc<ManualClock>,
}

impl EngineHarness {
    pub(crate) fn new() -> Self {
        Self::with_grading(GradingConfig::default())
    }

    pub(crate) fn with_grading(grading: GradingConfig) -> Self {
        let attempts = Arc::new(MemoryAttemptRepository::new());
        let tests = Arc::new(MemoryTestStore::default());
        let questions = Arc::new(MemoryQuestionBank::default());
        let directory = Arc::new(MemoryDirectory::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(T0));
        directory.add_manager(COMPANY_ID, MANAGER_EMAIL);

        let engine = ExamEngine::new(
            EnginePorts {
                attempts: attempts.clone(),
                tests: tests.clone(),
                questions: questions.clone(),
                directory: directory.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
            },
            grading,
        );

        Self { engine, attempts, tests, questions, directory, notifier, clock }
    }

    pub(crate) fn add_questions(&self, questions: impl IntoIterator<Item = QuestionSnapshot>) {
        for question in questions {
            self.questions.put(question);
        }
    }
}

pub(crate) fn section(title: &str, question_ids: &[&str], minutes: Option<i32>) -> SectionDefinition {
    SectionDefinition {
        title: title.to_string(),
        question_ids: question_ids.iter().map(|id| id.to_string()).collect(),
        time_limit_minutes: minutes,
        instructions: None,
        can_go_back: true,
    }
}

/// A live test owned by `COMPANY_ID`; totals are derived from `questions`.
pub(crate) fn test_definition(
    id: &str,
    mode: TestMode,
    sections: Vec<SectionDefinition>,
    questions: &[QuestionSnapshot],
) -> TestDefinition {
    TestDefinition {
        id: id.to_string(),
        company_id: COMPANY_ID.to_string(),
        title: format!("Test {id}"),
        mode,
        status: TestStatus::Live,
        start_time: None,
        end_time: None,
        available_from: None,
        duration_minutes: Some(60),
        total_marks: questions.iter().map(|question| question.max_marks).sum(),
        total_questions: sections.iter().map(|section| section.question_ids.len() as i32).sum(),
        sections: Json(sections),
        options: Json(TestOptions::default()),
        results_published: false,
    }
}

fn question(
    id: &str,
    question_type: QuestionType,
    options: &[&str],
    answer_key: AnswerKey,
    max_marks: f64,
) -> QuestionSnapshot {
    QuestionSnapshot {
        id: id.to_string(),
        question_type,
        subject: Some("General".to_string()),
        prompt: format!("Prompt for {id}"),
        options: options
            .iter()
            .map(|label| QuestionOption { label: label.to_string(), text: format!("Option {label}") })
            .collect(),
        answer_key,
        max_marks,
        explanation: Some(format!("Explanation for {id}")),
        solution: None,
    }
}

pub(crate) fn mcq_single(id: &str, correct: &str, max_marks: f64) -> QuestionSnapshot {
    question(
        id,
        QuestionType::McqSingle,
        &["A", "B", "C", "D"],
        AnswerKey::McqSingle { correct: correct.to_string() },
        max_marks,
    )
}

pub(crate) fn mcq_multi(id: &str, correct: &[&str], max_marks: f64) -> QuestionSnapshot {
    question(
        id,
        QuestionType::McqMulti,
        &["A", "B", "C", "D"],
        AnswerKey::McqMulti { correct: correct.iter().map(|label| label.to_string()).collect() },
        max_marks,
    )
}

pub(crate) fn numeric(id: &str, value: f64, tolerance: f64, max_marks: f64) -> QuestionSnapshot {
    question(id, QuestionType::Numeric, &[], AnswerKey::Numeric { value, tolerance }, max_marks)
}

pub(crate) fn fill_blank(id: &str, accepted: &[&str], max_marks: f64) -> QuestionSnapshot {
    question(
        id,
        QuestionType::FillBlank,
        &[],
        AnswerKey::FillBlank {
            accepted: accepted.iter().map(|text| text.to_string()).collect(),
            matching: BlankMatching::Exact,
        },
        max_marks,
    )
}

pub(crate) fn short_answer(id: &str, max_marks: f64) -> QuestionSnapshot {
    question(id, QuestionType::ShortAnswer, &[], AnswerKey::ShortAnswer { model_answer: None }, max_marks)
}

pub(crate) fn long_answer(id: &str, max_marks: f64) -> QuestionSnapshot {
    question(id, QuestionType::LongAnswer, &[], AnswerKey::LongAnswer { model_answer: None }, max_marks)
}

pub(crate) fn test_state(harness: &EngineHarness) -> AppState {
    test_state_with(harness, Settings::for_tests())
}

pub(crate) fn test_state_with(harness: &EngineHarness, settings: Settings) -> AppState {
    let db = PgPoolOptions::new()
        .connect_lazy(&settings.database().database_url())
        .expect("lazy pool");
    let redis = RedisHandle::new(settings.redis().redis_url());
    AppState::new(settings, db, redis, harness.engine.clone())
}

pub(crate) fn test_app(harness: &EngineHarness) -> (AppState, Router) {
    let state = test_state(harness);
    let app = api::router::router(state.clone());
    (state, app)
}

pub(crate) fn bearer_token(user_id: &str, email: &str, settings: &Settings) -> String {
    security::create_access_token(user_id, email, settings, Duration::hours(1)).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

pub(crate) async fn read_text(response: axum::response::Response<Body>) -> String {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}
