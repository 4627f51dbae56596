use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::db::types::TestMode;
use crate::test_support::{
    self, mcq_multi, mcq_single, numeric, section, test_definition, EngineHarness,
};

const STUDENT_ID: &str = "student-1";
const STUDENT_EMAIL: &str = "student@school.test";

fn seed_objective(harness: &EngineHarness) {
    let questions =
        vec![mcq_single("q1", "B", 4.0), mcq_multi("q2", &["A", "C"], 4.0), numeric("q3", 9.81, 0.05, 2.0)];
    let mut test = test_definition(
        "t-obj",
        TestMode::Classroom,
        vec![section("Main", &["q1", "q2", "q3"], None)],
        &questions,
    );
    test.options.0.show_results_after_completion = true;
    harness.add_questions(questions);
    harness.tests.put(test);
}

fn seed_sectioned(harness: &EngineHarness) {
    let questions = vec![mcq_single("a1", "A", 1.0), mcq_single("b1", "B", 1.0), mcq_single("c1", "C", 1.0)];
    let mut test = test_definition(
        "t-sections",
        TestMode::LiveMock,
        vec![section("A", &["a1"], None), section("B", &["b1"], None), section("C", &["c1"], None)],
        &questions,
    );
    test.options.0.allow_review = false;
    harness.add_questions(questions);
    harness.tests.put(test);
}

#[tokio::test]
async fn start_creates_then_resumes_without_leaking_answer_keys() {
    let harness = EngineHarness::new();
    seed_objective(&harness);
    let (state, app) = test_support::test_app(&harness);
    let token = test_support::bearer_token(STUDENT_ID, STUDENT_EMAIL, state.settings());

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-obj/attempts",
            Some(&token),
            None,
        ))
        .await
        .expect("start");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = test_support::read_json(response).await;
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["resumed"], false);
    assert_eq!(body["attempt_number"], 1);
    assert_eq!(body["questions"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["remaining_seconds"], 3600);
    let serialized = body.to_string();
    assert!(!serialized.contains("answer_key"));
    assert!(!serialized.contains("explanation"));
    let attempt_id = body["attempt_id"].as_str().expect("attempt id").to_string();

    let response = app
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-obj/attempts",
            Some(&token),
            None,
        ))
        .await
        .expect("resume");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["resumed"], true);
    assert_eq!(body["attempt_id"], attempt_id);
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let harness = EngineHarness::new();
    seed_objective(&harness);
    let (_state, app) = test_support::test_app(&harness);

    let response = app
        .oneshot(test_support::json_request(Method::POST, "/api/v1/tests/t-obj/attempts", None, None))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = test_support::read_json(response).await;
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn unknown_test_returns_not_found() {
    let harness = EngineHarness::new();
    let (state, app) = test_support::test_app(&harness);
    let token = test_support::bearer_token(STUDENT_ID, STUDENT_EMAIL, state.settings());

    let response = app
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/missing/attempts",
            Some(&token),
            None,
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = test_support::read_json(response).await;
    assert_eq!(body["code"], "not_found");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn answer_flag_submit_and_review_flow() {
    let harness = EngineHarness::new();
    seed_objective(&harness);
    let (state, app) = test_support::test_app(&harness);
    let token = test_support::bearer_token(STUDENT_ID, STUDENT_EMAIL, state.settings());

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-obj/attempts",
            Some(&token),
            None,
        ))
        .await
        .expect("start");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            "/api/v1/tests/t-obj/attempts/current/answers/q1",
            Some(&token),
            Some(json!({ "answer": { "type": "mcq_single", "choice": "B" } })),
        ))
        .await
        .expect("answer");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["question_id"], "q1");
    assert!(body["feedback"].is_null());

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            "/api/v1/tests/t-obj/attempts/current/answers/q1",
            Some(&token),
            Some(json!({ "answer": { "type": "numeric", "value": 3.0 } })),
        ))
        .await
        .expect("mismatched answer");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert_eq!(body["code"], "invalid_answer");

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            "/api/v1/tests/t-obj/attempts/current/flags/q2",
            Some(&token),
            Some(json!({})),
        ))
        .await
        .expect("flag");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["flagged"], true);

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-obj/attempts/current/submit",
            Some(&token),
            None,
        ))
        .await
        .expect("submit");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["already_closed"], false);

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-obj/attempts/current/submit",
            Some(&token),
            None,
        ))
        .await
        .expect("second submit");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["already_closed"], true);

    let response = app
        .oneshot(test_support::json_request(
            Method::GET,
            "/api/v1/tests/t-obj/result",
            Some(&token),
            None,
        ))
        .await
        .expect("result");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["status"], "graded");
    assert_eq!(body["results_visible"], true);
    assert_eq!(body["result"]["marks_obtained"], 4.0);
    assert_eq!(body["result"]["percentage"], 40.0);
    let review = body["review"].as_array().expect("review");
    assert_eq!(review.len(), 3);
    assert!(review.iter().any(|item| item["question_id"] == "q1" && item["is_correct"] == true));
}

#[tokio::test]
async fn practice_feedback_reports_correctness_only() {
    let harness = EngineHarness::new();
    let questions = vec![mcq_single("p1", "A", 2.0)];
    let mut test =
        test_definition("t-practice", TestMode::Practice, vec![section("Main", &["p1"], None)], &questions);
    test.options.0.instant_feedback = true;
    test.options.0.allow_review = false;
    harness.add_questions(questions);
    harness.tests.put(test);
    let (state, app) = test_support::test_app(&harness);
    let token = test_support::bearer_token(STUDENT_ID, STUDENT_EMAIL, state.settings());

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-practice/attempts",
            Some(&token),
            None,
        ))
        .await
        .expect("start");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(test_support::json_request(
            Method::PUT,
            "/api/v1/tests/t-practice/attempts/current/answers/p1",
            Some(&token),
            Some(json!({ "answer": { "type": "mcq_single", "choice": "A" } })),
        ))
        .await
        .expect("answer");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["feedback"]["is_correct"], true);
    assert_eq!(body["feedback"]["marks_awarded"], 2.0);
    assert!(body["feedback"].get("explanation").is_none());
    assert!(!body.to_string().contains("Explanation for p1"));
}

#[tokio::test]
async fn strict_sections_reject_out_of_order_moves() {
    let harness = EngineHarness::new();
    seed_sectioned(&harness);
    let (state, app) = test_support::test_app(&harness);
    let token = test_support::bearer_token(STUDENT_ID, STUDENT_EMAIL, state.settings());

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-sections/attempts",
            Some(&token),
            None,
        ))
        .await
        .expect("start");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::PUT,
            "/api/v1/tests/t-sections/attempts/current/answers/b1",
            Some(&token),
            Some(json!({ "answer": { "type": "mcq_single", "choice": "B" } })),
        ))
        .await
        .expect("answer");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = test_support::read_json(response).await;
    assert_eq!(body["code"], "section_mismatch");

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-sections/attempts/current/sections/2/start",
            Some(&token),
            None,
        ))
        .await
        .expect("skip");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert_eq!(body["code"], "cannot_skip_sections");

    let response = app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-sections/attempts/current/sections/1/start",
            Some(&token),
            None,
        ))
        .await
        .expect("advance");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["current_section_index"], 1);
    assert_eq!(body["sections"][0]["is_locked"], true);

    let response = app
        .oneshot(test_support::json_request(
            Method::POST,
            "/api/v1/tests/t-sections/attempts/current/sections/0/start",
            Some(&token),
            None,
        ))
        .await
        .expect("go back");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = test_support::read_json(response).await;
    assert_eq!(body["code"], "review_not_allowed");
}
