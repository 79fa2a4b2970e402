use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use flashcard_engine::api::{app_router, ApiState};
use flashcard_engine::app::App;
use flashcard_engine::db::Db;
use flashcard_engine::CardStatus;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn state() -> ApiState {
    let db = Db::connect("sqlite::memory:", 1).await.unwrap();
    let app = App::with_db(db, 3).await.unwrap();
    ApiState::new(app)
}

async fn router() -> Router {
    app_router(state().await)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_deck_with_card(router: &Router) -> (String, String) {
    let (status, deck) = send(router, Method::POST, "/api/decks", Some(json!({ "name": "Animals" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let deck_id = deck["id"].as_str().unwrap().to_string();

    let (status, card) = send(
        router,
        Method::POST,
        &format!("/api/decks/{deck_id}/cards"),
        Some(json!({ "front": "犬", "back": "dog" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(card["status"], "new");
    assert_eq!(card["repetitionLevel"], 0);
    (deck_id, card["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn test_review_flow() {
    let router = router().await;
    let (deck_id, card_id) = create_deck_with_card(&router).await;

    let (status, due) = send(&router, Method::GET, &format!("/api/due?deckId={deck_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(due.as_array().unwrap().len(), 1);

    let (status, review) = send(
        &router,
        Method::POST,
        "/api/review",
        Some(json!({ "cardId": card_id, "correct": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(review["card"]["repetitionLevel"], 1);
    assert_eq!(review["card"]["status"], "learning");
    assert_eq!(review["card"]["reviewCount"], 1);
    assert_eq!(review["transition"]["delta"], "unchanged");
    assert_eq!(review["intervalDays"], 3);

    let (_, due) = send(&router, Method::GET, &format!("/api/due?deckId={deck_id}&shuffle=true"), None).await;
    assert!(due.as_array().unwrap().is_empty());

    let (status, summary) = send(&router, Method::GET, &format!("/api/decks/{deck_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["deck"]["cardCount"], 1);
    assert_eq!(summary["learning"], 1);
    assert_eq!(summary["accuracy"], 1.0);
}

#[tokio::test]
async fn test_mastery_reported_in_deck_list() {
    let router = router().await;
    let (_, card_id) = create_deck_with_card(&router).await;

    let mut last = Value::Null;
    for _ in 0..4 {
        let (status, review) = send(
            &router,
            Method::POST,
            "/api/review",
            Some(json!({ "cardId": card_id, "correct": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        last = review;
    }
    assert_eq!(last["card"]["status"], "mastered");
    assert_eq!(last["transition"]["delta"], "gained");

    let (_, decks) = send(&router, Method::GET, "/api/decks", None).await;
    assert_eq!(decks[0]["deck"]["masteredCount"], 1);
    assert_eq!(decks[0]["mastered"], 1);
}

#[tokio::test]
async fn test_error_statuses() {
    let router = router().await;
    let (deck_id, card_id) = create_deck_with_card(&router).await;
    let missing = uuid::Uuid::new_v4();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/review",
        Some(json!({ "cardId": missing, "correct": false })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("card not found"));

    let (status, _) = send(&router, Method::POST, "/api/decks", Some(json!({ "name": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, Method::PATCH, &format!("/api/cards/{card_id}"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, Method::GET, &format!("/api/due?deckId={missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, Method::DELETE, &format!("/api/decks/{deck_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, Method::GET, &format!("/api/cards/{card_id}/preview"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_edit_preview_and_delete_card() {
    let router = router().await;
    let (deck_id, card_id) = create_deck_with_card(&router).await;

    let (status, card) = send(
        &router,
        Method::PATCH,
        &format!("/api/cards/{card_id}"),
        Some(json!({ "hint": "barks" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(card["hint"], "barks");
    assert_eq!(card["front"], "犬");

    let (status, preview) = send(&router, Method::GET, &format!("/api/cards/{card_id}/preview"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(preview["ifCorrect"].is_string());
    assert!(preview["ifIncorrect"].is_string());

    let (status, _) = send(&router, Method::DELETE, &format!("/api/cards/{card_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, summary) = send(&router, Method::GET, &format!("/api/decks/{deck_id}"), None).await;
    assert_eq!(summary["deck"]["cardCount"], 0);
}

#[tokio::test]
async fn test_blank_edit_rejected() {
    let router = router().await;
    let (_, card_id) = create_deck_with_card(&router).await;

    for body in [json!({ "front": "" }), json!({ "back": "  " })] {
        let (status, body) = send(&router, Method::PATCH, &format!("/api/cards/{card_id}"), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("must not be empty"));
    }

    let (_, due) = send(&router, Method::GET, "/api/due", None).await;
    assert_eq!(due[0]["front"], "犬");
    assert_eq!(due[0]["back"], "dog");
}

#[tokio::test]
async fn test_drifted_counters_surface_as_server_error() {
    let state = state().await;
    let router = app_router(state.clone());
    let (deck_id, card_id) = create_deck_with_card(&router).await;
    let (_, other) = send(
        &router,
        Method::POST,
        &format!("/api/decks/{deck_id}/cards"),
        Some(json!({ "front": "猫", "back": "cat" })),
    )
    .await;
    let other_id = other["id"].as_str().unwrap().to_string();

    // Mark both cards mastered in memory without touching the deck counters
    {
        let mut app = state.app.lock().await;
        for id in [&card_id, &other_id] {
            let id = uuid::Uuid::parse_str(id).unwrap();
            let mut outcome = app.session.plan_review(id, true, chrono::Utc::now()).unwrap();
            outcome.card.repetition_level = 5;
            outcome.card.status = CardStatus::Mastered;
            app.session.apply_review(&outcome).unwrap();
        }
        let deck_id = uuid::Uuid::parse_str(&deck_id).unwrap();
        assert_eq!(app.session.deck(deck_id).unwrap().mastered_count, 0);
    }

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/review",
        Some(json!({ "cardId": card_id, "correct": false })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("consistency violation"));

    let (status, body) = send(&router, Method::DELETE, &format!("/api/cards/{other_id}"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("consistency violation"));

    // The demoted card was still stored and keeps working
    let (status, review) = send(
        &router,
        Method::POST,
        "/api/review",
        Some(json!({ "cardId": card_id, "correct": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(review["card"]["repetitionLevel"], 4);
}
