use actix_web::http::StatusCode;
use actix_web::test::{self, TestRequest};
use integration_tests::{as_user, post_image, register, test_app, vote, TestBoard};
use pk_core::models::{CreatedPost, ScoreUpdate};

#[actix_web::test]
async fn repeating_a_vote_leaves_the_score_unchanged() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;
    test::call_service(&app, register("bob").to_request()).await;
    let post: CreatedPost =
        test::call_and_read_body_json(&app, post_image("alice", None).to_request()).await;
    let uri = format!("/posts/{}/user_score", post.id);

    for _ in 0..2 {
        let resp = test::call_service(&app, vote("bob", &uri, 1).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let update: ScoreUpdate = test::read_body_json(resp).await;
        assert_eq!(
            update,
            ScoreUpdate {
                post_id: post.id,
                score: 1,
                user_score: 1
            }
        );
    }
}

#[actix_web::test]
async fn up_then_down_then_clear_restores_the_score() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;
    test::call_service(&app, register("bob").to_request()).await;
    let post: CreatedPost =
        test::call_and_read_body_json(&app, post_image("alice", None).to_request()).await;
    let uri = format!("/posts/{}/user_score", post.id);

    let up: ScoreUpdate = test::call_and_read_body_json(&app, vote("bob", &uri, 1).to_request()).await;
    assert_eq!(up.score, 1);
    let down: ScoreUpdate =
        test::call_and_read_body_json(&app, vote("bob", &uri, -1).to_request()).await;
    assert_eq!(down.score, -1);

    let clear = as_user(TestRequest::delete().uri(&uri), "bob").to_request();
    assert_eq!(test::call_service(&app, clear).await.status(), StatusCode::NO_CONTENT);

    let current: ScoreUpdate =
        test::call_and_read_body_json(&app, as_user(TestRequest::get().uri(&uri), "bob").to_request())
            .await;
    assert_eq!(current.score, 0);
    assert_eq!(current.user_score, 0);
}

#[actix_web::test]
async fn score_is_the_sum_of_live_votes() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    let voters = ["bob", "carol", "dave"];
    test::call_service(&app, register("alice").to_request()).await;
    for name in voters {
        test::call_service(&app, register(name).to_request()).await;
    }
    let post: CreatedPost =
        test::call_and_read_body_json(&app, post_image("alice", None).to_request()).await;
    let uri = format!("/posts/{}/user_score", post.id);

    test::call_service(&app, vote("bob", &uri, 1).to_request()).await;
    test::call_service(&app, vote("carol", &uri, 1).to_request()).await;
    test::call_service(&app, vote("dave", &uri, -1).to_request()).await;
    test::call_service(&app, vote("carol", &uri, -1).to_request()).await;
    test::call_service(&app, as_user(TestRequest::delete().uri(&uri), "bob").to_request()).await;

    // Live votes: carol -1, dave -1.
    let current: ScoreUpdate = test::call_and_read_body_json(
        &app,
        as_user(TestRequest::get().uri(&uri), "carol").to_request(),
    )
    .await;
    assert_eq!(current.score, -2);
    assert_eq!(current.user_score, -1);
}

#[actix_web::test]
async fn clearing_a_missing_vote_is_not_found() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;
    let post: CreatedPost =
        test::call_and_read_body_json(&app, post_image("alice", None).to_request()).await;

    let uri = format!("/posts/{}/user_score", post.id);
    let req = as_user(TestRequest::delete().uri(&uri), "alice").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn voting_on_missing_targets_is_not_found() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;

    for uri in ["/posts/42/user_score", "/conversations/42/user_score"] {
        let resp = test::call_service(&app, vote("alice", uri, 1).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");

        let read = as_user(TestRequest::get().uri(uri), "alice").to_request();
        assert_eq!(test::call_service(&app, read).await.status(), StatusCode::NOT_FOUND, "{uri}");

        let clear = as_user(TestRequest::delete().uri(uri), "alice").to_request();
        assert_eq!(test::call_service(&app, clear).await.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[actix_web::test]
async fn only_plus_or_minus_one_is_a_vote() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;
    let post: CreatedPost =
        test::call_and_read_body_json(&app, post_image("alice", None).to_request()).await;
    let uri = format!("/posts/{}/user_score", post.id);

    for value in [0, 2, -3] {
        let resp = test::call_service(&app, vote("alice", &uri, value).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{value}");
    }

    let garbage = as_user(TestRequest::put().uri(&uri), "alice")
        .set_json(serde_json::json!({ "value": "up" }))
        .to_request();
    assert_eq!(test::call_service(&app, garbage).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn conversation_votes_land_on_the_root_post() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;
    test::call_service(&app, register("bob").to_request()).await;

    let root: CreatedPost =
        test::call_and_read_body_json(&app, post_image("alice", None).to_request()).await;
    test::call_service(&app, post_image("bob", Some(root.conversation_id)).to_request()).await;

    let uri = format!("/conversations/{}/user_score", root.conversation_id);
    let update: ScoreUpdate =
        test::call_and_read_body_json(&app, vote("bob", &uri, 1).to_request()).await;
    assert_eq!(update.post_id, root.id);
    assert_eq!(update.score, 1);

    let post_uri = format!("/posts/{}/user_score", root.id);
    let current: ScoreUpdate = test::call_and_read_body_json(
        &app,
        as_user(TestRequest::get().uri(&post_uri), "bob").to_request(),
    )
    .await;
    assert_eq!(current.user_score, 1);
}
