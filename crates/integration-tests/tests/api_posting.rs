use actix_web::http::{header, StatusCode};
use actix_web::test::{self, TestRequest};
use integration_tests::{
    as_user, multipart_body, post_image, register, test_app, upload_field, TestBoard, BOUNDARY, PNG,
};
use pk_core::models::{ConversationSummary, CreatedPost, PostSummary};

#[actix_web::test]
async fn posting_an_image_starts_a_conversation() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;

    let resp = test::call_service(&app, post_image("alice", None).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: CreatedPost = test::read_body_json(resp).await;

    let listing: Vec<ConversationSummary> =
        test::call_and_read_body_json(&app, TestRequest::get().uri("/conversations").to_request())
            .await;
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, created.conversation_id);
    assert_eq!(listing[0].post_id, created.id);
    assert_eq!(listing[0].score, 0);
    assert!(listing[0].image_url.starts_with("/images/"));

    // The stored bytes come back unchanged under the listed URL.
    let resp =
        test::call_service(&app, TestRequest::get().uri(&listing[0].image_url).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(test::read_body(resp).await.as_ref(), PNG);
}

#[actix_web::test]
async fn images_are_served_under_a_custom_prefix() {
    let board = TestBoard::with_media_prefix("/media/").await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;
    test::call_service(&app, post_image("alice", None).to_request()).await;

    let listing: Vec<ConversationSummary> =
        test::call_and_read_body_json(&app, TestRequest::get().uri("/conversations").to_request())
            .await;
    assert!(listing[0].image_url.starts_with("/media/"), "{}", listing[0].image_url);

    let resp =
        test::call_service(&app, TestRequest::get().uri(&listing[0].image_url).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await.as_ref(), PNG);
}

#[actix_web::test]
async fn stored_extension_follows_the_image_not_the_file_name() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;

    let mut payload = PNG.to_vec();
    payload.extend_from_slice(b"<script>alert(document.cookie)</script>");
    let req = as_user(TestRequest::post().uri("/conversations"), "alice")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body("image", "x.html", &payload))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let listing: Vec<ConversationSummary> =
        test::call_and_read_body_json(&app, TestRequest::get().uri("/conversations").to_request())
            .await;
    assert!(listing[0].image_url.ends_with(".png"), "{}", listing[0].image_url);

    let resp =
        test::call_service(&app, TestRequest::get().uri(&listing[0].image_url).to_request()).await;
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
}

#[actix_web::test]
async fn replies_join_the_existing_conversation() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;
    test::call_service(&app, register("bob").to_request()).await;

    let root: CreatedPost =
        test::call_and_read_body_json(&app, post_image("alice", None).to_request()).await;
    let resp = test::call_service(
        &app,
        post_image("bob", Some(root.conversation_id)).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let reply: CreatedPost = test::read_body_json(resp).await;
    assert_eq!(reply.conversation_id, root.conversation_id);
    assert!(reply.id > root.id);

    let uri = format!("/conversations/{}", root.conversation_id);
    let posts: Vec<PostSummary> =
        test::call_and_read_body_json(&app, TestRequest::get().uri(&uri).to_request()).await;
    let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![root.id, reply.id]);

    // Still one conversation overall.
    let listing: Vec<ConversationSummary> =
        test::call_and_read_body_json(&app, TestRequest::get().uri("/conversations").to_request())
            .await;
    assert_eq!(listing.len(), 1);
}

#[actix_web::test]
async fn replying_to_a_missing_conversation_is_rejected() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;

    let resp = test::call_service(&app, post_image("alice", Some(999)).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn uploads_must_carry_an_image_field() {
    let board = TestBoard::new().await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;

    let wrong_field = as_user(upload_field("/conversations", "picture", PNG), "alice").to_request();
    assert_eq!(test::call_service(&app, wrong_field).await.status(), StatusCode::BAD_REQUEST);

    let not_an_image =
        as_user(upload_field("/conversations", "image", b"just some text"), "alice").to_request();
    assert_eq!(test::call_service(&app, not_an_image).await.status(), StatusCode::BAD_REQUEST);

    let not_multipart = as_user(TestRequest::post().uri("/conversations"), "alice")
        .set_payload(PNG)
        .to_request();
    assert_eq!(test::call_service(&app, not_multipart).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn oversized_uploads_are_rejected() {
    let board = TestBoard::with_upload_limit(PNG.len() - 1).await;
    let app = test_app!(board);
    test::call_service(&app, register("alice").to_request()).await;

    let resp = test::call_service(&app, post_image("alice", None).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn posting_requires_credentials() {
    let board = TestBoard::new().await;
    let app = test_app!(board);

    let resp = test::call_service(&app, upload_field("/conversations", "image", PNG).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn unknown_images_are_not_found() {
    let board = TestBoard::new().await;
    let app = test_app!(board);

    for uri in ["/images/0123456789abcdef0123456789abcdef.png", "/images/..%2Fsecret"] {
        let resp = test::call_service(&app, TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}
