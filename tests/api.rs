mod common;

use common::{gallery_file, seed_image, seed_user, setup_app, spawn_server};
use facelens_backend::db::store;
use facelens_backend::pipeline::encoder::EncodeOutcome;
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn root_banner() {
    let app = setup_app();
    let base = spawn_server(app.state.clone()).await;

    let body: serde_json::Value = reqwest::get(format!("{base}/api/")).await.unwrap().json().await.unwrap();
    assert_eq!(body["message"], "Event Photo Face Recognition API");
}

#[tokio::test]
async fn register_then_fetch_gallery_and_qrcode() {
    let app = setup_app();
    app.encoder.set_registration(Some(vec![0.1, 0.2]));
    let base = spawn_server(app.state.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/register"))
        .json(&serde_json::json!({
            "name": "Ana",
            "email": "ana@example.com",
            "phone": "555-0100",
            "face_image_data": "data:image/jpeg;base64,aGVsbG8=",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    let gallery_id = body["gallery_id"].as_str().unwrap().to_string();
    assert_eq!(gallery_id.len(), 8);

    // Registration eagerly creates the (empty) gallery directory.
    assert!(app.state.paths.users.join(&gallery_id).is_dir());

    let gallery: serde_json::Value = client
        .get(format!("{base}/api/gallery/{gallery_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(gallery["user_name"], "Ana");
    assert_eq!(gallery["images"].as_array().unwrap().len(), 0);

    let qr = client.get(format!("{base}/api/qrcode/{gallery_id}")).send().await.unwrap();
    assert_eq!(qr.status(), 200);
    assert_eq!(qr.headers()["content-type"], "image/png");
    let png = qr.bytes().await.unwrap();
    assert_eq!(&png[..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
}

#[tokio::test]
async fn register_rejects_faceless_and_duplicate() {
    let app = setup_app();
    let base = spawn_server(app.state.clone()).await;
    let client = reqwest::Client::new();
    let payload = |email: &str| {
        serde_json::json!({
            "name": "Ana",
            "email": email,
            "phone": "555-0100",
            "face_image_data": "aGVsbG8=",
        })
    };

    // No face detected (stub registration unset).
    let resp = client.post(format!("{base}/api/register")).json(&payload("ana@example.com")).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("No face detected"));

    // Duplicate email.
    app.encoder.set_registration(Some(vec![0.1, 0.2]));
    let resp = client.post(format!("{base}/api/register")).json(&payload("ana@example.com")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client.post(format!("{base}/api/register")).json(&payload("ana@example.com")).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // Garbage base64.
    let resp = client
        .post(format!("{base}/api/register"))
        .json(&serde_json::json!({
            "name": "Ana",
            "email": "other@example.com",
            "phone": "555-0100",
            "face_image_data": "not!!valid!!base64",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn gallery_of_unknown_id_is_404() {
    let app = setup_app();
    let base = spawn_server(app.state.clone()).await;
    let resp = reqwest::get(format!("{base}/api/gallery/deadbeef")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn admin_login_bootstraps_default_account() {
    let app = setup_app();
    let base = spawn_server(app.state.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/admin/login"))
        .json(&serde_json::json!({ "email": "admin@event.com", "password": "admin123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    let resp = client
        .post(format!("{base}/api/admin/login"))
        .json(&serde_json::json!({ "email": "admin@event.com", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/api/admin/login"))
        .json(&serde_json::json!({ "email": "who@event.com", "password": "admin123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn upload_process_and_serve_end_to_end() {
    let app = setup_app();
    let user = seed_user(&app, "Ana", vec![0.0, 0.0]);
    app.encoder.set_file("party.jpg", EncodeOutcome::Faces(vec![vec![0.3, 0.0]]));
    let base = spawn_server(app.state.clone()).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new().part(
        "files",
        reqwest::multipart::Part::bytes(b"jpeg-bytes".to_vec()).file_name("party.jpg"),
    );
    let resp = client.post(format!("{base}/api/admin/upload")).multipart(form).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["uploaded_count"], 1);
    assert!(app.state.paths.original.join("party.jpg").is_file());

    let stats: serde_json::Value =
        client.get(format!("{base}/api/admin/stats")).send().await.unwrap().json().await.unwrap();
    assert_eq!(stats["total_images"], 1);
    assert_eq!(stats["pending_images"], 1);

    let resp = client.post(format!("{base}/api/admin/process")).send().await.unwrap();
    assert_eq!(resp.status(), 202);

    // The pass runs in the background; poll until the backlog drains.
    for _ in 0..50 {
        let stats: serde_json::Value =
            client.get(format!("{base}/api/admin/stats")).send().await.unwrap().json().await.unwrap();
        if stats["pending_images"] == 0 {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    let gallery: serde_json::Value = client
        .get(format!("{base}/api/gallery/{}", user.gallery_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let images = gallery["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["filename"], "party.jpg");

    let resp = client
        .get(format!("{base}/api/image/{}/party.jpg", user.gallery_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"jpeg-bytes");

    // The admin alias serves the original upload.
    let resp = client.get(format!("{base}/api/image/admin/party.jpg")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let listing: serde_json::Value =
        client.get(format!("{base}/api/admin/images")).send().await.unwrap().json().await.unwrap();
    let listed = listing.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["processed"], true);
    assert_eq!(listed[0]["user_matches"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admin_users_listing_redacts_embeddings() {
    let app = setup_app();
    seed_user(&app, "Ana", vec![0.5, 0.5]);
    let base = spawn_server(app.state.clone()).await;

    let users: serde_json::Value =
        reqwest::get(format!("{base}/api/admin/users")).await.unwrap().json().await.unwrap();
    let users = users.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["name"], "Ana");
    assert!(users[0].get("embedding").is_none());
}

#[tokio::test]
async fn delete_user_cascades_gallery_and_matches() {
    let app = setup_app();
    let user = seed_user(&app, "Ana", vec![0.0, 0.0]);
    let image = seed_image(&app, "party.jpg");
    app.encoder.set_file("party.jpg", EncodeOutcome::Faces(vec![vec![0.1, 0.0]]));
    app.state.reconciler().run_pass().unwrap();
    assert!(gallery_file(&app, &user.gallery_id, "party.jpg").is_file());

    let base = spawn_server(app.state.clone()).await;
    let client = reqwest::Client::new();
    let resp = client.delete(format!("{base}/api/admin/user/{}", user.id)).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    assert!(!app.state.paths.users.join(&user.gallery_id).exists());
    let conn = app.state.pool.get().unwrap();
    assert!(store::find_user_by_id(&conn, &user.id).unwrap().is_none());
    let found = store::find_image_by_id(&conn, &image.id).unwrap().unwrap();
    assert!(found.user_matches.is_empty());
    drop(conn);

    let resp = client.delete(format!("{base}/api/admin/user/{}", user.id)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn delete_image_cascades_original_and_copies() {
    let app = setup_app();
    let user = seed_user(&app, "Ana", vec![0.0, 0.0]);
    let image = seed_image(&app, "party.jpg");
    app.encoder.set_file("party.jpg", EncodeOutcome::Faces(vec![vec![0.1, 0.0]]));
    app.state.reconciler().run_pass().unwrap();

    let base = spawn_server(app.state.clone()).await;
    let client = reqwest::Client::new();
    let resp = client.delete(format!("{base}/api/admin/image/{}", image.id)).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    assert!(!app.state.paths.original.join("party.jpg").exists());
    assert!(!gallery_file(&app, &user.gallery_id, "party.jpg").exists());
    let conn = app.state.pool.get().unwrap();
    assert!(store::find_image_by_id(&conn, &image.id).unwrap().is_none());
}

#[tokio::test]
async fn repair_endpoint_restores_invariant() {
    let app = setup_app();
    let user = seed_user(&app, "Ana", vec![0.0, 0.0]);
    seed_image(&app, "party.jpg");
    app.encoder.set_file("party.jpg", EncodeOutcome::Faces(vec![vec![0.1, 0.0]]));
    app.state.reconciler().run_pass().unwrap();
    std::fs::remove_file(gallery_file(&app, &user.gallery_id, "party.jpg")).unwrap();

    let base = spawn_server(app.state.clone()).await;
    let client = reqwest::Client::new();
    let resp = client.post(format!("{base}/api/admin/repair")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["repair"]["restored"], 1);
    assert!(gallery_file(&app, &user.gallery_id, "party.jpg").is_file());
}
