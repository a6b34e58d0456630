#![allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::todo,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    missing_debug_implementations,
    clippy::cast_precision_loss,
    clippy::clone_on_ref_ptr,
    clippy::match_same_arms,
    clippy::items_after_statements,
    unreachable_pub,
    clippy::print_stdout,
    clippy::similar_names
)]
mod common;

use common::{TestApp, error_code, generate_username};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn test_request_accept_and_cancel() {
    let app = TestApp::spawn().await;
    let booking = app.book().await;
    let id = booking.appointment_id;

    let resp = app.get(&booking.requester.token, &format!("/appointments/{id}")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["status"], "pending");
    assert_eq!(view["date"], "2031-05-04");
    assert_eq!(view["time"], "14:30");
    assert_eq!(view["message"], "Is parking available?");

    // Only the responder decides on a pending request.
    let resp = app.transition(&booking.requester, id, "accepted").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = app.transition(&booking.responder, id, "accepted").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["status"], "accepted");

    // Repeating the same transition is a no-op rather than an error.
    let resp = app.transition(&booking.responder, id, "accepted").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.transition(&booking.responder, id, "cancelledByResponder").await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(resp).await, "reason_required");

    let resp = app
        .post(
            &booking.responder.token,
            &format!("/appointments/{id}/transitions"),
            &json!({"target": "cancelledByResponder", "reason": "Flat is no longer available"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["cancelReason"], "Flat is no longer available");

    let resp = app.transition(&booking.requester, id, "completed").await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(resp).await, "invalid_transition");
}

#[tokio::test]
async fn test_duplicate_active_request_is_rejected() {
    let app = TestApp::spawn().await;
    let requester = app.register_user(&generate_username("requester")).await;
    let responder = app.register_user(&generate_username("responder")).await;
    let listing_id = app.create_listing(&responder).await;

    assert_eq!(app.request_appointment(&requester, listing_id).await.status(), StatusCode::CREATED);

    let resp = app.request_appointment(&requester, listing_id).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(resp).await, "duplicate_active");

    // Booking your own listing is not a request.
    let resp = app.request_appointment(&responder, listing_id).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reinitiation_is_limited() {
    let app = TestApp::spawn().await;
    let booking = app.book().await;
    let id = booking.appointment_id;
    let cancel = json!({"target": "cancelledByRequester"});

    for round in 0..2 {
        assert_eq!(app.transition(&booking.responder, id, "accepted").await.status(), StatusCode::OK);
        let resp = app.post(&booking.requester.token, &format!("/appointments/{id}/transitions"), &cancel).await;
        assert_eq!(resp.status(), StatusCode::OK, "cancel in round {round}");

        let resp = app
            .post(
                &booking.requester.token,
                &format!("/appointments/{id}/reinitiate"),
                &json!({"date": "2031-06-01", "time": "09:00"}),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK, "reinitiate in round {round}");
        let view: Value = resp.json().await.unwrap();
        assert_eq!(view["status"], "pending");
        assert_eq!(view["date"], "2031-06-01");
        assert_eq!(view["requesterReinitiationCount"], round + 1);
    }

    assert_eq!(app.transition(&booking.responder, id, "accepted").await.status(), StatusCode::OK);
    app.post(&booking.requester.token, &format!("/appointments/{id}/transitions"), &cancel).await;

    let resp = app.post(&booking.requester.token, &format!("/appointments/{id}/reinitiate"), &json!({})).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(resp).await, "reinitiation_exhausted");
}

#[tokio::test]
async fn test_reschedule_needs_date_and_time() {
    let app = TestApp::spawn().await;
    let booking = app.book().await;
    let id = booking.appointment_id;

    app.transition(&booking.responder, id, "accepted").await;
    app.post(&booking.requester.token, &format!("/appointments/{id}/transitions"), &json!({"target": "cancelledByRequester"}))
        .await;

    let resp =
        app.post(&booking.requester.token, &format!("/appointments/{id}/reinitiate"), &json!({"date": "2031-06-01"})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_outsiders_cannot_see_appointments() {
    let app = TestApp::spawn().await;
    let booking = app.book().await;
    let outsider = app.register_user(&generate_username("outsider")).await;

    let resp = app.get(&outsider.token, &format!("/appointments/{}", booking.appointment_id)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.get(&outsider.token, "/appointments").await;
    let list: Vec<Value> = resp.json().await.unwrap();
    assert!(list.is_empty());

    let resp = app.get(&outsider.token, "/admin/appointments").await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_archive_and_remove_from_view() {
    let app = TestApp::spawn().await;
    let booking = app.book().await;
    let id = booking.appointment_id;

    let resp = app.post(&booking.requester.token, &format!("/appointments/{id}/archive"), &json!({})).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["archived"], true);

    let resp = app.delete(&booking.requester.token, &format!("/appointments/{id}/archive")).await;
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["archived"], false);

    // Still pending and upcoming: cannot be removed yet.
    let resp = app.delete(&booking.requester.token, &format!("/appointments/{id}/visibility")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = app.transition(&booking.responder, id, "rejected").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.delete(&booking.requester.token, &format!("/appointments/{id}/visibility")).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let list: Vec<Value> = app.get(&booking.requester.token, "/appointments").await.json().await.unwrap();
    assert!(list.is_empty());
    let resp = app.get(&booking.requester.token, &format!("/appointments/{id}")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // The other side still has it.
    let list: Vec<Value> = app.get(&booking.responder.token, "/appointments").await.json().await.unwrap();
    assert_eq!(list.len(), 1);
}

#[tokio::test]
async fn test_admin_moderation() {
    let app = TestApp::spawn().await;
    let booking = app.book().await;
    let admin = app.login_admin().await;
    let id = booking.appointment_id;

    let list: Vec<Value> = app.get(&admin.token, "/admin/appointments").await.json().await.unwrap();
    assert!(list.iter().any(|a| a["id"] == json!(id)));

    let resp = app.transition(&admin, id, "deletedByAdmin").await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = app
        .post(
            &admin.token,
            &format!("/appointments/{id}/transitions"),
            &json!({"target": "deletedByAdmin", "reason": "Fraudulent listing"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["status"], "deletedByAdmin");
    assert_eq!(view["adminReason"], "Fraudulent listing");

    // The chat of a removed appointment is read-only.
    let resp = app
        .post(&booking.requester.token, &format!("/appointments/{id}/messages"), &json!({"body": "hello?"}))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(resp).await, "chat_unavailable");
}

#[tokio::test]
async fn test_deleted_counterparty_blocks_reinitiation() {
    let app = TestApp::spawn().await;
    let booking = app.book().await;
    let id = booking.appointment_id;

    app.transition(&booking.responder, id, "accepted").await;
    app.post(&booking.requester.token, &format!("/appointments/{id}/transitions"), &json!({"target": "cancelledByRequester"}))
        .await;

    let resp = app.delete(&booking.responder.token, "/users/me").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app.post(&booking.requester.token, &format!("/appointments/{id}/reinitiate"), &json!({})).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(resp).await, "counterparty_missing");

    // The deleted account can no longer log in.
    let resp = app.get(&booking.responder.token, "/appointments").await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
