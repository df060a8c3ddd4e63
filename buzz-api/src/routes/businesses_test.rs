//! HTTP-level tests for the business directory

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use buzz_core::coupon::{CouponIssue, CouponRepository, CouponTemplate, DiscountKind};

    use crate::config::ApiConfig;
    use crate::middleware::auth::Role;
    use crate::routes;
    use crate::state::AppState;

    fn test_config() -> ApiConfig {
        ApiConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            qr_signing_key: "test-qr-signing-key".to_string(),
            payout_lead_days: 7,
            notify_webhook_url: None,
        }
    }

    fn setup() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::in_memory(test_config()));
        (routes::router(state.clone()), state)
    }

    fn bearer(state: &AppState, user_id: Uuid, role: Role, business_id: Option<Uuid>) -> String {
        let token = state
            .auth
            .generate_token(user_id, role, business_id)
            .unwrap();
        format!("Bearer {}", token)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("authorization", token)
            .body(Body::empty())
            .unwrap()
    }

    fn post(uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("authorization", token)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn register(app: &Router, admin: &str, name: &str) -> Uuid {
        let (status, body) = send(
            app.clone(),
            post(
                "/v1/admin/businesses",
                admin,
                json!({"name": name, "category": "cafe"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn registration_requires_the_admin_role() {
        let (app, state) = setup();
        let user = bearer(&state, Uuid::new_v4(), Role::User, None);

        let (status, body) = send(
            app,
            post("/v1/admin/businesses", &user, json!({"name": "Cafe Dalgona"})),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn a_name_is_required() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);

        let (status, body) = send(
            app,
            post("/v1/admin/businesses", &admin, json!({"name": "   "})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn registered_businesses_appear_in_the_directory() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);

        let first = register(&app, &admin, "Cafe Dalgona").await;
        let second = register(&app, &admin, "Book Nook").await;

        let (status, listed) = send(app, get("/v1/admin/businesses", &admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["totalCount"], 2);

        let businesses = listed["businesses"].as_array().unwrap();
        let ids: Vec<&str> = businesses
            .iter()
            .map(|b| b["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&first.to_string().as_str()));
        assert!(ids.contains(&second.to_string().as_str()));
        for business in businesses {
            assert_eq!(business["status"], "active");
            assert_eq!(business["scanCount"], 0);
            assert_eq!(business["category"], "cafe");
        }
    }

    #[tokio::test]
    async fn the_status_filter_splits_the_directory() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);

        let suspended = register(&app, &admin, "Cafe Dalgona").await;
        register(&app, &admin, "Book Nook").await;

        let (status, updated) = send(
            app.clone(),
            post(
                &format!("/v1/admin/businesses/{}/status", suspended),
                &admin,
                json!({"status": "suspended"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "suspended");

        let (_, listed) = send(
            app.clone(),
            get("/v1/admin/businesses?status=suspended", &admin),
        )
        .await;
        assert_eq!(listed["totalCount"], 1);
        assert_eq!(listed["businesses"][0]["name"], "Cafe Dalgona");

        let (_, listed) = send(app, get("/v1/admin/businesses?status=active", &admin)).await;
        assert_eq!(listed["totalCount"], 1);
        assert_eq!(listed["businesses"][0]["name"], "Book Nook");
    }

    #[tokio::test]
    async fn bad_status_changes_are_rejected() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let business_id = register(&app, &admin, "Cafe Dalgona").await;

        let (status, body) = send(
            app.clone(),
            post(
                &format!("/v1/admin/businesses/{}/status", business_id),
                &admin,
                json!({"status": "frozen"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, body) = send(
            app,
            post(
                &format!("/v1/admin/businesses/{}/status", Uuid::new_v4()),
                &admin,
                json!({"status": "suspended"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn redemptions_bump_the_scan_counter() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let business_id = register(&app, &admin, "Cafe Dalgona").await;
        let business = bearer(&state, Uuid::new_v4(), Role::Business, Some(business_id));

        let now = Utc::now();
        let template = CouponTemplate {
            id: Uuid::new_v4(),
            name: "1000 off".to_string(),
            description: None,
            discount_kind: DiscountKind::Fixed,
            discount_value: Decimal::from(1000),
            min_purchase_amount: Decimal::ZERO,
            max_discount_amount: None,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(30),
            validity_days: None,
            total_quantity: None,
            used_quantity: 0,
            applicable_businesses: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.coupons.create_template(&template).await.unwrap();
        let coupon_id = Uuid::new_v4();
        let issue = CouponIssue {
            id: coupon_id,
            user_id: Uuid::new_v4(),
            template_id: template.id,
            qr_code_data: state.qr.issue_coupon(&coupon_id).unwrap(),
            expires_at: now + Duration::days(30),
        };
        state.coupons.issue(&issue, now).await.unwrap();

        let (status, _) = send(
            app.clone(),
            post(
                "/v1/coupons/use",
                &business,
                json!({
                    "qrCode": issue.qr_code_data,
                    "purchaseAmount": 5000,
                    "businessId": business_id,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, listed) = send(app, get("/v1/admin/businesses", &admin)).await;
        let entry = listed["businesses"]
            .as_array()
            .unwrap()
            .iter()
            .find(|b| b["id"].as_str().unwrap() == business_id.to_string())
            .unwrap();
        assert_eq!(entry["scanCount"], 1);
    }
}
